//! JSON frame encoding shared by both transports

use crate::error::{Result, TransportError};
use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| TransportError::codec("failed to encode frame", e))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload).map_err(|e| TransportError::codec("failed to decode frame", e))
}
