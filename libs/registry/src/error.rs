//! Registry error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    /// The same listener instance was added twice
    #[error("listener is already registered with the {registry} registry")]
    DuplicateListener { registry: &'static str },

    /// A state snapshot could not be encoded or decoded
    #[error("{registry} registry snapshot error: {source}")]
    Snapshot {
        registry: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl RegistryError {
    pub fn duplicate_listener(registry: &'static str) -> Self {
        Self::DuplicateListener { registry }
    }

    pub fn snapshot(registry: &'static str, source: serde_json::Error) -> Self {
        Self::Snapshot { registry, source }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;
