//! # Typed String Keys
//!
//! Zero-cost wrappers that keep actor keys, agent keys and transport endpoints
//! from being mixed up at compile time. All three are value-equal strings,
//! usable as map keys, and serialize transparently so they travel over any
//! transport as plain JSON strings.
//!
//! ```rust
//! use types::{ActorKey, AgentKey};
//!
//! let actor = ActorKey::new("producer-1");
//! let agent = AgentKey::new("agent-eu-1");
//!
//! fn place(actor: &ActorKey, agent: &AgentKey) { /* ... */ }
//!
//! place(&actor, &agent); // ✅
//! // place(&agent, &actor); // ❌ Compile error!
//! ```

use crate::common::errors::ValidationError;

/// Macro to define a string-backed typed key
///
/// Generates a newtype over `String` with construction, validation, borrowing
/// accessors, `Display`, `From` conversions and transparent serde support.
#[macro_export]
macro_rules! define_string_key {
    (
        $(#[$meta:meta])*
        $name:ident, $label:literal
    ) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            serde::Serialize,
            serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new key without validation
            #[inline]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Create a new key, rejecting empty or whitespace-only values
            #[inline]
            pub fn new_validated(
                value: impl Into<String>,
            ) -> Result<Self, $crate::common::errors::ValidationError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err($crate::common::errors::ValidationError::EmptyKey { kind: $label });
                }
                Ok(Self(value))
            }

            /// Borrow the key as a string slice
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Extract the inner string
            #[inline]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether the key is empty (never valid on the wire)
            #[inline]
            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_key!(
    /// Unique identity of an actor across the whole cluster
    ActorKey, "actor"
);

define_string_key!(
    /// Unique identity of an agent (one per worker process)
    AgentKey, "agent"
);

define_string_key!(
    /// Opaque transport address of a cluster member
    ///
    /// Only used to correlate membership loss with the registry entries the
    /// member created.
    Endpoint, "endpoint"
);

impl ActorKey {
    /// Name of the point-to-point channel carrying this actor's input
    pub fn channel_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }
}

/// Validate a key that arrived from untrusted configuration
pub fn require_key<K: AsRef<str>>(key: &K, kind: &'static str) -> Result<(), ValidationError> {
    if key.as_ref().trim().is_empty() {
        Err(ValidationError::EmptyKey { kind })
    } else {
        Ok(())
    }
}
