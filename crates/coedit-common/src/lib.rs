//! Shared identifiers and clock helpers for Coedit
//!
//! Identifier rules:
//! - opaque, non-empty, matching `[A-Za-z0-9_-]+`
//! - server-minted client ids look like `client-<ms>-<rand36>`
//! - operation ids are UUIDv4

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Check the `[A-Za-z0-9_-]+` identifier grammar.
pub fn validate_id(raw: &str) -> Result<(), IdError> {
    if raw.is_empty() {
        return Err(IdError::Empty);
    }
    for c in raw.chars() {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(IdError::InvalidChar(c));
        }
    }
    Ok(())
}

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap a raw identifier.
            pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
                let raw = raw.into();
                validate_id(&raw)?;
                Ok(Self(raw))
            }

            /// Wrap without validation. Reserved for identifiers this
            /// process minted itself.
            pub fn new_unchecked(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

id_type!(
    /// Identifies one document on the coordinator.
    DocumentId
);
id_type!(
    /// Identifies one connected client.
    ClientId
);
id_type!(
    /// Identifies one operation, unique per author.
    OperationId
);

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

fn rand36(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| BASE36[rng.random_range(0..BASE36.len())] as char)
        .collect()
}

/// Mint a coordinator-assigned client id: `client-<ms>-<rand36>`.
pub fn mint_client_id() -> ClientId {
    ClientId::new_unchecked(format!("client-{}-{}", now_ms(), rand36(8)))
}

/// Mint a fresh operation id.
pub fn mint_operation_id() -> OperationId {
    OperationId::new_unchecked(uuid::Uuid::new_v4().simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_id_grammar() {
        assert!(validate_id("doc-1").is_ok());
        assert!(validate_id("A_b-9").is_ok());
        assert!(validate_id("client-1700000000000-a1b2c3d4").is_ok());
    }

    #[test]
    fn rejects_bad_ids() {
        assert_eq!(validate_id(""), Err(IdError::Empty));
        assert_eq!(validate_id("a b"), Err(IdError::InvalidChar(' ')));
        assert_eq!(validate_id("doc/1"), Err(IdError::InvalidChar('/')));
    }

    #[test]
    fn minted_ids_validate() {
        let client = mint_client_id();
        assert!(validate_id(client.as_str()).is_ok());
        assert!(client.as_str().starts_with("client-"));

        let op = mint_operation_id();
        assert!(validate_id(op.as_str()).is_ok());
    }

    #[test]
    fn id_serde_is_transparent() {
        let id = DocumentId::parse("doc-1").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"doc-1\"");
        let back: DocumentId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
