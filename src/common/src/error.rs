use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category reported for a location in a purge result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The owning subject or object path could not be derived from a reference
    #[serde(rename = "MalformedKeyError")]
    MalformedKey,
    /// The location index or offset store was unavailable
    #[serde(rename = "LocationIndexError")]
    LocationIndex,
    /// A shared object could not be read or its rewrite could not be written
    #[serde(rename = "RedactionIOError")]
    RedactionIo,
    /// A whole object could not be deleted
    #[serde(rename = "StorageDeleteError")]
    StorageDelete,
    /// The underlying data store connection failed
    #[serde(rename = "ConnectionError")]
    Connection,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedKey => "MalformedKeyError",
            ErrorKind::LocationIndex => "LocationIndexError",
            ErrorKind::RedactionIo => "RedactionIOError",
            ErrorKind::StorageDelete => "StorageDeleteError",
            ErrorKind::Connection => "ConnectionError",
        };
        f.write_str(name)
    }
}

/// An object reference or key does not follow the naming convention.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Malformed key '{key}': {reason}")]
pub struct MalformedKeyError {
    pub key: String,
    pub reason: String,
}

impl MalformedKeyError {
    pub fn new(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Failure to establish or initialise a data store connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to connect to database '{dsn}': {source}")]
    Database {
        dsn: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to initialize schema: {0}")]
    Schema(#[source] sqlx::Error),

    #[error("Invalid storage DSN '{dsn}': {reason}")]
    StorageDsn { dsn: String, reason: String },

    #[error("Failed to build object store for '{dsn}': {source}")]
    ObjectStore {
        dsn: String,
        #[source]
        source: object_store::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_names() {
        let kinds = [
            ErrorKind::MalformedKey,
            ErrorKind::LocationIndex,
            ErrorKind::RedactionIo,
            ErrorKind::StorageDelete,
            ErrorKind::Connection,
        ];
        let json = serde_json::to_string(&kinds).unwrap();
        assert_eq!(
            json,
            r#"["MalformedKeyError","LocationIndexError","RedactionIOError","StorageDeleteError","ConnectionError"]"#
        );

        for kind in kinds {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }

    #[test]
    fn test_malformed_key_message() {
        let err = MalformedKeyError::new("s3://bucket/", "empty final path segment");
        assert_eq!(
            err.to_string(),
            "Malformed key 's3://bucket/': empty final path segment"
        );
    }
}
