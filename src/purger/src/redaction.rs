//! In-place line redaction of shared objects.
//!
//! Redacted lines are replaced by a tombstone rather than removed, so the
//! rewritten object has the same line count and every other subject's
//! recorded offsets stay valid.

use bytes::{BufMut, Bytes, BytesMut};
use common::config::RedactionConfig;
use common::lines::LineReader;
use common::{ErrorKind, ObjectRef, Storage, StorageError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RedactionError {
    #[error("Failed to read {object} for redaction: {source}")]
    Read {
        object: String,
        #[source]
        source: StorageError,
    },

    #[error("Failed to write redacted object {object}: {source}")]
    Write {
        object: String,
        #[source]
        source: StorageError,
    },
}

impl RedactionError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::RedactionIo
    }

    /// A missing source will not appear on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            RedactionError::Read { source, .. } => !source.is_not_found(),
            RedactionError::Write { .. } => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactionOutcome {
    /// Object the content was read from
    pub read_from: ObjectRef,
    /// Object the rewritten content was written to
    pub destination: ObjectRef,
    /// Line count, identical for input and output
    pub lines: u64,
    /// Lines replaced by the tombstone
    pub redacted: u64,
    /// Requested offsets at or beyond the last line
    pub unmatched_offsets: BTreeSet<u64>,
}

pub struct RedactionEngine {
    storage: Arc<dyn Storage>,
    tombstone: Bytes,
    destination_bucket: Option<String>,
}

impl RedactionEngine {
    pub fn new(storage: Arc<dyn Storage>, config: &RedactionConfig) -> Self {
        Self {
            storage,
            tombstone: Bytes::from(config.tombstone.clone()),
            destination_bucket: config.destination_bucket.clone(),
        }
    }

    /// Where the rewrite of `object` lands: the same key, either in place or
    /// in the configured destination bucket.
    pub fn destination_for(&self, object: &ObjectRef) -> ObjectRef {
        match &self.destination_bucket {
            Some(bucket) => object.with_bucket(bucket.as_str()),
            None => object.clone(),
        }
    }

    /// Redact `offsets` of `object` following the destination policy.
    ///
    /// With a separate destination an existing destination copy is the read
    /// source, so successive purges accumulate their tombstones.
    pub async fn redact(
        &self,
        object: &ObjectRef,
        offsets: &BTreeSet<u64>,
    ) -> Result<RedactionOutcome, RedactionError> {
        let destination = self.destination_for(object);
        if destination != *object {
            match self.storage.get(&destination).await {
                Ok(stream) => {
                    return self
                        .rewrite(LineReader::new(stream), &destination, offsets, &destination)
                        .await;
                }
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(RedactionError::Read {
                        object: destination.to_string(),
                        source,
                    });
                }
            }
        }
        self.redact_to(object, offsets, &destination).await
    }

    /// Read `source`, replace the lines at `offsets` with the tombstone and
    /// write the result to `destination` in a single put.
    pub async fn redact_to(
        &self,
        source: &ObjectRef,
        offsets: &BTreeSet<u64>,
        destination: &ObjectRef,
    ) -> Result<RedactionOutcome, RedactionError> {
        let stream = self
            .storage
            .get(source)
            .await
            .map_err(|source_error| RedactionError::Read {
                object: source.to_string(),
                source: source_error,
            })?;
        self.rewrite(LineReader::new(stream), source, offsets, destination)
            .await
    }

    async fn rewrite(
        &self,
        mut reader: LineReader,
        read_from: &ObjectRef,
        offsets: &BTreeSet<u64>,
        destination: &ObjectRef,
    ) -> Result<RedactionOutcome, RedactionError> {
        let read_error = |source: StorageError| RedactionError::Read {
            object: read_from.to_string(),
            source,
        };
        let mut output = BytesMut::new();
        let mut lines = 0u64;
        let mut redacted = 0u64;

        while let Some(line) = reader.next_line().await.map_err(read_error)? {
            if offsets.contains(&lines) {
                output.put_slice(&self.tombstone);
                redacted += 1;
            } else {
                output.put_slice(&line.content);
            }
            output.put_slice(line.terminator.as_bytes());
            lines += 1;
        }

        let unmatched_offsets: BTreeSet<u64> = offsets.range(lines..).copied().collect();
        if !unmatched_offsets.is_empty() {
            tracing::warn!(
                object = %read_from,
                lines,
                unmatched = ?unmatched_offsets,
                "Ignoring offsets beyond the last line"
            );
        }

        let outcome = RedactionOutcome {
            read_from: read_from.clone(),
            destination: destination.clone(),
            lines,
            redacted,
            unmatched_offsets,
        };

        if redacted == 0 && read_from == destination {
            tracing::debug!(object = %read_from, "No lines to redact, leaving object untouched");
            return Ok(outcome);
        }

        self.storage
            .put(destination, output.freeze())
            .await
            .map_err(|source| RedactionError::Write {
                object: destination.to_string(),
                source,
            })?;

        tracing::info!(
            object = %read_from,
            destination = %destination,
            lines,
            redacted,
            "Redacted shared object"
        );
        Ok(outcome)
    }
}
