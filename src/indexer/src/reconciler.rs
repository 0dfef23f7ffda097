//! Application of storage change notifications to the location index.

use common::{MalformedKeyError, ObjectRef, SubjectId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::location_index::{IndexError, LocationIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Create,
    Delete,
}

/// A storage change notification: `{ objectKey, eventKind }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    pub object_key: String,
    pub event_kind: EventKind,
}

impl StorageEvent {
    pub fn create(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            event_kind: EventKind::Create,
        }
    }

    pub fn delete(object_key: impl Into<String>) -> Self {
        Self {
            object_key: object_key.into(),
            event_kind: EventKind::Delete,
        }
    }
}

#[derive(Debug, Deserialize)]
struct S3Notification {
    #[serde(rename = "Records")]
    records: Vec<S3Record>,
}

#[derive(Debug, Deserialize)]
struct S3Record {
    #[serde(rename = "eventName")]
    event_name: String,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Notification {
    S3(S3Notification),
    Batch(Vec<StorageEvent>),
    Single(StorageEvent),
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Unrecognised notification payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a notification payload.
///
/// Accepts a single event, an array of events, or an S3 event envelope
/// whose records carry URL-encoded keys.
pub fn parse_notification(payload: &[u8]) -> Result<Vec<StorageEvent>, NotificationError> {
    let events = match serde_json::from_slice::<Notification>(payload)? {
        Notification::Single(event) => vec![event],
        Notification::Batch(events) => events,
        Notification::S3(notification) => notification
            .records
            .into_iter()
            .filter_map(s3_record_to_event)
            .collect(),
    };
    Ok(events)
}

fn s3_record_to_event(record: S3Record) -> Option<StorageEvent> {
    let event_kind = if record.event_name.contains("Created") {
        EventKind::Create
    } else if record.event_name.contains("Removed") || record.event_name.contains("Delete") {
        EventKind::Delete
    } else {
        tracing::warn!(
            event_name = %record.event_name,
            key = %record.s3.object.key,
            "Ignoring unsupported S3 event"
        );
        return None;
    };

    // S3 encodes spaces as '+' before percent-encoding the rest
    let raw_key = record.s3.object.key.replace('+', " ");
    let key = match urlencoding::decode(&raw_key) {
        Ok(key) => key.into_owned(),
        Err(e) => {
            tracing::warn!(
                key = %record.s3.object.key,
                error = %e,
                "Dropping S3 record with undecodable key"
            );
            return None;
        }
    };

    Some(StorageEvent {
        object_key: format!("s3://{}/{}", record.s3.bucket.name, key),
        event_kind,
    })
}

/// Derives the owning subject from an object's key.
///
/// The subject is the first `delimiter`-separated token of the key's final
/// path segment: `s3://bucket/path/42-report.csv` belongs to `42`.
#[derive(Debug, Clone)]
pub struct NamingConvention {
    delimiter: String,
}

impl NamingConvention {
    pub fn new(delimiter: impl Into<String>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }

    pub fn subject_for(&self, location: &ObjectRef) -> Result<SubjectId, MalformedKeyError> {
        let segment = location.final_segment();
        match segment.split_once(self.delimiter.as_str()) {
            Some((subject, _)) if !subject.is_empty() => Ok(SubjectId::new(subject)),
            Some(_) => Err(MalformedKeyError::new(
                location.to_string(),
                format!("final segment '{segment}' has an empty subject token"),
            )),
            None => Err(MalformedKeyError::new(
                location.to_string(),
                format!(
                    "final segment '{segment}' does not contain delimiter '{}'",
                    self.delimiter
                ),
            )),
        }
    }
}

impl Default for NamingConvention {
    fn default() -> Self {
        Self::new("-")
    }
}

/// What applying one event did to the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Added(SubjectId),
    /// Duplicate Create for a tracked location
    AlreadyTracked(SubjectId),
    Removed(SubjectId),
    /// Delete for a location the index does not hold
    NotTracked(SubjectId),
    /// The key does not follow the naming convention
    Dropped(MalformedKeyError),
}

/// Tally of a reconciled notification stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub added: usize,
    pub already_tracked: usize,
    pub removed: usize,
    pub not_tracked: usize,
    pub dropped: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: &ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Added(_) => self.added += 1,
            ReconcileOutcome::AlreadyTracked(_) => self.already_tracked += 1,
            ReconcileOutcome::Removed(_) => self.removed += 1,
            ReconcileOutcome::NotTracked(_) => self.not_tracked += 1,
            ReconcileOutcome::Dropped(_) => self.dropped += 1,
        }
    }
}

/// Applies storage events to a [`LocationIndex`].
///
/// Safe to re-run over a redelivered stream: a duplicate Create finds the
/// location already tracked and a Delete for an unknown location is a no-op.
pub struct EventReconciler {
    index: Arc<dyn LocationIndex>,
    naming: NamingConvention,
}

impl EventReconciler {
    pub fn new(index: Arc<dyn LocationIndex>, naming: NamingConvention) -> Self {
        Self { index, naming }
    }

    /// Apply one event.
    ///
    /// Malformed keys are logged and reported as [`ReconcileOutcome::Dropped`];
    /// index failures are returned to the caller.
    pub async fn apply(&self, event: &StorageEvent) -> Result<ReconcileOutcome, IndexError> {
        let (location, subject) = match self.resolve(&event.object_key) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    key = %event.object_key,
                    error = %e,
                    "Dropping event with malformed key"
                );
                return Ok(ReconcileOutcome::Dropped(e));
            }
        };

        let tracked = self.index.contains(&subject, &location).await?;

        let outcome = match (event.event_kind, tracked) {
            (EventKind::Create, true) => {
                tracing::debug!(
                    subject = %subject,
                    location = %location,
                    "Location already tracked"
                );
                ReconcileOutcome::AlreadyTracked(subject)
            }
            (EventKind::Create, false) => {
                self.index.add(&subject, &location).await?;
                tracing::info!(subject = %subject, location = %location, "Location added");
                ReconcileOutcome::Added(subject)
            }
            (EventKind::Delete, true) => {
                self.index.remove(&subject, &location).await?;
                tracing::info!(subject = %subject, location = %location, "Location removed");
                ReconcileOutcome::Removed(subject)
            }
            (EventKind::Delete, false) => {
                tracing::warn!(
                    subject = %subject,
                    location = %location,
                    "Delete for untracked location, ignoring"
                );
                ReconcileOutcome::NotTracked(subject)
            }
        };
        Ok(outcome)
    }

    /// Apply events in delivery order, stopping at the first index failure.
    pub async fn apply_all(&self, events: &[StorageEvent]) -> Result<ReconcileSummary, IndexError> {
        let mut summary = ReconcileSummary::default();
        for event in events {
            let outcome = self.apply(event).await?;
            summary.record(&outcome);
        }
        tracing::info!(
            events = events.len(),
            added = summary.added,
            already_tracked = summary.already_tracked,
            removed = summary.removed,
            not_tracked = summary.not_tracked,
            dropped = summary.dropped,
            "Reconciled notification batch"
        );
        Ok(summary)
    }

    fn resolve(&self, object_key: &str) -> Result<(ObjectRef, SubjectId), MalformedKeyError> {
        let location = ObjectRef::parse(object_key)?;
        let subject = self.naming.subject_for(&location)?;
        Ok((location, subject))
    }
}
