//! Execution of approved purge reports.
//!
//! Works from the report snapshot only. Each location is attempted on its
//! own: a failed delete or redaction is recorded in the result and never
//! stops the other locations of the subject or the other subjects.

use common::config::PurgeConfig;
use common::model::{
    FailedLocation, LineLocation, PurgeReport, PurgeResult, PurgedLocation, ReportEntry,
    SubjectOutcome,
};
use common::retry::retry_with_backoff;
use common::{ErrorKind, ObjectRef, Storage, StorageError, SubjectId};
use futures::future::join_all;
use futures::{StreamExt, stream};
use indexer::{IndexError, LocationIndex, OffsetStoreError, RowOffsetStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::metrics::PurgeMetrics;
use crate::redaction::{RedactionEngine, RedactionError};

/// Outcome of redacting one shared object, shared by every subject with
/// lines in it
type RedactionResults = HashMap<ObjectRef, Result<(), String>>;

pub struct PurgeExecutor {
    storage: Arc<dyn Storage>,
    index: Arc<dyn LocationIndex>,
    offsets: Arc<dyn RowOffsetStore>,
    redaction: RedactionEngine,
    config: PurgeConfig,
    metrics: PurgeMetrics,
}

impl PurgeExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        index: Arc<dyn LocationIndex>,
        offsets: Arc<dyn RowOffsetStore>,
        redaction: RedactionEngine,
        config: PurgeConfig,
    ) -> Self {
        Self {
            storage,
            index,
            offsets,
            redaction,
            config,
            metrics: PurgeMetrics::new(),
        }
    }

    pub fn metrics(&self) -> &PurgeMetrics {
        &self.metrics
    }

    /// Purge every location of the report.
    ///
    /// Shared objects are rewritten once with the union of all subjects'
    /// offsets before the subjects are processed in parallel.
    pub async fn execute(&self, report: &PurgeReport) -> PurgeResult {
        tracing::info!(
            subjects = report.len(),
            concurrency = self.config.concurrency,
            dry_run = self.config.dry_run,
            "Starting purge run"
        );

        let redactions = self.redact_shared_objects(report).await;

        let subjects = stream::iter(report.entries())
            .map(|entry| self.purge_subject(entry, &redactions))
            .buffered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        self.metrics.summary().log();
        PurgeResult { subjects }
    }

    async fn redact_shared_objects(&self, report: &PurgeReport) -> RedactionResults {
        let mut plan: BTreeMap<&ObjectRef, BTreeSet<u64>> = BTreeMap::new();
        for location in report.entries().iter().flat_map(|e| &e.line_locations) {
            plan.entry(&location.object_ref)
                .or_default()
                .extend(location.offsets.iter().copied());
        }

        stream::iter(plan)
            .map(|(object, offsets)| async move {
                let result = self.redact_object(object, &offsets).await;
                (object.clone(), result)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await
    }

    async fn redact_object(
        &self,
        object: &ObjectRef,
        offsets: &BTreeSet<u64>,
    ) -> Result<(), String> {
        if self.config.dry_run {
            tracing::info!(
                object = %object,
                destination = %self.redaction.destination_for(object),
                lines = offsets.len(),
                "[DRY-RUN] Would redact shared object"
            );
            return Ok(());
        }

        let retried = retry_with_backoff(
            &self.config.retry,
            "redact shared object",
            RedactionError::is_transient,
            || self.redaction.redact(object, offsets),
        )
        .await;
        self.metrics.record_retries(retried.attempts);

        match retried.result {
            Ok(outcome) => {
                self.metrics.record_object_redacted(outcome.redacted);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    object = %object,
                    error = %e,
                    "Failed to redact shared object"
                );
                Err(e.to_string())
            }
        }
    }

    async fn purge_subject(
        &self,
        entry: &ReportEntry,
        redactions: &RedactionResults,
    ) -> SubjectOutcome {
        let subject = &entry.subject_id;
        self.metrics.record_subject_start();
        tracing::debug!(
            subject = %subject,
            objects = entry.whole_object_locations.len(),
            line_locations = entry.line_locations.len(),
            "Purging subject"
        );

        let objects = join_all(
            entry
                .whole_object_locations
                .iter()
                .map(|object| self.purge_object(subject, object)),
        );
        let lines = join_all(
            entry
                .line_locations
                .iter()
                .map(|location| self.purge_lines(subject, location, redactions)),
        );
        let (objects, lines) = futures::join!(objects, lines);

        let mut outcome = SubjectOutcome::new(subject.clone());
        for result in objects.into_iter().chain(lines) {
            match result {
                Ok(location) => outcome.record_purged(location),
                Err(failed) => {
                    self.metrics.record_location_failure();
                    outcome.record_failed(failed.location, failed.error_kind, failed.message);
                }
            }
        }

        if outcome.failed_locations.is_empty() {
            self.delete_entry(subject).await;
        } else {
            tracing::warn!(
                subject = %subject,
                failed = outcome.failed_locations.len(),
                "Keeping index entry, locations remain"
            );
        }

        outcome.finish();
        let fully_purged = outcome.is_fully_purged();
        self.metrics.record_subject_finished(fully_purged);
        tracing::info!(
            subject = %subject,
            status = ?outcome.status,
            purged = outcome.purged_locations.len(),
            failed = outcome.failed_locations.len(),
            "Subject purge finished"
        );
        outcome
    }

    async fn purge_object(
        &self,
        subject: &SubjectId,
        object: &ObjectRef,
    ) -> Result<PurgedLocation, FailedLocation> {
        let location = PurgedLocation::Object(object.clone());
        if self.config.dry_run {
            tracing::info!(
                subject = %subject,
                location = %object,
                "[DRY-RUN] Would delete object"
            );
            return Ok(location);
        }

        let deleted = retry_with_backoff(
            &self.config.retry,
            "delete object",
            |e: &StorageError| !e.is_not_found(),
            || self.storage.delete(object),
        )
        .await;
        self.metrics.record_retries(deleted.attempts);
        if let Err(e) = deleted.result {
            tracing::error!(
                subject = %subject,
                location = %object,
                error = %e,
                "Failed to delete object"
            );
            return Err(failed(location, ErrorKind::StorageDelete, &e));
        }
        self.metrics.record_object_deleted();

        // The object is gone; the index must stop listing it
        let removed = retry_with_backoff(
            &self.config.index_retry,
            "remove location from index",
            |_: &IndexError| true,
            || self.index.remove(subject, object),
        )
        .await;
        self.metrics.record_retries(removed.attempts);
        match removed.result {
            Ok(_) => {
                tracing::info!(subject = %subject, location = %object, "Deleted object");
                Ok(location)
            }
            Err(e) => {
                tracing::error!(
                    subject = %subject,
                    location = %object,
                    error = %e,
                    "Object deleted but the index still lists it"
                );
                Err(failed(location, e.kind(), &e))
            }
        }
    }

    async fn purge_lines(
        &self,
        subject: &SubjectId,
        lines: &LineLocation,
        redactions: &RedactionResults,
    ) -> Result<PurgedLocation, FailedLocation> {
        let location = PurgedLocation::Lines(lines.clone());
        match redactions.get(&lines.object_ref) {
            Some(Ok(())) => {}
            Some(Err(message)) => {
                return Err(FailedLocation {
                    location,
                    error_kind: ErrorKind::RedactionIo,
                    message: message.clone(),
                });
            }
            None => {
                return Err(FailedLocation {
                    location,
                    error_kind: ErrorKind::RedactionIo,
                    message: format!("{} was not redacted", lines.object_ref),
                });
            }
        }

        if self.config.dry_run {
            tracing::info!(
                subject = %subject,
                location = %location,
                "[DRY-RUN] Would drop line offsets"
            );
            return Ok(location);
        }

        let removed = retry_with_backoff(
            &self.config.index_retry,
            "remove line offsets",
            |_: &OffsetStoreError| true,
            || self.offsets.remove(subject, lines),
        )
        .await;
        self.metrics.record_retries(removed.attempts);
        match removed.result {
            Ok(_) => {
                tracing::info!(subject = %subject, location = %location, "Redacted lines");
                Ok(location)
            }
            Err(e) => {
                tracing::error!(
                    subject = %subject,
                    location = %location,
                    error = %e,
                    "Lines redacted but their offsets are still recorded"
                );
                Err(failed(location, e.kind(), &e))
            }
        }
    }

    async fn delete_entry(&self, subject: &SubjectId) {
        if self.config.dry_run {
            tracing::info!(subject = %subject, "[DRY-RUN] Would delete index entry");
            return;
        }

        let deleted = retry_with_backoff(
            &self.config.index_retry,
            "delete index entry",
            |_: &IndexError| true,
            || self.index.delete(subject),
        )
        .await;
        self.metrics.record_retries(deleted.attempts);
        // Every location was removed, so a leftover entry is an empty set
        if let Err(e) = deleted.result {
            tracing::warn!(
                subject = %subject,
                error = %e,
                "Empty index entry left behind"
            );
        }
    }
}

fn failed(
    location: PurgedLocation,
    error_kind: ErrorKind,
    error: &dyn std::fmt::Display,
) -> FailedLocation {
    FailedLocation {
        location,
        error_kind,
        message: error.to_string(),
    }
}
