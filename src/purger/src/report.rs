//! Purge report generation for the approval step.

use bytes::Bytes;
use common::config::ReportConfig;
use common::model::{PurgeReport, PurgedLocation, ReportEntry};
use common::{MalformedKeyError, ObjectRef, Storage, StorageError, SubjectId};
use indexer::{IndexError, LocationIndex, OffsetStoreError, RowOffsetStore};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Offsets(#[from] OffsetStoreError),

    #[error("Invalid report location: {0}")]
    Location(#[from] MalformedKeyError),

    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to publish report: {0}")]
    Storage(#[from] StorageError),
}

/// Where a published report was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedReport {
    pub text: ObjectRef,
    pub json: ObjectRef,
}

/// Split a comma or newline separated subject list, dropping blanks and
/// repeats while keeping first-seen order.
pub fn parse_subject_list(text: &str) -> Vec<SubjectId> {
    let mut seen = HashSet::new();
    text.split([',', '\n'])
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(id.to_string()))
        .map(SubjectId::from)
        .collect()
}

pub struct ReportGenerator {
    index: Arc<dyn LocationIndex>,
    offsets: Arc<dyn RowOffsetStore>,
    storage: Arc<dyn Storage>,
    config: ReportConfig,
}

impl ReportGenerator {
    pub fn new(
        index: Arc<dyn LocationIndex>,
        offsets: Arc<dyn RowOffsetStore>,
        storage: Arc<dyn Storage>,
        config: ReportConfig,
    ) -> Self {
        Self {
            index,
            offsets,
            storage,
            config,
        }
    }

    /// Snapshot every location of `subjects`, one entry per distinct subject.
    pub async fn generate(&self, subjects: &[SubjectId]) -> Result<PurgeReport, ReportError> {
        let mut seen = HashSet::new();
        let subjects: Vec<SubjectId> = subjects
            .iter()
            .filter(|s| seen.insert((*s).clone()))
            .cloned()
            .collect();

        let objects = self.index.get_batch(&subjects).await?;
        let mut lines = self.offsets.get_locations_batch(&subjects).await?;

        let entries: Vec<ReportEntry> = subjects
            .into_iter()
            .map(|subject_id| ReportEntry {
                whole_object_locations: objects
                    .get(&subject_id)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default(),
                line_locations: lines.remove(&subject_id).unwrap_or_default(),
                subject_id,
            })
            .collect();

        tracing::info!(subjects = entries.len(), "Generated purge report");
        Ok(PurgeReport::new(entries))
    }

    /// Write the text and JSON renderings under the configured prefix.
    pub async fn publish(&self, report: &PurgeReport) -> Result<PublishedReport, ReportError> {
        let prefix = self.config.prefix.trim_matches('/');
        let text = ObjectRef::new(
            "s3",
            self.config.bucket.as_str(),
            format!("{prefix}/report-out.txt"),
        )?;
        let json = ObjectRef::new(
            "s3",
            self.config.bucket.as_str(),
            format!("{prefix}/report-out.json"),
        )?;

        self.storage
            .put(&text, Bytes::from(render_text(report)))
            .await?;
        self.storage
            .put(&json, Bytes::from(report.to_json()?))
            .await?;

        tracing::info!(text = %text, json = %json, "Published purge report");
        Ok(PublishedReport { text, json })
    }
}

/// Human-readable rendering for the approver.
pub fn render_text(report: &PurgeReport) -> String {
    let mut out = String::new();
    for entry in report.entries() {
        let _ = writeln!(out, ">> Subject ID: {}", entry.subject_id);

        if entry.whole_object_locations.is_empty() {
            let _ = writeln!(out, "> No objects to be deleted!");
        } else {
            let _ = writeln!(out, "> Objects to be deleted:");
            for object in &entry.whole_object_locations {
                let _ = writeln!(out, "{object}");
            }
        }
        out.push('\n');

        if entry.line_locations.is_empty() {
            let _ = writeln!(out, "> No lines to be redacted!");
        } else {
            let _ = writeln!(out, "> Lines to be redacted:");
            for lines in &entry.line_locations {
                let _ = writeln!(out, "{}", PurgedLocation::Lines(lines.clone()));
            }
        }
        out.push_str("\n\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::read_all;
    use common::{Database, ObjectStoreRouter};
    use indexer::{InMemoryLocationIndex, LineOffsetRecord, SqlRowOffsetStore};

    struct Fixture {
        index: Arc<InMemoryLocationIndex>,
        offsets: Arc<SqlRowOffsetStore>,
        storage: Arc<ObjectStoreRouter>,
        generator: ReportGenerator,
    }

    async fn fixture() -> Fixture {
        let index = Arc::new(InMemoryLocationIndex::new());
        let offsets = Arc::new(SqlRowOffsetStore::new(Database::in_memory().await.unwrap()));
        let storage = Arc::new(ObjectStoreRouter::in_memory());
        let generator = ReportGenerator::new(
            index.clone(),
            offsets.clone(),
            storage.clone(),
            ReportConfig::default(),
        );
        Fixture {
            index,
            offsets,
            storage,
            generator,
        }
    }

    fn object(uri: &str) -> ObjectRef {
        ObjectRef::parse(uri).unwrap()
    }

    #[test]
    fn test_parse_subject_list() {
        let expected = ["42", "7", "8"].map(SubjectId::from);
        assert_eq!(parse_subject_list("42, 7\n\n42,8 \r\n"), expected);
        assert!(parse_subject_list(" , \n").is_empty());
    }

    #[tokio::test]
    async fn test_generate_combines_both_granularities() {
        let f = fixture().await;
        let subject = SubjectId::from("42");
        f.index
            .add(&subject, &object("s3://b/42-a.json"))
            .await
            .unwrap();
        f.offsets
            .append(&[LineOffsetRecord {
                subject_id: subject.clone(),
                object_ref: object("s3://b/shared.json"),
                line_offset: 3,
                ingest_seq: 1,
            }])
            .await
            .unwrap();

        let report = f
            .generator
            .generate(&[subject.clone(), SubjectId::from("7"), subject.clone()])
            .await
            .unwrap();

        assert_eq!(report.len(), 2);
        let first = &report.entries()[0];
        assert_eq!(first.subject_id, subject);
        let expected = vec![object("s3://b/42-a.json")];
        assert_eq!(first.whole_object_locations, expected);
        assert_eq!(first.line_locations.len(), 1);
        assert!(report.entries()[1].is_empty());
    }

    #[tokio::test]
    async fn test_render_text_sections() {
        let f = fixture().await;
        f.index
            .add(&SubjectId::from("42"), &object("s3://b/42-a.json"))
            .await
            .unwrap();
        let report = f
            .generator
            .generate(&[SubjectId::from("42"), SubjectId::from("7")])
            .await
            .unwrap();

        let text = render_text(&report);
        let deleted = ">> Subject ID: 42\n> Objects to be deleted:\ns3://b/42-a.json\n";
        assert!(text.contains(deleted));
        let untouched = ">> Subject ID: 7\n> No objects to be deleted!\n";
        assert!(text.contains(untouched));
        assert_eq!(text.matches("> No lines to be redacted!").count(), 2);
    }

    #[tokio::test]
    async fn test_publish_writes_both_renderings() {
        let f = fixture().await;
        let subjects = [SubjectId::from("42")];
        let report = f.generator.generate(&subjects).await.unwrap();

        let published = f.generator.publish(&report).await.unwrap();
        let text = published.text.to_string();
        assert_eq!(text, "s3://reports/report/report-out.txt");
        let json = published.json.to_string();
        assert_eq!(json, "s3://reports/report/report-out.json");

        let stored = read_all(f.storage.as_ref(), &published.json).await.unwrap();
        assert_eq!(PurgeReport::from_json(&stored).unwrap(), report);
    }
}
