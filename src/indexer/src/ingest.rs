//! Ingestion of shared JSON Lines objects into the offset store.

use common::config::IngestConfig;
use common::lines::LineReader;
use common::{ObjectRef, Storage, StorageError, SubjectId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::offsets::{LineOffsetRecord, OffsetStoreError, RowOffsetStore};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to read {object}: {source}")]
    Read {
        object: String,
        #[source]
        source: StorageError,
    },

    #[error(transparent)]
    Store(#[from] OffsetStoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub object_ref: ObjectRef,
    pub ingest_seq: i64,
    /// Lines read, owned or not
    pub lines: u64,
    /// Owned lines found
    pub records: u64,
    /// Records new to the store
    pub stored: u64,
    /// Blank, tombstone and ownerless lines
    pub unowned: u64,
    /// Lines that could not be parsed
    pub skipped: u64,
}

enum LineOwner {
    Subject(SubjectId),
    Unowned,
    Unparsable(String),
}

/// Streams a shared object line by line and records who owns each line.
pub struct Ingestor {
    storage: Arc<dyn Storage>,
    store: Arc<dyn RowOffsetStore>,
    subject_field: String,
    tombstone: String,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        storage: Arc<dyn Storage>,
        store: Arc<dyn RowOffsetStore>,
        config: &IngestConfig,
        tombstone: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            store,
            subject_field: config.subject_field.clone(),
            tombstone: tombstone.into(),
            batch_size: config.batch_size.max(1),
        }
    }

    pub async fn ingest(&self, object: &ObjectRef) -> Result<IngestSummary, IngestError> {
        let read_error = |source: StorageError| IngestError::Read {
            object: object.to_string(),
            source,
        };

        let ingest_seq = self.store.next_ingest_seq().await?;
        let mut reader = LineReader::new(self.storage.get(object).await.map_err(read_error)?);

        let mut summary = IngestSummary {
            object_ref: object.clone(),
            ingest_seq,
            lines: 0,
            records: 0,
            stored: 0,
            unowned: 0,
            skipped: 0,
        };
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(line) = reader.next_line().await.map_err(read_error)? {
            let offset = summary.lines;
            summary.lines += 1;

            match self.owner_of(&line.content) {
                LineOwner::Subject(subject_id) => {
                    summary.records += 1;
                    batch.push(LineOffsetRecord {
                        subject_id,
                        object_ref: object.clone(),
                        line_offset: offset,
                        ingest_seq,
                    });
                }
                LineOwner::Unowned => summary.unowned += 1,
                LineOwner::Unparsable(reason) => {
                    summary.skipped += 1;
                    tracing::warn!(
                        object = %object,
                        offset,
                        reason = %reason,
                        "Skipping unparsable line"
                    );
                }
            }

            if batch.len() >= self.batch_size {
                summary.stored += self.store.append(&batch).await?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            summary.stored += self.store.append(&batch).await?;
        }

        tracing::info!(
            object = %object,
            ingest_seq,
            lines = summary.lines,
            records = summary.records,
            stored = summary.stored,
            skipped = summary.skipped,
            "Ingested shared object"
        );
        Ok(summary)
    }

    fn owner_of(&self, content: &[u8]) -> LineOwner {
        let trimmed = content.trim_ascii();
        if trimmed.is_empty() || trimmed == self.tombstone.trim().as_bytes() {
            return LineOwner::Unowned;
        }

        let value: Value = match serde_json::from_slice(trimmed) {
            Ok(value) => value,
            Err(e) => return LineOwner::Unparsable(e.to_string()),
        };

        match value.get(&self.subject_field) {
            Some(Value::String(id)) if !id.is_empty() => LineOwner::Subject(SubjectId::new(id)),
            Some(Value::Number(id)) => LineOwner::Subject(SubjectId::new(id.to_string())),
            None | Some(Value::Null) | Some(Value::String(_)) => LineOwner::Unowned,
            Some(_) => LineOwner::Unparsable(format!(
                "field '{}' is neither a string nor a number",
                self.subject_field
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offsets::SqlRowOffsetStore;
    use bytes::Bytes;
    use common::{Database, ObjectStoreRouter};

    async fn fixture(
        batch_size: usize,
    ) -> (Arc<ObjectStoreRouter>, Arc<SqlRowOffsetStore>, Ingestor) {
        let storage = Arc::new(ObjectStoreRouter::in_memory());
        let store = Arc::new(SqlRowOffsetStore::new(Database::in_memory().await.unwrap()));
        let config = IngestConfig {
            subject_field: "user_id".to_string(),
            batch_size,
        };
        let ingestor = Ingestor::new(storage.clone(), store.clone(), &config, "{}");
        (storage, store, ingestor)
    }

    fn shared() -> ObjectRef {
        ObjectRef::parse("s3://datalake/shared/part-0.json").unwrap()
    }

    fn offsets(locations: &[common::model::LineLocation]) -> Vec<u64> {
        locations[0].offsets.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_ingest_records_owner_per_line() {
        let (storage, store, ingestor) = fixture(2).await;
        let body = concat!(
            "{\"user_id\": \"42\", \"v\": 1}\n",
            "{\"user_id\": 7, \"v\": 2}\n",
            "\n",
            "{}\n",
            "{\"v\": 3}\n",
            "not json\n",
            "{\"user_id\": \"7\", \"v\": 4}"
        );
        storage
            .put(&shared(), Bytes::from_static(body.as_bytes()))
            .await
            .unwrap();

        let summary = ingestor.ingest(&shared()).await.unwrap();
        assert_eq!(summary.lines, 7);
        assert_eq!(summary.records, 3);
        assert_eq!(summary.stored, 3);
        assert_eq!(summary.unowned, 3);
        assert_eq!(summary.skipped, 1);

        let seven = store.get_locations(&SubjectId::from("7")).await.unwrap();
        assert_eq!(offsets(&seven), vec![1, 6]);
        let forty_two = store.get_locations(&SubjectId::from("42")).await.unwrap();
        assert_eq!(offsets(&forty_two), vec![0]);
    }

    #[tokio::test]
    async fn test_reingest_stores_nothing_new() {
        let (storage, store, ingestor) = fixture(1000).await;
        storage
            .put(
                &shared(),
                Bytes::from_static(b"{\"user_id\": \"7\"}\r\n{\"user_id\": \"8\"}\r\n"),
            )
            .await
            .unwrap();

        let first = ingestor.ingest(&shared()).await.unwrap();
        let second = ingestor.ingest(&shared()).await.unwrap();
        assert_eq!(first.stored, 2);
        assert_eq!(second.records, 2);
        assert_eq!(second.stored, 0);
        assert!(second.ingest_seq > first.ingest_seq);

        let seven = store.get_locations(&SubjectId::from("7")).await.unwrap();
        assert_eq!(offsets(&seven), vec![0]);
    }

    #[tokio::test]
    async fn test_missing_object_is_read_error() {
        let (_, _, ingestor) = fixture(10).await;
        match ingestor.ingest(&shared()).await {
            Err(IngestError::Read { source, .. }) => assert!(source.is_not_found()),
            other => panic!("expected a read error, got {other:?}"),
        }
    }
}
