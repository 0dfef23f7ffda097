//! Line-level ownership of shared objects.

use async_trait::async_trait;
use common::model::LineLocation;
use common::{Database, ErrorKind, MalformedKeyError, ObjectRef, SubjectId};
use sqlx::{Postgres, QueryBuilder, Row, Sqlite, query_scalar};
use std::collections::{BTreeMap, BTreeSet};

// Keeps every statement below SQLite's default bind parameter limit
const MAX_BINDS_PER_STATEMENT: usize = 900;

/// One owned line of a shared object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOffsetRecord {
    pub subject_id: SubjectId,
    pub object_ref: ObjectRef,
    /// 0-based line position at ingestion time
    pub line_offset: u64,
    pub ingest_seq: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum OffsetStoreError {
    #[error("Offset store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Offset store holds an unparsable object reference: {0}")]
    Corrupt(#[from] MalformedKeyError),

    #[error("Line offset {0} is out of range")]
    OffsetRange(String),
}

impl OffsetStoreError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LocationIndex
    }
}

#[async_trait]
pub trait RowOffsetStore: Send + Sync {
    /// Append records. Rows whose `(object_ref, line_offset)` already exists
    /// are skipped; returns the number of rows actually stored.
    async fn append(&self, records: &[LineOffsetRecord]) -> Result<u64, OffsetStoreError>;

    /// Sequence number for the next ingestion run.
    async fn next_ingest_seq(&self) -> Result<i64, OffsetStoreError>;

    /// Offsets owned by `subject`, grouped by object in object order.
    async fn get_locations(&self, subject: &SubjectId)
    -> Result<Vec<LineLocation>, OffsetStoreError>;

    /// [`RowOffsetStore::get_locations`] for many subjects in one query.
    /// Subjects without records map to an empty list.
    async fn get_locations_batch(
        &self,
        subjects: &[SubjectId],
    ) -> Result<BTreeMap<SubjectId, Vec<LineLocation>>, OffsetStoreError>;

    /// Drop the subject's records for the given lines once they are purged.
    async fn remove(
        &self,
        subject: &SubjectId,
        location: &LineLocation,
    ) -> Result<u64, OffsetStoreError>;
}

/// [`RowOffsetStore`] over the `line_offsets` table.
#[derive(Debug, Clone)]
pub struct SqlRowOffsetStore {
    db: Database,
    batch_size: usize,
}

impl SqlRowOffsetStore {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            batch_size: 1000,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn rows_per_insert(&self) -> usize {
        self.batch_size.min(MAX_BINDS_PER_STATEMENT / 4)
    }
}

fn group_rows(
    rows: Vec<(String, String, i64)>,
) -> Result<BTreeMap<SubjectId, Vec<LineLocation>>, OffsetStoreError> {
    let mut grouped: BTreeMap<SubjectId, BTreeMap<ObjectRef, BTreeSet<u64>>> = BTreeMap::new();
    for (subject, object_ref, offset) in rows {
        let object_ref = ObjectRef::parse(&object_ref)?;
        let offset = u64::try_from(offset)
            .map_err(|_| OffsetStoreError::OffsetRange(offset.to_string()))?;
        grouped
            .entry(SubjectId::new(subject))
            .or_default()
            .entry(object_ref)
            .or_default()
            .insert(offset);
    }

    Ok(grouped
        .into_iter()
        .map(|(subject, objects)| {
            let locations = objects
                .into_iter()
                .map(|(object_ref, offsets)| LineLocation {
                    object_ref,
                    offsets,
                })
                .collect();
            (subject, locations)
        })
        .collect())
}

fn offset_to_i64(offset: u64) -> Result<i64, OffsetStoreError> {
    i64::try_from(offset).map_err(|_| OffsetStoreError::OffsetRange(offset.to_string()))
}

#[async_trait]
impl RowOffsetStore for SqlRowOffsetStore {
    async fn append(&self, records: &[LineOffsetRecord]) -> Result<u64, OffsetStoreError> {
        let rendered: Vec<(&str, String, i64, i64)> = records
            .iter()
            .map(|r| {
                Ok((
                    r.subject_id.as_str(),
                    r.object_ref.to_string(),
                    offset_to_i64(r.line_offset)?,
                    r.ingest_seq,
                ))
            })
            .collect::<Result<_, OffsetStoreError>>()?;

        let mut inserted = 0;
        for chunk in rendered.chunks(self.rows_per_insert()) {
            inserted += match &self.db {
                Database::Sqlite(pool) => {
                    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                        "INSERT OR IGNORE INTO line_offsets \
                         (subject_id, object_ref, line_offset, ingest_seq) ",
                    );
                    builder.push_values(chunk, |mut row, (subject, object_ref, offset, seq)| {
                        row.push_bind(*subject)
                            .push_bind(object_ref.as_str())
                            .push_bind(*offset)
                            .push_bind(*seq);
                    });
                    builder.build().execute(pool).await?.rows_affected()
                }
                Database::Postgres(pool) => {
                    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                        "INSERT INTO line_offsets \
                         (subject_id, object_ref, line_offset, ingest_seq) ",
                    );
                    builder.push_values(chunk, |mut row, (subject, object_ref, offset, seq)| {
                        row.push_bind(*subject)
                            .push_bind(object_ref.as_str())
                            .push_bind(*offset)
                            .push_bind(*seq);
                    });
                    builder.push(" ON CONFLICT (object_ref, line_offset) DO NOTHING");
                    builder.build().execute(pool).await?.rows_affected()
                }
            };
        }

        log::debug!("Stored {inserted} of {} line offset records", records.len());
        Ok(inserted)
    }

    async fn next_ingest_seq(&self) -> Result<i64, OffsetStoreError> {
        let sql = "SELECT COALESCE(MAX(ingest_seq), 0) + 1 FROM line_offsets";
        let seq = match &self.db {
            Database::Sqlite(pool) => query_scalar::<_, i64>(sql).fetch_one(pool).await?,
            Database::Postgres(pool) => query_scalar::<_, i64>(sql).fetch_one(pool).await?,
        };
        Ok(seq)
    }

    async fn get_locations(
        &self,
        subject: &SubjectId,
    ) -> Result<Vec<LineLocation>, OffsetStoreError> {
        let mut grouped = self
            .get_locations_batch(std::slice::from_ref(subject))
            .await?;
        Ok(grouped.remove(subject).unwrap_or_default())
    }

    async fn get_locations_batch(
        &self,
        subjects: &[SubjectId],
    ) -> Result<BTreeMap<SubjectId, Vec<LineLocation>>, OffsetStoreError> {
        let mut rows = Vec::new();
        for chunk in subjects.chunks(MAX_BINDS_PER_STATEMENT) {
            match &self.db {
                Database::Sqlite(pool) => {
                    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                        "SELECT subject_id, object_ref, line_offset FROM line_offsets \
                         WHERE subject_id IN (",
                    );
                    let mut ids = builder.separated(", ");
                    for subject in chunk {
                        ids.push_bind(subject.as_str());
                    }
                    builder.push(")");
                    for row in builder.build().fetch_all(pool).await? {
                        rows.push((
                            row.get::<String, _>("subject_id"),
                            row.get::<String, _>("object_ref"),
                            row.get::<i64, _>("line_offset"),
                        ));
                    }
                }
                Database::Postgres(pool) => {
                    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                        "SELECT subject_id, object_ref, line_offset FROM line_offsets \
                         WHERE subject_id IN (",
                    );
                    let mut ids = builder.separated(", ");
                    for subject in chunk {
                        ids.push_bind(subject.as_str());
                    }
                    builder.push(")");
                    for row in builder.build().fetch_all(pool).await? {
                        rows.push((
                            row.get::<String, _>("subject_id"),
                            row.get::<String, _>("object_ref"),
                            row.get::<i64, _>("line_offset"),
                        ));
                    }
                }
            }
        }

        let mut grouped = group_rows(rows)?;
        for subject in subjects {
            grouped.entry(subject.clone()).or_default();
        }
        Ok(grouped)
    }

    async fn remove(
        &self,
        subject: &SubjectId,
        location: &LineLocation,
    ) -> Result<u64, OffsetStoreError> {
        let object_ref = location.object_ref.to_string();
        let offsets: Vec<i64> = location
            .offsets
            .iter()
            .map(|o| offset_to_i64(*o))
            .collect::<Result<_, _>>()?;

        let mut removed = 0;
        for chunk in offsets.chunks(MAX_BINDS_PER_STATEMENT) {
            removed += match &self.db {
                Database::Sqlite(pool) => {
                    let mut builder: QueryBuilder<Sqlite> =
                        QueryBuilder::new("DELETE FROM line_offsets WHERE subject_id = ");
                    builder.push_bind(subject.as_str());
                    builder.push(" AND object_ref = ");
                    builder.push_bind(object_ref.as_str());
                    builder.push(" AND line_offset IN (");
                    let mut values = builder.separated(", ");
                    for offset in chunk {
                        values.push_bind(*offset);
                    }
                    builder.push(")");
                    builder.build().execute(pool).await?.rows_affected()
                }
                Database::Postgres(pool) => {
                    let mut builder: QueryBuilder<Postgres> =
                        QueryBuilder::new("DELETE FROM line_offsets WHERE subject_id = ");
                    builder.push_bind(subject.as_str());
                    builder.push(" AND object_ref = ");
                    builder.push_bind(object_ref.as_str());
                    builder.push(" AND line_offset IN (");
                    let mut values = builder.separated(", ");
                    for offset in chunk {
                        values.push_bind(*offset);
                    }
                    builder.push(")");
                    builder.build().execute(pool).await?.rows_affected()
                }
            };
        }

        log::debug!("Removed {removed} line offsets of {subject} from {object_ref}");
        Ok(removed)
    }
}
