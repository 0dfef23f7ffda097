use async_trait::async_trait;
use chrono::Utc;
use common::{Database, ObjectRef, SubjectId};
use sqlx::{Row, query};
use std::collections::BTreeSet;

use super::{IndexError, LocationIndex};

/// Index stored in the `subjects` and `subject_locations` tables.
///
/// Set semantics come from the composite primary key; duplicate inserts are
/// ignored.
#[derive(Debug, Clone)]
pub struct SqlLocationIndex {
    db: Database,
}

impl SqlLocationIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LocationIndex for SqlLocationIndex {
    async fn add(&self, subject: &SubjectId, location: &ObjectRef) -> Result<bool, IndexError> {
        let location = location.to_string();
        let inserted = match &self.db {
            Database::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                query("INSERT OR IGNORE INTO subjects (subject_id, first_seen) VALUES (?, ?)")
                    .bind(subject.as_str())
                    .bind(Utc::now().to_rfc3339())
                    .execute(&mut *tx)
                    .await?;
                let result = query(
                    "INSERT OR IGNORE INTO subject_locations (subject_id, location) VALUES (?, ?)",
                )
                .bind(subject.as_str())
                .bind(&location)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                result.rows_affected() > 0
            }
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                query(
                    "INSERT INTO subjects (subject_id, first_seen) VALUES ($1, $2) \
                     ON CONFLICT (subject_id) DO NOTHING",
                )
                .bind(subject.as_str())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
                let result = query(
                    "INSERT INTO subject_locations (subject_id, location) VALUES ($1, $2) \
                     ON CONFLICT (subject_id, location) DO NOTHING",
                )
                .bind(subject.as_str())
                .bind(&location)
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                result.rows_affected() > 0
            }
        };
        log::debug!("Index add {subject} -> {location}: inserted={inserted}");
        Ok(inserted)
    }

    async fn remove(
        &self,
        subject: &SubjectId,
        location: &ObjectRef,
    ) -> Result<bool, IndexError> {
        let location = location.to_string();
        let result = match &self.db {
            Database::Sqlite(pool) => {
                query("DELETE FROM subject_locations WHERE subject_id = ? AND location = ?")
                    .bind(subject.as_str())
                    .bind(&location)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
            Database::Postgres(pool) => {
                query("DELETE FROM subject_locations WHERE subject_id = $1 AND location = $2")
                    .bind(subject.as_str())
                    .bind(&location)
                    .execute(pool)
                    .await?
                    .rows_affected()
            }
        };
        let removed = result > 0;
        log::debug!("Index remove {subject} -> {location}: removed={removed}");
        Ok(removed)
    }

    async fn get(&self, subject: &SubjectId) -> Result<BTreeSet<ObjectRef>, IndexError> {
        let rows = match &self.db {
            Database::Sqlite(pool) => {
                query("SELECT location FROM subject_locations WHERE subject_id = ?")
                    .bind(subject.as_str())
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| row.get::<String, _>("location"))
                    .collect::<Vec<_>>()
            }
            Database::Postgres(pool) => {
                query("SELECT location FROM subject_locations WHERE subject_id = $1")
                    .bind(subject.as_str())
                    .fetch_all(pool)
                    .await?
                    .into_iter()
                    .map(|row| row.get::<String, _>("location"))
                    .collect::<Vec<_>>()
            }
        };

        rows.iter()
            .map(|raw| ObjectRef::parse(raw).map_err(IndexError::from))
            .collect()
    }

    async fn delete(&self, subject: &SubjectId) -> Result<(), IndexError> {
        match &self.db {
            Database::Sqlite(pool) => {
                let mut tx = pool.begin().await?;
                query("DELETE FROM subject_locations WHERE subject_id = ?")
                    .bind(subject.as_str())
                    .execute(&mut *tx)
                    .await?;
                query("DELETE FROM subjects WHERE subject_id = ?")
                    .bind(subject.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
            Database::Postgres(pool) => {
                let mut tx = pool.begin().await?;
                query("DELETE FROM subject_locations WHERE subject_id = $1")
                    .bind(subject.as_str())
                    .execute(&mut *tx)
                    .await?;
                query("DELETE FROM subjects WHERE subject_id = $1")
                    .bind(subject.as_str())
                    .execute(&mut *tx)
                    .await?;
                tx.commit().await?;
            }
        }
        log::debug!("Index entry deleted for subject {subject}");
        Ok(())
    }

    async fn has_entry(&self, subject: &SubjectId) -> Result<bool, IndexError> {
        let row = match &self.db {
            Database::Sqlite(pool) => {
                query("SELECT 1 AS present FROM subjects WHERE subject_id = ?")
                    .bind(subject.as_str())
                    .fetch_optional(pool)
                    .await?
                    .is_some()
            }
            Database::Postgres(pool) => {
                query("SELECT 1 AS present FROM subjects WHERE subject_id = $1")
                    .bind(subject.as_str())
                    .fetch_optional(pool)
                    .await?
                    .is_some()
            }
        };
        Ok(row)
    }

    async fn contains(
        &self,
        subject: &SubjectId,
        location: &ObjectRef,
    ) -> Result<bool, IndexError> {
        let location = location.to_string();
        let present = match &self.db {
            Database::Sqlite(pool) => query(
                "SELECT 1 AS present FROM subject_locations \
                 WHERE subject_id = ? AND location = ?",
            )
            .bind(subject.as_str())
            .bind(&location)
            .fetch_optional(pool)
            .await?
            .is_some(),
            Database::Postgres(pool) => query(
                "SELECT 1 AS present FROM subject_locations \
                 WHERE subject_id = $1 AND location = $2",
            )
            .bind(subject.as_str())
            .bind(&location)
            .fetch_optional(pool)
            .await?
            .is_some(),
        };
        Ok(present)
    }
}
