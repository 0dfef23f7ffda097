use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{PgPool, SqlitePool, query};

use crate::error::ConnectionError;

/// Connection to the relational store backing the location index and
/// the line offset store (PostgreSQL or SQLite).
#[derive(Clone, Debug)]
pub enum Database {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl Database {
    /// Connect and initialize the schema.
    pub async fn connect(dsn: &str) -> Result<Self, ConnectionError> {
        log::info!("Connecting to database with DSN: {dsn}");

        let database = if dsn.starts_with("sqlite:") {
            let pool = if is_sqlite_memory(dsn) {
                // Every in-memory connection is its own database; keep one
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect(dsn)
                    .await
            } else {
                SqlitePool::connect(&with_create_mode(dsn)).await
            }
            .map_err(|source| {
                log::error!("Failed to connect to SQLite database with DSN '{dsn}': {source}");
                ConnectionError::Database {
                    dsn: dsn.to_string(),
                    source,
                }
            })?;
            Database::Sqlite(pool)
        } else {
            let pool = PgPool::connect(dsn).await.map_err(|source| {
                log::error!("Failed to connect to PostgreSQL database with DSN '{dsn}': {source}");
                ConnectionError::Database {
                    dsn: dsn.to_string(),
                    source,
                }
            })?;
            Database::Postgres(pool)
        };

        log::info!("Database connection established successfully");
        database.init().await.map_err(|e| {
            log::error!("Failed to initialize database schema: {e}");
            ConnectionError::Schema(e)
        })?;
        log::info!("Database schema initialized successfully");
        Ok(database)
    }

    /// Shared in-memory SQLite database, for tests and local runs.
    pub async fn in_memory() -> Result<Self, ConnectionError> {
        Self::connect("sqlite::memory:").await
    }

    /// Create tables if they do not exist.
    async fn init(&self) -> Result<(), sqlx::Error> {
        match self {
            Database::Sqlite(pool) => {
                let create_subjects = r#"
                CREATE TABLE IF NOT EXISTS subjects (
                    subject_id TEXT PRIMARY KEY,
                    first_seen TEXT NOT NULL
                )"#;
                query(create_subjects).execute(pool).await?;

                let create_subject_locations = r#"
                CREATE TABLE IF NOT EXISTS subject_locations (
                    subject_id TEXT NOT NULL,
                    location TEXT NOT NULL,
                    PRIMARY KEY (subject_id, location)
                )"#;
                query(create_subject_locations).execute(pool).await?;

                let create_line_offsets = r#"
                CREATE TABLE IF NOT EXISTS line_offsets (
                    subject_id TEXT NOT NULL,
                    object_ref TEXT NOT NULL,
                    line_offset INTEGER NOT NULL,
                    ingest_seq INTEGER NOT NULL,
                    UNIQUE (object_ref, line_offset)
                )"#;
                query(create_line_offsets).execute(pool).await?;

                query(
                    "CREATE INDEX IF NOT EXISTS line_offsets_subject ON line_offsets (subject_id)",
                )
                .execute(pool)
                .await?;
            }
            Database::Postgres(pool) => {
                let create_subjects = r#"
                CREATE TABLE IF NOT EXISTS subjects (
                    subject_id TEXT PRIMARY KEY,
                    first_seen TIMESTAMPTZ NOT NULL
                )"#;
                query(create_subjects).execute(pool).await?;

                let create_subject_locations = r#"
                CREATE TABLE IF NOT EXISTS subject_locations (
                    subject_id TEXT NOT NULL,
                    location TEXT NOT NULL,
                    PRIMARY KEY (subject_id, location)
                )"#;
                query(create_subject_locations).execute(pool).await?;

                let create_line_offsets = r#"
                CREATE TABLE IF NOT EXISTS line_offsets (
                    subject_id TEXT NOT NULL,
                    object_ref TEXT NOT NULL,
                    line_offset BIGINT NOT NULL,
                    ingest_seq BIGINT NOT NULL,
                    UNIQUE (object_ref, line_offset)
                )"#;
                query(create_line_offsets).execute(pool).await?;

                query(
                    "CREATE INDEX IF NOT EXISTS line_offsets_subject ON line_offsets (subject_id)",
                )
                .execute(pool)
                .await?;
            }
        }

        Ok(())
    }
}

fn is_sqlite_memory(dsn: &str) -> bool {
    dsn == "sqlite::memory:" || dsn.contains("mode=memory")
}

/// Add mode=rwc so the database file is created when missing
fn with_create_mode(dsn: &str) -> String {
    if dsn.contains('?') {
        if dsn.contains("mode=") {
            dsn.to_string()
        } else {
            format!("{dsn}&mode=rwc")
        }
    } else {
        format!("{dsn}?mode=rwc")
    }
}
