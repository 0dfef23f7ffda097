pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod lines;
pub mod model;
pub mod retry;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use database::Database;
pub use error::{ConnectionError, ErrorKind, MalformedKeyError};
pub use model::{ObjectRef, SubjectId};
pub use storage::{ObjectStoreRouter, Storage, StorageError};
