//! Set-valued mapping from subject to whole-object locations.
//!
//! Every mutation is idempotent and mutations on different locations
//! commute, so replayed or reordered events converge to the same state.

mod memory;
mod sql;

pub use memory::InMemoryLocationIndex;
pub use sql::SqlLocationIndex;

use async_trait::async_trait;
use common::{ErrorKind, MalformedKeyError, ObjectRef, SubjectId};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Location index query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Location index holds an unparsable location: {0}")]
    Corrupt(#[from] MalformedKeyError),

    #[error("Location index unavailable: {0}")]
    Unavailable(String),
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::LocationIndex
    }
}

#[async_trait]
pub trait LocationIndex: Send + Sync {
    /// Insert `location` into the subject's set, creating the entry on first
    /// use. Returns `false` if it was already a member.
    async fn add(&self, subject: &SubjectId, location: &ObjectRef) -> Result<bool, IndexError>;

    /// Remove `location` from the subject's set. Returns `false` if it was
    /// not a member. An emptied entry is kept.
    async fn remove(&self, subject: &SubjectId, location: &ObjectRef)
    -> Result<bool, IndexError>;

    /// Current set; an unknown subject yields an empty set.
    async fn get(&self, subject: &SubjectId) -> Result<BTreeSet<ObjectRef>, IndexError>;

    /// Drop the whole entry, members included.
    async fn delete(&self, subject: &SubjectId) -> Result<(), IndexError>;

    /// Whether an entry exists, even an empty one.
    async fn has_entry(&self, subject: &SubjectId) -> Result<bool, IndexError>;

    async fn contains(
        &self,
        subject: &SubjectId,
        location: &ObjectRef,
    ) -> Result<bool, IndexError> {
        Ok(self.get(subject).await?.contains(location))
    }

    async fn get_batch(
        &self,
        subjects: &[SubjectId],
    ) -> Result<BTreeMap<SubjectId, BTreeSet<ObjectRef>>, IndexError> {
        let mut sets = BTreeMap::new();
        for subject in subjects {
            sets.insert(subject.clone(), self.get(subject).await?);
        }
        Ok(sets)
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod contract {
    //! Behaviour every LocationIndex implementation must show.

    use super::*;

    fn location(uri: &str) -> ObjectRef {
        ObjectRef::parse(uri).unwrap()
    }

    pub async fn add_is_idempotent(index: &dyn LocationIndex) {
        let subject = SubjectId::from("42");
        let a = location("s3://b/42-a.json");

        assert!(index.add(&subject, &a).await.unwrap());
        assert!(!index.add(&subject, &a).await.unwrap());

        let set = index.get(&subject).await.unwrap();
        assert_eq!(set.len(), 1);
        assert!(set.contains(&a));
    }

    pub async fn remove_keeps_entry(index: &dyn LocationIndex) {
        let subject = SubjectId::from("42");
        let a = location("s3://b/42-a.json");

        index.add(&subject, &a).await.unwrap();
        assert!(index.remove(&subject, &a).await.unwrap());
        assert!(!index.remove(&subject, &a).await.unwrap());

        assert!(index.get(&subject).await.unwrap().is_empty());
        assert!(index.has_entry(&subject).await.unwrap());
    }

    pub async fn remove_unknown_is_noop(index: &dyn LocationIndex) {
        let subject = SubjectId::from("7");
        assert!(
            !index
                .remove(&subject, &location("s3://b/7-a.json"))
                .await
                .unwrap()
        );
        assert!(!index.has_entry(&subject).await.unwrap());
        assert!(index.get(&subject).await.unwrap().is_empty());
    }

    pub async fn delete_drops_entry(index: &dyn LocationIndex) {
        let subject = SubjectId::from("42");
        let other = SubjectId::from("43");
        index
            .add(&subject, &location("s3://b/42-a.json"))
            .await
            .unwrap();
        index
            .add(&subject, &location("s3://b/42-b.json"))
            .await
            .unwrap();
        index
            .add(&other, &location("s3://b/43-a.json"))
            .await
            .unwrap();

        index.delete(&subject).await.unwrap();

        assert!(!index.has_entry(&subject).await.unwrap());
        assert!(index.get(&subject).await.unwrap().is_empty());
        assert_eq!(index.get(&other).await.unwrap().len(), 1);

        // Deleting twice is harmless
        index.delete(&subject).await.unwrap();
    }

    pub async fn batch_lookup(index: &dyn LocationIndex) {
        let subject = SubjectId::from("42");
        index
            .add(&subject, &location("s3://b/42-a.json"))
            .await
            .unwrap();

        let sets = index
            .get_batch(&[subject.clone(), SubjectId::from("unknown")])
            .await
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[&subject].len(), 1);
        assert!(sets[&SubjectId::from("unknown")].is_empty());
    }
}
