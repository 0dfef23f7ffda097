use async_trait::async_trait;
use common::{ObjectRef, SubjectId};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;

use super::{IndexError, LocationIndex};

/// Process-local index, for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryLocationIndex {
    entries: RwLock<HashMap<SubjectId, BTreeSet<ObjectRef>>>,
}

impl InMemoryLocationIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LocationIndex for InMemoryLocationIndex {
    async fn add(&self, subject: &SubjectId, location: &ObjectRef) -> Result<bool, IndexError> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .entry(subject.clone())
            .or_default()
            .insert(location.clone()))
    }

    async fn remove(
        &self,
        subject: &SubjectId,
        location: &ObjectRef,
    ) -> Result<bool, IndexError> {
        let mut entries = self.entries.write().await;
        Ok(entries
            .get_mut(subject)
            .is_some_and(|set| set.remove(location)))
    }

    async fn get(&self, subject: &SubjectId) -> Result<BTreeSet<ObjectRef>, IndexError> {
        let entries = self.entries.read().await;
        Ok(entries.get(subject).cloned().unwrap_or_default())
    }

    async fn delete(&self, subject: &SubjectId) -> Result<(), IndexError> {
        self.entries.write().await.remove(subject);
        Ok(())
    }

    async fn has_entry(&self, subject: &SubjectId) -> Result<bool, IndexError> {
        Ok(self.entries.read().await.contains_key(subject))
    }

    async fn contains(
        &self,
        subject: &SubjectId,
        location: &ObjectRef,
    ) -> Result<bool, IndexError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(subject)
            .is_some_and(|set| set.contains(location)))
    }
}
