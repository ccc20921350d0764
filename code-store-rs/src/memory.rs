// code-store-rs/src/memory.rs
// In-memory VersionStore implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{
    content_hash, CodeSource, CodeVersion, RetentionPolicy, StoreError, TaskRef, VersionStore,
};

#[derive(Debug, Default)]
struct TaskHistory {
    versions: Vec<CodeVersion>,
    active: Option<u32>,
    last_known_good: Option<u32>,
    next_version: u32,
}

impl TaskHistory {
    fn find(&self, version: u32) -> Option<&CodeVersion> {
        self.versions.iter().find(|v| v.version == version)
    }
}

/// Process-local version store. Suitable for tests and single-node
/// deployments; durable backends implement the same trait.
#[derive(Debug, Default)]
pub struct InMemoryVersionStore {
    tasks: RwLock<HashMap<TaskRef, TaskHistory>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn put_active(
        &self,
        task: &TaskRef,
        content: &str,
        source: CodeSource,
    ) -> Result<CodeVersion, StoreError> {
        let mut tasks = self.tasks.write().await;
        let history = tasks.entry(task.clone()).or_default();

        let previous_version = history.active;
        history.next_version += 1;
        let record = CodeVersion {
            version: history.next_version,
            content: content.to_string(),
            content_hash: content_hash(content),
            created_at: Utc::now(),
            source,
            previous_version,
        };

        history.versions.push(record.clone());
        history.active = Some(record.version);

        tracing::debug!(
            task = %task,
            version = record.version,
            source = %record.source,
            "stored and activated code version"
        );

        Ok(record)
    }

    async fn list(&self, task: &TaskRef) -> Result<Vec<CodeVersion>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(task)
            .map(|h| h.versions.clone())
            .unwrap_or_default())
    }

    async fn active(&self, task: &TaskRef) -> Result<Option<CodeVersion>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(task)
            .and_then(|h| h.active.and_then(|v| h.find(v).cloned())))
    }

    async fn activate(&self, task: &TaskRef, version: u32) -> Result<CodeVersion, StoreError> {
        let mut tasks = self.tasks.write().await;
        let history = tasks
            .get_mut(task)
            .ok_or_else(|| StoreError::UnknownTask(task.clone()))?;

        let record = history
            .find(version)
            .cloned()
            .ok_or(StoreError::UnknownVersion {
                task: task.clone(),
                version,
            })?;

        history.active = Some(version);
        tracing::info!(task = %task, version, "activated code version");
        Ok(record)
    }

    async fn mark_known_good(&self, task: &TaskRef) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        let history = tasks
            .get_mut(task)
            .ok_or_else(|| StoreError::UnknownTask(task.clone()))?;

        if let Some(active) = history.active {
            history.last_known_good = Some(active);
        }
        Ok(())
    }

    async fn last_known_good(&self, task: &TaskRef) -> Result<Option<CodeVersion>, StoreError> {
        let tasks = self.tasks.read().await;
        Ok(tasks
            .get(task)
            .and_then(|h| h.last_known_good.and_then(|v| h.find(v).cloned())))
    }

    async fn apply_retention(
        &self,
        task: &TaskRef,
        policy: &RetentionPolicy,
    ) -> Result<Vec<u32>, StoreError> {
        if policy.keep_last_n == 0 {
            return Ok(Vec::new());
        }

        let mut tasks = self.tasks.write().await;
        let history = match tasks.get_mut(task) {
            Some(h) => h,
            None => return Ok(Vec::new()),
        };

        let keep = policy.keep_last_n as usize;
        if history.versions.len() <= keep {
            return Ok(Vec::new());
        }

        // Newest `keep` survive; the active version, the rollback target
        // and (optionally) v1 are exempt regardless of age.
        let cutoff_index = history.versions.len() - keep;
        let survivors_from = history
            .versions
            .get(cutoff_index)
            .map(|v| v.version)
            .unwrap_or(0);
        let active = history.active;
        let known_good = history.last_known_good;
        let mut evicted = Vec::new();

        history.versions.retain(|v| {
            let keep_version = v.version >= survivors_from
                || Some(v.version) == active
                || Some(v.version) == known_good
                || (policy.always_keep_initial && v.version == 1);
            if !keep_version {
                evicted.push(v.version);
            }
            keep_version
        });

        if !evicted.is_empty() {
            tracing::debug!(task = %task, ?evicted, "evicted code versions past retention");
        }
        Ok(evicted)
    }

    async fn delete_task(&self, task: &TaskRef) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;
        tasks.remove(task);
        Ok(())
    }
}
