// code-store-rs/src/lib.rs
// Versioned code storage for synthesized agents.
//
// History is append-only with a separate active pointer: activation and
// rollback are pointer moves, never in-place rewrites. The control plane
// only decides what to store and when to evict; durable storage mechanics
// live behind the `VersionStore` trait (the in-memory implementation here
// backs tests and single-process deployments).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

mod memory;


pub use memory::InMemoryVersionStore;

use async_trait::async_trait;

/// Identity of a task's owning agent within a scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskRef {
    pub name: String,
    pub namespace: String,
}

impl TaskRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for TaskRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// How a code version came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeSource {
    InitialSynthesis,
    SelfHeal,
    LearningRewrite,
}

impl std::fmt::Display for CodeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CodeSource::InitialSynthesis => "initial-synthesis",
            CodeSource::SelfHeal => "self-heal",
            CodeSource::LearningRewrite => "learning-rewrite",
        };
        f.write_str(s)
    }
}

/// One immutable entry in a task's code history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeVersion {
    /// Monotonic sequence number, starting at 1.
    pub version: u32,
    pub content: String,
    /// Hex-encoded SHA-256 of the content.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    pub source: CodeSource,
    /// Version this one superseded, if any.
    pub previous_version: Option<u32>,
}

/// Hex-encoded SHA-256 digest of code content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Retention settings applied after each new version is stored.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// Number of latest versions to keep. Zero means unlimited.
    pub keep_last_n: u32,
    /// Always preserve version 1 (the initial synthesis).
    pub always_keep_initial: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_last_n: 5,
            always_keep_initial: true,
        }
    }
}

/// Errors from version store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no code history for task {0}")]
    UnknownTask(TaskRef),

    #[error("task {task} has no version {version}")]
    UnknownVersion { task: TaskRef, version: u32 },

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Versioned code storage keyed by task identity.
///
/// Invariants every implementation must uphold:
/// - history is append-only and ordered by version number;
/// - the active version is never evicted by retention;
/// - marking success pins the currently active version as last-known-good.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Append a new version and make it the active one. Returns the stored
    /// version record.
    async fn put_active(
        &self,
        task: &TaskRef,
        content: &str,
        source: CodeSource,
    ) -> Result<CodeVersion, StoreError>;

    /// Full history for a task, oldest first. Empty when unknown.
    async fn list(&self, task: &TaskRef) -> Result<Vec<CodeVersion>, StoreError>;

    /// Currently active version, if any.
    async fn active(&self, task: &TaskRef) -> Result<Option<CodeVersion>, StoreError>;

    /// Move the active pointer to an existing version.
    async fn activate(&self, task: &TaskRef, version: u32) -> Result<CodeVersion, StoreError>;

    /// Record that the active version ran successfully, pinning it as the
    /// rollback target.
    async fn mark_known_good(&self, task: &TaskRef) -> Result<(), StoreError>;

    /// Most recent version marked as having run successfully.
    async fn last_known_good(&self, task: &TaskRef) -> Result<Option<CodeVersion>, StoreError>;

    /// Evict versions beyond the policy. Never evicts the active version
    /// or the last-known-good rollback target; honors
    /// `always_keep_initial`. Returns the evicted version numbers.
    async fn apply_retention(
        &self,
        task: &TaskRef,
        policy: &RetentionPolicy,
    ) -> Result<Vec<u32>, StoreError>;

    /// Drop all history for a task (explicit deletion of the owner).
    async fn delete_task(&self, task: &TaskRef) -> Result<(), StoreError>;
}
