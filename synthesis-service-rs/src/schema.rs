// synthesis-service-rs/src/schema.rs
// Grammar schema client: semantic version handling, the out-of-process
// schema provider, and the startup compatibility check.
//
// The DSL grammar ships outside this process (the `loomctl` toolchain).
// Schema descriptors are assumed immutable per deployed grammar version,
// so the full schema is fetched once and cached for the process lifetime.
// Provider failures are always non-fatal: callers skip schema-dependent
// validation instead of blocking synthesis.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::command::{run_checked, CommandError};

/// Errors from schema handling.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed version: {0} (expected major.minor.patch)")]
    MalformedVersion(String),

    #[error("schema provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("schema provider timed out after {0} seconds")]
    ProviderTimeout(u64),

    #[error("schema provider returned an invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<CommandError> for SchemaError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Timeout(secs) => SchemaError::ProviderTimeout(secs),
            other => SchemaError::ProviderUnavailable(other.to_string()),
        }
    }
}

/// Parsed `major.minor.patch` identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SemanticVersion {
    /// Parse a semantic version. A leading `v` and pre-release/build
    /// metadata (`-…`, `+…`) are tolerated; anything that is not three
    /// dot-separated integers after that is `MalformedVersion`.
    pub fn parse(input: &str) -> Result<Self, SchemaError> {
        let raw = input.trim();
        let stripped = raw.strip_prefix('v').unwrap_or(raw);
        let stripped = match stripped.find(['-', '+']) {
            Some(idx) => &stripped[..idx],
            None => stripped,
        };

        let mut parts = stripped.split('.');
        let (major, minor, patch) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(ma), Some(mi), Some(pa), None) => (ma, mi, pa),
            _ => return Err(SchemaError::MalformedVersion(input.to_string())),
        };

        let parse_part = |part: &str| {
            part.parse::<u32>()
                .map_err(|_| SchemaError::MalformedVersion(input.to_string()))
        };

        Ok(Self {
            major: parse_part(major)?,
            minor: parse_part(minor)?,
            patch: parse_part(patch)?,
        })
    }

    /// Compare an expected version against the version actually served.
    pub fn compare(expected: &SemanticVersion, actual: &SemanticVersion) -> CompatibilityLevel {
        if expected.major != actual.major {
            CompatibilityLevel::MajorMismatch
        } else if expected.minor != actual.minor {
            CompatibilityLevel::MinorMismatch
        } else if expected.patch != actual.patch {
            CompatibilityLevel::PatchDiff
        } else {
            CompatibilityLevel::Compatible
        }
    }
}

impl FromStr for SemanticVersion {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Result of comparing expected and actual grammar versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompatibilityLevel {
    /// Identical versions.
    Compatible,
    /// Only the patch component differs; informational.
    PatchDiff,
    /// Minor differs: new grammar features, should remain compatible.
    MinorMismatch,
    /// Major differs: breaking, incompatible.
    MajorMismatch,
}

/// Grammar descriptor served by the external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DslSchema {
    pub version: String,
    #[serde(default)]
    pub schema: serde_json::Value,
}

/// Capability interface over the external grammar provider.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Fetch the full grammar descriptor.
    async fn fetch_schema(&self) -> Result<DslSchema, SchemaError>;

    /// Cheaper version-only variant for frequent compatibility checks.
    async fn fetch_version(&self) -> Result<String, SchemaError>;
}

/// Provider that shells out to the grammar CLI.
#[derive(Debug, Clone)]
pub struct CommandSchemaProvider {
    binary: String,
    timeout: Duration,
}

impl Default for CommandSchemaProvider {
    fn default() -> Self {
        Self {
            binary: "loomctl".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl CommandSchemaProvider {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl SchemaProvider for CommandSchemaProvider {
    async fn fetch_schema(&self) -> Result<DslSchema, SchemaError> {
        let output = run_checked(&self.binary, &["schema", "--json"], None, self.timeout).await?;
        if !output.success() {
            return Err(SchemaError::ProviderUnavailable(format!(
                "{} schema --json exited with {:?}: {}",
                self.binary, output.exit_code, output.stderr
            )));
        }

        serde_json::from_str::<DslSchema>(&output.stdout)
            .map_err(|e| SchemaError::InvalidPayload(e.to_string()))
    }

    async fn fetch_version(&self) -> Result<String, SchemaError> {
        let output =
            run_checked(&self.binary, &["schema", "--version"], None, self.timeout).await?;
        if !output.success() {
            return Err(SchemaError::ProviderUnavailable(format!(
                "{} schema --version exited with {:?}: {}",
                self.binary, output.exit_code, output.stderr
            )));
        }

        let version = output.stdout.trim().to_string();
        if version.is_empty() {
            return Err(SchemaError::InvalidPayload(
                "empty version returned from provider".to_string(),
            ));
        }
        Ok(version)
    }
}

/// Caching front over a `SchemaProvider`.
pub struct SchemaClient {
    provider: Arc<dyn SchemaProvider>,
    cached: OnceCell<DslSchema>,
}

impl SchemaClient {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            cached: OnceCell::new(),
        }
    }

    /// Full schema, fetched once per process lifetime.
    pub async fn fetch_schema(&self) -> Result<DslSchema, SchemaError> {
        self.cached
            .get_or_try_init(|| self.provider.fetch_schema())
            .await
            .cloned()
    }

    /// Served grammar version. Answers from the schema cache when warm.
    pub async fn fetch_version(&self) -> Result<String, SchemaError> {
        if let Some(schema) = self.cached.get() {
            return Ok(schema.version.clone());
        }
        self.provider.fetch_version().await
    }

    /// Startup compatibility check between the operator's expected grammar
    /// version and the one actually served. Never fails the process:
    /// - major mismatch logs at error severity,
    /// - minor mismatch at warn,
    /// - patch difference at info,
    /// - provider trouble at warn (compatibility simply unverified).
    pub async fn check_compatibility(&self, expected_version: &str) -> Option<CompatibilityLevel> {
        let expected = match SemanticVersion::parse(expected_version) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(version = expected_version, error = %err,
                    "failed to parse expected schema version");
                return None;
            }
        };

        let served = match self.fetch_version().await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(error = %err,
                    "could not fetch grammar version; schema compatibility unverified");
                return None;
            }
        };

        let actual = match SemanticVersion::parse(&served) {
            Ok(v) => v,
            Err(err) => {
                tracing::error!(version = %served, error = %err,
                    "failed to parse served schema version");
                return None;
            }
        };

        let level = SemanticVersion::compare(&expected, &actual);
        match level {
            CompatibilityLevel::MajorMismatch => {
                tracing::error!(
                    expected = %expected, actual = %actual,
                    "grammar major version mismatch: generated code may not load"
                );
            }
            CompatibilityLevel::MinorMismatch => {
                tracing::warn!(
                    expected = %expected, actual = %actual,
                    "grammar minor version mismatch: new grammar features unused"
                );
            }
            CompatibilityLevel::PatchDiff => {
                tracing::info!(
                    expected = %expected, actual = %actual,
                    "grammar versions compatible (patch difference)"
                );
            }
            CompatibilityLevel::Compatible => {
                tracing::info!(version = %expected, "grammar versions match exactly");
            }
        }
        Some(level)
    }
}
