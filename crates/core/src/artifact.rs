//! Durable storage for finished models.
//!
//! A model becomes visible under its final name `<root>/<job_id>.glb` only
//! through an atomic rename from the staging directory, so readers observe
//! either the complete file or nothing. Status never comes from the
//! filesystem; this module only answers "which bytes belong to this job".

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::types::JobId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// File extension of committed artifacts.
pub const ARTIFACT_EXTENSION: &str = "glb";

/// Subdirectory of the root holding in-flight copies.
const STAGING_DIR: &str = ".staging";

/// Suffix of in-flight copies in [`STAGING_DIR`].
const PART_SUFFIX: &str = ".part";

/// Read buffer used while hashing.
const HASH_CHUNK_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Artifact reference
// ---------------------------------------------------------------------------

/// Name of a committed artifact, always `<job uuid>.glb`.
///
/// Parsing is strict (lowercase hyphenated uuid, exact extension), so a
/// reference can never name a path outside the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactRef(JobId);

impl ArtifactRef {
    pub fn for_job(job_id: JobId) -> Self {
        Self(job_id)
    }

    pub fn job_id(&self) -> JobId {
        self.0
    }

    /// The file name under the store root.
    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{ARTIFACT_EXTENSION}", self.0)
    }
}

impl FromStr for ArtifactRef {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ArtifactError::InvalidRef(s.to_string());
        let stem = s
            .strip_suffix(ARTIFACT_EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
            .ok_or_else(invalid)?;
        let id = uuid::Uuid::parse_str(stem).map_err(|_| invalid())?;
        if id.hyphenated().to_string() != stem {
            return Err(invalid());
        }
        Ok(Self(id))
    }
}

impl TryFrom<String> for ArtifactRef {
    type Error = ArtifactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ArtifactRef> for String {
    fn from(value: ArtifactRef) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Renderer produced no output at {0}")]
    EmptyArtifact(String),

    #[error("Invalid artifact reference '{0}'")]
    InvalidRef(String),

    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

/// Filesystem-backed artifact store rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Create the root and staging directories and discard copies left
    /// behind by a crashed process.
    pub async fn init(&self) -> Result<(), ArtifactError> {
        let staging = self.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;

        let mut entries = tokio::fs::read_dir(&staging).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().ends_with(PART_SUFFIX) {
                if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Failed to remove stale staging file");
                } else {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed stale staging files");
        }
        Ok(())
    }

    /// Absolute location of a committed artifact.
    pub fn path_for(&self, artifact: &ArtifactRef) -> PathBuf {
        self.root.join(artifact.file_name())
    }

    /// Persist the renderer output at `produced` as the artifact of `job_id`.
    ///
    /// A missing or zero-byte file yields [`ArtifactError::EmptyArtifact`].
    /// Committing content identical to what is already stored is a no-op.
    pub async fn commit(&self, job_id: JobId, produced: &Path) -> Result<ArtifactRef, ArtifactError> {
        let produced_display = produced.display().to_string();
        let len = match tokio::fs::metadata(produced).await {
            Ok(meta) if meta.is_file() => meta.len(),
            Ok(_) => return Err(ArtifactError::EmptyArtifact(produced_display)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ArtifactError::EmptyArtifact(produced_display));
            }
            Err(e) => return Err(e.into()),
        };
        if len == 0 {
            return Err(ArtifactError::EmptyArtifact(produced_display));
        }

        let artifact = ArtifactRef::for_job(job_id);
        let final_path = self.path_for(&artifact);

        if tokio::fs::try_exists(&final_path).await?
            && sha256_file(&final_path).await? == sha256_file(produced).await?
        {
            tracing::debug!(job_id = %job_id, "Artifact already committed with identical content");
            return Ok(artifact);
        }

        let staging = self.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        let part = staging.join(format!("{job_id}-{}{PART_SUFFIX}", uuid::Uuid::new_v4()));

        if let Err(e) = self.stage_and_publish(produced, &part, &final_path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        tracing::info!(job_id = %job_id, bytes = len, artifact = %artifact, "Artifact committed");
        Ok(artifact)
    }

    async fn stage_and_publish(
        &self,
        produced: &Path,
        part: &Path,
        final_path: &Path,
    ) -> Result<(), ArtifactError> {
        tokio::fs::copy(produced, part).await?;
        tokio::fs::File::open(part).await?.sync_all().await?;
        tokio::fs::rename(part, final_path).await?;

        // Persist the directory entry; not every platform allows fsync on a
        // directory handle.
        if let Ok(dir) = tokio::fs::File::open(&self.root).await {
            let _ = dir.sync_all().await;
        }
        Ok(())
    }

    pub async fn exists(&self, artifact: &ArtifactRef) -> Result<bool, ArtifactError> {
        Ok(tokio::fs::try_exists(self.path_for(artifact)).await?)
    }

    /// Open a committed artifact for streaming, returning it with its size.
    pub async fn open(&self, artifact: &ArtifactRef) -> Result<(tokio::fs::File, u64), ArtifactError> {
        let file = tokio::fs::File::open(self.path_for(artifact))
            .await
            .map_err(|e| not_found_or_io(e, artifact))?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn read(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        tokio::fs::read(self.path_for(artifact))
            .await
            .map_err(|e| not_found_or_io(e, artifact))
    }
}

fn not_found_or_io(e: std::io::Error, artifact: &ArtifactRef) -> ArtifactError {
    if e.kind() == std::io::ErrorKind::NotFound {
        ArtifactError::NotFound(artifact.to_string())
    } else {
        ArtifactError::Io(e)
    }
}

/// SHA-256 digest of a file's contents.
async fn sha256_file(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_CHUNK_BYTES];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
