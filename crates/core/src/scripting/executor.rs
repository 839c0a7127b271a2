//! Scene rendering interface and shared types.
//!
//! Defines [`SceneRenderer`], the seam the pipeline executes scripts
//! through, along with [`ScriptInput`], [`ScriptOutput`] and
//! [`ScriptError`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::types::JobId;

/// Literal token in a synthesized script that stands for the export path.
pub const EXPORT_PLACEHOLDER: &str = "EXPORT_PATH";

/// Most output kept in an [`ScriptError::ExecutionFailed`] (4 KiB).
pub const MAX_FAILURE_OUTPUT_BYTES: usize = 4 * 1024;

/// Process-level settings for one subprocess run.
#[derive(Debug, Clone)]
pub struct ScriptInput {
    /// Additional environment variables set for the child process.
    pub env_vars: Vec<(String, String)>,
    /// Working directory for the child process (uses current dir if `None`).
    pub working_directory: Option<PathBuf>,
    /// Maximum wall-clock time before the process group is killed.
    pub timeout: Duration,
    /// Fires when the owning job is cancelled.
    pub cancel: CancellationToken,
}

/// Captured output from a finished process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptOutput {
    /// Stdout, capped at the per-stream limit.
    pub stdout: String,
    /// Stderr, capped at the per-stream limit.
    pub stderr: String,
    /// Process exit code (`-1` if killed by signal).
    pub exit_code: i32,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl ScriptOutput {
    /// Stdout followed by stderr, for diagnostics.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }
}

/// The last `max_bytes` of `s`, moved forward to a char boundary.
pub fn truncate_tail(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Replace every [`EXPORT_PLACEHOLDER`] in `script` with `output_path`.
///
/// The path is embedded inside a quoted string literal, so paths that
/// would break out of one are rejected.
pub fn substitute_export_path(script: &str, output_path: &Path) -> Result<String, ScriptError> {
    let path = output_path.to_str().ok_or_else(|| {
        ScriptError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("output path is not valid UTF-8: {}", output_path.display()),
        ))
    })?;
    if path.contains(|c| matches!(c, '\'' | '"' | '\\' | '\n')) {
        return Err(ScriptError::IoError(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("output path contains quoting characters: {path}"),
        )));
    }
    Ok(script.replace(EXPORT_PLACEHOLDER, path))
}

/// Errors that can occur while executing a script.
#[derive(Debug)]
pub enum ScriptError {
    /// The renderer binary was not found at the configured path.
    NotFound(String),
    /// The renderer binary exists but lacks execute permissions.
    PermissionDenied(String),
    /// The process exceeded its timeout and its process group was killed.
    Timeout {
        /// Elapsed wall-clock time before the process was killed.
        elapsed_ms: u64,
    },
    /// The owning job was cancelled and the process group was killed.
    Cancelled,
    /// The process ran but exited with a non-zero exit code.
    ExecutionFailed {
        /// Process exit code.
        exit_code: i32,
        /// Tail of the combined stdout/stderr.
        output: String,
    },
    /// An I/O error occurred while preparing, spawning or reading the process.
    IoError(std::io::Error),
}

impl ScriptError {
    /// Only timeouts are worth another attempt; everything else is
    /// deterministic for the same script.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "Renderer not found: {path}"),
            Self::PermissionDenied(path) => write!(f, "Permission denied: {path}"),
            Self::Timeout { elapsed_ms } => {
                write!(f, "Script timed out after {elapsed_ms}ms")
            }
            Self::Cancelled => f.write_str("Script cancelled"),
            Self::ExecutionFailed { exit_code, output } => {
                write!(f, "Script failed with exit code {exit_code}: {output}")
            }
            Self::IoError(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(err) => Some(err),
            _ => None,
        }
    }
}

/// Executes a synthesized scene script so that it exports a model to
/// `output_path`.
///
/// Implementations substitute [`EXPORT_PLACEHOLDER`] themselves. A
/// successful return only means the process exited cleanly; the caller
/// still has to verify the output file.
pub trait SceneRenderer: Send + Sync {
    fn render(
        &self,
        job_id: JobId,
        script: &str,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> impl std::future::Future<Output = Result<ScriptOutput, ScriptError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let err = ScriptError::NotFound("/opt/blender".to_string());
        assert_eq!(err.to_string(), "Renderer not found: /opt/blender");
    }

    #[test]
    fn display_timeout() {
        let err = ScriptError::Timeout { elapsed_ms: 5000 };
        assert_eq!(err.to_string(), "Script timed out after 5000ms");
    }

    #[test]
    fn display_execution_failed() {
        let err = ScriptError::ExecutionFailed {
            exit_code: 1,
            output: "NameError: name 'bpy' is not defined".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Script failed with exit code 1: NameError: name 'bpy' is not defined"
        );
    }

    #[test]
    fn error_source_io() {
        let err = ScriptError::IoError(std::io::Error::other("boom"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&ScriptError::Cancelled).is_none());
    }

    #[test]
    fn only_timeout_is_retryable() {
        assert!(ScriptError::Timeout { elapsed_ms: 1 }.is_retryable());
        assert!(!ScriptError::Cancelled.is_retryable());
        assert!(!ScriptError::ExecutionFailed {
            exit_code: 1,
            output: String::new()
        }
        .is_retryable());
    }

    #[test]
    fn truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("abcdef", 3), "def");
        assert_eq!(truncate_tail("abc", 10), "abc");
    }

    #[test]
    fn truncate_tail_respects_char_boundaries() {
        // "é" is two bytes; cutting inside it must skip forward.
        assert_eq!(truncate_tail("aéb", 2), "b");
    }

    #[test]
    fn combined_joins_streams() {
        let output = ScriptOutput {
            stdout: "Blender 4.0\n".into(),
            stderr: "Traceback".into(),
            exit_code: 1,
            duration_ms: 10,
        };
        assert_eq!(output.combined(), "Blender 4.0\nTraceback");
    }

    #[test]
    fn substitute_replaces_every_placeholder() {
        let script = "p = 'EXPORT_PATH'\nbpy.ops.export_scene.gltf(filepath='EXPORT_PATH')";
        let out = substitute_export_path(script, Path::new("/tmp/job/out.glb")).unwrap();
        assert!(!out.contains(EXPORT_PLACEHOLDER));
        assert_eq!(out.matches("/tmp/job/out.glb").count(), 2);
    }

    #[test]
    fn substitute_rejects_quoting_paths() {
        let result = substitute_export_path("'EXPORT_PATH'", Path::new("/tmp/it's/out.glb"));
        assert!(matches!(result, Err(ScriptError::IoError(_))));
    }
}
