//! Blender-backed [`SceneRenderer`].
//!
//! Each render writes the substituted script to a private temporary file in
//! the scratch directory and runs Blender headless against it. The temporary
//! file is removed when the render returns, whatever the outcome.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;

use super::executor::{
    substitute_export_path, truncate_tail, SceneRenderer, ScriptError, ScriptInput, ScriptOutput,
    MAX_FAILURE_OUTPUT_BYTES,
};
use super::subprocess;
use crate::types::JobId;

/// Default location of the Blender executable.
pub const DEFAULT_RENDERER_BIN: &str = "/usr/local/blender/blender";

/// Default wall-clock limit for one render (5 minutes).
pub const DEFAULT_EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings for [`BlenderRenderer`].
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Path to the Blender executable.
    pub binary: PathBuf,
    /// Directory receiving the per-render temporary script files.
    pub scratch_dir: PathBuf,
    /// Maximum wall-clock time per render.
    pub timeout: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from(DEFAULT_RENDERER_BIN),
            scratch_dir: std::env::temp_dir(),
            timeout: DEFAULT_EXECUTION_TIMEOUT,
        }
    }
}

/// Runs scene scripts with `blender --background --python <script>`.
#[derive(Debug, Clone)]
pub struct BlenderRenderer {
    config: RendererConfig,
}

impl BlenderRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Verify the renderer binary exists and is executable.
    pub async fn check_binary(&self) -> Result<(), ScriptError> {
        let binary = &self.config.binary;
        let metadata = tokio::fs::metadata(binary)
            .await
            .map_err(|_| ScriptError::NotFound(binary.display().to_string()))?;

        let mode = metadata.permissions().mode();
        if !metadata.is_file() || mode & 0o111 == 0 {
            return Err(ScriptError::PermissionDenied(format!(
                "{} is not executable (mode {mode:#o})",
                binary.display()
            )));
        }
        Ok(())
    }

    /// Write `contents` to a fresh owner-only temporary file in the scratch
    /// directory. Dropping the handle deletes the file.
    async fn write_script(&self, job_id: JobId, contents: String) -> Result<NamedTempFile, ScriptError> {
        let scratch_dir = self.config.scratch_dir.clone();
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(ScriptError::IoError)?;

        tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
            let mut file = tempfile::Builder::new()
                .prefix(&format!("render-{job_id}-"))
                .suffix(".py")
                .permissions(std::fs::Permissions::from_mode(0o600))
                .tempfile_in(&scratch_dir)?;
            file.write_all(contents.as_bytes())?;
            file.as_file().sync_all()?;
            Ok(file)
        })
        .await
        .map_err(|e| ScriptError::IoError(std::io::Error::other(e)))?
        .map_err(ScriptError::IoError)
    }
}

impl SceneRenderer for BlenderRenderer {
    async fn render(
        &self,
        job_id: JobId,
        script: &str,
        output_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutput, ScriptError> {
        self.check_binary().await?;

        let contents = substitute_export_path(script, output_path)?;
        let script_file = self.write_script(job_id, contents).await?;

        let mut cmd = tokio::process::Command::new(&self.config.binary);
        cmd.arg("--background")
            .arg("--python-exit-code")
            .arg("1")
            .arg("--python")
            .arg(script_file.path());

        let input = ScriptInput {
            env_vars: vec![],
            working_directory: output_path.parent().map(Path::to_path_buf),
            timeout: self.config.timeout,
            cancel: cancel.clone(),
        };

        tracing::debug!(
            job_id = %job_id,
            script = %script_file.path().display(),
            timeout_ms = self.config.timeout.as_millis() as u64,
            "Starting renderer",
        );

        let result = subprocess::run_command(&mut cmd, input).await;
        drop(script_file);
        let output = result?;

        if output.exit_code != 0 {
            let combined = output.combined();
            return Err(ScriptError::ExecutionFailed {
                exit_code: output.exit_code,
                output: truncate_tail(&combined, MAX_FAILURE_OUTPUT_BYTES).to_string(),
            });
        }

        tracing::debug!(job_id = %job_id, duration_ms = output.duration_ms, "Renderer finished");
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::scripting::test_helpers::fake_renderer;
    use crate::types::new_job_id;

    struct Fixture {
        _dir: tempfile::TempDir,
        scratch: PathBuf,
        out_dir: PathBuf,
        renderer: BlenderRenderer,
    }

    fn fixture(timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let out_dir = dir.path().join("out");
        std::fs::create_dir_all(&out_dir).unwrap();
        let renderer = BlenderRenderer::new(RendererConfig {
            binary: fake_renderer(dir.path()),
            scratch_dir: scratch.clone(),
            timeout,
        });
        Fixture {
            _dir: dir,
            scratch,
            out_dir,
            renderer,
        }
    }

    fn scratch_is_empty(path: &Path) -> bool {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(true)
    }

    #[tokio::test]
    async fn render_writes_output_and_cleans_script() {
        let fx = fixture(Duration::from_secs(10));
        let output = fx.out_dir.join("model.glb");

        fx.renderer
            .render(
                new_job_id(),
                "head -c 1200 /dev/zero > 'EXPORT_PATH'",
                &output,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::metadata(&output).unwrap().len(), 1200);
        assert!(scratch_is_empty(&fx.scratch));
    }

    #[tokio::test]
    async fn script_file_is_owner_only() {
        let fx = fixture(Duration::from_secs(10));
        let output = fx.out_dir.join("mode.txt");

        // The script reports its own permission bits.
        fx.renderer
            .render(
                new_job_id(),
                "stat -c %a \"$0\" > 'EXPORT_PATH'",
                &output,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap().trim(), "600");
    }

    #[tokio::test]
    async fn non_zero_exit_is_execution_failed_with_tail() {
        let fx = fixture(Duration::from_secs(10));
        let script = "head -c 10000 /dev/zero | tr '\\0' 'x'; echo; echo 'Traceback: boom' >&2; exit 1";

        let err = fx
            .renderer
            .render(
                new_job_id(),
                script,
                &fx.out_dir.join("model.glb"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(err, ScriptError::ExecutionFailed { exit_code: 1, ref output } => {
            assert!(output.len() <= MAX_FAILURE_OUTPUT_BYTES);
            assert!(output.contains("Traceback: boom"));
        });
        assert!(scratch_is_empty(&fx.scratch));
    }

    #[tokio::test]
    async fn timeout_kills_and_cleans_script() {
        let fx = fixture(Duration::from_millis(300));

        let err = fx
            .renderer
            .render(
                new_job_id(),
                "sleep 30",
                &fx.out_dir.join("model.glb"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_matches!(err, ScriptError::Timeout { .. });
        assert!(scratch_is_empty(&fx.scratch));
    }

    #[tokio::test]
    async fn cancellation_stops_render() {
        let fx = fixture(Duration::from_secs(30));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let err = fx
            .renderer
            .render(new_job_id(), "sleep 30", &fx.out_dir.join("model.glb"), &cancel)
            .await
            .unwrap_err();

        assert_matches!(err, ScriptError::Cancelled);
        assert!(scratch_is_empty(&fx.scratch));
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = BlenderRenderer::new(RendererConfig {
            binary: dir.path().join("no-blender"),
            scratch_dir: dir.path().to_path_buf(),
            timeout: Duration::from_secs(1),
        });
        assert_matches!(renderer.check_binary().await, Err(ScriptError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_executable_binary_is_permission_denied() {
        let f = tempfile::NamedTempFile::new().expect("create temp file");
        let renderer = BlenderRenderer::new(RendererConfig {
            binary: f.path().to_path_buf(),
            ..Default::default()
        });
        assert_matches!(
            renderer.check_binary().await,
            Err(ScriptError::PermissionDenied(_))
        );
    }
}
