//! Pipeline configuration loaded from environment variables.
//!
//! Every binary builds its settings through [`PipelineSettings::from_env`];
//! tests go through [`PipelineSettings::from_lookup`] with a map so they
//! never touch the process environment.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use artisan_core::retry::RetryPolicy;
use artisan_core::scripting::blender::{RendererConfig, DEFAULT_RENDERER_BIN};
use artisan_synthesis::client::{DEFAULT_OLLAMA_MODEL, DEFAULT_OLLAMA_URL};
use artisan_synthesis::SynthesisConfig;

/// A variable lookup, usually [`process_env`].
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}': {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Read a variable from the real process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Parse `var`, falling back to `default` when it is unset or blank.
pub fn parse_var<T>(lookup: Lookup<'_>, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Read a string variable, falling back to `default` when unset or blank.
pub fn string_var(lookup: Lookup<'_>, var: &'static str, default: &str) -> String {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Read a variable that has no default.
pub fn required_var(lookup: Lookup<'_>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(var))
}

fn secs_var(lookup: Lookup<'_>, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_var(lookup, var, default)?;
    positive(var, secs)?;
    Ok(Duration::from_secs(secs))
}

fn positive(var: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: value.to_string(),
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Default number of concurrent workers.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default lease lifetime; renewed every third of it while a job runs.
pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(600);

/// Default period of the recovery sweep.
pub const DEFAULT_RECOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of times a job may be delivered before it is failed
/// instead of run again.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Default artifact directory.
pub const DEFAULT_ARTIFACT_DIR: &str = "./models";

/// How the worker pool runs jobs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Number of long-lived worker tasks.
    pub worker_count: usize,
    pub lease_ttl: Duration,
    pub recovery_interval: Duration,
    /// Maximum ids re-enqueued per recovery sweep.
    pub recovery_batch: usize,
    /// Capacity of the in-process queue.
    pub queue_capacity: usize,
    pub synthesis_retry: RetryPolicy,
    pub execution_retry: RetryPolicy,
    /// Deliveries (lease acquisitions) allowed per job.
    pub max_deliveries: u32,
    /// Parent of the per-job working directories.
    pub scratch_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            lease_ttl: DEFAULT_LEASE_TTL,
            recovery_interval: DEFAULT_RECOVERY_INTERVAL,
            recovery_batch: 100,
            queue_capacity: 1024,
            synthesis_retry: RetryPolicy::default(),
            execution_retry: RetryPolicy {
                max_attempts: 2,
                ..RetryPolicy::default()
            },
            max_deliveries: DEFAULT_MAX_DELIVERIES,
            scratch_dir: std::env::temp_dir(),
        }
    }
}

/// Everything a process needs to assemble the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pipeline: PipelineConfig,
    pub synthesis: SynthesisConfig,
    pub renderer: RendererConfig,
    pub artifact_dir: PathBuf,
}

impl PipelineSettings {
    /// Load settings from the process environment.
    ///
    /// | Env Var                  | Default                      |
    /// |--------------------------|------------------------------|
    /// | `OLLAMA_URL`             | `http://localhost:11434`     |
    /// | `OLLAMA_MODEL`           | `codellama`                  |
    /// | `SYNTHESIS_TIMEOUT_SECS` | `120`                        |
    /// | `RENDERER_BIN`           | `/usr/local/blender/blender` |
    /// | `EXECUTION_TIMEOUT_SECS` | `300`                        |
    /// | `SCRATCH_DIR`            | system temp dir              |
    /// | `ARTIFACT_DIR`           | `./models`                   |
    /// | `WORKER_COUNT`           | `2`                          |
    /// | `LEASE_TTL_SECS`         | `600`                        |
    /// | `RECOVERY_INTERVAL_SECS` | `5`                          |
    /// | `MAX_DELIVERIES`         | `5`                          |
    /// | `SYNTHESIS_MAX_ATTEMPTS` | `3`                          |
    /// | `EXECUTION_MAX_ATTEMPTS` | `2`                          |
    /// | `RETRY_INITIAL_DELAY_MS` | `1000`                       |
    /// | `RETRY_MAX_DELAY_MS`     | `30000`                      |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();

        let scratch_dir = lookup("SCRATCH_DIR")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.scratch_dir);

        let worker_count: usize = parse_var(lookup, "WORKER_COUNT", defaults.worker_count)?;
        positive("WORKER_COUNT", worker_count as u64)?;

        let initial_delay_ms: u64 = parse_var(lookup, "RETRY_INITIAL_DELAY_MS", 1000)?;
        let max_delay_ms: u64 = parse_var(lookup, "RETRY_MAX_DELAY_MS", 30_000)?;
        let base_retry = RetryPolicy {
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms.max(initial_delay_ms)),
            ..RetryPolicy::default()
        };

        let synthesis_attempts: u32 = parse_var(lookup, "SYNTHESIS_MAX_ATTEMPTS", 3)?;
        positive("SYNTHESIS_MAX_ATTEMPTS", u64::from(synthesis_attempts))?;
        let execution_attempts: u32 = parse_var(lookup, "EXECUTION_MAX_ATTEMPTS", 2)?;
        positive("EXECUTION_MAX_ATTEMPTS", u64::from(execution_attempts))?;
        let max_deliveries: u32 = parse_var(lookup, "MAX_DELIVERIES", defaults.max_deliveries)?;
        positive("MAX_DELIVERIES", u64::from(max_deliveries))?;

        let pipeline = PipelineConfig {
            worker_count,
            lease_ttl: secs_var(lookup, "LEASE_TTL_SECS", DEFAULT_LEASE_TTL.as_secs())?,
            recovery_interval: secs_var(
                lookup,
                "RECOVERY_INTERVAL_SECS",
                DEFAULT_RECOVERY_INTERVAL.as_secs(),
            )?,
            synthesis_retry: RetryPolicy {
                max_attempts: synthesis_attempts,
                ..base_retry.clone()
            },
            execution_retry: RetryPolicy {
                max_attempts: execution_attempts,
                ..base_retry
            },
            max_deliveries,
            scratch_dir: scratch_dir.clone(),
            ..defaults
        };

        let synthesis = SynthesisConfig {
            base_url: string_var(lookup, "OLLAMA_URL", DEFAULT_OLLAMA_URL),
            model: string_var(lookup, "OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL),
            timeout: secs_var(lookup, "SYNTHESIS_TIMEOUT_SECS", 120)?,
        };

        let renderer = RendererConfig {
            binary: PathBuf::from(string_var(lookup, "RENDERER_BIN", DEFAULT_RENDERER_BIN)),
            scratch_dir,
            timeout: secs_var(lookup, "EXECUTION_TIMEOUT_SECS", 300)?,
        };

        Ok(Self {
            pipeline,
            synthesis,
            renderer,
            artifact_dir: PathBuf::from(string_var(lookup, "ARTIFACT_DIR", DEFAULT_ARTIFACT_DIR)),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<PipelineSettings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PipelineSettings::from_lookup(&move |name: &str| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings.pipeline.worker_count, 2);
        assert_eq!(settings.pipeline.lease_ttl, Duration::from_secs(600));
        assert_eq!(settings.pipeline.recovery_interval, Duration::from_secs(5));
        assert_eq!(settings.pipeline.synthesis_retry.max_attempts, 3);
        assert_eq!(settings.pipeline.execution_retry.max_attempts, 2);
        assert_eq!(settings.pipeline.max_deliveries, 5);
        assert_eq!(
            settings.pipeline.synthesis_retry.initial_delay,
            Duration::from_millis(1000)
        );
        assert_eq!(settings.synthesis.base_url, "http://localhost:11434");
        assert_eq!(settings.synthesis.model, "codellama");
        assert_eq!(settings.synthesis.timeout, Duration::from_secs(120));
        assert_eq!(
            settings.renderer.binary,
            PathBuf::from("/usr/local/blender/blender")
        );
        assert_eq!(settings.renderer.timeout, Duration::from_secs(300));
        assert_eq!(settings.artifact_dir, PathBuf::from("./models"));
        assert_eq!(settings.renderer.scratch_dir, settings.pipeline.scratch_dir);
    }

    #[test]
    fn overrides_are_parsed() {
        let settings = load(&[
            ("WORKER_COUNT", "8"),
            ("OLLAMA_MODEL", "llama3"),
            ("EXECUTION_TIMEOUT_SECS", "45"),
            ("SCRATCH_DIR", "/var/tmp/artisan"),
            ("RETRY_INITIAL_DELAY_MS", "50"),
            ("RETRY_MAX_DELAY_MS", "200"),
            ("MAX_DELIVERIES", "3"),
        ])
        .unwrap();
        assert_eq!(settings.pipeline.worker_count, 8);
        assert_eq!(settings.pipeline.max_deliveries, 3);
        assert_eq!(settings.synthesis.model, "llama3");
        assert_eq!(settings.renderer.timeout, Duration::from_secs(45));
        assert_eq!(settings.renderer.scratch_dir, PathBuf::from("/var/tmp/artisan"));
        assert_eq!(
            settings.pipeline.execution_retry.max_delay,
            Duration::from_millis(200)
        );
    }

    #[test]
    fn blank_value_falls_back_to_default() {
        let settings = load(&[("WORKER_COUNT", "  "), ("OLLAMA_URL", "")]).unwrap();
        assert_eq!(settings.pipeline.worker_count, 2);
        assert_eq!(settings.synthesis.base_url, "http://localhost:11434");
    }

    #[test]
    fn malformed_value_names_the_variable() {
        let err = load(&[("LEASE_TTL_SECS", "ten")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "LEASE_TTL_SECS", .. });
        assert!(err.to_string().contains("LEASE_TTL_SECS"));
    }

    #[test]
    fn zero_workers_rejected() {
        assert_matches!(
            load(&[("WORKER_COUNT", "0")]),
            Err(ConfigError::Invalid { var: "WORKER_COUNT", .. })
        );
    }

    #[test]
    fn zero_deliveries_rejected() {
        assert_matches!(
            load(&[("MAX_DELIVERIES", "0")]),
            Err(ConfigError::Invalid { var: "MAX_DELIVERIES", .. })
        );
    }

    #[test]
    fn required_var_reports_missing() {
        let lookup = |_: &str| -> Option<String> { None };
        assert_matches!(
            required_var(&lookup, "DATABASE_URL"),
            Err(ConfigError::Missing("DATABASE_URL"))
        );
    }
}
