use artisan_pipeline::config::{parse_var, process_env, string_var, ConfigError, Lookup};

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. Pipeline
/// settings (synthesis, renderer, workers) live in
/// [`artisan_pipeline::PipelineSettings`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for in-flight jobs, in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// PostgreSQL URL; the in-memory job store is used when unset.
    pub database_url: Option<String>,
    /// Run the worker pool inside the API process (default: `true`).
    pub embedded_workers: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `8000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `DATABASE_URL`          | unset (in-memory store) |
    /// | `EMBEDDED_WORKERS`      | `true`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let cors_origins: Vec<String> = string_var(lookup, "CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            host: string_var(lookup, "HOST", "0.0.0.0"),
            port: parse_var(lookup, "PORT", 8000)?,
            cors_origins,
            request_timeout_secs: parse_var(lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parse_var(lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            database_url: lookup("DATABASE_URL")
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            embedded_workers: parse_var(lookup, "EMBEDDED_WORKERS", true)?,
        })
    }
}
