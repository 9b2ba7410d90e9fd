//! Process-wide configuration, resolved once at startup from environment
//! variables and passed explicitly to every component that needs it.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_SUPPLEMENTARY_FILES: usize = 30;
pub const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 100;

/// Runtime configuration for policylens.
///
/// Every field has a sensible default so the server works out-of-the-box
/// without any environment variables set.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:8000"`).
    pub bind_address: String,

    /// sqlx SQLite URL (default: `"sqlite://policylens.db"`).
    pub database_url: String,

    /// Root directory for staged uploads.
    pub upload_dir: PathBuf,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// Optional directory for daily-rolling log files.
    pub log_dir: Option<String>,

    /// Comma-separated list of allowed CORS origins; `None` means wildcard.
    pub cors_allowed_origins: Option<String>,

    /// Serve the OpenAPI document at `/api-docs/openapi.json`.
    pub enable_docs: bool,

    pub intake: IntakeLimits,
    pub runner: RunnerConfig,
    pub query: QueryConfig,
    pub interpreter: InterpreterConfig,
}

/// Upload limits enforced by file intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeLimits {
    pub max_supplementary_files: usize,
    pub max_file_size_bytes: u64,
}

impl IntakeLimits {
    /// Upper bound for one multipart request carrying a full submission.
    pub fn max_request_bytes(&self) -> usize {
        let files = self.max_supplementary_files as u64 + 1;
        // Headroom for the text fields and multipart boundaries.
        let total = self.max_file_size_bytes.saturating_mul(files) + 1024 * 1024;
        usize::try_from(total).unwrap_or(usize::MAX)
    }
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            max_supplementary_files: DEFAULT_MAX_SUPPLEMENTARY_FILES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * 1024 * 1024,
        }
    }
}

/// Scheduling knobs for the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Maximum number of interpreter calls in flight at once.
    pub max_concurrent_tasks: usize,
    /// Ceiling on a single interpreter call.
    pub interpret_timeout: Duration,
    /// How often progress is advanced while the interpreter call is pending.
    pub progress_interval: Duration,
    /// Pause before the single retry of a failed store write.
    pub store_retry_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            interpret_timeout: Duration::from_secs(300),
            progress_interval: Duration::from_secs(2),
            store_retry_delay: Duration::from_millis(200),
        }
    }
}

/// Pagination bounds for the read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}

/// Where interpretation requests are sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Workflow endpoint. `None` selects the simulated interpreter.
    pub endpoint: Option<String>,
    /// Value for the `X-Auth-Token` header.
    pub auth_token: Option<String>,
    /// Prompt sent alongside the documents.
    pub query: String,
    /// Latency of the simulated interpreter.
    pub simulated_delay: Duration,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_token: None,
            query: "请解读该团单".to_owned(),
            simulated_delay: Duration::from_millis(3000),
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build [`Config`] from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let intake_defaults = IntakeLimits::default();
        let runner_defaults = RunnerConfig::default();
        let query_defaults = QueryConfig::default();
        let interpreter_defaults = InterpreterConfig::default();

        let max_file_size_mb: u64 =
            parse_env(&lookup, "POLICYLENS_MAX_FILE_SIZE_MB", DEFAULT_MAX_FILE_SIZE_MB);

        Self {
            bind_address: env_or(&lookup, "POLICYLENS_BIND", "0.0.0.0:8000"),
            database_url: env_or(&lookup, "POLICYLENS_DATABASE_URL", "sqlite://policylens.db"),
            upload_dir: PathBuf::from(env_or(&lookup, "POLICYLENS_UPLOAD_DIR", "uploads")),
            log_level: env_or(&lookup, "POLICYLENS_LOG", "info"),
            log_json: flag(&lookup, "POLICYLENS_LOG_JSON", false),
            log_dir: non_empty(&lookup, "POLICYLENS_LOG_DIR"),
            cors_allowed_origins: non_empty(&lookup, "POLICYLENS_CORS_ORIGINS"),
            enable_docs: flag(&lookup, "POLICYLENS_ENABLE_DOCS", true),
            intake: IntakeLimits {
                max_supplementary_files: parse_env(
                    &lookup,
                    "POLICYLENS_MAX_SUPPLEMENTARY_FILES",
                    intake_defaults.max_supplementary_files,
                ),
                max_file_size_bytes: max_file_size_mb.saturating_mul(1024 * 1024),
            },
            runner: RunnerConfig {
                max_concurrent_tasks: parse_env(
                    &lookup,
                    "POLICYLENS_MAX_CONCURRENT_TASKS",
                    runner_defaults.max_concurrent_tasks,
                )
                .max(1),
                interpret_timeout: Duration::from_secs(parse_env(
                    &lookup,
                    "POLICYLENS_INTERPRET_TIMEOUT_SECS",
                    runner_defaults.interpret_timeout.as_secs(),
                )),
                progress_interval: Duration::from_secs(
                    parse_env(
                        &lookup,
                        "POLICYLENS_PROGRESS_INTERVAL_SECS",
                        runner_defaults.progress_interval.as_secs(),
                    )
                    .max(1),
                ),
                store_retry_delay: Duration::from_millis(parse_env(
                    &lookup,
                    "POLICYLENS_STORE_RETRY_DELAY_MS",
                    runner_defaults.store_retry_delay.as_millis() as u64,
                )),
            },
            query: QueryConfig {
                default_page_size: parse_env(
                    &lookup,
                    "POLICYLENS_DEFAULT_PAGE_SIZE",
                    query_defaults.default_page_size,
                )
                .max(1),
                max_page_size: parse_env(
                    &lookup,
                    "POLICYLENS_MAX_PAGE_SIZE",
                    query_defaults.max_page_size,
                )
                .max(1),
            },
            interpreter: InterpreterConfig {
                endpoint: non_empty(&lookup, "POLICYLENS_INTERPRETER_URL"),
                auth_token: non_empty(&lookup, "POLICYLENS_INTERPRETER_TOKEN"),
                query: lookup("POLICYLENS_INTERPRETER_QUERY").unwrap_or(interpreter_defaults.query),
                simulated_delay: Duration::from_millis(parse_env(
                    &lookup,
                    "POLICYLENS_SIMULATED_DELAY_MS",
                    interpreter_defaults.simulated_delay.as_millis() as u64,
                )),
            },
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: &str) -> String {
    lookup(key).unwrap_or_else(|| default.to_owned())
}

fn parse_env<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn flag<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: bool) -> bool {
    lookup(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn non_empty<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}
