use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "invoice-flow";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Whole-run budget when nothing overrides it.
pub const DEFAULT_RUN_TIMEOUT_SECS: u64 = 300;

/// How long process shutdown waits for step bodies a run abandoned.
pub const SHUTDOWN_GRACE_MS: u64 = 500;

/// Request timeout for the model check done before an LLM-backed run.
pub const LLM_PROBE_TIMEOUT_SECS: u64 = 10;

/// Local Ollama endpoint used by the LLM-backed collaborators.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Model used by the LLM-backed comparator and classifier.
pub const DEFAULT_LLM_MODEL: &str = "llama3.1:8b";

pub const ENV_TIMEOUT_SECS: &str = "INVOICE_FLOW_TIMEOUT_SECS";
pub const ENV_INPUT_DIR: &str = "INVOICE_FLOW_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "INVOICE_FLOW_OUTPUT_DIR";
pub const ENV_OLLAMA_HOST: &str = "OLLAMA_HOST";
pub const ENV_MODEL: &str = "INVOICE_FLOW_MODEL";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "invoice_flow=info,warn"
}

/// Get the application data directory (`~/invoice-flow/`).
///
/// Falls back to the current directory when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Where documents are picked up from.
pub fn input_dir() -> PathBuf {
    app_data_dir().join("input")
}

/// Where per-run outputs land; cleared before every batch.
pub fn processed_dir() -> PathBuf {
    app_data_dir().join("processed")
}

// ═══════════════════════════════════════════════════════════
// Workflow configuration
// ═══════════════════════════════════════════════════════════

/// Settings that shape a single run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Budget for a whole run, from start event to terminal result.
    pub run_timeout: Duration,
    /// Logs every dispatch and join transition at `info` instead of `debug`.
    pub verbose: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(DEFAULT_RUN_TIMEOUT_SECS),
            verbose: false,
        }
    }
}

impl WorkflowConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Apply `INVOICE_FLOW_TIMEOUT_SECS` if set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(secs) = env_u64(ENV_TIMEOUT_SECS) {
            config.run_timeout = Duration::from_secs(secs);
        }
        config
    }
}

// ═══════════════════════════════════════════════════════════
// Application configuration
// ═══════════════════════════════════════════════════════════

/// Everything the binary needs beyond a single run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub workflow: WorkflowConfig,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub ollama_host: String,
    pub model: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            input_dir: input_dir(),
            output_dir: processed_dir(),
            ollama_host: DEFAULT_OLLAMA_HOST.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workflow: WorkflowConfig::from_env(),
            input_dir: std::env::var(ENV_INPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.input_dir),
            output_dir: std::env::var(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            ollama_host: std::env::var(ENV_OLLAMA_HOST).unwrap_or(defaults.ollama_host),
            model: std::env::var(ENV_MODEL).unwrap_or(defaults.model),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Some(value),
        _ => {
            tracing::warn!(key, value = %raw, "Ignoring invalid numeric override");
            None
        }
    }
}
