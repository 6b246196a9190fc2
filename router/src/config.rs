//! Configuration for the router.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config as ConfigLoader, Environment, File};
use serde::Deserialize;
use turnstile_common::UseCase;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "TURNSTILE_CONFIG";

/// Main configuration structure for the router.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Backend per use case. Use cases left out fall back to
    /// [`default_backend`].
    #[serde(default)]
    pub backends: HashMap<UseCase, BackendConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Which session store implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStoreKind {
    /// In-process store. Sessions are not shared between router instances.
    #[default]
    Memory,
    /// Shared Redis store.
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub store: SessionStoreKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Key prefix for sessions in Redis.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Sliding inactivity TTL, refreshed on every turn.
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
    /// Turns after which a session is re-classified instead of bypassed.
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: u64,
    /// Deadline for a single store operation before the request degrades.
    #[serde(default = "default_store_timeout")]
    pub op_timeout_ms: u64,
    /// How often the in-memory store drops expired sessions.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store: SessionStoreKind::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: default_session_ttl(),
            max_turns_per_session: default_max_turns(),
            op_timeout_ms: default_store_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Per-attempt deadline for a backend call.
    #[serde(default = "default_dispatch_timeout")]
    pub timeout_secs: u64,
    /// Same-backend retries after a transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_dispatch_timeout(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
        }
    }
}

/// Wire contract a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// OpenAI-compatible `POST /v1/chat/completions`.
    Completion,
    /// Multipart `POST /transcribe`.
    Transcription,
    /// `POST /synthesize` with query parameters.
    Synthesis,
}

impl AdapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completion => "completion",
            Self::Transcription => "transcription",
            Self::Synthesis => "synthesis",
        }
    }

    /// The only adapter able to serve a use case.
    pub fn for_use_case(use_case: UseCase) -> Self {
        match use_case {
            UseCase::Stt => Self::Transcription,
            UseCase::Tts => Self::Synthesis,
            UseCase::Agent | UseCase::Avatar | UseCase::Multimodal | UseCase::Video => {
                Self::Completion
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Logical name reported as `selected_backend`.
    pub name: String,
    pub base_url: String,
    pub adapter: AdapterKind,
    /// Model id sent to completion backends.
    #[serde(default)]
    pub model: Option<String>,
}

/// Backend used for a use case the config file does not mention.
///
/// Mirrors the reference deployment: one multimodal completion server shared
/// by the text and vision use cases, plus dedicated speech services.
pub fn default_backend(use_case: UseCase) -> BackendConfig {
    match AdapterKind::for_use_case(use_case) {
        AdapterKind::Completion => BackendConfig {
            name: "minicpm-v-4".to_string(),
            base_url: "http://localhost:8000".to_string(),
            adapter: AdapterKind::Completion,
            model: Some("/app/models/minicpm-v-4".to_string()),
        },
        AdapterKind::Transcription => BackendConfig {
            name: "whisper-large-v3".to_string(),
            base_url: "http://localhost:8002".to_string(),
            adapter: AdapterKind::Transcription,
            model: None,
        },
        AdapterKind::Synthesis => BackendConfig {
            name: "indic-tts".to_string(),
            base_url: "http://localhost:8003".to_string(),
            adapter: AdapterKind::Synthesis,
            model: None,
        },
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8001
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_key_prefix() -> String {
    "session:".to_string()
}
fn default_session_ttl() -> u64 {
    1800
}
fn default_max_turns() -> u64 {
    1000
}
fn default_store_timeout() -> u64 {
    250
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_dispatch_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base() -> u64 {
    200
}
fn default_max_tokens() -> u32 {
    100
}
fn default_temperature() -> f32 {
    0.7
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Backend for '{use_case}' has an empty base_url")]
    EmptyBaseUrl { use_case: UseCase },
    #[error("Backend for '{use_case}' uses adapter '{actual}', expected '{expected}'")]
    AdapterMismatch {
        use_case: UseCase,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (TURNSTILE__SECTION__KEY format)
    /// 2. The file named by `TURNSTILE_CONFIG`, or `config.toml` (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config".to_string());
        let config: Config = ConfigLoader::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(
                Environment::with_prefix("TURNSTILE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a single file, without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = ConfigLoader::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Backend for a use case, falling back to the built-in default.
    pub fn backend_for(&self, use_case: UseCase) -> BackendConfig {
        self.backends
            .get(&use_case)
            .cloned()
            .unwrap_or_else(|| default_backend(use_case))
    }

    /// Reject configurations the router cannot serve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for use_case in UseCase::ALL {
            let backend = self.backend_for(use_case);
            if backend.base_url.trim().is_empty() {
                return Err(ConfigError::EmptyBaseUrl { use_case });
            }
            let expected = AdapterKind::for_use_case(use_case);
            if backend.adapter != expected {
                return Err(ConfigError::AdapterMismatch {
                    use_case,
                    expected: expected.as_str(),
                    actual: backend.adapter.as_str(),
                });
            }
        }
        if self.session.ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "session.ttl_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.dispatch.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "dispatch.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
