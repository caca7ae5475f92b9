//! Configuration loading for the tenant gateway.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `GATEWAY_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const ENV_PREFIX: &str = "GATEWAY_";

/// Application configuration derived from `GATEWAY_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operator_tokens: Vec<String>,
    /// Key used to decrypt tenant-supplied model credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_key: Option<Vec<u8>>,
    /// Directory holding one credential store per tenant session.
    #[serde(default = "default_session_store_dir")]
    pub session_store_dir: String,
    /// Root of locally stored media, served as `/uploads/...`.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bridge_signing_secret: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub auto_reply: AutoReplyConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub broadcast_scheduler: BroadcastSchedulerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

/// Which queue implementation backs the two work lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Database,
    Memory,
}

impl std::str::FromStr for QueueBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "database" | "db" => Ok(Self::Database),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::InvalidQueueBackend {
                value: other.to_string(),
            }),
        }
    }
}

/// Work queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QueueConfig {
    #[serde(default = "default_queue_backend")]
    pub backend: QueueBackend,
    /// Fallback poll interval while waiting on an empty lane.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_ai_lane_key")]
    pub ai_lane_key: String,
    #[serde(default = "default_broadcast_lane_key")]
    pub broadcast_lane_key: String,
}

/// Automated-reply worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AutoReplyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_worker_count")]
    pub workers: u32,
    #[serde(default = "default_pop_timeout_seconds")]
    pub pop_timeout_seconds: u64,
    /// Upper bound on one language-model request.
    #[serde(default = "default_provider_timeout_seconds")]
    pub provider_timeout_seconds: u64,
    #[serde(default = "default_knowledge_limit")]
    pub knowledge_limit: u64,
    #[serde(default = "default_history_limit")]
    pub history_limit: u64,
    /// Per-turn character budget for conversation history.
    #[serde(default = "default_history_char_budget")]
    pub history_char_budget: usize,
}

/// Broadcast delivery worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct DeliveryConfig {
    #[serde(default = "default_pop_timeout_seconds")]
    pub pop_timeout_seconds: u64,
}

/// Broadcast scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct BroadcastSchedulerConfig {
    #[serde(default = "default_broadcast_tick_interval_seconds")]
    pub tick_interval_seconds: u64,
    #[serde(default = "default_broadcast_batch_size")]
    pub batch_size: u64,
}

/// Event hub sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HubConfig {
    #[serde(default = "default_hub_capacity")]
    pub command_capacity: usize,
    #[serde(default = "default_hub_capacity")]
    pub client_buffer: usize,
}

/// Startup reconnect sweep configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reconnect_delay_ms")]
    pub startup_delay_ms: u64,
    #[serde(default = "default_reconnect_concurrency")]
    pub concurrency: u32,
}

/// Language-model provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub default_provider: String,
    #[serde(default = "default_llm_model")]
    pub default_model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groq_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    /// Base URL overrides keyed by provider name (used by tests and proxies).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base_urls: BTreeMap<String, String>,
}

impl LlmConfig {
    /// System-wide credential for one provider, if configured.
    pub fn system_key(&self, provider: &str) -> Option<&str> {
        let key = match provider {
            "gemini" => self.gemini_api_key.as_deref(),
            "openai" => self.openai_api_key.as_deref(),
            "groq" => self.groq_api_key.as_deref(),
            "anthropic" | "claude" => self.anthropic_api_key.as_deref(),
            _ => None,
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            operator_tokens: Vec::new(),
            crypto_key: None,
            session_store_dir: default_session_store_dir(),
            uploads_dir: default_uploads_dir(),
            bridge_base_url: None,
            bridge_signing_secret: None,
            queue: QueueConfig::default(),
            auto_reply: AutoReplyConfig::default(),
            delivery: DeliveryConfig::default(),
            broadcast_scheduler: BroadcastSchedulerConfig::default(),
            hub: HubConfig::default(),
            reconnect: ReconnectConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: default_queue_backend(),
            poll_interval_ms: default_queue_poll_interval_ms(),
            ai_lane_key: default_ai_lane_key(),
            broadcast_lane_key: default_broadcast_lane_key(),
        }
    }
}

impl Default for AutoReplyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_worker_count(),
            pop_timeout_seconds: default_pop_timeout_seconds(),
            provider_timeout_seconds: default_provider_timeout_seconds(),
            knowledge_limit: default_knowledge_limit(),
            history_limit: default_history_limit(),
            history_char_budget: default_history_char_budget(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pop_timeout_seconds: default_pop_timeout_seconds(),
        }
    }
}

impl Default for BroadcastSchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: default_broadcast_tick_interval_seconds(),
            batch_size: default_broadcast_batch_size(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: default_hub_capacity(),
            client_buffer: default_hub_capacity(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_ms: default_reconnect_delay_ms(),
            concurrency: default_reconnect_concurrency(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_llm_provider(),
            default_model: default_llm_model(),
            gemini_api_key: None,
            openai_api_key: None,
            groq_api_key: None,
            anthropic_api_key: None,
            base_urls: BTreeMap::new(),
        }
    }
}

impl AutoReplyConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=30).contains(&self.pop_timeout_seconds) {
            return Err(ConfigError::InvalidPopTimeout {
                worker: "auto-reply",
                value: self.pop_timeout_seconds,
            });
        }
        // Reply latency must stay within single-digit seconds.
        if !(1..=9).contains(&self.provider_timeout_seconds) {
            return Err(ConfigError::InvalidProviderTimeout {
                value: self.provider_timeout_seconds,
            });
        }
        if self.workers == 0 || self.workers > 32 {
            return Err(ConfigError::InvalidWorkerCount {
                value: self.workers,
            });
        }
        Ok(())
    }
}

impl DeliveryConfig {
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_secs(self.pop_timeout_seconds)
    }
}

impl BroadcastSchedulerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_seconds < 10 || self.tick_interval_seconds > 3600 {
            return Err(ConfigError::InvalidBroadcastTickInterval {
                value: self.tick_interval_seconds,
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBroadcastBatchSize {
                value: self.batch_size,
            });
        }
        Ok(())
    }
}

impl AppConfig {
    /// Parse the configured bind address into a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Serialize the configuration with secrets masked.
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.operator_tokens.is_empty() {
            config.operator_tokens = vec!["[REDACTED]".to_string()];
        }
        if config.crypto_key.is_some() {
            config.crypto_key = Some(b"[REDACTED]".to_vec());
        }
        if config.bridge_signing_secret.is_some() {
            config.bridge_signing_secret = Some("[REDACTED]".to_string());
        }
        for key in [
            &mut config.llm.gemini_api_key,
            &mut config.llm.openai_api_key,
            &mut config.llm.groq_api_key,
            &mut config.llm.anthropic_api_key,
        ] {
            if key.is_some() {
                *key = Some("[REDACTED]".to_string());
            }
        }
        serde_json::to_string_pretty(&config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(ref key) = self.crypto_key
            && key.len() != 32
        {
            return Err(ConfigError::InvalidCryptoKeyLength { length: key.len() });
        }

        if !matches!(self.profile.as_str(), "local" | "test") && self.operator_tokens.is_empty() {
            return Err(ConfigError::MissingOperatorTokens);
        }

        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            return Err(ConfigError::InvalidLogFormat {
                value: self.log_format.clone(),
            });
        }

        if self.bridge_base_url.is_some() && self.bridge_signing_secret.is_none() {
            return Err(ConfigError::MissingBridgeSecret);
        }

        self.auto_reply.validate()?;

        if !(1..=30).contains(&self.delivery.pop_timeout_seconds) {
            return Err(ConfigError::InvalidPopTimeout {
                worker: "delivery",
                value: self.delivery.pop_timeout_seconds,
            });
        }

        self.broadcast_scheduler.validate()?;

        if self.hub.command_capacity == 0 || self.hub.client_buffer == 0 {
            return Err(ConfigError::InvalidHubCapacity);
        }

        if self.reconnect.concurrency == 0 || self.reconnect.concurrency > 64 {
            return Err(ConfigError::InvalidReconnectConcurrency {
                value: self.reconnect.concurrency,
            });
        }

        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://gateway.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_session_store_dir() -> String {
    "./sessions".to_string()
}

fn default_uploads_dir() -> String {
    "./uploads".to_string()
}

fn default_true() -> bool {
    true
}

fn default_queue_backend() -> QueueBackend {
    QueueBackend::Database
}

fn default_queue_poll_interval_ms() -> u64 {
    500
}

fn default_ai_lane_key() -> String {
    "ai:messages:queue".to_string()
}

fn default_broadcast_lane_key() -> String {
    "broadcast:messages:queue".to_string()
}

fn default_worker_count() -> u32 {
    1
}

fn default_pop_timeout_seconds() -> u64 {
    5
}

fn default_provider_timeout_seconds() -> u64 {
    9
}

fn default_knowledge_limit() -> u64 {
    10
}

fn default_history_limit() -> u64 {
    10
}

fn default_history_char_budget() -> usize {
    200
}

fn default_broadcast_tick_interval_seconds() -> u64 {
    60 // 1 minute
}

fn default_broadcast_batch_size() -> u64 {
    100
}

fn default_hub_capacity() -> usize {
    256
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_reconnect_concurrency() -> u32 {
    4
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_llm_model() -> String {
    "gemini-2.0-flash".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("no operator tokens configured; set GATEWAY_OPERATOR_TOKEN or GATEWAY_OPERATOR_TOKENS")]
    MissingOperatorTokens,
    #[error("crypto key is invalid base64: {error}")]
    InvalidCryptoKeyBase64 { error: String },
    #[error("crypto key must decode to exactly 32 bytes, got {length} bytes")]
    InvalidCryptoKeyLength { length: usize },
    #[error("log format must be 'json' or 'pretty', got '{value}'")]
    InvalidLogFormat { value: String },
    #[error("bridge base url is set but GATEWAY_BRIDGE_SIGNING_SECRET is missing")]
    MissingBridgeSecret,
    #[error("unknown queue backend '{value}'; expected 'database' or 'memory'")]
    InvalidQueueBackend { value: String },
    #[error("{worker} pop timeout must be between 1 and 30 seconds, got {value}")]
    InvalidPopTimeout { worker: &'static str, value: u64 },
    #[error("provider timeout must be between 1 and 9 seconds, got {value}")]
    InvalidProviderTimeout { value: u64 },
    #[error("auto-reply worker count must be between 1 and 32, got {value}")]
    InvalidWorkerCount { value: u32 },
    #[error("broadcast scheduler tick interval must be between 10 and 3600 seconds, got {value}")]
    InvalidBroadcastTickInterval { value: u64 },
    #[error("broadcast scheduler batch size must be positive, got {value}")]
    InvalidBroadcastBatchSize { value: u64 },
    #[error("hub channel capacities must be positive")]
    InvalidHubCapacity,
    #[error("reconnect concurrency must be between 1 and 64, got {value}")]
    InvalidReconnectConcurrency { value: u32 },
}

/// Loads [`AppConfig`] from layered dotenv files and the process environment.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);
        let database_url = layered
            .remove("DATABASE_URL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_database_url);
        let db_max_connections = layered
            .remove("DB_MAX_CONNECTIONS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_max_connections);
        let db_acquire_timeout_ms = layered
            .remove("DB_ACQUIRE_TIMEOUT_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(default_db_acquire_timeout_ms);

        let operator_tokens = if let Some(tokens) = layered.remove("OPERATOR_TOKENS") {
            split_list(&tokens)
        } else if let Some(token) = layered.remove("OPERATOR_TOKEN") {
            vec![token]
        } else {
            Vec::new()
        };

        let crypto_key = match layered.remove("CRYPTO_KEY").filter(|v| !v.is_empty()) {
            Some(key_str) => {
                use base64::{Engine as _, engine::general_purpose};
                Some(general_purpose::STANDARD.decode(&key_str).map_err(|e| {
                    ConfigError::InvalidCryptoKeyBase64 {
                        error: e.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let session_store_dir = layered
            .remove("SESSION_STORE_DIR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_session_store_dir);
        let uploads_dir = layered
            .remove("UPLOADS_DIR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_uploads_dir);
        let bridge_base_url = non_empty(layered.remove("BRIDGE_BASE_URL"));
        let bridge_signing_secret = non_empty(layered.remove("BRIDGE_SIGNING_SECRET"));

        let queue = QueueConfig {
            backend: match layered.remove("QUEUE_BACKEND").filter(|v| !v.is_empty()) {
                Some(value) => value.parse()?,
                None => default_queue_backend(),
            },
            poll_interval_ms: layered
                .remove("QUEUE_POLL_INTERVAL_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_queue_poll_interval_ms),
            ai_lane_key: layered
                .remove("QUEUE_AI_LANE_KEY")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_ai_lane_key),
            broadcast_lane_key: layered
                .remove("QUEUE_BROADCAST_LANE_KEY")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_broadcast_lane_key),
        };

        let auto_reply = AutoReplyConfig {
            enabled: layered
                .remove("AUTO_REPLY_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            workers: layered
                .remove("AUTO_REPLY_WORKERS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_worker_count),
            pop_timeout_seconds: layered
                .remove("AUTO_REPLY_POP_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pop_timeout_seconds),
            provider_timeout_seconds: layered
                .remove("AUTO_REPLY_PROVIDER_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_provider_timeout_seconds),
            knowledge_limit: layered
                .remove("AUTO_REPLY_KNOWLEDGE_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_knowledge_limit),
            history_limit: layered
                .remove("AUTO_REPLY_HISTORY_LIMIT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_history_limit),
            history_char_budget: layered
                .remove("AUTO_REPLY_HISTORY_CHAR_BUDGET")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_history_char_budget),
        };

        let delivery = DeliveryConfig {
            pop_timeout_seconds: layered
                .remove("DELIVERY_POP_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_pop_timeout_seconds),
        };

        let broadcast_scheduler = BroadcastSchedulerConfig {
            tick_interval_seconds: layered
                .remove("BROADCAST_SCHEDULER_TICK_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_broadcast_tick_interval_seconds),
            batch_size: layered
                .remove("BROADCAST_SCHEDULER_BATCH_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_broadcast_batch_size),
        };

        let hub = HubConfig {
            command_capacity: layered
                .remove("HUB_COMMAND_CAPACITY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_hub_capacity),
            client_buffer: layered
                .remove("HUB_CLIENT_BUFFER")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_hub_capacity),
        };

        let reconnect = ReconnectConfig {
            enabled: layered
                .remove("RECONNECT_ENABLED")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            startup_delay_ms: layered
                .remove("RECONNECT_STARTUP_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_reconnect_delay_ms),
            concurrency: layered
                .remove("RECONNECT_CONCURRENCY")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_reconnect_concurrency),
        };

        let mut base_urls = BTreeMap::new();
        for (key, value) in layered.clone() {
            if let Some(provider) = key.strip_prefix("LLM_BASE_URL_")
                && !value.is_empty()
            {
                base_urls.insert(provider.to_lowercase(), value);
            }
        }

        // Provider keys are commonly exported without the gateway prefix.
        let gemini_api_key = provider_key(&mut layered, "GEMINI_API_KEY");
        let openai_api_key = provider_key(&mut layered, "OPENAI_API_KEY");
        let groq_api_key = provider_key(&mut layered, "GROQ_API_KEY");
        let anthropic_api_key = provider_key(&mut layered, "ANTHROPIC_API_KEY");
        let llm = LlmConfig {
            default_provider: layered
                .remove("LLM_DEFAULT_PROVIDER")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_llm_provider),
            default_model: layered
                .remove("LLM_DEFAULT_MODEL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_llm_model),
            gemini_api_key,
            openai_api_key,
            groq_api_key,
            anthropic_api_key,
            base_urls,
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            database_url,
            db_max_connections,
            db_acquire_timeout_ms,
            operator_tokens,
            crypto_key,
            session_store_dir,
            uploads_dir,
            bridge_base_url,
            bridge_signing_secret,
            queue,
            auto_reply,
            delivery,
            broadcast_scheduler,
            hub,
            reconnect,
            llm,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("GATEWAY_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn provider_key(layered: &mut BTreeMap<String, String>, name: &str) -> Option<String> {
    non_empty(layered.remove(name)).or_else(|| non_empty(env::var(name).ok()))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.ai_lane_key, "ai:messages:queue");
        assert_eq!(config.queue.broadcast_lane_key, "broadcast:messages:queue");
        assert_eq!(config.llm.default_provider, "gemini");
    }

    #[test]
    fn provider_timeout_must_stay_single_digit() {
        let mut config = AppConfig::default();
        config.auto_reply.provider_timeout_seconds = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidProviderTimeout { value: 10 })
        ));
    }

    #[test]
    fn broadcast_tick_bounds() {
        let mut config = BroadcastSchedulerConfig::default();
        config.tick_interval_seconds = 5;
        assert!(config.validate().is_err());
        config.tick_interval_seconds = 3601;
        assert!(config.validate().is_err());
        config.tick_interval_seconds = 60;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_profile_requires_operator_tokens() {
        let config = AppConfig {
            profile: "prod".to_string(),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingOperatorTokens)
        ));
    }

    #[test]
    fn bridge_url_requires_secret() {
        let config = AppConfig {
            bridge_base_url: Some("http://localhost:9000".to_string()),
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingBridgeSecret)
        ));
    }

    #[test]
    fn redaction_hides_secrets() {
        let mut config = AppConfig::default();
        config.operator_tokens = vec!["secret-token".to_string()];
        config.bridge_signing_secret = Some("bridge-secret".to_string());
        config.llm.openai_api_key = Some("sk-live".to_string());

        let json = config.redacted_json().unwrap();
        assert!(!json.contains("secret-token"));
        assert!(!json.contains("bridge-secret"));
        assert!(!json.contains("sk-live"));
        assert!(json.contains("[REDACTED]"));
    }

    #[test]
    fn queue_backend_parses() {
        assert_eq!("memory".parse::<QueueBackend>().unwrap(), QueueBackend::Memory);
        assert_eq!("DB".parse::<QueueBackend>().unwrap(), QueueBackend::Database);
        assert!("redis".parse::<QueueBackend>().is_err());
    }

    #[test]
    fn system_key_lookup_ignores_blank_values() {
        let llm = LlmConfig {
            groq_api_key: Some("  ".to_string()),
            anthropic_api_key: Some("ak".to_string()),
            ..LlmConfig::default()
        };
        assert_eq!(llm.system_key("groq"), None);
        assert_eq!(llm.system_key("claude"), Some("ak"));
        assert_eq!(llm.system_key("unknown"), None);
    }
}
