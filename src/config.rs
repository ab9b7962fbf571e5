//! Configuration types, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::store::UpsertStrategy;

/// Community link used when neither `CHANNEL_URL` nor `LIFEOS_CHANNEL_URL` is set.
pub const DEFAULT_CHANNEL_URL: &str = "https://t.me/LifeOS_AI";

/// Manager handle used when `MANAGER_USERNAME` is not set.
pub const DEFAULT_MANAGER_USERNAME: &str = "@lifeos_admin1";

/// Full bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram: TelegramConfig,
    pub store: StoreConfig,
    pub flow: FlowConfig,
    /// How long a per-user worker waits for another message before exiting.
    pub worker_idle_timeout: Duration,
    /// Port for the read-only HTTP API. `None` disables it.
    pub http_port: Option<u16>,
}

/// Telegram transport settings.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Usernames or numeric ids; `*` allows everyone.
    pub allowed_users: Vec<String>,
}

/// Where the profile store lives.
#[derive(Debug, Clone)]
pub enum StoreLocation {
    /// Local libSQL/SQLite file.
    Local(PathBuf),
    /// Remote libSQL server (`libsql://` or `https://`).
    Remote { url: String, auth_token: SecretString },
}

/// Persistence settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub location: StoreLocation,
    pub upsert_strategy: UpsertStrategy,
    pub retry: RetryPolicy,
    /// Persist sessions in the store so users resume mid-flow after a restart.
    pub durable_sessions: bool,
}

/// Retry policy for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
        }
    }

    /// Backoff before attempt `attempt` (1-based; attempt 1 has no delay).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        self.initial_backoff.saturating_mul(1u32 << exp)
    }
}

/// Texts and links the conversation flow embeds in its messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    pub channel_url: String,
    pub manager_username: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            channel_url: DEFAULT_CHANNEL_URL.to_string(),
            manager_username: DEFAULT_MANAGER_USERNAME.to_string(),
        }
    }
}

impl BotConfig {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("TELEGRAM_BOT_TOKEN")
            .ok_or_else(|| ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()))?;

        let allowed_users: Vec<String> = get("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let store_url =
            get("STORE_URL").ok_or_else(|| ConfigError::MissingEnvVar("STORE_URL".into()))?;
        let location = if is_remote_url(&store_url) {
            let auth_token = get("STORE_AUTH_TOKEN").ok_or_else(|| ConfigError::MissingRequired {
                key: "STORE_AUTH_TOKEN".into(),
                hint: format!("Remote store {store_url} needs a credential."),
            })?;
            StoreLocation::Remote {
                url: store_url,
                auth_token: SecretString::from(auth_token),
            }
        } else {
            let path = store_url.strip_prefix("file:").unwrap_or(&store_url);
            StoreLocation::Local(PathBuf::from(path))
        };

        let upsert_strategy = match get("ONBOARD_UPSERT_STRATEGY") {
            None => UpsertStrategy::Native,
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "ONBOARD_UPSERT_STRATEGY".into(),
                message,
            })?,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_or(
                get("ONBOARD_STORE_RETRIES"),
                "ONBOARD_STORE_RETRIES",
                defaults.max_attempts,
            )
            .max(1),
            initial_backoff: Duration::from_millis(parse_or(
                get("ONBOARD_STORE_BACKOFF_MS"),
                "ONBOARD_STORE_BACKOFF_MS",
                defaults.initial_backoff.as_millis() as u64,
            )),
        };

        let durable_sessions = get("ONBOARD_DURABLE_SESSIONS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
            .unwrap_or(false);

        let flow = FlowConfig {
            channel_url: get("CHANNEL_URL")
                .or_else(|| get("LIFEOS_CHANNEL_URL"))
                .unwrap_or_else(|| DEFAULT_CHANNEL_URL.to_string()),
            manager_username: get("MANAGER_USERNAME")
                .unwrap_or_else(|| DEFAULT_MANAGER_USERNAME.to_string()),
        };

        let worker_idle_timeout = Duration::from_secs(parse_or(
            get("ONBOARD_WORKER_IDLE_SECS"),
            "ONBOARD_WORKER_IDLE_SECS",
            300,
        ));

        let http_port = match get("ONBOARD_HTTP_PORT") {
            None => None,
            Some(raw) => Some(raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARD_HTTP_PORT".into(),
                message: e.to_string(),
            })?),
        };

        Ok(Self {
            telegram: TelegramConfig {
                bot_token: SecretString::from(bot_token),
                allowed_users,
            },
            store: StoreConfig {
                location,
                upsert_strategy,
                retry,
                durable_sessions,
            },
            flow,
            worker_idle_timeout,
            http_port,
        })
    }
}

fn is_remote_url(url: &str) -> bool {
    ["libsql://", "https://", "http://", "wss://", "ws://"]
        .iter()
        .any(|scheme| url.starts_with(scheme))
}

/// Parse an optional tuning knob, warning and falling back on bad input.
fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "Ignoring unparseable configuration value");
            default
        }),
    }
}
