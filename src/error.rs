//! Error types for the onboarding bot.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
///
/// `Connection` is the only transient variant; everything else is treated as
/// permanent by the retry policy. `FeatureUnavailable` marks an optional table
/// that the backing store does not have.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Optional feature unavailable: {feature}")]
    FeatureUnavailable { feature: String },
}

impl DatabaseError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Whether this error only signals a missing optional feature.
    pub fn is_feature_unavailable(&self) -> bool {
        matches!(self, Self::FeatureUnavailable { .. })
    }
}

/// Channel-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send response on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_errors_are_transient() {
        assert!(DatabaseError::Connection("reset".into()).is_transient());
        assert!(!DatabaseError::Query("syntax".into()).is_transient());
        assert!(
            !DatabaseError::FeatureUnavailable {
                feature: "users".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn feature_unavailable_is_distinct() {
        let err = DatabaseError::FeatureUnavailable {
            feature: "lifecycle markers".into(),
        };
        assert!(err.is_feature_unavailable());
        assert!(!DatabaseError::Connection("x".into()).is_feature_unavailable());
        assert_eq!(
            err.to_string(),
            "Optional feature unavailable: lifecycle markers"
        );
    }

    #[test]
    fn top_level_wraps_sources() {
        let err: Error = ConfigError::MissingEnvVar("TELEGRAM_BOT_TOKEN".into()).into();
        assert!(err.to_string().contains("TELEGRAM_BOT_TOKEN"));
    }
}
