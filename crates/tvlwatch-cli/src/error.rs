use thiserror::Error;
use tvlwatch_core::{ConfigError, ErrorCategory, ServiceError, ValidationError};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{}: {}", .source.code(), .source)]
    Service {
        #[from]
        source: ServiceError,
    },

    #[error("stream ended: {0}")]
    Stream(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 2,
            Self::Service { source } => match source {
                ServiceError::Validation(_) => 2,
                ServiceError::Upstream(classified) => match classified.category() {
                    ErrorCategory::Auth | ErrorCategory::Addon => 3,
                    ErrorCategory::Network | ErrorCategory::Unknown => 7,
                },
                ServiceError::Transport(_) | ServiceError::Dispatch(_) => 7,
                ServiceError::Decode(_) => 4,
                ServiceError::Warehouse(_) | ServiceError::Cache(_) => 8,
            },
            Self::Stream(_) => 6,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use tvlwatch_core::{classify, HttpError};

    use super::*;

    #[test]
    fn upstream_categories_map_to_distinct_exit_codes() {
        let auth = CliError::from(ServiceError::from(classify(401, "bad token", "/api/v1/symbols")));
        let network = CliError::from(ServiceError::from(classify(503, "", "/api/v1/symbols")));
        let transport = CliError::from(ServiceError::from(HttpError::new("connection reset")));

        assert_eq!(auth.exit_code(), 3);
        assert_eq!(network.exit_code(), 7);
        assert_eq!(transport.exit_code(), 7);
        assert!(auth.to_string().starts_with("upstream.auth: "));
    }

    #[test]
    fn validation_errors_exit_with_usage_code() {
        let error = CliError::from(ValidationError::EmptyIdentifier);
        assert_eq!(error.exit_code(), 2);
    }
}
