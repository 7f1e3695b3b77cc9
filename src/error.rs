use std::time::Duration;

/// Failure of a single vendor request.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network failure, non-2xx status or a body that is not valid JSON
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The vendor answered but reported a non-success status code
    #[error("vendor API error (code {code}): {message}")]
    Api { code: String, message: String },
}

impl FetchError {
    /// Whether the orchestrator should try again after this failure.
    /// Vendor-level rejections are final; the same request would be refused again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

/// Cause of a single failed refresh attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("refresh exceeded deadline of {0:?}")]
    Timeout(Duration),
}

impl AttemptError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Fetch(e) => e.is_retryable(),
            AttemptError::Timeout(_) => true,
        }
    }
}

/// Raised by the orchestrator once it stops trying. The host marks the meter's
/// readings unavailable when it sees this.
#[derive(Debug, thiserror::Error)]
#[error("update failed after {attempts} attempt(s): {source}")]
pub struct UpdateFailed {
    pub attempts: u32,
    #[source]
    pub source: AttemptError,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("meter `{meter}`: field `{field}` must not be empty")]
    MissingField { meter: String, field: &'static str },

    #[error("meter `{meter}`: company id `{company_id}` must be 2-3 digits")]
    InvalidCompanyId { meter: String, company_id: String },

    #[error("meter {meter_no} of company {company_id} is configured more than once")]
    DuplicateMeter {
        company_id: String,
        meter_no: String,
    },
}

/// Outcome of the credential check run before a meter is scheduled.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("credentials rejected by vendor (HTTP 401)")]
    InvalidAuth,

    #[error("vendor API error: {0}")]
    Api(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_is_not_retryable() {
        let err = FetchError::Api {
            code: "1".to_string(),
            message: "token expired".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(!AttemptError::from(err).is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(AttemptError::Timeout(Duration::from_secs(20)).is_retryable());
    }

    #[test]
    fn test_update_failed_message_carries_cause() {
        let failed = UpdateFailed {
            attempts: 3,
            source: AttemptError::Timeout(Duration::from_secs(20)),
        };
        assert_eq!(
            failed.to_string(),
            "update failed after 3 attempt(s): refresh exceeded deadline of 20s"
        );
    }
}
