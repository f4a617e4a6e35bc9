//! Error types for the ingestion core.

use thiserror::Error;

/// Errors surfaced by the request client and the domain operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The platform asked us to slow down (embedded code or HTTP 412).
    #[error("rate limited by platform (code {code}): {message}")]
    RateLimited { code: i64, message: String },

    /// The credential used for the request is invalid or expired.
    #[error("authentication failed (code {code}): {message}")]
    Auth {
        code: i64,
        message: String,
        /// Pool id of the credential that was sent, if it came from the pool.
        credential_id: Option<String>,
    },

    /// HTTP 5xx.
    #[error("server error: HTTP {status}")]
    Server { status: u16 },

    /// Non-retryable HTTP status.
    #[error("unexpected HTTP status {status}")]
    Http { status: u16 },

    /// The envelope or its payload did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Any other non-zero envelope code.
    #[error("platform error (code {code}): {message}")]
    Api { code: i64, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Every credential in a non-empty pool has been deactivated.
    #[error("credential pool exhausted")]
    CredentialsExhausted,
}

impl ApiError {
    #[inline]
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    #[inline]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }

    /// Whether a coarser, caller-level retry has a chance of succeeding.
    ///
    /// Malformed payloads and generic platform errors (missing user, deleted
    /// video, ...) are deterministic and are not worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Auth { .. } | Self::Server { .. } => true,
            Self::Network(e) => e.is_connect() || e.is_timeout() || e.is_request() || e.is_body(),
            Self::Http { .. }
            | Self::Malformed(_)
            | Self::Api { .. }
            | Self::CredentialsExhausted => false,
        }
    }

    /// Platform code carried by the error, if any.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::RateLimited { code, .. } | Self::Auth { code, .. } | Self::Api { code, .. } => {
                Some(*code)
            }
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors from credential parsing and pool administration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("cookie string contains no key=value pairs")]
    Empty,

    #[error("unknown credential: {0}")]
    UnknownCredential(String),
}

/// Errors from sync run control.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    #[error("no sync run is in progress")]
    NotRunning,

    #[error("roster is empty")]
    EmptyRoster,
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            ApiError::RateLimited {
                code: -412,
                message: "blocked".into()
            }
            .is_retryable()
        );
        assert!(ApiError::Server { status: 503 }.is_retryable());
        assert!(!ApiError::Malformed("missing list".into()).is_retryable());
        assert!(
            !ApiError::Api {
                code: -404,
                message: "not found".into()
            }
            .is_retryable()
        );
        assert!(!ApiError::CredentialsExhausted.is_retryable());
    }

    #[test]
    fn test_code_is_preserved() {
        let err = ApiError::Api {
            code: -400,
            message: "bad request".into(),
        };
        assert_eq!(err.code(), Some(-400));
        assert!(err.to_string().contains("bad request"));
        assert_eq!(ApiError::Http { status: 404 }.code(), None);
    }
}
