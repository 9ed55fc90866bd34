//! Sync error types.
//!
//! Errors are serializable so per-record failures can be embedded in the
//! sync report. Variants follow how the orchestrator reacts to them: some
//! are retried inside a remote call, some fail a single record, and some
//! abort the whole run.

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the sync engine and its collaborators.
///
/// All variants serialize to a structured JSON object for report consumption.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum SyncError {
    /// Connection failure, timeout or 5xx response that outlived its retries.
    #[error("Network error: {message}")]
    TransientNetwork { message: String },

    /// The tracker kept answering with rate-limit responses.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    /// Token missing, expired or revoked.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// A record is missing something the tracker requires.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// The tracker rejected a request for a non-retryable reason.
    #[error("GitHub API error: {message}")]
    RemoteApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// The local state store cannot be read or written.
    #[error("State store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// A local markdown file could not be read or written.
    #[error("Local write failed: {message}")]
    LocalWrite {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },

    /// Internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    /// Create a transient network error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork {
            message: message.into(),
        }
    }

    /// Create a rate limit error with the wait the tracker asked for.
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::RateLimitExceeded {
            message: message.into(),
            retry_after_secs,
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field name.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a GitHub API error.
    pub fn remote_api(message: impl Into<String>) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a GitHub API error with status code and endpoint.
    pub fn remote_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::RemoteApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a store error with operation context.
    pub fn store_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a local write error for a file.
    pub fn local_write(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::LocalWrite {
            message: message.into(),
            path: Some(path.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error aborts the whole run instead of a single record.
    ///
    /// Rate limiting is shared by every record, so once a call has exhausted
    /// its attempts the run stops and resumes on the next invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::StoreUnavailable { .. } | Self::RateLimitExceeded { .. }
        )
    }

    /// Whether a remote call may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// Conversions from common error types

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::store(err.to_string())
    }
}

impl From<crate::db::DbError> for SyncError {
    fn from(err: crate::db::DbError) -> Self {
        Self::store(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient("Request timed out")
        } else if err.is_connect() {
            Self::transient("Failed to connect to server")
        } else if err.is_request() || err.is_body() {
            Self::transient(err.to_string())
        } else if err.is_status() {
            Self::remote_api(format!("HTTP error: {}", err))
        } else {
            Self::remote_api(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::internal(format!("Front matter error: {}", err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::LocalWrite {
            message: err.to_string(),
            path: None,
        }
    }
}
