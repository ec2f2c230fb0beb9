//! ============================================================================
//! Error Taxonomy & Query Results
//! ============================================================================
//! Four families of failure, handled differently:
//! - transport/network: surfaced as a failed QueryResult, never retried here
//! - protocol desync: recovered locally via forced re-query, not an error
//! - backend business errors: code string + message, surfaced verbatim
//! - programmer misuse: fail loudly (panic) or Disallowed
//! ============================================================================

use crate::protocol::Notification;
use thiserror::Error;

/// Backend error code for a purchase attempted against a stale catalog.
/// Triggers exactly one automatic catalog refresh + retry before being
/// reported as final.
pub const ERR_CATALOG_OUT_OF_DATE: &str = "errors.vault.commerce.catalog_out_of_date";

/// Backend/provider error code for a purchase the user backed out of.
/// Distinguished so UI can skip the error dialog.
pub const ERR_USER_CANCELLED: &str = "errors.vault.commerce.user_cancelled";

/// Synthetic code used when the transport itself failed (no backend reply).
pub const ERR_TRANSPORT: &str = "errors.vault.transport";

/// Synthetic code for requests cancelled by a cache flush or shutdown.
pub const ERR_CANCELLED: &str = "errors.vault.cancelled";

/// Synthetic code for responses that did not parse as expected.
pub const ERR_MALFORMED_RESPONSE: &str = "errors.vault.malformed_response";

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("backend error {code}: {message}")]
    Backend { code: String, message: String },

    #[error("malformed payload: {0}")]
    Parse(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("call currently disallowed: {0}")]
    Disallowed(String),
}

impl EngineError {
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, EngineError::Backend { code, .. } if code == ERR_USER_CANCELLED)
    }

    pub fn is_catalog_out_of_date(&self) -> bool {
        matches!(self, EngineError::Backend { code, .. } if code == ERR_CATALOG_OUT_OF_DATE)
    }
}

/// Completion value for every queued backend request. Delivered through a
/// oneshot channel to the original caller once the request leaves the queue.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub success: bool,
    /// HTTP status of the response, 0 when the transport never got one.
    pub http_status: u16,
    pub error_code: String,
    pub error_message: String,
    /// The one notification the backend flagged as primary, if any.
    /// Non-primary notifications go to the profile's notification handler.
    pub primary_notification: Option<Notification>,
}

impl QueryResult {
    pub fn ok(http_status: u16) -> Self {
        Self {
            success: true,
            http_status,
            ..Default::default()
        }
    }

    pub fn failed(http_status: u16, error_code: &str, error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            http_status,
            error_code: error_code.to_string(),
            error_message: error_message.into(),
            primary_notification: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::failed(0, ERR_CANCELLED, "request cancelled")
    }

    pub fn is_user_cancelled(&self) -> bool {
        self.error_code == ERR_USER_CANCELLED
    }

    pub fn is_catalog_out_of_date(&self) -> bool {
        self.error_code == ERR_CATALOG_OUT_OF_DATE
    }

    /// Convert into the typed error taxonomy for callers that want `?`.
    pub fn into_result(self) -> Result<QueryResult, EngineError> {
        if self.success {
            Ok(self)
        } else if self.error_code == ERR_CANCELLED {
            Err(EngineError::Cancelled)
        } else if self.error_code == ERR_TRANSPORT {
            Err(EngineError::Transport(self.error_message))
        } else if !self.error_code.is_empty() {
            Err(EngineError::Backend {
                code: self.error_code,
                message: self.error_message,
            })
        } else {
            Err(EngineError::Http {
                status: self.http_status,
                body: self.error_message,
            })
        }
    }
}
