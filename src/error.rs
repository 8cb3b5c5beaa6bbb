use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// The tagged rejection reasons surfaced by the round/coordinator core.
///
/// Every validation path returns one of these instead of throwing; callers
/// match on the variant rather than parsing a message.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("input disallowed: {0}")]
    InputDisallowed(String),

    #[error("insufficient funds: need {required} sat, have {provided} sat")]
    InsufficientFunds { required: u64, provided: u64 },

    #[error("invalid proof: {0}")]
    InvalidProof(String),

    #[error("wrong phase: expected {expected}, round is in {actual}")]
    PhaseMismatch { expected: String, actual: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal invariant violation: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Adapter-layer mapping from `CoreError` to an HTTP response. The core
/// itself never constructs a `StatusCode`; this lives at the transport edge.
impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CoreError::InputDisallowed(_) => StatusCode::BAD_REQUEST,
            CoreError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            CoreError::InvalidProof(_) => StatusCode::BAD_REQUEST,
            CoreError::PhaseMismatch { .. } => StatusCode::FORBIDDEN,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
