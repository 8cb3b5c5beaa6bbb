use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::CoreError;
use crate::round::ConfirmConnectionResponse;

use super::dto::ConfirmationResponse;

#[derive(Deserialize)]
pub struct RoundScopedQuery {
    pub unique_id: Uuid,
    pub round_id: u64,
}

/// `POST confirmation?unique_id&round_id`.
pub async fn confirmation_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Query(q): Query<RoundScopedQuery>,
) -> Result<Response, CoreError> {
    let round_handle = coordinator
        .try_get_round(q.round_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("round {} not found", q.round_id)))?;

    let mut round = round_handle.write().await;
    match round.confirm_connection(q.unique_id).await? {
        ConfirmConnectionResponse::Acknowledged => Ok(StatusCode::NO_CONTENT.into_response()),
        ConfirmConnectionResponse::RoundHash(hash) => {
            Ok(Json(ConfirmationResponse { round_hash: hash }).into_response())
        }
    }
}

/// `POST unconfirmation?unique_id&round_id`.
pub async fn unconfirmation_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Query(q): Query<RoundScopedQuery>,
) -> Result<StatusCode, CoreError> {
    let round_handle = coordinator
        .try_get_round(q.round_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("round {} not found", q.round_id)))?;

    let mut round = round_handle.write().await;
    round.unregister_alice(q.unique_id)?;
    Ok(StatusCode::NO_CONTENT)
}
