use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;

use crate::coordinator::Coordinator;
use crate::error::CoreError;

use super::dto::decode_witnesses;
use super::confirmation::RoundScopedQuery;
use super::dto::PostSignaturesRequest;

/// `POST signatures?unique_id&round_id`.
pub async fn post_signatures_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Query(q): Query<RoundScopedQuery>,
    Json(payload): Json<PostSignaturesRequest>,
) -> Result<StatusCode, CoreError> {
    let witnesses = decode_witnesses(payload)?;

    let round_handle = coordinator
        .try_get_round(q.round_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("round {} not found", q.round_id)))?;

    let mut round = round_handle.write().await;
    round.post_signatures(q.unique_id, witnesses).await?;
    Ok(StatusCode::NO_CONTENT)
}
