use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use bitcoin::ScriptBuf;
use serde::Deserialize;

use crate::coordinator::Coordinator;
use crate::error::CoreError;

use super::dto::RegisterOutputRequest;

#[derive(Deserialize)]
pub struct OutputQuery {
    pub round_hash: String,
}

/// `POST output?round_hash`. Runs under the coordinator-wide outputs
/// lock: the only place that lock is taken.
pub async fn register_output_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Query(q): Query<OutputQuery>,
    Json(payload): Json<RegisterOutputRequest>,
) -> Result<StatusCode, CoreError> {
    let output_script = ScriptBuf::from(
        hex::decode(&payload.output_script)
            .map_err(|_| CoreError::InvalidRequest("output_script is not valid hex".into()))?,
    );
    let signature = hex::decode(&payload.signature_hex)
        .map_err(|_| CoreError::InvalidRequest("signature_hex is not valid hex".into()))?;

    let _outputs_guard = coordinator.lock_outputs().await;

    let round_handle = coordinator
        .try_get_round_by_hash(&q.round_hash)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("round with hash {} not found", q.round_hash)))?;

    let mut round = round_handle.write().await;
    round.register_bob(output_script, signature).await?;
    Ok(StatusCode::NO_CONTENT)
}
