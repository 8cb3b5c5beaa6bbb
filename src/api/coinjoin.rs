use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::coordinator::Coordinator;
use crate::error::CoreError;

use super::dto::{encode_transaction, CoinJoinResponse};

#[derive(Deserialize)]
pub struct CoinJoinQuery {
    pub round_id: u64,
}

/// `GET coinjoin/{unique_id}?round_id`. Returns the unsigned transaction
/// once Signing is entered, so each Alice can produce her own signatures
/// for `POST signatures`.
pub async fn get_coinjoin_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Path(unique_id): Path<Uuid>,
    Query(q): Query<CoinJoinQuery>,
) -> Result<Json<CoinJoinResponse>, CoreError> {
    let round_handle = coordinator
        .try_get_round(q.round_id)
        .await
        .ok_or_else(|| CoreError::NotFound(format!("round {} not found", q.round_id)))?;

    let round = round_handle.read().await;
    let tx = round.get_coinjoin(unique_id)?.ok_or_else(|| {
        CoreError::Transient("signing has not started for this round yet".into())
    })?;

    Ok(Json(CoinJoinResponse {
        transaction_hex: encode_transaction(&tx),
    }))
}
