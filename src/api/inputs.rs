use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use log::info;

use crate::coordinator::Coordinator;
use crate::error::CoreError;

use super::dto::{decode_register_inputs, RegisterInputsRequest, RegisterInputsResponse};

/// `POST inputs`. Runs under the coordinator-wide inputs lock: this is the
/// only place that lock is taken, for exactly the duration of one
/// registration.
pub async fn register_inputs_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Json(payload): Json<RegisterInputsRequest>,
) -> Result<Json<RegisterInputsResponse>, CoreError> {
    let alice_req = decode_register_inputs(payload)?;

    let _inputs_guard = coordinator.lock_inputs().await;

    let round_handle = coordinator.current_input_registering_round().await;
    let this_round_id = round_handle.read().await.round_id;

    for input in &alice_req.inputs {
        if coordinator
            .any_other_running_round_contains_input(this_round_id, input.outpoint)
            .await
        {
            return Err(CoreError::InputDisallowed(format!(
                "outpoint {} is already registered in another running round",
                input.outpoint
            )));
        }
    }

    let mut round = round_handle.write().await;
    let response = round.register_alice(alice_req).await?;
    drop(round);

    info!(
        "round {}: registered Alice {}",
        response.round_id, response.unique_id
    );

    Ok(Json(RegisterInputsResponse {
        unique_id: response.unique_id,
        blinded_output_signature: hex::encode(response.blind_signature),
        round_id: response.round_id,
    }))
}
