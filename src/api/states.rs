use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::coordinator::Coordinator;
use crate::round::Phase;

use super::dto::RoundStateDto;

/// `GET states`: a snapshot of every running round, no auth, no
/// per-Alice detail — just what a client needs to decide which round to
/// join.
pub async fn states_handler(State(coordinator): State<Arc<Coordinator>>) -> Json<Vec<RoundStateDto>> {
    let mut out = Vec::new();
    for round in coordinator.running_rounds().await {
        let round = round.read().await;
        let registration_timeout_seconds = match round.phase {
            Phase::InputRegistration => round.alice_registration_timeout.as_secs(),
            Phase::ConnectionConfirmation => round.connection_confirmation_timeout.as_secs(),
            Phase::OutputRegistration => round.output_registration_timeout.as_secs(),
            Phase::Signing => round.signing_timeout.as_secs(),
        };
        out.push(RoundStateDto {
            round_id: round.round_id,
            phase: round.phase.to_string(),
            denomination: round.denomination,
            registered_peer_count: round.alice_count(),
            required_peer_count: round.anonymity_set,
            max_inputs_per_peer: round.max_inputs_per_alice,
            registration_timeout_seconds,
            fee_per_input: round.fee_per_input,
            fee_per_output: round.fee_per_output,
            coordinator_fee_percent: round.coordinator_fee_percent,
        });
    }
    Json(out)
}
