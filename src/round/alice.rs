use std::time::Instant;

use bitcoin::{OutPoint, ScriptBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliceState {
    InputsRegistered,
    ConnectionConfirmed,
}

/// A single UTXO contributed to a round, resolved against the chain at
/// registration time (the client only supplies the outpoint + proof; value
/// and script come from `ChainOracle`, never from the client's say-so).
#[derive(Debug, Clone)]
pub struct AliceInput {
    pub outpoint: OutPoint,
    pub value: u64,
    pub script: ScriptBuf,
}

/// Input-side participant. `unique_id` is an unlinkable handle, not an
/// identity — any collision-resistant random token would do; a v4 UUID is
/// the obvious choice.
#[derive(Debug, Clone)]
pub struct Alice {
    pub unique_id: Uuid,
    pub inputs: Vec<AliceInput>,
    pub change_script: ScriptBuf,
    pub blinded_output_hex: String,
    pub network_fee_owed: u64,
    pub state: AliceState,
    pub last_seen: Instant,
}

impl Alice {
    pub fn input_sum(&self) -> u64 {
        self.inputs.iter().map(|i| i.value).sum()
    }

    pub fn outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(|i| i.outpoint)
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_seen)
    }
}
