use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use bitcoin::absolute::LockTime;
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::ban_store::{BanSeverity, BanStore};
use crate::chain::{ChainOracle, ScriptKind};
use crate::config::CoordinatorConfig;
use crate::crypto::{verify_ownership_proof, BlindSigner, OwnershipProof};
use crate::error::{CoreError, CoreResult};

use super::alice::{Alice, AliceInput, AliceState};
use super::bob::Bob;
use super::hash::compute_round_hash;
use super::phase::{Phase, RoundStatus};
use super::signature::verify_input_signature;

/// One UTXO offered as an input, with its ownership proof.
pub struct InputRegistration {
    pub outpoint: OutPoint,
    pub proof: OwnershipProof,
}

pub struct RegisterAliceRequest {
    pub blinded_output_hex: String,
    pub change_script: ScriptBuf,
    pub inputs: Vec<InputRegistration>,
}

pub struct RegisterAliceResponse {
    pub unique_id: Uuid,
    pub blind_signature: Vec<u8>,
    pub round_id: u64,
}

pub enum ConfirmConnectionResponse {
    /// Still InputRegistration: heartbeat acknowledged, nothing else to say.
    Acknowledged,
    /// ConnectionConfirmation reached: here is the round's public handle.
    RoundHash(String),
}

/// A round: the four-phase state machine and every per-round invariant.
/// Holds its own handles to the shared collaborators so it can validate
/// registrations without the Coordinator mediating every call; the
/// Coordinator only adds the cross-round uniqueness check on top.
pub struct Round {
    pub round_id: u64,
    pub phase: Phase,
    pub status: RoundStatus,

    pub denomination: u64,
    pub anonymity_set: usize,
    pub fee_per_input: u64,
    pub fee_per_output: u64,
    pub coordinator_fee_percent: f64,
    pub max_inputs_per_alice: usize,
    pub max_unconfirmed_coinjoins: u32,

    pub alice_registration_timeout: Duration,
    pub connection_confirmation_timeout: Duration,
    pub output_registration_timeout: Duration,
    pub signing_timeout: Duration,
    ban_duration: Duration,

    alices: HashMap<Uuid, Alice>,
    bobs: HashMap<ScriptBuf, Bob>,

    pub round_hash: Option<[u8; 32]>,
    pub unsigned_tx: Option<Transaction>,
    partial_signatures: HashMap<Uuid, bool>,

    phase_entered_at: Instant,
    alice_registration_extensions: u32,

    fail_reason: Option<String>,

    chain_oracle: Arc<dyn ChainOracle>,
    ban_store: Arc<dyn BanStore>,
    blind_signer: Arc<BlindSigner>,
}

const MAX_ALICE_REGISTRATION_EXTENSIONS: u32 = 3;

impl Round {
    pub fn new(
        round_id: u64,
        config: &CoordinatorConfig,
        chain_oracle: Arc<dyn ChainOracle>,
        ban_store: Arc<dyn BanStore>,
        blind_signer: Arc<BlindSigner>,
    ) -> Self {
        Round {
            round_id,
            phase: Phase::InputRegistration,
            status: RoundStatus::Running,
            denomination: config.denomination,
            anonymity_set: config.anonymity_set,
            fee_per_input: config.fee_per_input,
            fee_per_output: config.fee_per_output,
            coordinator_fee_percent: config.coordinator_fee_percent,
            max_inputs_per_alice: config.max_inputs_per_alice,
            max_unconfirmed_coinjoins: config.max_unconfirmed_coinjoins,
            alice_registration_timeout: config.alice_timeout,
            connection_confirmation_timeout: config.conn_conf_timeout,
            output_registration_timeout: config.output_timeout,
            signing_timeout: config.signing_timeout,
            ban_duration: config.ban_duration,
            alices: HashMap::new(),
            bobs: HashMap::new(),
            round_hash: None,
            unsigned_tx: None,
            partial_signatures: HashMap::new(),
            phase_entered_at: Instant::now(),
            alice_registration_extensions: 0,
            fail_reason: None,
            chain_oracle,
            ban_store,
            blind_signer,
        }
    }

    pub fn alice_count(&self) -> usize {
        self.alices.len()
    }

    pub fn bob_count(&self) -> usize {
        self.bobs.len()
    }

    pub fn contains_input(&self, outpoint: OutPoint) -> bool {
        self.alices
            .values()
            .any(|a| a.inputs.iter().any(|i| i.outpoint == outpoint))
    }

    pub fn round_hash_hex(&self) -> Option<String> {
        self.round_hash.map(|h| hex::encode(h))
    }

    fn network_fee_for(&self, input_count: usize) -> u64 {
        input_count as u64 * self.fee_per_input + 2 * self.fee_per_output
    }

    fn coordinator_fee(&self) -> u64 {
        (self.denomination as f64 * self.coordinator_fee_percent).round() as u64
    }

    /// Admits one Alice: validates her inputs, checks funds, blind-signs
    /// her output commitment, and advances the phase once enough Alices
    /// have registered.
    pub async fn register_alice(
        &mut self,
        req: RegisterAliceRequest,
    ) -> CoreResult<RegisterAliceResponse> {
        if self.phase != Phase::InputRegistration || self.status != RoundStatus::Running {
            return Err(CoreError::Transient(
                "round is no longer accepting input registrations".into(),
            ));
        }

        // 1. request shape
        if req.inputs.is_empty() || req.inputs.len() > self.max_inputs_per_alice {
            return Err(CoreError::InvalidRequest(format!(
                "expected 1..={} inputs, got {}",
                self.max_inputs_per_alice,
                req.inputs.len()
            )));
        }
        if req.blinded_output_hex.trim().is_empty() || req.change_script.is_empty() {
            return Err(CoreError::InvalidRequest(
                "blinded_output_hex and change_script must be non-blank".into(),
            ));
        }
        let blinded_bytes = hex::decode(&req.blinded_output_hex)
            .map_err(|_| CoreError::InvalidRequest("blinded_output_hex is not valid hex".into()))?;

        // 2. blinded output must be fresh within this round
        if self
            .alices
            .values()
            .any(|a| a.blinded_output_hex == req.blinded_output_hex)
        {
            return Err(CoreError::InvalidRequest(
                "blinded_output_hex already registered in this round".into(),
            ));
        }

        // 3a. no duplicate outpoint within the request
        let mut seen = std::collections::HashSet::new();
        for input in &req.inputs {
            if !seen.insert(input.outpoint) {
                return Err(CoreError::InvalidRequest(format!(
                    "duplicate outpoint {} in request",
                    input.outpoint
                )));
            }
        }

        // 3b. same client re-registering: replace any Alice(s) that hold
        // any of these outpoints in this round.
        let replace_ids: Vec<Uuid> = self
            .alices
            .values()
            .filter(|a| a.inputs.iter().any(|i| seen.contains(&i.outpoint)))
            .map(|a| a.unique_id)
            .collect();

        let now = SystemTime::now();
        let mut resolved_inputs = Vec::with_capacity(req.inputs.len());

        for input in &req.inputs {
            // 3d. ban check
            if let Some(minutes) = self.ban_store.is_banned(input.outpoint, now).await {
                return Err(CoreError::InputDisallowed(format!(
                    "outpoint {} is banned for {} more minute(s)",
                    input.outpoint, minutes
                )));
            }

            // 3e/3f/3g: UTXO must exist, confirmed-or-mempool-CJ, mature if coinbase, P2WPKH
            let txout = self
                .chain_oracle
                .get_txout(input.outpoint, true)
                .await?
                .ok_or_else(|| {
                    CoreError::InputDisallowed(format!("outpoint {} is not unspent", input.outpoint))
                })?;

            if txout.confirmations == 0 {
                let spends_coinjoin = self
                    .chain_oracle
                    .contains_coinjoin(input.outpoint.txid)
                    .await?;
                let unconfirmed_cj_count = self.chain_oracle.unconfirmed_coinjoin_count().await?;
                if !(spends_coinjoin && unconfirmed_cj_count < self.max_unconfirmed_coinjoins) {
                    return Err(CoreError::InputDisallowed(format!(
                        "outpoint {} is unconfirmed and does not spend a prior coinjoin",
                        input.outpoint
                    )));
                }
            }

            if txout.is_coinbase && txout.confirmations <= 100 {
                return Err(CoreError::InputDisallowed(format!(
                    "coinbase outpoint {} has only {} confirmations, need > 100",
                    input.outpoint, txout.confirmations
                )));
            }

            if txout.script_kind != ScriptKind::WitnessV0KeyHash {
                return Err(CoreError::InputDisallowed(format!(
                    "outpoint {} is not a native segwit P2WPKH output",
                    input.outpoint
                )));
            }

            // 3h: ownership proof over blinded_output_hex
            if !verify_ownership_proof(&txout.script, req.blinded_output_hex.as_bytes(), &input.proof) {
                return Err(CoreError::InvalidProof(format!(
                    "ownership proof for {} does not verify",
                    input.outpoint
                )));
            }

            resolved_inputs.push(AliceInput {
                outpoint: input.outpoint,
                value: txout.value,
                script: txout.script,
            });
        }

        // 4. funds check
        let input_sum: u64 = resolved_inputs.iter().map(|i| i.value).sum();
        let network_fee = self.network_fee_for(resolved_inputs.len());
        let required = self.denomination + network_fee + self.coordinator_fee();
        if input_sum < required {
            return Err(CoreError::InsufficientFunds {
                required,
                provided: input_sum,
            });
        }

        // 5. commit: replace + add, then sign
        for id in &replace_ids {
            self.alices.remove(id);
            info!(
                "round {}: replaced Alice {id} via re-registration",
                self.round_id
            );
        }

        let blind_signature = self
            .blind_signer
            .sign_blinded(&blinded_bytes)
            .map_err(|e| {
                warn!("round {}: blind signing failed: {e}", self.round_id);
                e
            })?;

        let unique_id = Uuid::new_v4();
        let alice = Alice {
            unique_id,
            inputs: resolved_inputs,
            change_script: req.change_script,
            blinded_output_hex: req.blinded_output_hex,
            network_fee_owed: network_fee,
            state: AliceState::InputsRegistered,
            last_seen: Instant::now(),
        };
        self.alices.insert(unique_id, alice);

        // 6. phase may have advanced concurrently; the Alice stays in regardless.
        if self.phase != Phase::InputRegistration {
            return Ok(RegisterAliceResponse {
                unique_id,
                blind_signature,
                round_id: self.round_id,
            });
        }

        // 7. evict spent, maybe transition
        if self.alices.len() >= self.anonymity_set {
            self.evict_spent_alices().await?;
            if self.alices.len() >= self.anonymity_set {
                self.enter_connection_confirmation();
            }
        }

        Ok(RegisterAliceResponse {
            unique_id,
            blind_signature,
            round_id: self.round_id,
        })
    }

    async fn evict_spent_alices(&mut self) -> CoreResult<()> {
        let mut to_evict = Vec::new();
        for alice in self.alices.values() {
            for input in &alice.inputs {
                if self.chain_oracle.get_txout(input.outpoint, true).await?.is_none() {
                    to_evict.push(alice.unique_id);
                    break;
                }
            }
        }
        for id in to_evict {
            self.alices.remove(&id);
            debug!("round {}: evicted Alice {id}, input now spent", self.round_id);
        }
        Ok(())
    }

    /// Keeps an Alice's slot alive during InputRegistration, or marks her
    /// connection confirmed once ConnectionConfirmation has started.
    pub async fn confirm_connection(
        &mut self,
        unique_id: Uuid,
    ) -> CoreResult<ConfirmConnectionResponse> {
        match self.phase {
            Phase::InputRegistration => {
                let alice = self
                    .alices
                    .get_mut(&unique_id)
                    .ok_or_else(|| CoreError::NotFound(format!("Alice {unique_id} not found")))?;
                alice.touch();
                Ok(ConfirmConnectionResponse::Acknowledged)
            }
            Phase::ConnectionConfirmation => {
                {
                    let alice = self
                        .alices
                        .get_mut(&unique_id)
                        .ok_or_else(|| CoreError::NotFound(format!("Alice {unique_id} not found")))?;
                    alice.state = AliceState::ConnectionConfirmed;
                    alice.touch();
                }

                if self
                    .alices
                    .values()
                    .all(|a| a.state == AliceState::ConnectionConfirmed)
                {
                    self.finish_connection_confirmation().await?;
                }

                let hash = self.round_hash_hex().ok_or_else(|| {
                    CoreError::Fatal("ConnectionConfirmation did not produce a round_hash".into())
                })?;
                Ok(ConfirmConnectionResponse::RoundHash(hash))
            }
            _ => Err(CoreError::PhaseMismatch {
                expected: "InputRegistration or ConnectionConfirmation".into(),
                actual: self.phase.to_string(),
            }),
        }
    }

    async fn finish_connection_confirmation(&mut self) -> CoreResult<()> {
        let mut evicted = Vec::new();
        for alice in self.alices.values() {
            for input in &alice.inputs {
                if self.chain_oracle.get_txout(input.outpoint, true).await?.is_none() {
                    evicted.push(alice.unique_id);
                    break;
                }
            }
        }

        let mut banned_outpoints = Vec::new();
        for id in &evicted {
            if let Some(alice) = self.alices.remove(id) {
                banned_outpoints.extend(alice.outpoints());
                info!(
                    "round {}: evicted Alice {id} at ConnectionConfirmation close (input spent)",
                    self.round_id
                );
            }
        }
        if !banned_outpoints.is_empty() {
            self.ban_store
                .ban(
                    &banned_outpoints,
                    SystemTime::now() + self.ban_duration,
                    BanSeverity::DroppedAfterConfirmation,
                )
                .await;
        }

        if self.alices.len() < 2 {
            self.fail("fewer than 2 Alices remained after ConnectionConfirmation".into());
            return Ok(());
        }

        self.anonymity_set = self.alices.len();
        self.enter_output_registration();
        Ok(())
    }

    fn enter_connection_confirmation(&mut self) {
        self.phase = Phase::ConnectionConfirmation;
        self.phase_entered_at = Instant::now();
        info!(
            "round {}: InputRegistration -> ConnectionConfirmation ({} Alices)",
            self.round_id,
            self.alices.len()
        );
    }

    fn enter_output_registration(&mut self) {
        let hexes: Vec<String> = self
            .alices
            .values()
            .map(|a| a.blinded_output_hex.clone())
            .collect();
        let hash = compute_round_hash(
            self.round_id,
            self.denomination,
            self.anonymity_set,
            self.fee_per_input,
            self.fee_per_output,
            &hexes,
        );
        self.round_hash = Some(hash);
        self.phase = Phase::OutputRegistration;
        self.phase_entered_at = Instant::now();
        info!(
            "round {}: ConnectionConfirmation -> OutputRegistration, anonymity_set={}, round_hash={}",
            self.round_id,
            self.anonymity_set,
            hex::encode(hash)
        );
    }

    /// Withdraws an Alice from the round during InputRegistration.
    pub fn unregister_alice(&mut self, unique_id: Uuid) -> CoreResult<()> {
        if self.phase != Phase::InputRegistration {
            return Err(CoreError::PhaseMismatch {
                expected: "InputRegistration".into(),
                actual: self.phase.to_string(),
            });
        }
        self.alices
            .remove(&unique_id)
            .ok_or_else(|| CoreError::NotFound(format!("Alice {unique_id} not found")))?;
        Ok(())
    }

    /// Admits one Bob once her unblinded signature checks out against the
    /// coordinator's key, then advances to Signing once every slot is filled.
    pub async fn register_bob(
        &mut self,
        output_script: ScriptBuf,
        unblinded_signature: Vec<u8>,
    ) -> CoreResult<()> {
        if self.phase != Phase::OutputRegistration {
            return Err(CoreError::PhaseMismatch {
                expected: "OutputRegistration".into(),
                actual: self.phase.to_string(),
            });
        }

        if !self
            .blind_signer
            .verify_unblinded(output_script.as_bytes(), &unblinded_signature)
        {
            return Err(CoreError::InvalidProof(
                "unblinded signature does not verify for this output script".into(),
            ));
        }

        if self.bobs.contains_key(&output_script) {
            return Err(CoreError::InvalidRequest(
                "output_script already registered by another Bob".into(),
            ));
        }

        self.bobs.insert(output_script.clone(), Bob { output_script });

        if self.bobs.len() == self.anonymity_set {
            self.enter_signing()?;
        }
        Ok(())
    }

    fn enter_signing(&mut self) -> CoreResult<()> {
        let tx = self.build_unsigned_tx()?;
        self.unsigned_tx = Some(tx);
        self.phase = Phase::Signing;
        self.phase_entered_at = Instant::now();
        info!(
            "round {}: OutputRegistration -> Signing, {} Alices, {} Bobs",
            self.round_id,
            self.alices.len(),
            self.bobs.len()
        );
        Ok(())
    }

    fn build_unsigned_tx(&self) -> CoreResult<Transaction> {
        let mut alice_ids: Vec<Uuid> = self.alices.keys().copied().collect();
        alice_ids.sort();

        let mut input = Vec::new();
        for id in &alice_ids {
            let alice = &self.alices[id];
            for alice_input in &alice.inputs {
                input.push(TxIn {
                    previous_output: alice_input.outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                    witness: Witness::new(),
                });
            }
        }

        let mut output = Vec::new();
        let mut bob_scripts: Vec<&ScriptBuf> = self.bobs.keys().collect();
        bob_scripts.sort();
        for script in bob_scripts {
            output.push(TxOut {
                value: self.denomination,
                script_pubkey: script.clone(),
            });
        }

        for id in &alice_ids {
            let alice = &self.alices[id];
            let change_value = alice
                .input_sum()
                .checked_sub(self.denomination)
                .and_then(|v| v.checked_sub(alice.network_fee_owed))
                .and_then(|v| v.checked_sub(self.coordinator_fee()))
                .ok_or_else(|| {
                    CoreError::Fatal(format!(
                        "Alice {id} input sum does not cover denomination + fees at Signing entry"
                    ))
                })?;
            if change_value > 0 {
                output.push(TxOut {
                    value: change_value,
                    script_pubkey: alice.change_script.clone(),
                });
            }
        }

        Ok(Transaction {
            version: 2,
            lock_time: LockTime::ZERO,
            input,
            output,
        })
    }

    /// Returns the round's unsigned transaction, once Signing has begun.
    pub fn get_coinjoin(&self, unique_id: Uuid) -> CoreResult<Option<Transaction>> {
        if !self.alices.contains_key(&unique_id) {
            return Err(CoreError::NotFound(format!("Alice {unique_id} not found")));
        }
        Ok(self.unsigned_tx.clone())
    }

    /// Accepts one Alice's signatures. `signatures` is one witness stack
    /// per input owned by this Alice, in the same order as her registered
    /// inputs.
    pub async fn post_signatures(
        &mut self,
        unique_id: Uuid,
        signatures: Vec<Witness>,
    ) -> CoreResult<()> {
        if self.phase != Phase::Signing {
            return Err(CoreError::PhaseMismatch {
                expected: "Signing".into(),
                actual: self.phase.to_string(),
            });
        }

        let alice = self
            .alices
            .get(&unique_id)
            .ok_or_else(|| CoreError::NotFound(format!("Alice {unique_id} not found")))?
            .clone();

        if signatures.len() != alice.inputs.len() {
            return Err(CoreError::InvalidRequest(format!(
                "expected {} signature(s), got {}",
                alice.inputs.len(),
                signatures.len()
            )));
        }

        let tx = self
            .unsigned_tx
            .clone()
            .ok_or_else(|| CoreError::Fatal("Signing phase has no unsigned_tx".into()))?;

        let mut input_positions = Vec::with_capacity(alice.inputs.len());
        for alice_input in &alice.inputs {
            let pos = tx
                .input
                .iter()
                .position(|txin| txin.previous_output == alice_input.outpoint)
                .ok_or_else(|| {
                    CoreError::Fatal(format!(
                        "input {} missing from unsigned_tx",
                        alice_input.outpoint
                    ))
                })?;
            input_positions.push(pos);
        }

        for (alice_input, (pos, witness)) in alice
            .inputs
            .iter()
            .zip(input_positions.iter().copied().zip(signatures.iter()))
        {
            if !verify_input_signature(&tx, pos, alice_input.value, &alice_input.script, witness) {
                return Err(CoreError::InvalidProof(format!(
                    "signature for input {} does not verify",
                    alice_input.outpoint
                )));
            }
        }

        let tx = self.unsigned_tx.as_mut().expect("checked above");
        for (pos, witness) in input_positions.into_iter().zip(signatures.into_iter()) {
            tx.input[pos].witness = witness;
        }
        self.partial_signatures.insert(unique_id, true);

        if self.partial_signatures.len() == self.alices.len() {
            self.finalize_and_broadcast().await?;
        }
        Ok(())
    }

    async fn finalize_and_broadcast(&mut self) -> CoreResult<()> {
        let tx = self
            .unsigned_tx
            .clone()
            .ok_or_else(|| CoreError::Fatal("no transaction to broadcast".into()))?;

        self.chain_oracle.broadcast(&tx).await?;
        self.status = RoundStatus::Succeeded;
        info!(
            "round {}: signing complete, broadcast txid {}",
            self.round_id,
            tx.txid()
        );
        Ok(())
    }

    pub fn fail(&mut self, reason: String) {
        let released = self.alices.values().flat_map(|a| a.outpoints()).count();
        warn!(
            "round {}: failing: {reason} ({released} outpoint claim(s) released)",
            self.round_id
        );
        self.status = RoundStatus::Failed;
        self.fail_reason = Some(reason);
        self.alices.clear();
    }

    pub fn fail_reason(&self) -> Option<&str> {
        self.fail_reason.as_deref()
    }

    /// Background ticker entry point. Evaluates the current phase's
    /// deadline and, if it has elapsed, applies the phase's
    /// transition/failure/ban behavior.
    pub async fn tick(&mut self) -> CoreResult<()> {
        if self.status != RoundStatus::Running {
            return Ok(());
        }

        let elapsed = self.phase_entered_at.elapsed();
        let deadline = match self.phase {
            Phase::InputRegistration => self.alice_registration_timeout,
            Phase::ConnectionConfirmation => self.connection_confirmation_timeout,
            Phase::OutputRegistration => self.output_registration_timeout,
            Phase::Signing => self.signing_timeout,
        };
        if elapsed < deadline {
            return Ok(());
        }

        match self.phase {
            Phase::InputRegistration => {
                let now = Instant::now();
                let idle: Vec<Uuid> = self
                    .alices
                    .values()
                    .filter(|a| a.idle_for(now) >= self.alice_registration_timeout)
                    .map(|a| a.unique_id)
                    .collect();
                for id in idle {
                    self.alices.remove(&id);
                }

                if self.alices.len() >= 2 {
                    // advance with a reduced anonymity set, same pattern as
                    // the ConnectionConfirmation timeout below.
                    self.anonymity_set = self.alices.len();
                    self.enter_connection_confirmation();
                } else if self.alice_registration_extensions < MAX_ALICE_REGISTRATION_EXTENSIONS {
                    self.alice_registration_extensions += 1;
                    self.phase_entered_at = Instant::now();
                    debug!(
                        "round {}: extending InputRegistration ({} extension(s) used)",
                        self.round_id, self.alice_registration_extensions
                    );
                } else {
                    self.fail("InputRegistration timed out with too few Alices".into());
                }
            }
            Phase::ConnectionConfirmation => {
                let unconfirmed: Vec<Uuid> = self
                    .alices
                    .values()
                    .filter(|a| a.state != AliceState::ConnectionConfirmed)
                    .map(|a| a.unique_id)
                    .collect();
                for id in &unconfirmed {
                    self.alices.remove(id);
                }
                if self.alices.len() >= 2 {
                    self.anonymity_set = self.alices.len();
                    self.enter_output_registration();
                } else {
                    self.fail("ConnectionConfirmation timed out with too few confirmations".into());
                }
            }
            Phase::OutputRegistration => {
                if self.bobs.len() < self.anonymity_set {
                    // Alices did nothing wrong; no ban.
                    self.fail("OutputRegistration timed out before all Bobs registered".into());
                }
            }
            Phase::Signing => {
                let missing: Vec<OutPoint> = self
                    .alices
                    .values()
                    .filter(|a| !self.partial_signatures.contains_key(&a.unique_id))
                    .flat_map(|a| a.outpoints())
                    .collect();
                if !missing.is_empty() {
                    self.ban_store
                        .ban(
                            &missing,
                            SystemTime::now() + self.ban_duration,
                            BanSeverity::DroppedDuringSigning,
                        )
                        .await;
                }
                self.fail("Signing timed out before all Alices submitted signatures".into());
            }
        }
        Ok(())
    }

    /// Released input claims so outpoints may re-register in future rounds
    /// once this round is Failed. Exposed for the Coordinator's cross-round
    /// uniqueness check, which only looks at `Running` rounds.
    pub fn is_running(&self) -> bool {
        self.status == RoundStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban_store::MemoryBanStore;
    use crate::chain::{ScriptKind as Kind, TxOutInfo};
    use crate::crypto::OwnershipProof;
    use bitcoin::hashes::Hash as _;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::Txid;
    use std::collections::{HashMap as Map, HashSet};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeChainOracle {
        utxos: StdMutex<Map<OutPoint, TxOutInfo>>,
        coinjoins: StdMutex<HashSet<Txid>>,
        unconfirmed_cj_count: StdMutex<u32>,
        broadcasts: StdMutex<Vec<Transaction>>,
    }

    #[async_trait::async_trait]
    impl ChainOracle for FakeChainOracle {
        async fn get_txout(
            &self,
            outpoint: OutPoint,
            _include_mempool: bool,
        ) -> Result<Option<TxOutInfo>, CoreError> {
            Ok(self.utxos.lock().unwrap().get(&outpoint).cloned())
        }

        async fn contains_coinjoin(&self, tx_hash: Txid) -> Result<bool, CoreError> {
            Ok(self.coinjoins.lock().unwrap().contains(&tx_hash))
        }

        async fn unconfirmed_coinjoin_count(&self) -> Result<u32, CoreError> {
            Ok(*self.unconfirmed_cj_count.lock().unwrap())
        }

        async fn broadcast(&self, tx: &Transaction) -> Result<(), CoreError> {
            self.broadcasts.lock().unwrap().push(tx.clone());
            Ok(())
        }
    }

    /// Builds one funded, provably-owned P2WPKH input plus the proof that
    /// registers it, and seeds it into `oracle`.
    fn funded_input(oracle: &FakeChainOracle, seed: u8, value: u64, message: &[u8]) -> InputRegistration {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[seed; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let wpubkey_hash = bitcoin::PublicKey::new(pk).wpubkey_hash().unwrap();
        let script = ScriptBuf::new_v0_p2wpkh(&wpubkey_hash);

        let digest = bitcoin::hashes::sha256::Hash::hash(message);
        let msg = Message::from_digest_slice(digest.as_ref()).unwrap();
        let signature = secp.sign_ecdsa(&msg, &sk);

        let outpoint = OutPoint {
            txid: Txid::from_byte_array([seed; 32]),
            vout: 0,
        };
        oracle.utxos.lock().unwrap().insert(
            outpoint,
            TxOutInfo {
                value,
                script,
                confirmations: 6,
                is_coinbase: false,
                script_kind: Kind::WitnessV0KeyHash,
            },
        );

        InputRegistration {
            outpoint,
            proof: OwnershipProof { pubkey: pk, signature },
        }
    }

    fn test_round(anonymity_set: usize, oracle: Arc<FakeChainOracle>) -> Round {
        let config = CoordinatorConfig {
            anonymity_set,
            denomination: 10_000_000,
            fee_per_input: 5_000,
            fee_per_output: 10_000,
            coordinator_fee_percent: 0.0,
            ..CoordinatorConfig::default()
        };
        Round::new(
            1,
            &config,
            oracle,
            Arc::new(MemoryBanStore::new()),
            Arc::new(BlindSigner::generate().unwrap()),
        )
    }

    #[tokio::test]
    async fn happy_path_two_alices_reach_connection_confirmation() {
        let oracle = Arc::new(FakeChainOracle::default());
        let mut round = test_round(2, oracle.clone());

        for seed in [1u8, 2u8] {
            let blinded = hex::encode(format!("blinded-{seed}"));
            let input = funded_input(&oracle, seed, 11_000_000, blinded.as_bytes());
            let req = RegisterAliceRequest {
                blinded_output_hex: blinded,
                change_script: ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap()),
                inputs: vec![input],
            };
            round.register_alice(req).await.unwrap();
        }

        assert_eq!(round.phase, Phase::ConnectionConfirmation);
        assert_eq!(round.alice_count(), 2);
    }

    #[tokio::test]
    async fn insufficient_funds_is_rejected() {
        let oracle = Arc::new(FakeChainOracle::default());
        let mut round = test_round(2, oracle.clone());

        let blinded = hex::encode("blinded-x");
        let input = funded_input(&oracle, 9, 9_999_900, blinded.as_bytes());
        let req = RegisterAliceRequest {
            blinded_output_hex: blinded,
            change_script: ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap()),
            inputs: vec![input],
        };

        let err = round.register_alice(req).await.unwrap_err();
        assert!(matches!(err, CoreError::InsufficientFunds { .. }));
    }

    #[tokio::test]
    async fn eight_inputs_rejected_seven_accepted() {
        let oracle = Arc::new(FakeChainOracle::default());
        let mut round = test_round(2, oracle.clone());
        let change = ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap());

        let too_many: Vec<InputRegistration> = (0..8u8)
            .map(|i| funded_input(&oracle, 100 + i, 2_000_000, b"eight"))
            .collect();
        let err = round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: hex::encode("eight"),
                change_script: change.clone(),
                inputs: too_many,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));

        let seven: Vec<InputRegistration> = (0..7u8)
            .map(|i| funded_input(&oracle, 120 + i, 2_000_000, b"seven"))
            .collect();
        round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: hex::encode("seven"),
                change_script: change,
                inputs: seven,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn banned_outpoint_is_rejected() {
        let oracle = Arc::new(FakeChainOracle::default());
        let ban_store = Arc::new(MemoryBanStore::new());
        let config = CoordinatorConfig::default();
        let mut round = Round::new(
            1,
            &config,
            oracle.clone(),
            ban_store.clone(),
            Arc::new(BlindSigner::generate().unwrap()),
        );

        let blinded = hex::encode("banned-alice");
        let input = funded_input(&oracle, 42, 11_000_000, blinded.as_bytes());
        let outpoint = input.outpoint;
        ban_store
            .ban(
                &[outpoint],
                SystemTime::now() + Duration::from_secs(60),
                BanSeverity::DroppedAfterConfirmation,
            )
            .await;

        let err = round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: blinded,
                change_script: ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap()),
                inputs: vec![input],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InputDisallowed(_)));
    }

    #[tokio::test]
    async fn duplicate_blinded_output_hex_rejected_within_round() {
        let oracle = Arc::new(FakeChainOracle::default());
        let mut round = test_round(3, oracle.clone());
        let change = ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap());
        let blinded = hex::encode("same-blind");

        let input_a = funded_input(&oracle, 61, 11_000_000, blinded.as_bytes());
        round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: blinded.clone(),
                change_script: change.clone(),
                inputs: vec![input_a],
            })
            .await
            .unwrap();

        let input_b = funded_input(&oracle, 62, 11_000_000, blinded.as_bytes());
        let err = round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: blinded,
                change_script: change,
                inputs: vec![input_b],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn reregistration_with_same_outpoint_replaces_prior_alice() {
        let oracle = Arc::new(FakeChainOracle::default());
        let mut round = test_round(3, oracle.clone());
        let change = ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap());

        let first_blinded = hex::encode("first-blind");
        let input = funded_input(&oracle, 77, 11_000_000, first_blinded.as_bytes());
        let outpoint = input.outpoint;
        let first = round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: first_blinded,
                change_script: change.clone(),
                inputs: vec![input],
            })
            .await
            .unwrap();
        assert_eq!(round.alice_count(), 1);

        // re-derive a fresh proof over a *new* blinded hex for the same outpoint
        let second_blinded = hex::encode("second-blind");
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[77u8; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let digest = bitcoin::hashes::sha256::Hash::hash(second_blinded.as_bytes());
        let msg = Message::from_digest_slice(digest.as_ref()).unwrap();
        let signature = secp.sign_ecdsa(&msg, &sk);

        round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: second_blinded,
                change_script: change,
                inputs: vec![InputRegistration {
                    outpoint,
                    proof: OwnershipProof { pubkey: pk, signature },
                }],
            })
            .await
            .unwrap();

        assert_eq!(round.alice_count(), 1);
        assert!(!round.alices.contains_key(&first.unique_id));
    }
}
