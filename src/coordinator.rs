use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::{OutPoint, Txid};
use log::info;
use tokio::sync::{Mutex, RwLock};

use crate::ban_store::BanStore;
use crate::chain::ChainOracle;
use crate::config::CoordinatorConfig;
use crate::crypto::BlindSigner;
use crate::error::{CoreError, CoreResult};
use crate::round::{Phase, Round, RoundStatus};

/// How long a terminal (Succeeded/Failed) round stays queryable before the
/// background ticker retires it.
const RETIREMENT_GRACE: Duration = Duration::from_secs(5 * 60);

struct RoundEntry {
    round: Arc<RwLock<Round>>,
    terminal_since: Mutex<Option<Instant>>,
}

/// Owns the fleet of concurrently running rounds plus the shared,
/// coordinator-wide collaborators.
///
/// Two locks are scoped narrowly and named for what they guard:
/// - `inputs_lock` serializes every `register_alice` call across every
///   round, so the cross-round outpoint-uniqueness check can't race. Held
///   for the duration of one registration, including chain RPC and blind
///   signing.
/// - `outputs_lock` serializes every `register_bob` call, so two Bobs
///   racing to fill the last slot of a round can't both succeed.
///
/// Everything else (confirmation, unconfirmation, signature posting,
/// status reads) takes only the per-round `RwLock`.
pub struct Coordinator {
    config: CoordinatorConfig,
    rounds: RwLock<HashMap<u64, RoundEntry>>,
    next_round_id: Mutex<u64>,
    inputs_lock: Mutex<()>,
    outputs_lock: Mutex<()>,
    chain_oracle: Arc<dyn ChainOracle>,
    ban_store: Arc<dyn BanStore>,
    blind_signer: Arc<BlindSigner>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        chain_oracle: Arc<dyn ChainOracle>,
        ban_store: Arc<dyn BanStore>,
        blind_signer: Arc<BlindSigner>,
    ) -> Self {
        Coordinator {
            config,
            rounds: RwLock::new(HashMap::new()),
            next_round_id: Mutex::new(1),
            inputs_lock: Mutex::new(()),
            outputs_lock: Mutex::new(()),
            chain_oracle,
            ban_store,
            blind_signer,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn blind_signer(&self) -> &BlindSigner {
        &self.blind_signer
    }

    async fn new_round(&self) -> Arc<RwLock<Round>> {
        let mut next_id = self.next_round_id.lock().await;
        let round_id = *next_id;
        *next_id += 1;
        drop(next_id);

        let round = Round::new(
            round_id,
            &self.config,
            self.chain_oracle.clone(),
            self.ban_store.clone(),
            self.blind_signer.clone(),
        );
        info!("round {round_id}: created, InputRegistration open");

        let handle = Arc::new(RwLock::new(round));
        self.rounds.write().await.insert(
            round_id,
            RoundEntry {
                round: handle.clone(),
                terminal_since: Mutex::new(None),
            },
        );
        handle
    }

    /// There is always at most one round in InputRegistration; create one
    /// if none is open.
    pub async fn current_input_registering_round(&self) -> Arc<RwLock<Round>> {
        {
            let rounds = self.rounds.read().await;
            for entry in rounds.values() {
                let round = entry.round.read().await;
                if round.phase == Phase::InputRegistration && round.status == RoundStatus::Running
                {
                    return entry.round.clone();
                }
            }
        }
        self.new_round().await
    }

    pub async fn try_get_round(&self, round_id: u64) -> Option<Arc<RwLock<Round>>> {
        self.rounds
            .read()
            .await
            .get(&round_id)
            .map(|e| e.round.clone())
    }

    pub async fn try_get_round_by_hash(&self, round_hash_hex: &str) -> Option<Arc<RwLock<Round>>> {
        let rounds = self.rounds.read().await;
        for entry in rounds.values() {
            let round = entry.round.read().await;
            if round.round_hash_hex().as_deref() == Some(round_hash_hex) {
                return Some(entry.round.clone());
            }
        }
        None
    }

    /// Global outpoint-uniqueness check across every `Running` round except
    /// `exclude_round_id` (a `Failed` round has already released its claims —
    /// `Round::fail` clears its Alices). Used by `register_alice` callers:
    /// the target round is allowed to already hold the outpoint (that's a
    /// same-round re-registration, which `Round::register_alice` itself
    /// resolves by replacement) — only a hit in a *different* running round
    /// is a real conflict.
    pub async fn any_other_running_round_contains_input(
        &self,
        exclude_round_id: u64,
        outpoint: OutPoint,
    ) -> bool {
        let rounds = self.rounds.read().await;
        for (id, entry) in rounds.iter() {
            if *id == exclude_round_id {
                continue;
            }
            let round = entry.round.read().await;
            if round.is_running() && round.contains_input(outpoint) {
                return true;
            }
        }
        false
    }

    pub async fn contains_coinjoin(&self, tx_hash: Txid) -> CoreResult<bool> {
        self.chain_oracle.contains_coinjoin(tx_hash).await
    }

    /// Snapshot of running rounds for the `GET states` endpoint.
    pub async fn running_rounds(&self) -> Vec<Arc<RwLock<Round>>> {
        let rounds = self.rounds.read().await;
        let mut out = Vec::new();
        for entry in rounds.values() {
            if entry.round.read().await.status == RoundStatus::Running {
                out.push(entry.round.clone());
            }
        }
        out
    }

    /// Guard serializing every `register_alice` call across every round.
    /// Callers must hold this for the whole registration — chain RPC,
    /// blind signing, and the state mutation — and release it as soon as
    /// the call returns.
    pub async fn lock_inputs(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inputs_lock.lock().await
    }

    /// Guard serializing every `register_bob` call, preventing two
    /// concurrent Bobs from both observing `|bobs| == anonymity_set - 1`
    /// and both being admitted.
    pub async fn lock_outputs(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.outputs_lock.lock().await
    }

    /// Background ticker body: drive every running round's phase timeout,
    /// retire terminal rounds past their grace window, and keep exactly
    /// one InputRegistration round open.
    pub async fn tick(&self) -> CoreResult<()> {
        let round_ids: Vec<u64> = self.rounds.read().await.keys().copied().collect();

        for round_id in round_ids {
            let entry = {
                let rounds = self.rounds.read().await;
                match rounds.get(&round_id) {
                    Some(e) => e.round.clone(),
                    None => continue,
                }
            };

            let mut round = entry.write().await;
            if round.is_running() {
                round.tick().await?;
            }
        }

        self.retire_terminal_rounds().await;
        self.current_input_registering_round().await;
        Ok(())
    }

    async fn retire_terminal_rounds(&self) {
        let mut to_retire = Vec::new();
        {
            let rounds = self.rounds.read().await;
            for (id, entry) in rounds.iter() {
                let round = entry.round.read().await;
                if round.status == RoundStatus::Running {
                    continue;
                }
                let mut terminal_since = entry.terminal_since.lock().await;
                let since = *terminal_since.get_or_insert(Instant::now());
                if since.elapsed() >= RETIREMENT_GRACE {
                    to_retire.push(*id);
                }
            }
        }
        if !to_retire.is_empty() {
            let mut rounds = self.rounds.write().await;
            for id in to_retire {
                rounds.remove(&id);
                info!("round {id}: retired");
            }
        }
    }
}

/// Spawns the background ticker loop driving phase timeouts and round
/// scheduling.
pub fn spawn_ticker(coordinator: Arc<Coordinator>, period: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if let Err(e) = coordinator.tick().await {
                log::error!("ticker: round maintenance failed: {e}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ban_store::MemoryBanStore;
    use crate::chain::{ScriptKind, TxOutInfo};
    use crate::crypto::OwnershipProof;
    use crate::round::{InputRegistration, RegisterAliceRequest};
    use bitcoin::hashes::Hash as _;
    use bitcoin::secp256k1::{Message, Secp256k1, SecretKey};
    use bitcoin::{ScriptBuf, Txid};
    use std::collections::HashMap as Map;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeChainOracle {
        utxos: StdMutex<Map<OutPoint, TxOutInfo>>,
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

        async fn contains_coinjoin(&self, _tx_hash: Txid) -> Result<bool, CoreError> {
            Ok(false)
        }

        async fn unconfirmed_coinjoin_count(&self) -> Result<u32, CoreError> {
            Ok(0)
        }

        async fn broadcast(&self, _tx: &bitcoin::Transaction) -> Result<(), CoreError> {
            Ok(())
        }
    }

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
                script_kind: ScriptKind::WitnessV0KeyHash,
            },
        );

        InputRegistration {
            outpoint,
            proof: OwnershipProof { pubkey: pk, signature },
        }
    }

    fn test_coordinator(anonymity_set: usize, oracle: Arc<FakeChainOracle>) -> Coordinator {
        let config = CoordinatorConfig {
            anonymity_set,
            denomination: 10_000_000,
            fee_per_input: 5_000,
            fee_per_output: 10_000,
            coordinator_fee_percent: 0.0,
            ..CoordinatorConfig::default()
        };
        Coordinator::new(
            config,
            oracle,
            Arc::new(MemoryBanStore::new()),
            Arc::new(BlindSigner::generate().unwrap()),
        )
    }

    fn change_script() -> ScriptBuf {
        ScriptBuf::from(hex::decode("0014deadbeefdeadbeefdeadbeefdeadbeefdead").unwrap())
    }

    #[tokio::test]
    async fn current_input_registering_round_is_created_once_and_reused() {
        let oracle = Arc::new(FakeChainOracle::default());
        let coordinator = test_coordinator(5, oracle);

        let first = coordinator.current_input_registering_round().await;
        let second = coordinator.current_input_registering_round().await;
        assert_eq!(first.read().await.round_id, second.read().await.round_id);
    }

    /// Regression test: same-round re-registration (new blinded hex, same
    /// outpoint) must not be rejected by the cross-round uniqueness check
    /// against the very round it's entering.
    #[tokio::test]
    async fn same_round_reregistration_is_not_treated_as_a_cross_round_conflict() {
        let oracle = Arc::new(FakeChainOracle::default());
        let coordinator = test_coordinator(5, oracle.clone());

        let round_handle = coordinator.current_input_registering_round().await;
        let round_id = round_handle.read().await.round_id;

        let blinded_a = hex::encode("first-blind");
        let input = funded_input(&oracle, 1, 11_000_000, blinded_a.as_bytes());
        let outpoint = input.outpoint;
        {
            let mut round = round_handle.write().await;
            round
                .register_alice(RegisterAliceRequest {
                    blinded_output_hex: blinded_a,
                    change_script: change_script(),
                    inputs: vec![input],
                })
                .await
                .unwrap();
        }

        // the coordinator-facing uniqueness check, excluding the target
        // round, must not see the outpoint as a conflict with itself.
        assert!(
            !coordinator
                .any_other_running_round_contains_input(round_id, outpoint)
                .await
        );

        // re-register the same outpoint under a fresh blinded hex, exactly
        // as the inputs handler would after that check passes.
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&[1u8; 32]).unwrap();
        let pk = bitcoin::secp256k1::PublicKey::from_secret_key(&secp, &sk);
        let blinded_b = hex::encode("second-blind");
        let digest = bitcoin::hashes::sha256::Hash::hash(blinded_b.as_bytes());
        let msg = Message::from_digest_slice(digest.as_ref()).unwrap();
        let signature = secp.sign_ecdsa(&msg, &sk);

        let mut round = round_handle.write().await;
        round
            .register_alice(RegisterAliceRequest {
                blinded_output_hex: blinded_b,
                change_script: change_script(),
                inputs: vec![InputRegistration {
                    outpoint,
                    proof: OwnershipProof { pubkey: pk, signature },
                }],
            })
            .await
            .unwrap();
        assert_eq!(round.alice_count(), 1);
    }

    #[tokio::test]
    async fn outpoint_already_in_another_running_round_is_rejected() {
        let oracle = Arc::new(FakeChainOracle::default());
        let coordinator = test_coordinator(5, oracle.clone());

        let first_round = coordinator.current_input_registering_round().await;
        let first_round_id = first_round.read().await.round_id;

        let blinded = hex::encode("cross-round");
        let input = funded_input(&oracle, 9, 11_000_000, blinded.as_bytes());
        let outpoint = input.outpoint;
        {
            let mut round = first_round.write().await;
            round
                .register_alice(RegisterAliceRequest {
                    blinded_output_hex: blinded,
                    change_script: change_script(),
                    inputs: vec![input],
                })
                .await
                .unwrap();
        }

        // a second, different round must see the outpoint as taken.
        let other_round_id = first_round_id + 1;
        assert!(
            coordinator
                .any_other_running_round_contains_input(other_round_id, outpoint)
                .await
        );
    }
}
