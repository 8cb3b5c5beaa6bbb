use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{OutPoint, Transaction, Txid};
use bitcoincore_rpc::{Client, RpcApi};
use log::{debug, warn};
use tokio::task;

use crate::chain::oracle::{ChainOracle, ScriptKind, TxOutInfo};
use crate::error::CoreError;

/// `ChainOracle` backed by a real `bitcoind` over RPC: a blocking
/// `bitcoincore_rpc::Client` driven through `task::block_in_place` so it
/// doesn't stall the async executor.
///
/// `bitcoind` has no notion of "this tx was a coordinated CoinJoin" — that
/// bookkeeping is the coordinator's, so this adapter also tracks broadcast
/// CoinJoin txids for the unconfirmed-CJ policy.
pub struct BitcoinCoreChainOracle {
    client: Arc<Client>,
    known_coinjoins: Mutex<HashSet<Txid>>,
}

impl BitcoinCoreChainOracle {
    pub fn new(client: Client) -> Self {
        BitcoinCoreChainOracle {
            client: Arc::new(client),
            known_coinjoins: Mutex::new(HashSet::new()),
        }
    }

    /// Recorded by the coordinator right after a successful broadcast so
    /// future `contains_coinjoin`/`unconfirmed_coinjoin_count` calls see it.
    pub fn record_coinjoin(&self, tx_hash: Txid) {
        if let Ok(mut set) = self.known_coinjoins.lock() {
            set.insert(tx_hash);
        }
    }
}

#[async_trait]
impl ChainOracle for BitcoinCoreChainOracle {
    async fn get_txout(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<Option<TxOutInfo>, CoreError> {
        let client = self.client.clone();

        let result = task::block_in_place(move || {
            client.get_tx_out(&outpoint.txid, outpoint.vout, Some(include_mempool))
        })
        .map_err(|e| CoreError::Transient(format!("get_tx_out RPC failed: {e}")))?;

        let Some(txout) = result else {
            return Ok(None);
        };

        let script_kind = match txout.script_pub_key.type_.as_deref() {
            Some("witness_v0_keyhash") => ScriptKind::WitnessV0KeyHash,
            _ => ScriptKind::Other,
        };

        Ok(Some(TxOutInfo {
            value: txout.value.to_sat(),
            script: txout.script_pub_key.script().map_err(|e| {
                CoreError::Transient(format!("malformed scriptPubKey from node: {e}"))
            })?,
            confirmations: txout.confirmations,
            is_coinbase: txout.coinbase,
            script_kind,
        }))
    }

    async fn contains_coinjoin(&self, tx_hash: Txid) -> Result<bool, CoreError> {
        let known = self
            .known_coinjoins
            .lock()
            .map_err(|_| CoreError::Fatal("coinjoin set lock poisoned".into()))?;
        Ok(known.contains(&tx_hash))
    }

    async fn unconfirmed_coinjoin_count(&self) -> Result<u32, CoreError> {
        let client = self.client.clone();
        let mempool_txids: Vec<Txid> = task::block_in_place(move || client.get_raw_mempool())
            .map_err(|e| CoreError::Transient(format!("getrawmempool RPC failed: {e}")))?;

        let known = self
            .known_coinjoins
            .lock()
            .map_err(|_| CoreError::Fatal("coinjoin set lock poisoned".into()))?;

        Ok(mempool_txids
            .iter()
            .filter(|txid| known.contains(txid))
            .count() as u32)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<(), CoreError> {
        let client = self.client.clone();
        let tx = tx.clone();

        let txid = task::block_in_place(move || client.send_raw_transaction(&tx))
            .map_err(|e| {
                warn!("broadcast failed: {e}");
                CoreError::Transient(format!("broadcast failed: {e}"))
            })?;

        debug!("broadcast coinjoin transaction {txid}");
        self.record_coinjoin(txid);
        Ok(())
    }
}
