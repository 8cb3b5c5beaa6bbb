use async_trait::async_trait;
use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};

use crate::error::CoreError;

/// Script types the oracle can classify a `TxOutInfo` as. Only
/// `WitnessV0KeyHash` (native SegWit P2WPKH) is acceptable for a round
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    WitnessV0KeyHash,
    Other,
}

#[derive(Debug, Clone)]
pub struct TxOutInfo {
    pub value: u64,
    pub script: ScriptBuf,
    pub confirmations: u32,
    pub is_coinbase: bool,
    pub script_kind: ScriptKind,
}

/// The Bitcoin full-node capability the core needs. Implemented externally;
/// the core only ever talks to this trait object.
#[async_trait]
pub trait ChainOracle: Send + Sync {
    async fn get_txout(
        &self,
        outpoint: OutPoint,
        include_mempool: bool,
    ) -> Result<Option<TxOutInfo>, CoreError>;

    async fn contains_coinjoin(&self, tx_hash: Txid) -> Result<bool, CoreError>;

    async fn unconfirmed_coinjoin_count(&self) -> Result<u32, CoreError>;

    async fn broadcast(&self, tx: &Transaction) -> Result<(), CoreError>;
}
