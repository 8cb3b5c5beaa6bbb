pub mod oracle;
pub mod rpc_oracle;

pub use oracle::{ChainOracle, ScriptKind, TxOutInfo};
pub use rpc_oracle::BitcoinCoreChainOracle;
