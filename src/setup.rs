use bitcoincore_rpc::{Auth, Client, RpcApi};

use std::env;
use std::sync::Arc;

use crate::ban_store::MemoryBanStore;
use crate::chain::BitcoinCoreChainOracle;
use crate::config::CoordinatorConfig;
use crate::coordinator::Coordinator;
use crate::crypto::BlindSigner;

/// Assembles the `Coordinator` and its collaborators: load config from the
/// environment, stand up the Bitcoin Core RPC client, confirm it actually
/// answers, then wire everything together.
pub async fn setup() -> anyhow::Result<Arc<Coordinator>> {
    // Load environment variables from various sources.
    dotenv::from_filename(".env.local").ok();
    dotenv::from_filename(".env").ok();
    dotenv::dotenv().ok();

    let config = CoordinatorConfig::from_env();
    println!("network: {:?}", config.network);

    // Setup bitcoin rpc stuff
    let bitcoin_client = {
        let url = env::var("BITCOIN_RPC_HOST_AND_PORT").expect("missing BITCOIN_RPC_HOST_AND_PORT");
        let user = env::var("BITCOIN_RPC_USER").expect("missing BITCOIN_RPC_USER");
        let pass = env::var("BITCOIN_RPC_PASSWORD").expect("missing BITCOIN_RPC_PASSWORD");
        let rpc =
            Client::new(&url, Auth::UserPass(user, pass)).expect("failed to create RPC client");

        // Make sure we can get info at startup
        let _blockchain_info = rpc.get_blockchain_info();

        rpc
    };

    let chain_oracle = Arc::new(BitcoinCoreChainOracle::new(bitcoin_client));
    let ban_store = Arc::new(MemoryBanStore::new());
    let blind_signer = Arc::new(BlindSigner::generate()?);

    Ok(Arc::new(Coordinator::new(
        config,
        chain_oracle,
        ban_store,
        blind_signer,
    )))
}
