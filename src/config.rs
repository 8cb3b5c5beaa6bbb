use std::env;
use std::time::Duration;

use bitcoin::Network;

/// Coordinator-wide round parameters, loaded once at startup when
/// `setup()` assembles the `Coordinator`.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub network: Network,
    pub denomination: u64,
    pub anonymity_set: usize,
    pub fee_per_input: u64,
    pub fee_per_output: u64,
    pub coordinator_fee_percent: f64,
    pub alice_timeout: Duration,
    pub conn_conf_timeout: Duration,
    pub output_timeout: Duration,
    pub signing_timeout: Duration,
    pub max_unconfirmed_coinjoins: u32,
    pub max_inputs_per_alice: usize,
    pub ban_duration: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            network: Network::Signet,
            denomination: 10_000_000, // 0.1 BTC
            anonymity_set: 5,
            fee_per_input: 5_000,
            fee_per_output: 10_000,
            coordinator_fee_percent: 0.003,
            alice_timeout: Duration::from_secs(60 * 10),
            conn_conf_timeout: Duration::from_secs(60),
            output_timeout: Duration::from_secs(60),
            signing_timeout: Duration::from_secs(60),
            max_unconfirmed_coinjoins: 24,
            max_inputs_per_alice: 7,
            ban_duration: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl CoordinatorConfig {
    /// Load from the environment, falling back to the defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env").ok();
        dotenv::dotenv().ok();

        let defaults = CoordinatorConfig::default();

        let network = env::var("NETWORK")
            .ok()
            .and_then(|n| match n.as_str() {
                "mainnet" | "bitcoin" => Some(Network::Bitcoin),
                "testnet" => Some(Network::Testnet),
                "signet" => Some(Network::Signet),
                "regtest" => Some(Network::Regtest),
                _ => None,
            })
            .unwrap_or(defaults.network);

        let env_u64 = |key: &str, default: u64| -> u64 {
            env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let env_usize = |key: &str, default: usize| -> usize {
            env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let env_f64 = |key: &str, default: f64| -> f64 {
            env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let env_secs = |key: &str, default: Duration| -> Duration {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        CoordinatorConfig {
            network,
            denomination: env_u64("DENOMINATION_SATS", defaults.denomination),
            anonymity_set: env_usize("ANONYMITY_SET", defaults.anonymity_set),
            fee_per_input: env_u64("FEE_PER_INPUT", defaults.fee_per_input),
            fee_per_output: env_u64("FEE_PER_OUTPUT", defaults.fee_per_output),
            coordinator_fee_percent: env_f64(
                "COORDINATOR_FEE_PERCENT",
                defaults.coordinator_fee_percent,
            ),
            alice_timeout: env_secs("ALICE_TIMEOUT_SECS", defaults.alice_timeout),
            conn_conf_timeout: env_secs("CONN_CONF_TIMEOUT_SECS", defaults.conn_conf_timeout),
            output_timeout: env_secs("OUTPUT_TIMEOUT_SECS", defaults.output_timeout),
            signing_timeout: env_secs("SIGNING_TIMEOUT_SECS", defaults.signing_timeout),
            max_unconfirmed_coinjoins: env_usize(
                "MAX_UNCONFIRMED_COINJOINS",
                defaults.max_unconfirmed_coinjoins as usize,
            ) as u32,
            max_inputs_per_alice: env_usize(
                "MAX_INPUTS_PER_ALICE",
                defaults.max_inputs_per_alice,
            ),
            ban_duration: env_secs("BAN_DURATION_SECS", defaults.ban_duration),
        }
    }
}
