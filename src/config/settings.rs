use crate::crypto::Address;
use crate::error::{NodeError, Result};
use num_bigint::BigUint;
use std::env;
use std::path::PathBuf;

const DB_PATH_KEY: &str = "EMBER_DB_PATH";
const CHAIN_ID_KEY: &str = "EMBER_CHAIN_ID";
const GAS_LIMIT_KEY: &str = "EMBER_BLOCK_GAS_LIMIT";
const MIN_GAS_PRICE_KEY: &str = "EMBER_MIN_GAS_PRICE";
const DIFFICULTY_KEY: &str = "EMBER_DIFFICULTY";
const MINING_KEY: &str = "EMBER_MINING";
const MINING_THREADS_KEY: &str = "EMBER_MINING_THREADS";
const COINBASE_KEY: &str = "EMBER_COINBASE";
const MEMPOOL_SIZE_KEY: &str = "EMBER_MEMPOOL_SIZE";
const P2P_PORT_KEY: &str = "EMBER_P2P_PORT";
const RPC_PORT_KEY: &str = "EMBER_RPC_PORT";

/// Node settings. Built once in `main` and handed to `Node::new`; the
/// core never reaches for process environment or globals itself.
#[derive(Debug, Clone)]
pub struct Settings {
    pub chain_id: u64,
    pub db_path: PathBuf,
    pub block_gas_limit: u64,
    pub min_gas_price: BigUint,
    /// PoW difficulty in bits; static for the life of the process
    pub difficulty: u64,
    pub mining_enabled: bool,
    /// Worker threads striping the nonce search
    pub mining_threads: usize,
    pub coinbase: Address,
    pub mempool_max_size: usize,
    pub mempool_max_tx_size: Option<usize>,
    /// Upper bound on transactions pulled per candidate block
    pub max_txs_per_block: usize,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            chain_id: 1337,
            db_path: PathBuf::from("./data"),
            block_gas_limit: 8_000_000,
            min_gas_price: BigUint::from(1u8),
            difficulty: 4,
            mining_enabled: false,
            mining_threads: 1,
            coinbase: Address::zero(),
            mempool_max_size: 1000,
            mempool_max_tx_size: None,
            max_txs_per_block: 1000,
            p2p_port: 8080,
            rpc_port: 8545,
        }
    }
}

impl Settings {
    /// Defaults overlaid with any `EMBER_*` environment overrides
    pub fn from_env() -> Result<Settings> {
        let mut settings = Settings::default();

        if let Ok(path) = env::var(DB_PATH_KEY) {
            settings.db_path = PathBuf::from(path);
        }
        if let Ok(value) = env::var(CHAIN_ID_KEY) {
            settings.chain_id = parse_number(CHAIN_ID_KEY, &value)?;
        }
        if let Ok(value) = env::var(GAS_LIMIT_KEY) {
            settings.block_gas_limit = parse_number(GAS_LIMIT_KEY, &value)?;
        }
        if let Ok(value) = env::var(MIN_GAS_PRICE_KEY) {
            settings.min_gas_price = value.parse::<BigUint>().map_err(|e| {
                NodeError::Config(format!("invalid {MIN_GAS_PRICE_KEY}: {e}"))
            })?;
        }
        if let Ok(value) = env::var(DIFFICULTY_KEY) {
            settings.difficulty = parse_number(DIFFICULTY_KEY, &value)?;
        }
        if let Ok(value) = env::var(MINING_KEY) {
            settings.mining_enabled = matches!(value.as_str(), "1" | "true" | "yes");
        }
        if let Ok(value) = env::var(MINING_THREADS_KEY) {
            settings.mining_threads = parse_number::<usize>(MINING_THREADS_KEY, &value)?;
        }
        if let Ok(value) = env::var(COINBASE_KEY) {
            settings.coinbase = Address::from_hex(&value)
                .map_err(|e| NodeError::Config(format!("invalid {COINBASE_KEY}: {e}")))?;
        }
        if let Ok(value) = env::var(MEMPOOL_SIZE_KEY) {
            settings.mempool_max_size = parse_number::<usize>(MEMPOOL_SIZE_KEY, &value)?;
        }
        if let Ok(value) = env::var(P2P_PORT_KEY) {
            settings.p2p_port = parse_number(P2P_PORT_KEY, &value)?;
        }
        if let Ok(value) = env::var(RPC_PORT_KEY) {
            settings.rpc_port = parse_number(RPC_PORT_KEY, &value)?;
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty == 0 || self.difficulty > 255 {
            return Err(NodeError::Config(format!(
                "difficulty must be between 1 and 255 bits, got {}",
                self.difficulty
            )));
        }
        if self.block_gas_limit == 0 {
            return Err(NodeError::Config(
                "block gas limit cannot be zero".to_string(),
            ));
        }
        if self.mempool_max_size == 0 {
            return Err(NodeError::Config(
                "mempool size cannot be zero".to_string(),
            ));
        }
        if self.mining_threads == 0 {
            return Err(NodeError::Config(
                "mining threads cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| NodeError::Config(format!("invalid {key}: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.chain_id, 1337);
        assert_eq!(settings.block_gas_limit, 8_000_000);
        assert_eq!(settings.difficulty, 4);
        assert!(!settings.mining_enabled);
    }

    #[test]
    fn validation_rejects_bad_knobs() {
        let mut settings = Settings::default();
        settings.difficulty = 0;
        assert!(settings.validate().is_err());

        settings.difficulty = 256;
        assert!(settings.validate().is_err());

        settings.difficulty = 4;
        settings.block_gas_limit = 0;
        assert!(settings.validate().is_err());
    }
}
