//! Node configuration (SPEC_FULL.md §6). clap-derived so every field has a
//! CLI flag and an environment-variable override, following the donor's
//! `NODE_CORE_*`-prefixed layout.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StateMode {
    /// Full UTXO set kept and verified locally.
    Utxo,
    /// Only the authenticated digest is tracked; AD proofs are trusted.
    Digest,
}

impl Default for StateMode {
    fn default() -> Self {
        StateMode::Utxo
    }
}

#[derive(Debug, Parser, Clone)]
#[command(name = "chain-core", about = "Proof-of-work node core")]
pub struct Config {
    /// Directory for the LMDB-backed key-value store.
    #[arg(long, env = "NODE_CORE_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// LMDB map size, in gigabytes.
    #[arg(long, env = "NODE_CORE_LMDB_MAP_SIZE_GB", default_value_t = 10)]
    pub lmdb_map_size_gb: u64,

    /// Whether full transactions are verified (Utxo) or only trusted (Digest).
    #[arg(long, env = "NODE_CORE_STATE_MODE", value_enum, default_value_t = StateMode::Utxo)]
    pub state_mode: StateMode,

    /// Whether incoming blocks' transactions are checked at all.
    #[arg(long, env = "NODE_CORE_VERIFY_TRANSACTIONS", default_value_t = true)]
    pub verify_transactions: bool,

    /// Retention window, in blocks, for full block bodies; -1 keeps all of
    /// them. Full-block storage itself lives with the external
    /// payload-storage collaborator (SPEC_FULL.md §1) — the core only
    /// validates and carries this value for that collaborator to honor.
    #[arg(long, env = "NODE_CORE_BLOCKS_TO_KEEP", default_value_t = -1)]
    pub blocks_to_keep: i64,

    /// How many committed versions the key-value store retains undo logs for.
    #[arg(long, env = "NODE_CORE_KV_KEEP_VERSIONS", default_value_t = 200)]
    pub kv_keep_versions: usize,

    /// Maximum accepted clock drift for incoming headers, in seconds.
    #[arg(long, env = "NODE_CORE_MAX_TIME_DRIFT_SECS", default_value_t = 7_200)]
    pub max_time_drift_secs: u64,

    /// Deepest height gap, relative to the current best header, at which a
    /// header may still extend its (stale) parent.
    #[arg(long, env = "NODE_CORE_MAX_ROLLBACK", default_value_t = 50)]
    pub max_rollback: i64,

    /// Maximum number of transactions the mempool retains.
    #[arg(long, env = "NODE_CORE_MEMPOOL_MAX_CAPACITY", default_value_t = 10_000)]
    pub mempool_max_capacity: usize,

    /// How long a mempool transaction may sit unconfirmed before expiring
    /// (default 1000 minutes, SPEC_FULL.md §6's `utxMaxAge`).
    #[arg(long, env = "NODE_CORE_MEMPOOL_MAX_AGE_SECS", default_value_t = 1_000 * 60)]
    pub mempool_max_age_secs: u64,

    /// Interval between mempool expiry sweeps, in seconds (default 180
    /// minutes, SPEC_FULL.md §6's `mempoolCleanupInterval`).
    #[arg(long, env = "NODE_CORE_MEMPOOL_CLEANUP_INTERVAL_SECS", default_value_t = 180 * 60)]
    pub mempool_cleanup_interval_secs: u64,

    /// Whether the miner starts mining automatically.
    #[arg(long, env = "NODE_CORE_MINING_ENABLED", default_value_t = false)]
    pub mining_enabled: bool,

    /// Delay between successive mined blocks, in milliseconds (default 10s,
    /// SPEC_FULL.md §6's `miningDelay`).
    #[arg(long, env = "NODE_CORE_MINING_DELAY_MS", default_value_t = 10_000)]
    pub mining_delay_ms: u64,

    /// Soft cap, in bytes, on a mined block's serialized transaction payload.
    #[arg(long, env = "NODE_CORE_BLOCK_MAX_SIZE", default_value_t = 2 * 1024 * 1024)]
    pub block_max_size: usize,

    /// Mine even while not fully synced to the network tip.
    #[arg(long, env = "NODE_CORE_OFFLINE_GENERATION", default_value_t = false)]
    pub offline_generation: bool,

    /// Hex-encoded 32-byte ed25519 seed for the miner's signing key. A
    /// fresh key is generated if unset.
    #[arg(long, env = "NODE_CORE_MINER_SEED")]
    pub miner_seed_hex: Option<String>,

    /// Address the status/metrics HTTP surface binds to.
    #[arg(long, env = "NODE_CORE_RPC_BIND", default_value = "127.0.0.1:9095")]
    pub rpc_bind: String,

    /// Bearer token required by the RPC surface; open access if unset.
    #[arg(long, env = "NODE_CORE_RPC_TOKEN")]
    pub rpc_token: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.lmdb_map_size_gb == 0 {
            return Err("lmdb_map_size_gb must be nonzero".into());
        }
        if self.mempool_max_capacity == 0 {
            return Err("mempool_max_capacity must be nonzero".into());
        }
        if self.max_rollback <= 0 {
            return Err("max_rollback must be positive".into());
        }
        if !self.verify_transactions && self.blocks_to_keep != 0 {
            return Err("blocks_to_keep must be 0 when verify_transactions is disabled".into());
        }
        if let Some(seed) = &self.miner_seed_hex {
            let bytes = hex::decode(seed).map_err(|e| format!("miner_seed_hex: {e}"))?;
            if bytes.len() != 32 {
                return Err("miner_seed_hex must decode to exactly 32 bytes".into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parse_is_valid() {
        let cfg = Config::parse_from(["chain-core"]);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.state_mode, StateMode::Utxo);
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut cfg = Config::parse_from(["chain-core"]);
        cfg.mempool_max_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_malformed_miner_seed() {
        let mut cfg = Config::parse_from(["chain-core"]);
        cfg.miner_seed_hex = Some("not-hex".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn digest_only_mode_requires_zero_blocks_to_keep() {
        let mut cfg = Config::parse_from(["chain-core"]);
        cfg.verify_transactions = false;
        assert!(cfg.validate().is_err());
        cfg.blocks_to_keep = 0;
        assert!(cfg.validate().is_ok());
    }
}
