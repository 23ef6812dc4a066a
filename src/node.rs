//! Node wiring (SPEC_FULL.md §2, §6): assembles C1-C6 behind a single
//! handle and owns the background tasks (mempool expiry, miner loop,
//! status surface).
//!
//! Grounded on the donor's `state/mod.rs::Inner` — a single shared handle
//! holding every component plus the broadcast channels other subsystems
//! subscribe to — generalized from the donor's raw storage/mempool pair
//! to the full C1-C6 stack and from `println!` bootstrap logging to
//! `log::info!`.

use crate::config::{Config, StateMode};
use crate::error::CoreResult;
use crate::header::{Header, HeaderProcessor};
use crate::ids::ModifierId;
use crate::kv::KvStore;
use crate::mempool::Mempool;
use crate::metrics::Metrics;
use crate::miner::Miner;
use crate::prover::Prover;
use crate::supply::{ConstantSupply, TokenSupplyController};
use crate::time::{NetworkTimeProvider, SystemClock};
use crate::utxo::UtxoState;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};

/// Default coinbase reward, in the absence of a configurable emission
/// curve (SPEC_FULL.md leaves the schedule itself unspecified).
const DEFAULT_BLOCK_REWARD: u64 = 50;

/// Capacity of the applied-block notification channel. Lagging
/// subscribers (e.g. a slow RPC client) drop old notifications rather
/// than block block processing.
const APPLIED_BLOCK_CHANNEL_CAPACITY: usize = 256;

pub struct Node {
    pub config: Arc<Config>,
    pub kv: Arc<KvStore>,
    pub header_processor: Arc<HeaderProcessor>,
    pub utxo: Arc<AsyncMutex<UtxoState>>,
    pub mempool: Arc<Mempool>,
    pub supply: Arc<dyn TokenSupplyController>,
    pub clock: Arc<dyn NetworkTimeProvider>,
    pub miner: Arc<Miner>,
    pub metrics: Arc<Metrics>,
    applied_blocks: broadcast::Sender<ModifierId>,
    shutdown: watch::Sender<bool>,
}

impl Node {
    pub fn open(config: Config) -> CoreResult<Arc<Self>> {
        config.validate().map_err(crate::error::CoreError::storage)?;
        let config = Arc::new(config);

        log::info!("opening key-value store at {:?}", config.data_dir);
        let kv = Arc::new(KvStore::open(&config.data_dir, config.lmdb_map_size_gb, config.kv_keep_versions)?);

        let clock: Arc<dyn NetworkTimeProvider> = Arc::new(SystemClock);
        let header_processor = Arc::new(HeaderProcessor::new(
            kv.clone(),
            clock.clone(),
            config.max_time_drift_secs.saturating_mul(1000),
            config.max_rollback,
            config.verify_transactions,
            config.state_mode,
        ));

        let prover = Arc::new(std::sync::Mutex::new(Prover::open(kv.clone())?));
        let utxo = Arc::new(AsyncMutex::new(UtxoState::new(prover)));

        let mempool = Mempool::new(config.mempool_max_capacity, config.mempool_max_age_secs);

        let supply: Arc<dyn TokenSupplyController> = Arc::new(ConstantSupply::new(DEFAULT_BLOCK_REWARD));

        let signing_key = match &config.miner_seed_hex {
            Some(hex_seed) => {
                let bytes = hex::decode(hex_seed).map_err(|e| crate::error::CoreError::storage(e.to_string()))?;
                let seed: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| crate::error::CoreError::storage("miner seed must be 32 bytes"))?;
                SigningKey::from_bytes(&seed)
            }
            None => SigningKey::generate(&mut rand::rngs::OsRng),
        };

        let miner = Miner::new(
            config.clone(),
            header_processor.clone(),
            utxo.clone(),
            mempool.clone(),
            supply.clone(),
            clock.clone(),
            signing_key,
        );

        let (applied_blocks, _) = broadcast::channel(APPLIED_BLOCK_CHANNEL_CAPACITY);
        let (shutdown, _) = watch::channel(false);
        let metrics = Metrics::new();

        Ok(Arc::new(Node {
            config,
            kv,
            header_processor,
            utxo,
            mempool,
            supply,
            clock,
            miner,
            metrics,
            applied_blocks,
            shutdown,
        }))
    }

    pub fn subscribe_applied_blocks(&self) -> broadcast::Receiver<ModifierId> {
        self.applied_blocks.subscribe()
    }

    /// Starts the mempool expiry sweep and the miner's cooperative loop.
    /// If `mining_enabled`, the miner begins running immediately.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let clock = self.clock.clone();
        self.mempool.spawn_cleanup(self.config.mempool_cleanup_interval_secs, move || clock.now_ms());

        self.miner.spawn();
        if self.config.mining_enabled {
            self.miner.start_mining();
        }
    }

    /// Accepts an externally-sourced header plus its transactions
    /// (network IBD, or a locally replayed block): validates through C4,
    /// applies through C3, and broadcasts the result on success.
    pub async fn submit_block(&self, header: Header, transactions: Vec<crate::tx::Transaction>) -> CoreResult<()> {
        self.header_processor.validate(&header)?;
        let progress = self.header_processor.process(header.clone())?;

        let carries_proof = self.config.state_mode == StateMode::Digest;
        let mut utxo = self.utxo.lock().await;
        match utxo.apply_block(&header, &transactions, carries_proof) {
            Ok((new_state, _proof)) => {
                *utxo = new_state;
                self.header_processor.set_best_block(header.id);
            }
            Err(e) => {
                drop(utxo);
                self.header_processor.report_invalid(header.id)?;
                self.metrics.record_block_rejected();
                return Err(e);
            }
        }
        drop(utxo);

        for tx in &transactions {
            self.mempool.remove_async(tx.id());
        }

        self.metrics.record_block_applied(header.height, self.clock.now_ms() / 1000);
        self.metrics.mempool_size.store(self.mempool.len().await, std::sync::atomic::Ordering::Relaxed);

        if let Some(new_best) = progress.new_best_header {
            let _ = self.applied_blocks.send(new_best);
            self.miner.handle_new_block(new_best);
        }
        Ok(())
    }

    /// Validates a loose transaction against the current best UTXO state
    /// and, if valid, admits it to the mempool for the next mined block.
    pub async fn submit_transaction(&self, tx: crate::tx::Transaction) -> CoreResult<()> {
        self.metrics.txs_submitted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let utxo = self.utxo.lock().await.clone();
        let result = self.mempool.put(tx, |candidate| utxo.validate_tx(candidate).is_ok()).await;
        match &result {
            Ok(()) => {
                self.metrics.txs_accepted.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                self.metrics.mempool_size.store(self.mempool.len().await, std::sync::atomic::Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.txs_rejected.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            }
        }
        result
    }

    pub fn initiate_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub fn is_genesis_needed(&self) -> bool {
        self.header_processor.best_header_id().is_none()
    }
}
