//! Unconfirmed transaction pool (C5, SPEC_FULL.md §4.5): FIFO admission
//! with a capacity cap, async completion handles for submitters, and
//! periodic time-based expiry.
//!
//! Grounded on the donor's `mempool/pool.rs` (admission/removal/size
//! shape, outpoint bookkeeping) but rebuilt around a single
//! `tokio::sync::Mutex`-guarded inner map instead of the donor's
//! `RwLock<HashMap>` plus a parallel spent-outpoint set, since admission
//! here is driven by `UtxoState::validate` rather than local outpoint
//! tracking, and callers need to `await` admission rather than poll.
//!
//! Waiter completion (`wait_for_all`'s `oneshot::Sender::send`) always
//! happens after the admission lock is dropped: the lock scope only
//! collects which waiters are now satisfied and clones their resolved
//! transaction lists, deferring the actual send to the caller.

use crate::error::{CoreError, CoreResult};
use crate::ids::ModifierId;
use crate::tx::Transaction;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{interval, Duration};

struct Waiter {
    remaining: std::collections::HashSet<ModifierId>,
    order: Vec<ModifierId>,
    sender: Option<oneshot::Sender<Vec<Transaction>>>,
}

struct Inner {
    by_id: HashMap<ModifierId, Transaction>,
    order: VecDeque<ModifierId>,
    waiters: Vec<Waiter>,
}

impl Inner {
    fn new() -> Self {
        Inner {
            by_id: HashMap::new(),
            order: VecDeque::new(),
            waiters: Vec::new(),
        }
    }

    fn admit(&mut self, tx: Transaction) {
        let id = tx.id();
        self.order.push_back(id);
        self.by_id.insert(id, tx);
    }

    /// Removes every waiter now fully satisfied by `admitted` and returns
    /// each one's sender paired with its resolved transaction list. Building
    /// the list still needs `by_id` and so must happen under the lock, but
    /// callers must send on the returned senders only after dropping the
    /// guard (SPEC_FULL.md §5): a waiter's receiver can otherwise wake and
    /// re-enter the mempool while this lock is still held.
    fn drain_ready_waiters(&mut self, admitted: ModifierId) -> Vec<(oneshot::Sender<Vec<Transaction>>, Vec<Transaction>)> {
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.waiters.len() {
            self.waiters[i].remaining.remove(&admitted);
            if self.waiters[i].remaining.is_empty() {
                let waiter = self.waiters.remove(i);
                let txs = waiter
                    .order
                    .iter()
                    .filter_map(|id| self.by_id.get(id).cloned())
                    .collect();
                if let Some(sender) = waiter.sender {
                    ready.push((sender, txs));
                }
            } else {
                i += 1;
            }
        }
        ready
    }
}

/// The unconfirmed transaction pool.
pub struct Mempool {
    inner: Mutex<Inner>,
    max_capacity: usize,
    max_age_secs: u64,
}

impl Mempool {
    pub fn new(max_capacity: usize, max_age_secs: u64) -> Arc<Self> {
        Arc::new(Mempool {
            inner: Mutex::new(Inner::new()),
            max_capacity,
            max_age_secs,
        })
    }

    /// Validates `tx` against `is_valid`, then admits it. Rejects
    /// duplicates and semantically invalid transactions; rejects the
    /// incoming transaction once the pool is at capacity, so the first
    /// admitted transactions are retained (SPEC_FULL.md §4.5: "admit the
    /// remainder until capacity, truncating tail on overflow").
    pub async fn put(&self, tx: Transaction, is_valid: impl FnOnce(&Transaction) -> bool) -> CoreResult<()> {
        if !is_valid(&tx) {
            return Err(CoreError::SemanticInvalid {
                id: tx.id(),
                message: "transaction failed admission validation".into(),
            });
        }
        self.put_without_check(tx).await
    }

    /// Admits `tx` without re-validating it — used when the caller has
    /// already validated the transaction (e.g. block reorg restoring
    /// previously-admitted transactions).
    pub async fn put_without_check(&self, tx: Transaction) -> CoreResult<()> {
        let id = tx.id();
        let ready = {
            let mut inner = self.inner.lock().await;
            if inner.by_id.contains_key(&id) {
                return Err(CoreError::SemanticInvalid {
                    id,
                    message: "transaction already present in mempool".into(),
                });
            }
            if inner.order.len() >= self.max_capacity {
                return Err(CoreError::capacity("mempool at capacity"));
            }
            inner.admit(tx);
            inner.drain_ready_waiters(id)
        };
        for (sender, txs) in ready {
            let _ = sender.send(txs);
        }
        Ok(())
    }

    /// Admits as many of `txs` as pass `is_valid` and aren't already
    /// present, in order, rejecting the remainder once the pool reaches
    /// capacity so the first admitted ones are retained. Unlike
    /// [`Mempool::put`], a transaction failing validation or already
    /// present is silently dropped rather than aborting the whole batch;
    /// failure is reported only if nothing in the batch was admitted.
    pub async fn put_many(&self, txs: Vec<Transaction>, is_valid: impl Fn(&Transaction) -> bool) -> CoreResult<usize> {
        let mut admitted = 0;
        for tx in txs {
            if !is_valid(&tx) {
                continue;
            }
            if self.put_without_check(tx).await.is_ok() {
                admitted += 1;
            }
        }
        if admitted == 0 {
            return Err(CoreError::capacity("no transaction in the batch was admitted"));
        }
        Ok(admitted)
    }

    pub async fn remove(&self, id: &ModifierId) -> Option<Transaction> {
        let mut inner = self.inner.lock().await;
        let removed = inner.by_id.remove(id);
        if removed.is_some() {
            inner.order.retain(|x| x != id);
        }
        removed
    }

    /// Fire-and-forget removal: spawns the removal rather than awaiting it,
    /// for callers (e.g. the miner, after publishing a block) that don't
    /// need to observe completion.
    pub fn remove_async(self: &Arc<Self>, id: ModifierId) {
        let mempool = self.clone();
        tokio::spawn(async move {
            mempool.remove(&id).await;
        });
    }

    /// Removes and returns up to `count` of the oldest admitted
    /// transactions.
    pub async fn take(&self, count: usize) -> Vec<Transaction> {
        let mut inner = self.inner.lock().await;
        let mut out = Vec::with_capacity(count.min(inner.order.len()));
        for _ in 0..count {
            let Some(id) = inner.order.pop_front() else { break };
            if let Some(tx) = inner.by_id.remove(&id) {
                out.push(tx);
            }
        }
        out
    }

    pub async fn take_all(&self) -> Vec<Transaction> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<_> = inner.order.drain(..).collect();
        ids.into_iter().filter_map(|id| inner.by_id.remove(&id)).collect()
    }

    /// Returns every currently-admitted transaction matching `predicate`,
    /// oldest first, without removing them.
    pub async fn filter(&self, predicate: impl Fn(&Transaction) -> bool) -> Vec<Transaction> {
        let inner = self.inner.lock().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .filter(|tx| predicate(tx))
            .cloned()
            .collect()
    }

    /// Returns a future that resolves once every transaction in `ids` has
    /// been admitted, in the order given. Already-admitted IDs are
    /// resolved immediately.
    pub async fn wait_for_all(&self, ids: Vec<ModifierId>) -> CoreResult<Vec<Transaction>> {
        let mut inner = self.inner.lock().await;
        let remaining: std::collections::HashSet<ModifierId> =
            ids.iter().filter(|id| !inner.by_id.contains_key(id)).copied().collect();

        if remaining.is_empty() {
            return Ok(ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect());
        }

        let (sender, receiver) = oneshot::channel();
        inner.waiters.push(Waiter {
            remaining,
            order: ids,
            sender: Some(sender),
        });
        drop(inner);

        receiver.await.map_err(|_| CoreError::storage("mempool waiter channel closed"))
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.order.len()
    }

    /// Spawns the periodic expiry task: every `cleanup_interval_secs`,
    /// drops every admitted transaction older than `max_age_secs`
    /// (measured against `now_ms`, in milliseconds).
    pub fn spawn_cleanup(self: &Arc<Self>, cleanup_interval_secs: u64, now_ms: impl Fn() -> u64 + Send + Sync + 'static) {
        let mempool = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));
            loop {
                ticker.tick().await;
                mempool.evict_expired(now_ms()).await;
            }
        });
    }

    async fn evict_expired(&self, now_ms: u64) {
        let max_age_ms = self.max_age_secs.saturating_mul(1000);
        let mut inner = self.inner.lock().await;
        let expired: Vec<ModifierId> = inner
            .order
            .iter()
            .filter(|id| {
                inner
                    .by_id
                    .get(id)
                    .map(|tx| now_ms.saturating_sub(tx.timestamp) > max_age_ms)
                    .unwrap_or(false)
            })
            .copied()
            .collect();
        for id in expired {
            inner.by_id.remove(&id);
            inner.order.retain(|x| *x != id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::{BoxType, Proposition, UtxoBox};
    use ed25519_dalek::{SigningKey, VerifyingKey};
    use rand::rngs::OsRng;

    fn coinbase_tx(nonce: u8, timestamp: u64) -> Transaction {
        let miner = SigningKey::generate(&mut OsRng);
        let pubkey = VerifyingKey::from(&miner).to_bytes();
        let b = UtxoBox::new(BoxType::Coinbase, Proposition::pubkey_hash(&pubkey), nonce as u32, 50, ModifierId([nonce; 32]), 0);
        Transaction {
            unlockers: vec![],
            boxes: vec![b],
            timestamp,
            sender_pubkey: [0; 32],
            signature: [0; 64],
        }
    }

    #[tokio::test]
    async fn put_then_take_returns_fifo_order() {
        let pool = Mempool::new(100, 86_400);
        let tx1 = coinbase_tx(1, 0);
        let tx2 = coinbase_tx(2, 0);
        pool.put_without_check(tx1.clone()).await.unwrap();
        pool.put_without_check(tx2.clone()).await.unwrap();
        let taken = pool.take(2).await;
        assert_eq!(taken, vec![tx1, tx2]);
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn duplicate_put_is_rejected() {
        let pool = Mempool::new(100, 86_400);
        let tx = coinbase_tx(1, 0);
        pool.put_without_check(tx.clone()).await.unwrap();
        assert!(pool.put_without_check(tx).await.is_err());
    }

    #[tokio::test]
    async fn overflow_rejects_the_incoming_tail() {
        let pool = Mempool::new(2, 86_400);
        pool.put_without_check(coinbase_tx(1, 0)).await.unwrap();
        pool.put_without_check(coinbase_tx(2, 0)).await.unwrap();
        assert!(pool.put_without_check(coinbase_tx(3, 0)).await.is_err());
        assert_eq!(pool.len().await, 2);
        let remaining = pool.take_all().await;
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|tx| tx.boxes[0].nonce != 3));
    }

    #[tokio::test]
    async fn wait_for_all_resolves_once_every_id_is_admitted() {
        let pool = Mempool::new(100, 86_400);
        let tx1 = coinbase_tx(1, 0);
        let tx2 = coinbase_tx(2, 0);
        let ids = vec![tx1.id(), tx2.id()];

        let pool2 = pool.clone();
        let waiting = tokio::spawn(async move { pool2.wait_for_all(ids).await.unwrap() });

        pool.put_without_check(tx1.clone()).await.unwrap();
        pool.put_without_check(tx2.clone()).await.unwrap();

        let resolved = waiting.await.unwrap();
        assert_eq!(resolved, vec![tx1, tx2]);
    }

    #[tokio::test]
    async fn remove_clears_the_entry() {
        let pool = Mempool::new(100, 86_400);
        let tx = coinbase_tx(1, 0);
        pool.put_without_check(tx.clone()).await.unwrap();
        let removed = pool.remove(&tx.id()).await;
        assert_eq!(removed, Some(tx));
        assert_eq!(pool.len().await, 0);
    }

    #[tokio::test]
    async fn put_many_admits_up_to_capacity_and_truncates_the_rest() {
        let pool = Mempool::new(3, 86_400);
        let txs: Vec<_> = (1..=5).map(|n| coinbase_tx(n, 0)).collect();
        let admitted = pool.put_many(txs.clone(), |_| true).await.unwrap();
        assert_eq!(admitted, 3);
        assert_eq!(pool.len().await, 3);
        for tx in &txs[..3] {
            assert!(pool.remove(&tx.id()).await.is_some());
        }
    }

    #[tokio::test]
    async fn put_many_fails_only_when_nothing_is_admitted() {
        let pool = Mempool::new(3, 86_400);
        let txs: Vec<_> = (1..=2).map(|n| coinbase_tx(n, 0)).collect();
        assert!(pool.put_many(txs, |_| false).await.is_err());
    }

    #[tokio::test]
    async fn waiter_resolves_once_batch_admits_its_ids() {
        let pool = Mempool::new(100, 86_400);
        let tx1 = coinbase_tx(1, 0);
        let tx2 = coinbase_tx(2, 0);
        let tx3 = coinbase_tx(3, 0);
        pool.put_without_check(tx1.clone()).await.unwrap();

        let pool2 = pool.clone();
        let ids = vec![tx1.id(), tx2.id()];
        let waiting = tokio::spawn(async move { pool2.wait_for_all(ids).await.unwrap() });

        pool.put_many(vec![tx2.clone(), tx3.clone()], |_| true).await.unwrap();

        let resolved = waiting.await.unwrap();
        assert_eq!(resolved, vec![tx1, tx2]);
    }

    #[tokio::test]
    async fn expired_transactions_are_evicted() {
        let pool = Mempool::new(100, 10);
        pool.put_without_check(coinbase_tx(1, 0)).await.unwrap();
        pool.evict_expired(20_000).await;
        assert_eq!(pool.len().await, 0);
    }
}
