//! In-memory shared store.
//!
//! ## Design
//!
//! - `data`: every key with its value and a version bumped on each write
//! - `locks`: one single-permit semaphore per key; a held lock is a forgotten
//!   permit, so `lock` and `unlock` can be issued as separate calls
//! - transactions are optimistic: they remember the version of every key they
//!   read and buffer their writes; commit validates the read versions and
//!   applies the writes under the data mutex, or fails with a conflict
//!
//! No std mutex is held across an `.await`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, MutexGuard};
use racetrack_core::{EntityKey, SharedStore, StoreError, StoreResult, StoreTransaction, Value};
use tokio::sync::Semaphore;

use super::faults::{Fault, FaultCounts, FaultDice, StoreFaults};

#[derive(Debug, Clone, Copy)]
struct Versioned {
    value: Value,
    version: u64,
}

#[derive(Debug)]
struct Inner {
    data: Mutex<BTreeMap<EntityKey, Versioned>>,
    locks: Mutex<HashMap<EntityKey, Arc<Semaphore>>>,
    faults: FaultDice,
}

impl Inner {
    fn data(&self) -> MutexGuard<'_, BTreeMap<EntityKey, Versioned>> {
        self.data.lock()
    }

    fn check_fatal(&self, op: &str) -> StoreResult<()> {
        if self.faults.fires(Fault::Fatal) {
            return Err(StoreError::Unavailable(format!("injected failure during {op}")));
        }
        Ok(())
    }
}

/// Single-process [`SharedStore`] with optional fault injection.
///
/// Cloning is cheap and clones share the same data.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Create an empty store without faults.
    pub fn new() -> Self {
        Self::with_faults(StoreFaults::none(), 0)
    }

    /// Create an empty store injecting `faults`, rolled from `seed`.
    pub fn with_faults(faults: StoreFaults, seed: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(BTreeMap::new()),
                locks: Mutex::new(HashMap::new()),
                faults: FaultDice::new(faults, seed),
            }),
        }
    }

    /// Copy of every stored value, in key order.
    pub fn snapshot(&self) -> BTreeMap<EntityKey, Value> {
        self.inner
            .data()
            .iter()
            .map(|(k, v)| (*k, v.value))
            .collect()
    }

    /// Faults injected so far.
    pub fn fault_counts(&self) -> FaultCounts {
        self.inner.faults.counts()
    }

    fn semaphore(&self, key: EntityKey) -> Arc<Semaphore> {
        self.inner
            .locks
            .lock()
            .entry(key)
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    type Transaction = InMemoryTransaction;

    async fn get(&self, key: EntityKey) -> StoreResult<Option<Value>> {
        Ok(self.inner.data().get(&key).map(|v| v.value))
    }

    async fn put(&self, key: EntityKey, value: Value) -> StoreResult<()> {
        let mut data = self.inner.data();
        let version = data.get(&key).map_or(0, |v| v.version) + 1;
        data.insert(key, Versioned { value, version });
        Ok(())
    }

    async fn replace(&self, key: EntityKey, expected: Value, new: Value) -> StoreResult<bool> {
        self.inner.check_fatal("replace")?;
        let mut data = self.inner.data();
        match data.get_mut(&key) {
            Some(slot) if slot.value == expected => {
                slot.value = new;
                slot.version += 1;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::MissingKey(key)),
        }
    }

    async fn lock(&self, key: EntityKey) -> StoreResult<()> {
        self.inner.check_fatal("lock")?;
        let semaphore = self.semaphore(key);
        let permit = semaphore
            .acquire()
            .await
            .map_err(|_| StoreError::Unavailable(format!("lock table for {key} closed")))?;
        // Released by `unlock`, possibly from another task.
        permit.forget();
        Ok(())
    }

    async fn unlock(&self, key: EntityKey) -> StoreResult<()> {
        let locks = self.inner.locks.lock();
        match locks.get(&key) {
            Some(semaphore) if semaphore.available_permits() == 0 => {
                semaphore.add_permits(1);
                Ok(())
            }
            _ => Err(StoreError::NotLocked(key)),
        }
    }

    async fn begin_transaction(&self) -> StoreResult<InMemoryTransaction> {
        self.inner.check_fatal("begin_transaction")?;
        Ok(InMemoryTransaction {
            inner: self.inner.clone(),
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
            state: TxState::Open,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Open,
    /// Commit failed; only rollback is allowed.
    Failed,
    /// Commit reported failure but the writes were applied.
    Ambiguous,
    Committed,
    RolledBack,
}

/// Optimistic transaction over an [`InMemoryStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    /// Version observed at first read, 0 for an absent key.
    reads: BTreeMap<EntityKey, u64>,
    writes: BTreeMap<EntityKey, Value>,
    state: TxState,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> StoreResult<()> {
        match self.state {
            TxState::Open => Ok(()),
            _ => Err(StoreError::TransactionClosed),
        }
    }

    fn apply_writes(&self, data: &mut BTreeMap<EntityKey, Versioned>) {
        for (key, value) in &self.writes {
            let version = data.get(key).map_or(0, |v| v.version) + 1;
            data.insert(
                *key,
                Versioned {
                    value: *value,
                    version,
                },
            );
        }
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn get(&mut self, key: EntityKey) -> StoreResult<Option<Value>> {
        self.ensure_open()?;
        if let Some(value) = self.writes.get(&key) {
            return Ok(Some(*value));
        }
        let slot = self.inner.data().get(&key).copied();
        self.reads
            .entry(key)
            .or_insert_with(|| slot.map_or(0, |v| v.version));
        Ok(slot.map(|v| v.value))
    }

    async fn put(&mut self, key: EntityKey, value: Value) -> StoreResult<()> {
        self.ensure_open()?;
        self.writes.insert(key, value);
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        self.ensure_open()?;
        self.inner.check_fatal("commit")?;

        let mut data = self.inner.data();
        let stale = self
            .reads
            .iter()
            .find(|(key, version)| data.get(key).map_or(0, |v| v.version) != **version)
            .map(|(key, _)| *key);
        if let Some(key) = stale {
            self.state = TxState::Failed;
            return Err(StoreError::Conflict(format!("{key} changed since it was read")));
        }
        if self.inner.faults.fires(Fault::CommitConflict) {
            self.state = TxState::Failed;
            return Err(StoreError::Conflict("injected commit conflict".into()));
        }

        self.apply_writes(&mut data);
        if self.inner.faults.fires(Fault::AmbiguousCommit) {
            self.state = TxState::Ambiguous;
            return Err(StoreError::Conflict("commit outcome unknown".into()));
        }
        self.state = TxState::Committed;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        match self.state {
            TxState::Open | TxState::Failed => {}
            TxState::Ambiguous => {
                return Err(StoreError::Unavailable(
                    "cannot roll back writes that were already applied".into(),
                ));
            }
            TxState::Committed | TxState::RolledBack => return Err(StoreError::TransactionClosed),
        }
        if self.inner.faults.fires(Fault::RollbackFailure) {
            return Err(StoreError::Unavailable("injected rollback failure".into()));
        }
        self.writes.clear();
        self.state = TxState::RolledBack;
        Ok(())
    }
}
