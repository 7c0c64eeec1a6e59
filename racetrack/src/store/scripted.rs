//! Test store that misbehaves on command.

use std::collections::BTreeMap;

use async_trait::async_trait;
use racetrack_core::{EntityKey, SharedStore, StoreError, StoreResult, Value};

use super::{InMemoryStore, InMemoryTransaction};

/// [`InMemoryStore`] with scripted failures layered on top.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedStore {
    inner: InMemoryStore,
    /// `lock` on this key fails with `Unavailable`.
    refuse_lock: Option<EntityKey>,
    /// Every `replace` reports a lost race without writing.
    lose_every_cas: bool,
}

impl ScriptedStore {
    pub(crate) fn refusing_lock(key: EntityKey) -> Self {
        Self {
            refuse_lock: Some(key),
            ..Self::default()
        }
    }

    pub(crate) fn losing_every_cas() -> Self {
        Self {
            lose_every_cas: true,
            ..Self::default()
        }
    }

    pub(crate) async fn populate(&self, keys: u64, value: Value) {
        for key in EntityKey::space(keys) {
            self.inner.put(key, value).await.expect("put");
        }
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<EntityKey, Value> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl SharedStore for ScriptedStore {
    type Transaction = InMemoryTransaction;

    async fn get(&self, key: EntityKey) -> StoreResult<Option<Value>> {
        self.inner.get(key).await
    }

    async fn put(&self, key: EntityKey, value: Value) -> StoreResult<()> {
        self.inner.put(key, value).await
    }

    async fn replace(&self, key: EntityKey, expected: Value, new: Value) -> StoreResult<bool> {
        if self.lose_every_cas {
            return Ok(false);
        }
        self.inner.replace(key, expected, new).await
    }

    async fn lock(&self, key: EntityKey) -> StoreResult<()> {
        if self.refuse_lock == Some(key) {
            return Err(StoreError::Unavailable(format!("lock on {key} refused")));
        }
        self.inner.lock(key).await
    }

    async fn unlock(&self, key: EntityKey) -> StoreResult<()> {
        self.inner.unlock(key).await
    }

    async fn begin_transaction(&self) -> StoreResult<InMemoryTransaction> {
        self.inner.begin_transaction().await
    }
}
