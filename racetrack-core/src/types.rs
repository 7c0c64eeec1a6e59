//! Keys and deltas.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value held by one slot of the shared store.
pub type Value = i64;

/// Identifier of one unit of shared mutable state.
///
/// Keys of a run form the dense range `EntityKey(0)..EntityKey(key_space)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityKey(pub u64);

impl EntityKey {
    /// Numeric index of this key inside the key space.
    pub fn index(self) -> u64 {
        self.0
    }

    /// Iterate over every key of a key space of the given size.
    pub fn space(size: u64) -> impl Iterator<Item = EntityKey> {
        (0..size).map(EntityKey)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key-{}", self.0)
    }
}

impl From<u64> for EntityKey {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A signed change applied to a single key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDelta {
    /// Target key.
    pub key: EntityKey,
    /// Amount added to the stored value.
    pub delta: Value,
}

impl KeyDelta {
    /// Create a new delta for `key`.
    pub fn new(key: EntityKey, delta: Value) -> Self {
        Self { key, delta }
    }
}
