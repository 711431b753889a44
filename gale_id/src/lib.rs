//! Typed identifiers and the canonical map container for the galedb cluster
//! metadata catalog.
//!
//! Identifier counters are part of the replicated catalog state: a counter's
//! current value is the last id it handed out, and allocating is a plain
//! bump of that value, so replaying the command log reproduces the exact
//! same ids on every replica. [`SerdeVecMap`] is the container for every
//! map-valued state field; it encodes as a key-sorted sequence of pairs so
//! that snapshot bytes are a pure function of logical state.

use std::hash::Hash;
use std::ops::{Deref, DerefMut};

use hashbrown::HashMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A monotone identifier counter embedded in the catalog state.
pub trait IdCounter: Copy + Default {
    /// Bumps the counter and returns the freshly allocated id.
    fn alloc(&mut self) -> Self;

    /// The id the next [`alloc`](Self::alloc) will hand out, without
    /// committing it.
    fn peek_next(&self) -> Self;
}

macro_rules! catalog_ids {
    ($($name:ident),+ $(,)?) => {$(
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl IdCounter for $name {
            fn alloc(&mut self) -> Self {
                // one bump per catalog command; a u64 cannot wrap in any
                // cluster lifetime
                self.0 += 1;
                *self
            }

            fn peek_next(&self) -> Self {
                Self(self.0 + 1)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    )+};
}

catalog_ids! {
    NodeId,
    ConnId,
    ShardGroupId,
    ShardId,
    IndexGroupId,
    IndexId,
    EventOpId,
    StreamId,
    DownSampleId,
    SubscriptionId,
}

/// A hash map that encodes as a key-sorted vector of pairs.
///
/// Snapshot and log replay require a deterministic wire form, so map-valued
/// fields cannot hit the wire in iteration order: serialization collects the
/// entries, sorts them by key and writes them as a sequence of pairs, and
/// decoding rejects duplicate keys instead of silently keeping one of them.
/// The inner `HashMap` API is exposed through `Deref`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerdeVecMap<K: Eq + Hash, V>(HashMap<K, V>);

impl<K: Eq + Hash, V> SerdeVecMap<K, V> {
    pub fn new() -> Self {
        Self(HashMap::new())
    }
}

impl<K: Eq + Hash, V> Default for SerdeVecMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> Deref for SerdeVecMap<K, V> {
    type Target = HashMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<K: Eq + Hash, V> DerefMut for SerdeVecMap<K, V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for SerdeVecMap<K, V> {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<K, V> Serialize for SerdeVecMap<K, V>
where
    K: Eq + Hash + Ord + Serialize,
    V: Serialize,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(&K, &V)> = self.0.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
        entries.serialize(serializer)
    }
}

impl<'de, K, V> Deserialize<'de> for SerdeVecMap<K, V>
where
    K: Eq + Hash + Deserialize<'de>,
    V: Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = Vec::<(K, V)>::deserialize(deserializer)?;
        let mut map = HashMap::with_capacity(entries.len());
        for (key, value) in entries {
            if map.insert(key, value).is_some() {
                return Err(D::Error::custom("duplicate key in encoded map"));
            }
        }
        Ok(Self(map))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_allocate_monotonically() {
        let mut counter = ShardId::default();
        assert_eq!(counter.get(), 0);
        assert_eq!(counter.peek_next(), ShardId::new(1));
        assert_eq!(counter.alloc(), ShardId::new(1));
        assert_eq!(counter.alloc(), ShardId::new(2));
        // peeking never commits
        assert_eq!(counter.peek_next(), ShardId::new(3));
        assert_eq!(counter, ShardId::new(2));
    }

    #[test]
    fn ids_display_as_integers() {
        assert_eq!(NodeId::new(7).to_string(), "7");
        assert_eq!(IndexGroupId::default().to_string(), "0");
    }

    #[test]
    fn map_encoding_is_sorted_and_insertion_order_free() {
        let a: SerdeVecMap<String, u64> = [("y".to_string(), 2), ("x".to_string(), 1)]
            .into_iter()
            .collect();
        let encoded = serde_json::to_string(&a).unwrap();
        assert_eq!(encoded, r#"[["x",1],["y",2]]"#);

        let b: SerdeVecMap<String, u64> = [("x".to_string(), 1), ("y".to_string(), 2)]
            .into_iter()
            .collect();
        assert_eq!(serde_json::to_string(&b).unwrap(), encoded);

        let decoded: SerdeVecMap<String, u64> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn duplicate_keys_are_rejected_on_decode() {
        let err = serde_json::from_str::<SerdeVecMap<u64, u64>>("[[0,1],[0,2]]").unwrap_err();
        assert!(err.to_string().contains("duplicate key in encoded map"));
    }
}
