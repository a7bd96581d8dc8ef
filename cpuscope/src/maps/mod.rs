//! # Map Boundary
//!
//! Byte-level access to the key/value maps shared with the sampler. The
//! maps belong to the kernel; cpuscope only holds handles to them and is
//! never their only writer.
//!
//! - [`MapHandle`] - the operations the core needs, on owned byte buffers
//! - [`BpfMap`] - a kernel BPF map, via aya's typed maps
//! - [`MemoryMap`] - an in-process map honouring the same contract
//!
//! Raw pointers only ever appear inside [`BpfMap`]. The codec, reader,
//! writer and reconciler all work on `&[u8]` / `Vec<u8>`.

pub mod bpf;
pub mod memory;

pub use bpf::BpfMap;
pub use memory::MemoryMap;

use crate::domain::MapError;

/// Key/value map shared with the sampler
///
/// ## Iteration contract
///
/// Keys are visited with [`next_key`](MapHandle::next_key), which takes the
/// previously returned key as its cursor (`None` for the first key), exactly
/// like `BPF_MAP_GET_NEXT_KEY`. When the cursor key is no longer in the map,
/// the kernel silently restarts from the first key. So:
///
/// - deleting the key currently used as the cursor is **undefined**: the walk
///   restarts and may revisit or skip entries;
/// - deleting the key *before* the cursor is safe.
///
/// Anything that deletes while iterating must lag one key behind the
/// cursor (see [`drain_map`](crate::profiling::reconciler::drain_map)).
pub trait MapHandle {
    /// Map name, for logs and errors
    fn name(&self) -> &str;

    /// Look up `key`; `Ok(None)` if absent
    ///
    /// # Errors
    /// Returns an error if the key has the wrong size or the lookup fails
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MapError>;

    /// Insert or fully replace the value under `key`
    ///
    /// # Errors
    /// Returns an error if the key or value does not fit the map, or the
    /// map rejects the update (e.g. it is full)
    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), MapError>;

    /// Remove `key`
    ///
    /// # Errors
    /// Returns [`MapError::KeyNotFound`] if the key is absent, or another
    /// error if the delete fails
    fn delete_key(&mut self, key: &[u8]) -> Result<(), MapError>;

    /// Key following `prev` in iteration order, `Ok(None)` at the end
    ///
    /// See the iteration contract on [`MapHandle`].
    ///
    /// # Errors
    /// Returns an error if the cursor has the wrong size or the call fails
    fn next_key(&self, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>, MapError>;

    /// Read-only walk over all keys
    fn keys(&self) -> MapKeys<'_, Self>
    where
        Self: Sized,
    {
        MapKeys::new(self)
    }
}

/// Iterator over a map's keys, driven by [`MapHandle::next_key`]
///
/// Holds a shared borrow, so the map cannot be mutated mid-walk. Stops
/// after the first error.
pub struct MapKeys<'a, M> {
    map: &'a M,
    cursor: Option<Vec<u8>>,
    done: bool,
}

impl<'a, M: MapHandle> MapKeys<'a, M> {
    fn new(map: &'a M) -> Self {
        Self { map, cursor: None, done: false }
    }
}

impl<M: MapHandle> Iterator for MapKeys<'_, M> {
    type Item = Result<Vec<u8>, MapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.map.next_key(self.cursor.as_deref()) {
            Ok(Some(key)) => {
                self.cursor = Some(key.clone());
                Some(Ok(key))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_visits_every_key_once() {
        let mut map = MemoryMap::new("test", 4);
        for k in [3u32, 1, 2] {
            map.update(&k.to_le_bytes(), &[0]).unwrap();
        }

        let keys: Vec<Vec<u8>> = map.keys().collect::<Result<_, _>>().unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], 1u32.to_le_bytes());
        assert_eq!(keys[2], 3u32.to_le_bytes());
    }

    #[test]
    fn test_keys_on_empty_map() {
        let map = MemoryMap::new("test", 4);
        assert_eq!(map.keys().count(), 0);
    }

    #[test]
    fn test_keys_stops_after_error() {
        let map = MemoryMap::new("test", 4);
        let mut keys = MapKeys { map: &map, cursor: Some(vec![1, 2]), done: false };
        assert!(matches!(keys.next(), Some(Err(MapError::KeySize { .. }))));
        assert!(keys.next().is_none());
    }
}
