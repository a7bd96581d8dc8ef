//! In-process map with kernel hash map iteration semantics
//!
//! Used by tests and dry runs. Keys are kept sorted so iteration order is
//! deterministic. Values are stored verbatim, so a short or malformed value
//! can be planted on purpose.

use std::collections::BTreeMap;
use std::ops::Bound;

use super::MapHandle;
use crate::domain::MapError;

#[derive(Debug, Clone)]
pub struct MemoryMap {
    name: String,
    key_size: usize,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryMap {
    pub fn new(name: impl Into<String>, key_size: usize) -> Self {
        Self { name: name.into(), key_size, entries: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.entries.contains_key(key)
    }

    fn check_key(&self, key: &[u8]) -> Result<(), MapError> {
        if key.len() == self.key_size {
            Ok(())
        } else {
            Err(MapError::KeySize {
                map: self.name.clone(),
                expected: self.key_size,
                actual: key.len(),
            })
        }
    }

    fn first_key(&self) -> Option<Vec<u8>> {
        self.entries.keys().next().cloned()
    }
}

impl MapHandle for MemoryMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MapError> {
        self.check_key(key)?;
        Ok(self.entries.get(key).cloned())
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), MapError> {
        self.check_key(key)?;
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete_key(&mut self, key: &[u8]) -> Result<(), MapError> {
        self.check_key(key)?;
        match self.entries.remove(key) {
            Some(_) => Ok(()),
            None => Err(MapError::KeyNotFound { map: self.name.clone() }),
        }
    }

    fn next_key(&self, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>, MapError> {
        let Some(prev) = prev else {
            return Ok(self.first_key());
        };
        self.check_key(prev)?;

        // Same as the kernel hash map: an unknown cursor restarts the walk
        if !self.entries.contains_key(prev) {
            return Ok(self.first_key());
        }

        Ok(self
            .entries
            .range::<[u8], _>((Bound::Excluded(prev), Bound::Unbounded))
            .next()
            .map(|(key, _)| key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_update_delete() {
        let mut map = MemoryMap::new("counts", 2);
        assert_eq!(map.get(&[1, 0]).unwrap(), None);

        map.update(&[1, 0], &[9]).unwrap();
        map.update(&[1, 0], &[7, 7]).unwrap();
        assert_eq!(map.get(&[1, 0]).unwrap(), Some(vec![7, 7]));

        map.delete_key(&[1, 0]).unwrap();
        assert!(map.is_empty());
        assert!(matches!(map.delete_key(&[1, 0]), Err(MapError::KeyNotFound { .. })));
    }

    #[test]
    fn test_rejects_wrong_key_size() {
        let mut map = MemoryMap::new("counts", 4);
        assert!(matches!(
            map.update(&[1], &[0]),
            Err(MapError::KeySize { expected: 4, actual: 1, .. })
        ));
    }

    #[test]
    fn test_deleted_cursor_restarts_walk() {
        let mut map = MemoryMap::new("m", 1);
        for k in [1u8, 2, 3] {
            map.update(&[k], &[]).unwrap();
        }

        assert_eq!(map.next_key(Some(&[2])).unwrap(), Some(vec![3]));
        map.delete_key(&[2]).unwrap();
        assert_eq!(map.next_key(Some(&[2])).unwrap(), Some(vec![1]));
        assert_eq!(map.next_key(Some(&[3])).unwrap(), None);
    }
}
