//! Kernel BPF maps, through aya's typed maps
//!
//! Each of the three shared maps is opened with its real key and value
//! types (`StackCountKey -> u64`, `u32 -> stack frames`, `u32 -> unwind
//! table`). aya reads and writes them in host layout; [`BpfMap`] converts
//! between that and the configured [`ByteOrder`] so the codec sees the same
//! bytes whichever map backs it.
//!
//! The drain deletes keys while walking them with an explicit cursor. aya's
//! key iterators borrow the map shared and keep their cursor private while
//! `remove` needs it exclusively, so [`MapHandle::next_key`] alone issues
//! `BPF_MAP_GET_NEXT_KEY` on the map's fd.

use aya::maps::{HashMap, IterableMap, Map, MapData, StackTraceMap};
use cpuscope_common::{
    StackCountKey, COUNT_WIDTH, PID_KEY_SIZE, STACK_COUNTS_MAP, STACK_COUNT_KEY_SIZE,
    STACK_ID_SIZE, STACK_SEGMENT_SIZE, STACK_TRACES_MAP, UNWIND_TABLES_MAP,
    UNWIND_TABLE_VALUE_SIZE,
};
#[cfg(test)]
use cpuscope_common::STACK_DEPTH;
use std::error::Error as _;
use std::io;

use super::MapHandle;
use crate::codec::{decode_stack_count_key, ByteOrder};
use crate::domain::MapError;

/// Value of the unwind tables map: row count header and the rows
type UnwindTableValue = [u8; UNWIND_TABLE_VALUE_SIZE];

enum TypedMap {
    StackCounts(HashMap<MapData, StackCountKey, u64>),
    StackTraces(StackTraceMap<MapData>),
    UnwindTables(HashMap<MapData, u32, UnwindTableValue>),
}

/// One of the sampler's maps, exposed as bytes in `order`
pub struct BpfMap {
    name: &'static str,
    order: ByteOrder,
    map: TypedMap,
}

impl BpfMap {
    /// Open the stack counts map
    ///
    /// # Errors
    /// Returns an error if `map` is not a hash map of `StackCountKey -> u64`
    pub fn stack_counts(map: Map, order: ByteOrder) -> Result<Self, aya::maps::MapError> {
        let map = TypedMap::StackCounts(HashMap::try_from(map)?);
        Ok(Self { name: STACK_COUNTS_MAP, order, map })
    }

    /// Open the stack traces map
    ///
    /// # Errors
    /// Returns an error if `map` is not a stack trace map
    pub fn stack_traces(map: Map, order: ByteOrder) -> Result<Self, aya::maps::MapError> {
        let map = TypedMap::StackTraces(StackTraceMap::try_from(map)?);
        Ok(Self { name: STACK_TRACES_MAP, order, map })
    }

    /// Open the unwind tables map
    ///
    /// # Errors
    /// Returns an error if `map` is not a hash map of `u32 -> unwind table`
    pub fn unwind_tables(map: Map, order: ByteOrder) -> Result<Self, aya::maps::MapError> {
        let map = TypedMap::UnwindTables(HashMap::try_from(map)?);
        Ok(Self { name: UNWIND_TABLES_MAP, order, map })
    }

    fn key_size(&self) -> usize {
        match self.map {
            TypedMap::StackCounts(_) => STACK_COUNT_KEY_SIZE,
            TypedMap::StackTraces(_) => STACK_ID_SIZE,
            TypedMap::UnwindTables(_) => PID_KEY_SIZE,
        }
    }

    fn data(&self) -> &MapData {
        match &self.map {
            TypedMap::StackCounts(map) => map.map(),
            TypedMap::StackTraces(map) => map.map(),
            TypedMap::UnwindTables(map) => map.map(),
        }
    }

    fn map_error(&self, op: &'static str, source: aya::maps::MapError) -> MapError {
        MapError::Bpf { map: self.name.to_string(), op, source }
    }

    fn unsupported(&self, op: &'static str) -> MapError {
        MapError::Unsupported { map: self.name.to_string(), op }
    }
}

fn key_size_error(map: &str, expected: usize, actual: usize) -> MapError {
    MapError::KeySize { map: map.to_string(), expected, actual }
}

fn count_key(map: &str, order: ByteOrder, key: &[u8]) -> Result<StackCountKey, MapError> {
    if key.len() != STACK_COUNT_KEY_SIZE {
        return Err(key_size_error(map, STACK_COUNT_KEY_SIZE, key.len()));
    }
    decode_stack_count_key(key, order).map_err(|_| key_size_error(map, STACK_COUNT_KEY_SIZE, key.len()))
}

/// Stack ID or PID key
fn id_key(map: &str, order: ByteOrder, key: &[u8]) -> Result<u32, MapError> {
    if key.len() != STACK_ID_SIZE {
        return Err(key_size_error(map, STACK_ID_SIZE, key.len()));
    }
    Ok(order.read_u32(key))
}

/// True when aya reports a missing key, directly or as `ENOENT`
fn is_not_found(err: &aya::maps::MapError) -> bool {
    if matches!(err, aya::maps::MapError::KeyNotFound) {
        return true;
    }
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io_error) = e.downcast_ref::<io::Error>() {
            return io_error.raw_os_error() == Some(libc::ENOENT);
        }
        source = e.source();
    }
    false
}

/// Stack frame addresses as a value of at least [`STACK_DEPTH`] frames
///
/// aya trims the zero frames after the last address; they are restored so
/// the value has the sampler's layout.
fn stack_bytes(ips: impl Iterator<Item = u64>, order: ByteOrder) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STACK_SEGMENT_SIZE);
    for ip in ips {
        order.put_u64(&mut buf, ip);
    }
    buf.resize(buf.len().max(STACK_SEGMENT_SIZE), 0);
    buf
}

/// Re-encode a key made of 32-bit fields from one byte order to another
fn reorder_key(key: &[u8], from: ByteOrder, to: ByteOrder) -> Vec<u8> {
    if from.resolve() == to.resolve() {
        return key.to_vec();
    }
    key.chunks_exact(4).flat_map(|field| field.iter().rev().copied()).collect()
}

impl MapHandle for BpfMap {
    fn name(&self) -> &str {
        self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MapError> {
        let value = match &self.map {
            TypedMap::StackCounts(map) => {
                map.get(&count_key(self.name, self.order, key)?, 0).map(|count| {
                    let mut buf = Vec::with_capacity(COUNT_WIDTH);
                    self.order.put_u64(&mut buf, count);
                    buf
                })
            }
            TypedMap::StackTraces(map) => map
                .get(&id_key(self.name, self.order, key)?, 0)
                .map(|trace| stack_bytes(trace.frames().iter().map(|frame| frame.ip), self.order)),
            // Userspace only ever writes unwind tables
            TypedMap::UnwindTables(_) => return Err(self.unsupported("lookup")),
        };

        match value {
            Ok(value) => Ok(Some(value)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(self.map_error("lookup", e)),
        }
    }

    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), MapError> {
        let (name, order) = (self.name, self.order);
        let too_large =
            |max: usize| MapError::ValueTooLarge { map: name.to_string(), max, actual: value.len() };

        let result = match &mut self.map {
            TypedMap::StackCounts(map) => {
                if value.len() > COUNT_WIDTH {
                    return Err(too_large(COUNT_WIDTH));
                }
                let mut count = value.to_vec();
                count.resize(COUNT_WIDTH, 0);
                map.insert(count_key(name, order, key)?, order.read_u64(&count), 0)
            }
            TypedMap::UnwindTables(map) => {
                if value.len() > UNWIND_TABLE_VALUE_SIZE {
                    return Err(too_large(UNWIND_TABLE_VALUE_SIZE));
                }
                let pid = id_key(name, order, key)?;
                // The kernel copies the full value size; the value lives on the heap
                let mut padded = vec![0u8; UNWIND_TABLE_VALUE_SIZE];
                padded[..value.len()].copy_from_slice(value);
                let padded: Box<UnwindTableValue> = padded
                    .into_boxed_slice()
                    .try_into()
                    .map_err(|_| too_large(UNWIND_TABLE_VALUE_SIZE))?;
                map.insert(pid, padded, 0)
            }
            TypedMap::StackTraces(_) => {
                return Err(MapError::Unsupported { map: name.to_string(), op: "update" });
            }
        };

        result.map_err(|e| self.map_error("update", e))
    }

    fn delete_key(&mut self, key: &[u8]) -> Result<(), MapError> {
        let (name, order) = (self.name, self.order);

        let result = match &mut self.map {
            TypedMap::StackCounts(map) => map.remove(&count_key(name, order, key)?),
            TypedMap::StackTraces(map) => map.remove(&id_key(name, order, key)?),
            TypedMap::UnwindTables(map) => map.remove(&id_key(name, order, key)?),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Err(MapError::KeyNotFound { map: name.to_string() }),
            Err(e) => Err(self.map_error("delete", e)),
        }
    }

    fn next_key(&self, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>, MapError> {
        let prev = match prev {
            Some(prev) if prev.len() != self.key_size() => {
                return Err(key_size_error(self.name, self.key_size(), prev.len()));
            }
            Some(prev) => Some(reorder_key(prev, self.order, ByteOrder::Native)),
            None => None,
        };

        let mut next = vec![0u8; self.key_size()];
        match sys::get_next_key(self.data(), prev.as_deref(), &mut next) {
            Ok(()) => Ok(Some(reorder_key(&next, ByteOrder::Native, self.order))),
            Err(e) if e.raw_os_error() == Some(libc::ENOENT) => Ok(None),
            Err(source) => {
                Err(MapError::Syscall { map: self.name.to_string(), op: "get next key", source })
            }
        }
    }
}

/// `BPF_MAP_GET_NEXT_KEY` with a caller-held cursor
mod sys {
    #![allow(unsafe_code)] // bpf(2) takes raw pointers to the key buffers

    use aya::maps::MapData;
    use std::io;
    use std::os::fd::{AsFd, AsRawFd};

    const BPF_MAP_GET_NEXT_KEY: libc::c_int = 4;

    /// Map element view of `union bpf_attr`
    #[repr(C)]
    #[derive(Default)]
    struct MapElemAttr {
        map_fd: u32,
        _pad: u32,
        key: u64,
        next_key: u64,
        flags: u64,
    }

    /// Write the key after `key` (the first key for `None`) into `next_key`
    ///
    /// `next_key` must be exactly the map's key size.
    #[allow(clippy::cast_sign_loss)]
    pub(super) fn get_next_key(map: &MapData, key: Option<&[u8]>, next_key: &mut [u8]) -> io::Result<()> {
        let mut attr = MapElemAttr {
            map_fd: map.fd().as_fd().as_raw_fd() as u32,
            // NULL asks for the first key
            key: key.map_or(0, |k| k.as_ptr() as u64),
            next_key: next_key.as_mut_ptr() as u64,
            ..Default::default()
        };

        #[allow(clippy::cast_possible_truncation)]
        let size = std::mem::size_of::<MapElemAttr>() as libc::c_uint;

        // SAFETY: attr is a valid bpf_attr prefix for element commands, and
        // both pointers refer to live buffers of the map's key size.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_bpf,
                BPF_MAP_GET_NEXT_KEY,
                std::ptr::from_mut(&mut attr).cast::<libc::c_void>(),
                size,
            )
        };

        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}
