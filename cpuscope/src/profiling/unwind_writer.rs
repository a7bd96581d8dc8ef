//! Unwind table installation
//!
//! A process's table is always replaced as a whole with a single map
//! update, so the sampler sees either the old or the new table, never a mix.
//! Atomicity per key comes from the map itself.

use anyhow::{Context, Result};
use cpuscope_common::MAX_UNWIND_TABLE_SIZE;
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::codec::{encode_pid, encode_unwind_table, ByteOrder};
use crate::domain::{CodecError, Pid, UnwindTableError};
use crate::maps::MapHandle;
use crate::unwind::UnwindTable;

/// Writes per-process unwind tables into the unwind tables map
pub struct UnwindTableWriter<'a, M> {
    unwind_tables: &'a mut M,
    order: ByteOrder,
}

impl<'a, M: MapHandle> UnwindTableWriter<'a, M> {
    pub fn new(unwind_tables: &'a mut M, order: ByteOrder) -> Self {
        Self { unwind_tables, order }
    }

    /// Install `table` for `pid`, superseding any previous table
    ///
    /// # Errors
    /// - [`UnwindTableError::TableTooLarge`] before touching the map
    /// - [`UnwindTableError::Encode`] if a row cannot be encoded
    /// - [`UnwindTableError::WriteFailed`] if the map update fails
    pub fn set_unwind_table(&mut self, pid: Pid, table: &UnwindTable) -> Result<(), UnwindTableError> {
        if table.len() >= MAX_UNWIND_TABLE_SIZE {
            return Err(UnwindTableError::TableTooLarge {
                pid,
                rows: table.len(),
                max: MAX_UNWIND_TABLE_SIZE,
            });
        }

        let value = encode_unwind_table(table, self.order).map_err(|source| match source {
            CodecError::TableTooLarge { rows, max } => {
                UnwindTableError::TableTooLarge { pid, rows, max }
            }
            source => UnwindTableError::Encode { pid, source },
        })?;

        self.unwind_tables
            .update(&encode_pid(pid, self.order), &value)
            .map_err(|source| UnwindTableError::WriteFailed { pid, source })?;

        log_installed(pid, table);
        Ok(())
    }
}

fn log_installed(pid: Pid, table: &UnwindTable) {
    debug!("Installed unwind table for {pid}: {} rows", table.len());
    if let (Some(first), Some(last)) = (table.rows().first(), table.rows().last()) {
        debug!("  first row: loc {:#x}, cfa {:?}, $rbp {}", first.location, first.cfa, first.frame_pointer_offset);
        debug!("  last row:  loc {:#x}, cfa {:?}, $rbp {}", last.location, last.cfa, last.frame_pointer_offset);
    }
}

/// Load an unwind table exported as JSON by an unwind-info analyzer
///
/// # Errors
/// Returns an error if the file cannot be opened or parsed
pub fn load_unwind_table(path: &Path) -> Result<UnwindTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open unwind table {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse unwind table {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_unwind_table;
    use crate::domain::MapError;
    use crate::maps::MemoryMap;
    use crate::unwind::{CfaRule, Row};
    use cpuscope_common::PID_KEY_SIZE;
    use std::io::Write;

    const ORDER: ByteOrder = ByteOrder::Little;

    fn row(location: u64) -> Row {
        Row::new(location, CfaRule::ByRegisterOffset { register: 7, offset: 8 }, 0)
    }

    #[test]
    fn test_replaces_previous_table() {
        let mut map = MemoryMap::new("unwind_tables", PID_KEY_SIZE);
        let mut writer = UnwindTableWriter::new(&mut map, ORDER);

        writer.set_unwind_table(Pid(42), &UnwindTable::new(vec![row(0x10), row(0x20), row(0x30)])).unwrap();
        writer.set_unwind_table(Pid(42), &UnwindTable::new(vec![row(0x40)])).unwrap();

        let stored = map.get(&encode_pid(Pid(42), ORDER)).unwrap().unwrap();
        let table = decode_unwind_table(&stored, ORDER).unwrap();
        assert_eq!(table.rows(), &[row(0x40)]);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_oversized_table_never_reaches_map() {
        let mut map = MemoryMap::new("unwind_tables", PID_KEY_SIZE);
        let table = UnwindTable::new(vec![row(0x10); MAX_UNWIND_TABLE_SIZE]);

        let err = UnwindTableWriter::new(&mut map, ORDER).set_unwind_table(Pid(7), &table).unwrap_err();
        assert!(matches!(err, UnwindTableError::TableTooLarge { pid: Pid(7), .. }));
        assert!(map.is_empty());
    }

    #[test]
    fn test_map_failure_is_write_failed() {
        // Wrong key size makes every update fail
        let mut map = MemoryMap::new("unwind_tables", 8);
        let err = UnwindTableWriter::new(&mut map, ORDER)
            .set_unwind_table(Pid(7), &UnwindTable::new(vec![row(0x10)]))
            .unwrap_err();
        assert!(matches!(
            err,
            UnwindTableError::WriteFailed { pid: Pid(7), source: MapError::KeySize { .. } }
        ));
    }

    #[test]
    fn test_load_unwind_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"location": 32, "cfa": {{"rule": "by_register_offset", "register": 7, "offset": 8}}, "frame_pointer_offset": 0}},
                {{"location": 16, "cfa": {{"rule": "by_register_offset", "register": 7, "offset": 8}}, "frame_pointer_offset": 0}}]"#
        )
        .unwrap();

        let table = load_unwind_table(file.path()).unwrap();
        assert_eq!(table.rows(), &[row(0x10), row(0x20)]);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_unwind_table(Path::new("/nonexistent/table.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to open unwind table"));
    }
}
