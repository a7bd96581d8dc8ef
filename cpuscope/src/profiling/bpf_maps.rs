//! The three maps shared with the sampler, bundled with their byte order

use cpuscope_common::{PID_KEY_SIZE, STACK_COUNT_KEY_SIZE, STACK_ID_SIZE};

use super::reconciler::{self, ReconcileStats};
use super::stack_reader::StackReader;
use super::unwind_writer::UnwindTableWriter;
use crate::codec::{ByteOrder, CombinedStack};
use crate::domain::{Pid, ReconcileError, StackId, StackReadError, UnwindTableError};
use crate::maps::{BpfMap, MapHandle, MemoryMap};
use crate::unwind::UnwindTable;

pub struct BpfMaps<M = BpfMap> {
    pub stack_counts: M,
    pub stack_traces: M,
    pub unwind_tables: M,
    pub byte_order: ByteOrder,
}

impl<M: MapHandle> BpfMaps<M> {
    pub fn reader(&self) -> StackReader<'_, M> {
        StackReader::new(&self.stack_traces, &self.stack_counts, self.byte_order)
    }

    /// See [`StackReader::read_user_stack`]
    ///
    /// # Errors
    /// Propagates the reader's [`StackReadError`]
    pub fn read_user_stack(&self, id: StackId, stack: &mut CombinedStack) -> Result<(), StackReadError> {
        self.reader().read_user_stack(id, stack)
    }

    /// See [`StackReader::read_kernel_stack`]
    ///
    /// # Errors
    /// Propagates the reader's [`StackReadError`]
    pub fn read_kernel_stack(
        &self,
        id: StackId,
        stack: &mut CombinedStack,
    ) -> Result<(), StackReadError> {
        self.reader().read_kernel_stack(id, stack)
    }

    /// See [`StackReader::read_count`]
    ///
    /// # Errors
    /// Propagates the reader's [`StackReadError`]
    pub fn read_stack_count(&self, key: &[u8]) -> Result<u64, StackReadError> {
        self.reader().read_count(key)
    }

    /// See [`UnwindTableWriter::set_unwind_table`]
    ///
    /// # Errors
    /// Propagates the writer's [`UnwindTableError`]
    pub fn set_unwind_table(&mut self, pid: Pid, table: &UnwindTable) -> Result<(), UnwindTableError> {
        UnwindTableWriter::new(&mut self.unwind_tables, self.byte_order).set_unwind_table(pid, table)
    }

    /// Drain the stack traces and stack counts maps
    ///
    /// # Errors
    /// Propagates the first [`ReconcileError`]
    pub fn clean(&mut self) -> Result<ReconcileStats, ReconcileError> {
        reconciler::clean(&mut self.stack_traces, &mut self.stack_counts)
    }
}

impl BpfMaps<MemoryMap> {
    /// In-process maps with the kernel maps' key sizes, for dry runs and tests
    pub fn in_memory(byte_order: ByteOrder) -> Self {
        Self {
            stack_counts: MemoryMap::new(cpuscope_common::STACK_COUNTS_MAP, STACK_COUNT_KEY_SIZE),
            stack_traces: MemoryMap::new(cpuscope_common::STACK_TRACES_MAP, STACK_ID_SIZE),
            unwind_tables: MemoryMap::new(cpuscope_common::UNWIND_TABLES_MAP, PID_KEY_SIZE),
            byte_order,
        }
    }
}
