//! # Shared Constants and Layouts (eBPF ↔ Userspace)
//!
//! Defines the constants and `#[repr(C)]` types that must agree between the
//! kernel-side CPU sampler and userspace. The sampler is compiled separately,
//! so nothing here can be checked at runtime: every value below is a
//! deployment-time contract with the sampler object that gets loaded.
//!
//! ## Maps
//!
//! - [`STACK_TRACES_MAP`] - Stack ID → `[u64; STACK_DEPTH]` instruction pointers
//! - [`STACK_COUNTS_MAP`] - [`StackCountKey`] → `u64` sample count
//! - [`UNWIND_TABLES_MAP`] - PID → unwind table (see [`UNWIND_ROW_SIZE`])

#![no_std]

// ============================================================================
// Map Names
// ============================================================================

/// Sample counts, keyed by [`StackCountKey`]
pub const STACK_COUNTS_MAP: &str = "stack_counts";

/// Stack traces, keyed by stack ID
pub const STACK_TRACES_MAP: &str = "stack_traces";

/// Per-process unwind tables, keyed by PID
pub const UNWIND_TABLES_MAP: &str = "unwind_tables";

// ============================================================================
// Stack Layout
// ============================================================================

/// Maximum number of frames captured per stack segment (user or kernel)
///
/// Must match the sampler's `MAX_STACK_DEPTH`: a stack trace map value is
/// exactly `STACK_DEPTH` instruction pointers.
pub const STACK_DEPTH: usize = 127;

/// Width of one instruction pointer in a stack trace map value
pub const FRAME_WIDTH: usize = 8;

/// Byte size of one stack trace map value
pub const STACK_SEGMENT_SIZE: usize = STACK_DEPTH * FRAME_WIDTH;

/// Width of a sample counter in the stack counts map
pub const COUNT_WIDTH: usize = 8;

// ============================================================================
// Unwind Table Layout
// ============================================================================

/// Maximum number of rows in one process's unwind table
///
/// **Deployment contract**: must equal `MAX_UNWIND_TABLE_SIZE` in the
/// sampler. Tables with this many rows or more are rejected before they
/// reach the map.
pub const MAX_UNWIND_TABLE_SIZE: usize = 130 * 1000;

/// Byte size of one encoded unwind row
///
/// `u64 location`, `u64 cfa_register`, `i64 cfa_offset`, `i64 rbp_offset`
pub const UNWIND_ROW_SIZE: usize = 32;

/// Byte size of the `u64` row count that precedes the rows
pub const UNWIND_HEADER_SIZE: usize = 8;

/// Byte size of an unwind table map value (header plus a full row array)
pub const UNWIND_TABLE_VALUE_SIZE: usize =
    UNWIND_HEADER_SIZE + MAX_UNWIND_TABLE_SIZE * UNWIND_ROW_SIZE;

/// Register slot written for a CFA rule given by a DWARF expression
///
/// Expressions are not encoded yet. The sampler recognises this value
/// together with [`CFA_EXPRESSION_OFFSET`] and special-cases the row.
pub const CFA_EXPRESSION_REGISTER: u64 = 0xBEEF;

/// Offset slot written for a CFA rule given by a DWARF expression
pub const CFA_EXPRESSION_OFFSET: i64 = 0x00BA_DFAD;

// ============================================================================
// Shared Data Structures
// ============================================================================

/// Key of the stack counts map
///
/// Written by the sampler for every sample. Stack IDs of `0` mean the
/// sampler tried to unwind that segment and failed.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StackCountKey {
    /// Process ID (TGID in Linux terms)
    pub pid: i32,

    /// Key into [`STACK_TRACES_MAP`] for the user segment
    pub user_stack_id: i32,

    /// Key into [`STACK_TRACES_MAP`] for the kernel segment
    pub kernel_stack_id: i32,
}

/// Byte size of [`StackCountKey`]
pub const STACK_COUNT_KEY_SIZE: usize = core::mem::size_of::<StackCountKey>();

/// Byte size of a stack ID key
pub const STACK_ID_SIZE: usize = core::mem::size_of::<i32>();

/// Byte size of a PID key
pub const PID_KEY_SIZE: usize = core::mem::size_of::<u32>();

#[cfg(feature = "user")]
use aya::Pod;

// Key type of the typed stack counts map
#[cfg(feature = "user")]
#[allow(unsafe_code)]
unsafe impl Pod for StackCountKey {}
