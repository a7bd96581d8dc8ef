//! Structured error types for cpuscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every error here is a value handed back to the collection loop; none of
//! them is fatal to the host process.

use super::types::{Pid, StackId, StackSegment};
use thiserror::Error;

/// Byte layout violations in the unwind table or stack map codecs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{what} truncated: need {expected} bytes, got {actual}")]
    Truncated { what: &'static str, expected: usize, actual: usize },

    #[error("{what} is {len} bytes, not a multiple of {width}")]
    Misaligned { what: &'static str, len: usize, width: usize },

    #[error("unwind table has {rows} rows, maximum is {max}")]
    TableTooLarge { rows: usize, max: usize },

    #[error("CFA rule of row {row} cannot be encoded")]
    InvalidRule { row: usize },
}

/// Failures reported by a [`MapHandle`](crate::maps::MapHandle)
#[derive(Error, Debug)]
pub enum MapError {
    #[error("{map}: key is {actual} bytes, map expects {expected}")]
    KeySize { map: String, expected: usize, actual: usize },

    #[error("{map}: value is {actual} bytes, map holds at most {max}")]
    ValueTooLarge { map: String, max: usize, actual: usize },

    #[error("{map}: key not found")]
    KeyNotFound { map: String },

    #[error("{map}: {op} failed")]
    Bpf {
        map: String,
        op: &'static str,
        #[source]
        source: aya::maps::MapError,
    },

    #[error("{map}: {op} is not supported")]
    Unsupported { map: String, op: &'static str },

    #[error("{map}: {op} failed")]
    Syscall {
        map: String,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Per-entry failures while reading stacks and counts
///
/// All of these affect a single sample only. Callers count and skip them.
#[derive(Error, Debug)]
pub enum StackReadError {
    #[error("stack ID is 0, the sampler failed to unwind this stack")]
    UnwindFailed,

    #[error("{segment} {id} missing from stack trace map")]
    Missing {
        segment: StackSegment,
        id: StackId,
        #[source]
        source: Option<MapError>,
    },

    #[error("{segment} {id} is malformed")]
    Unrecoverable {
        segment: StackSegment,
        id: StackId,
        #[source]
        source: CodecError,
    },

    #[error("failed to read stack count")]
    CountLookup(#[source] MapError),

    #[error("stack count is malformed")]
    MalformedCount(#[source] CodecError),
}

impl StackReadError {
    /// True when the entry is simply absent (a race with the sampler)
    pub fn is_missing(&self) -> bool {
        matches!(self, StackReadError::Missing { .. })
    }

    /// True when the stored bytes could not be decoded
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, StackReadError::Unrecoverable { .. } | StackReadError::MalformedCount(_))
    }
}

/// Failures installing a process's unwind table
#[derive(Error, Debug)]
pub enum UnwindTableError {
    #[error("unwind table for {pid} has {rows} rows, maximum is {max}")]
    TableTooLarge { pid: Pid, rows: usize, max: usize },

    #[error("failed to encode unwind table for {pid}")]
    Encode {
        pid: Pid,
        #[source]
        source: CodecError,
    },

    #[error("failed to update unwind table for {pid}")]
    WriteFailed {
        pid: Pid,
        #[source]
        source: MapError,
    },
}

/// Failures draining the stack maps between cycles
///
/// After any of these, entries from the previous cycle may still be present.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("failed to delete key {key} from {map}")]
    ReconcileFailed {
        map: String,
        key: String,
        #[source]
        source: MapError,
    },

    #[error("failed to iterate {map}")]
    IterationFailed {
        map: String,
        #[source]
        source: MapError,
    },
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("failed to parse event records: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
