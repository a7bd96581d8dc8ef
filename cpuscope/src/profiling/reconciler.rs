//! Draining the stack maps between collection cycles
//!
//! The sampler only ever inserts into `stack_traces` and `stack_counts`.
//! Once a cycle has read them, every entry is deleted here so the next cycle
//! cannot mistake old samples for new ones.
//!
//! Map iteration uses the last visited key as its cursor, and deleting the
//! cursor key restarts the walk (see [`MapHandle`]). Deletion therefore lags
//! one key behind: a key is deleted only once the walk has moved past it,
//! and the final key is deleted after the walk ends.

use log::debug;

use crate::codec::hex;
use crate::domain::ReconcileError;
use crate::maps::MapHandle;

/// Keys deleted by one reconciliation pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub stack_traces: usize,
    pub stack_counts: usize,
}

/// Delete every key in `map`, returning how many were deleted
///
/// Keys inserted concurrently may or may not be visited.
///
/// # Errors
/// Stops at the first failed delete ([`ReconcileError::ReconcileFailed`]) or
/// failed key lookup ([`ReconcileError::IterationFailed`]). Keys not yet
/// deleted at that point stay in the map.
pub fn drain_map<M: MapHandle>(map: &mut M) -> Result<usize, ReconcileError> {
    let name = map.name().to_string();
    let mut previous: Option<Vec<u8>> = None;
    let mut deleted = 0;

    loop {
        let next = map
            .next_key(previous.as_deref())
            .map_err(|source| ReconcileError::IterationFailed { map: name.clone(), source })?;

        // The cursor has moved past `previous`, so it is safe to delete now
        if let Some(key) = previous.take() {
            map.delete_key(&key).map_err(|source| ReconcileError::ReconcileFailed {
                map: name.clone(),
                key: hex(&key),
                source,
            })?;
            deleted += 1;
        }

        match next {
            Some(key) => previous = Some(key),
            None => break,
        }
    }

    debug!("Drained {deleted} entries from {name}");
    Ok(deleted)
}

/// Drain the stack traces map, then the stack counts map
///
/// # Errors
/// Returns the first [`ReconcileError`]; the counts map is left untouched
/// if draining stack traces fails.
pub fn clean<M: MapHandle>(
    stack_traces: &mut M,
    stack_counts: &mut M,
) -> Result<ReconcileStats, ReconcileError> {
    let stack_traces = drain_map(stack_traces)?;
    let stack_counts = drain_map(stack_counts)?;
    Ok(ReconcileStats { stack_traces, stack_counts })
}
