//! # Collection Cycle
//!
//! One cycle reads every sample the sampler has recorded since the last
//! cycle, then drains the stack maps so the next cycle starts empty.
//!
//! ```text
//! stack_counts keys ──▶ decode key ──▶ read count ──▶ read user/kernel stacks
//!                                                        │
//!                                                        ▼
//!                                  aggregate by (pid, stack) ──▶ CycleReport
//!                                                        │
//!                                                        ▼
//!                                              drain stack maps
//! ```
//!
//! Per-sample failures are counted in [`CycleStats`] and never abort the
//! cycle. A failed drain is reported on the [`CycleReport`]; the samples
//! already read are still returned and the next cycle retries the drain.

use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use super::bpf_maps::BpfMaps;
use crate::codec::{decode_stack_count_key, ByteOrder, CombinedStack};
use crate::domain::{Pid, StackId, StackReadError};
use crate::maps::{BpfMap, MapHandle};

/// Timing and layout of the collection loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Time between two cycles
    pub interval: Duration,
    /// A cycle running longer than this is abandoned
    pub cycle_timeout: Duration,
    pub byte_order: ByteOrder,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            cycle_timeout: Duration::from_secs(5),
            byte_order: ByteOrder::Native,
        }
    }
}

/// Outcome counters for one stack segment
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentStats {
    pub ok: usize,
    pub unwind_failed: usize,
    pub missing: usize,
    pub unrecoverable: usize,
}

impl SegmentStats {
    fn record(&mut self, result: &Result<(), StackReadError>) {
        match result {
            Ok(()) => self.ok += 1,
            Err(StackReadError::UnwindFailed) => self.unwind_failed += 1,
            Err(e) if e.is_missing() => self.missing += 1,
            Err(_) => self.unrecoverable += 1,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleStats {
    /// Keys visited in the stack counts map
    pub keys_seen: usize,
    /// Samples kept (before aggregation)
    pub samples: usize,
    /// Keys that could not be decoded
    pub bad_keys: usize,
    /// Counts that could not be read
    pub count_errors: usize,
    pub user: SegmentStats,
    pub kernel: SegmentStats,
    pub deleted_stacks: usize,
    pub deleted_counts: usize,
}

/// Aggregated samples of one process and stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawSample {
    pub pid: Pid,
    pub stack: CombinedStack,
    pub count: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub samples: Vec<RawSample>,
    pub stats: CycleStats,
    /// True when draining the stack maps failed; stale entries may remain
    pub reconcile_failed: bool,
}

/// Runs collection cycles over the sampler's maps
pub struct Collector<M = BpfMap> {
    maps: BpfMaps<M>,
}

impl<M: MapHandle> Collector<M> {
    pub fn new(maps: BpfMaps<M>) -> Self {
        Self { maps }
    }

    pub fn maps(&self) -> &BpfMaps<M> {
        &self.maps
    }

    /// Read every recorded sample without modifying the maps
    ///
    /// Samples are aggregated by `(pid, stack)` and sorted by PID, then by
    /// descending count.
    pub fn read_samples(&self) -> (Vec<RawSample>, CycleStats) {
        let reader = self.maps.reader();
        let order = self.maps.byte_order;
        let mut stats = CycleStats::default();
        let mut aggregated: HashMap<(Pid, CombinedStack), u64> = HashMap::new();

        for key in self.maps.stack_counts.keys() {
            let key = match key {
                Ok(key) => key,
                Err(e) => {
                    warn!("Stopped reading {}: {e}", self.maps.stack_counts.name());
                    break;
                }
            };
            stats.keys_seen += 1;

            let count_key = match decode_stack_count_key(&key, order) {
                Ok(k) => k,
                Err(e) => {
                    debug!("Skipping malformed stack count key: {e}");
                    stats.bad_keys += 1;
                    continue;
                }
            };

            let count = match reader.read_count(&key) {
                Ok(count) => count,
                Err(e) => {
                    debug!("Skipping sample of PID {}: {e}", count_key.pid);
                    stats.count_errors += 1;
                    continue;
                }
            };

            let mut stack = CombinedStack::new();
            let user = reader.read_user_stack(StackId(count_key.user_stack_id), &mut stack);
            let kernel = reader.read_kernel_stack(StackId(count_key.kernel_stack_id), &mut stack);
            stats.user.record(&user);
            stats.kernel.record(&kernel);

            if user.is_err() && kernel.is_err() {
                continue;
            }

            stats.samples += 1;
            *aggregated.entry((Pid::from(count_key.pid), stack)).or_default() += count;
        }

        let mut samples: Vec<RawSample> = aggregated
            .into_iter()
            .map(|((pid, stack), count)| RawSample { pid, stack, count })
            .collect();
        samples.sort_by(|a, b| a.pid.cmp(&b.pid).then(b.count.cmp(&a.count)));

        (samples, stats)
    }

    /// Read all samples, then drain the stack maps
    pub fn collect_cycle(&mut self) -> CycleReport {
        let (samples, mut stats) = self.read_samples();

        let reconcile_failed = match self.maps.clean() {
            Ok(deleted) => {
                stats.deleted_stacks = deleted.stack_traces;
                stats.deleted_counts = deleted.stack_counts;
                false
            }
            Err(e) => {
                warn!("Failed to drain stack maps, stale samples may be read again: {e}");
                true
            }
        };

        debug!(
            "Cycle: {} keys, {} samples ({} unique), user ok {}, kernel ok {}",
            stats.keys_seen,
            stats.samples,
            samples.len(),
            stats.user.ok,
            stats.kernel.ok
        );

        CycleReport { samples, stats, reconcile_failed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_stack_count_key, encode_stack_id};
    use crate::domain::MapError;
    use crate::maps::MemoryMap;
    use cpuscope_common::{StackCountKey, STACK_DEPTH};
    use std::cell::Cell;
    use std::rc::Rc;

    const ORDER: ByteOrder = ByteOrder::Little;

    fn stack_value(frames: &[u64]) -> Vec<u8> {
        let mut value = Vec::new();
        for i in 0..STACK_DEPTH {
            ORDER.put_u64(&mut value, frames.get(i).copied().unwrap_or(0));
        }
        value
    }

    fn put_stack(maps: &mut BpfMaps<MemoryMap>, id: i32, frames: &[u64]) {
        maps.stack_traces.update(&encode_stack_id(StackId(id), ORDER), &stack_value(frames)).unwrap();
    }

    fn put_count(maps: &mut BpfMaps<MemoryMap>, pid: i32, user: i32, kernel: i32, count: u64) {
        let key = StackCountKey { pid, user_stack_id: user, kernel_stack_id: kernel };
        maps.stack_counts.update(&encode_stack_count_key(&key, ORDER), &count.to_le_bytes()).unwrap();
    }

    #[test]
    fn test_cycle_aggregates_and_drains() {
        let mut maps = BpfMaps::in_memory(ORDER);
        put_stack(&mut maps, 1, &[0xA, 0xB]);
        put_stack(&mut maps, 2, &[0xA, 0xB]);
        put_stack(&mut maps, 3, &[0xFFFF_0000]);
        // Two stack IDs with identical frames fold into one sample
        put_count(&mut maps, 100, 1, 0, 3);
        put_count(&mut maps, 100, 2, 0, 4);
        put_count(&mut maps, 100, 1, 3, 1);

        let mut collector = Collector::new(maps);
        let report = collector.collect_cycle();

        assert!(!report.reconcile_failed);
        assert_eq!(report.samples.len(), 2);
        assert_eq!(report.samples[0].count, 7);
        assert_eq!(report.samples[0].pid, Pid(100));
        assert_eq!(report.samples[1].stack.kernel()[0], 0xFFFF_0000);

        assert_eq!(report.stats.keys_seen, 3);
        assert_eq!(report.stats.samples, 3);
        assert_eq!(report.stats.user.ok, 3);
        assert_eq!(report.stats.kernel.ok, 1);
        assert_eq!(report.stats.kernel.unwind_failed, 2);
        assert_eq!(report.stats.deleted_stacks, 3);
        assert_eq!(report.stats.deleted_counts, 3);
        assert!(collector.maps().stack_counts.is_empty());
        assert!(collector.maps().stack_traces.is_empty());
    }

    #[test]
    fn test_sample_dropped_only_when_both_segments_fail() {
        let mut maps = BpfMaps::in_memory(ORDER);
        put_stack(&mut maps, 5, &[0x42]);
        maps.stack_traces.update(&encode_stack_id(StackId(6), ORDER), &[0u8; 4]).unwrap();
        put_count(&mut maps, 1, 0, 0, 1); // both unwind failures
        put_count(&mut maps, 2, 9, 6, 1); // missing user, corrupt kernel
        put_count(&mut maps, 3, 9, 5, 2); // missing user, good kernel

        let (samples, stats) = Collector::new(maps).read_samples();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].pid, Pid(3));
        assert!(samples[0].stack.user().iter().all(|&f| f == 0));
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.user, SegmentStats { ok: 0, unwind_failed: 1, missing: 2, unrecoverable: 0 });
        assert_eq!(stats.kernel, SegmentStats { ok: 1, unwind_failed: 1, missing: 0, unrecoverable: 1 });
    }

    #[test]
    fn test_bad_count_is_skipped() {
        let mut maps = BpfMaps::in_memory(ORDER);
        put_stack(&mut maps, 1, &[0x1]);
        let key = StackCountKey { pid: 4, user_stack_id: 1, kernel_stack_id: 0 };
        maps.stack_counts.update(&encode_stack_count_key(&key, ORDER), &[7]).unwrap();

        let (samples, stats) = Collector::new(maps).read_samples();
        assert!(samples.is_empty());
        assert_eq!(stats.count_errors, 1);
        assert_eq!(stats.user.ok, 0);
    }

    #[test]
    fn test_read_samples_leaves_maps_untouched() {
        let mut maps = BpfMaps::in_memory(ORDER);
        put_stack(&mut maps, 1, &[0x1]);
        put_count(&mut maps, 4, 1, 0, 1);

        let collector = Collector::new(maps);
        let _ = collector.read_samples();
        assert_eq!(collector.maps().stack_counts.len(), 1);
        assert_eq!(collector.maps().stack_traces.len(), 1);
    }

    /// Memory map whose deletes fail while `fail_deletes` is set
    struct FlakyMap {
        inner: MemoryMap,
        fail_deletes: Rc<Cell<bool>>,
    }

    impl MapHandle for FlakyMap {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, MapError> {
            self.inner.get(key)
        }

        fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), MapError> {
            self.inner.update(key, value)
        }

        fn delete_key(&mut self, key: &[u8]) -> Result<(), MapError> {
            if self.fail_deletes.get() {
                return Err(MapError::Syscall {
                    map: self.inner.name().to_string(),
                    op: "delete",
                    source: std::io::Error::from_raw_os_error(libc::EPERM),
                });
            }
            self.inner.delete_key(key)
        }

        fn next_key(&self, prev: Option<&[u8]>) -> Result<Option<Vec<u8>>, MapError> {
            self.inner.next_key(prev)
        }
    }

    #[test]
    fn test_failed_drain_keeps_samples_and_retries() {
        let mut memory = BpfMaps::in_memory(ORDER);
        put_stack(&mut memory, 1, &[0xA]);
        put_count(&mut memory, 100, 1, 0, 5);

        let fail_deletes = Rc::new(Cell::new(true));
        let flaky = |inner| FlakyMap { inner, fail_deletes: Rc::clone(&fail_deletes) };
        let maps = BpfMaps {
            stack_counts: flaky(memory.stack_counts),
            stack_traces: flaky(memory.stack_traces),
            unwind_tables: flaky(memory.unwind_tables),
            byte_order: ORDER,
        };
        let mut collector = Collector::new(maps);

        let report = collector.collect_cycle();
        assert!(report.reconcile_failed);
        assert_eq!(report.samples.len(), 1);
        assert_eq!(report.samples[0].count, 5);
        assert_eq!(report.stats.deleted_counts, 0);
        assert_eq!(collector.maps().stack_counts.inner.len(), 1);

        fail_deletes.set(false);
        let retry = collector.collect_cycle();
        assert!(!retry.reconcile_failed);
        // Entries left by the failed drain are read again
        assert_eq!(retry.samples, report.samples);
        assert_eq!(retry.stats.deleted_stacks, 1);
        assert_eq!(retry.stats.deleted_counts, 1);
        assert!(collector.maps().stack_counts.inner.is_empty());
        assert!(collector.maps().stack_traces.inner.is_empty());

        assert_eq!(collector.collect_cycle(), CycleReport::default());
    }

    #[test]
    fn test_empty_cycle() {
        let report = Collector::new(BpfMaps::in_memory(ORDER)).collect_cycle();
        assert_eq!(report, CycleReport::default());
    }
}
