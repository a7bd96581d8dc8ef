//! Profiling core modules
//!
//! Everything between the sampler's maps and a [`CycleReport`]:
//! - Stack and count lookups
//! - Unwind table installation
//! - Draining the stack maps between cycles
//! - The collection cycle itself
//! - eBPF program loading and setup

pub mod bpf_maps;
pub mod collector;
pub mod cpu_utils;
pub mod ebpf_setup;
pub mod reconciler;
pub mod stack_reader;
pub mod unwind_writer;

// Re-export common types
pub use bpf_maps::BpfMaps;
pub use collector::{Collector, CollectorConfig, CycleReport, CycleStats, RawSample, SegmentStats};
pub use cpu_utils::online_cpus;
pub use ebpf_setup::{attach_cpu_sampler, init_ebpf_logger, load_ebpf_object, take_bpf_maps};
pub use reconciler::{clean, drain_map, ReconcileStats};
pub use stack_reader::StackReader;
pub use unwind_writer::{load_unwind_table, UnwindTableWriter};
