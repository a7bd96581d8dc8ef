//! # eBPF Program Loading and Attachment
//!
//! Loads the sampler's compiled object, attaches its perf-event program to
//! every online CPU and hands its maps over to the collector.
//!
//! ## Functions
//!
//! - [`load_ebpf_object()`] - Load eBPF bytecode from an object file
//! - [`attach_cpu_sampler()`] - Attach the CPU sampling program
//! - [`take_bpf_maps()`] - Take ownership of the three shared maps

use anyhow::{Context, Result};
use aya::{
    maps::Map,
    programs::{perf_event, PerfEvent},
    Ebpf,
};
use aya_log::EbpfLogger;
use cpuscope_common::{STACK_COUNTS_MAP, STACK_TRACES_MAP, UNWIND_TABLES_MAP};
use log::{info, warn};
use std::path::Path;

use crate::codec::ByteOrder;
use crate::maps::BpfMap;
use crate::profiling::{online_cpus, BpfMaps};

/// Load the sampler's eBPF object file
///
/// # Errors
/// Returns an error if the file cannot be read or the kernel rejects it
pub fn load_ebpf_object(path: &Path) -> Result<Ebpf> {
    let bpf = Ebpf::load_file(path)
        .with_context(|| format!("Failed to load eBPF object {}", path.display()))?;
    Ok(bpf)
}

/// Initialize eBPF logger
pub fn init_ebpf_logger(bpf: &mut Ebpf) {
    if let Err(e) = EbpfLogger::init(bpf) {
        warn!("Failed to initialize eBPF logger: {e}");
    }
}

/// Attach the perf-event program `program` to every online CPU
/// Returns the number of CPUs attached
///
/// # Errors
/// Returns an error if the program is missing, fails to load or to attach
pub fn attach_cpu_sampler(bpf: &mut Ebpf, program: &str, frequency_hz: u64) -> Result<usize> {
    let perf: &mut PerfEvent = bpf
        .program_mut(program)
        .with_context(|| format!("{program} program not found"))?
        .try_into()?;
    perf.load()?;

    let cpus = online_cpus()?;
    for cpu in &cpus {
        perf.attach(
            perf_event::PerfTypeId::Software,
            perf_event::perf_sw_ids::PERF_COUNT_SW_CPU_CLOCK as u64,
            perf_event::PerfEventScope::AllProcessesOneCpu { cpu: cpu.0 },
            perf_event::SamplePolicy::Frequency(frequency_hz),
            false,
        )
        .with_context(|| format!("Failed to attach {program} on CPU {}", cpu.0))?;
    }
    info!("✓ Attached {program} to {} CPUs at {frequency_hz} Hz", cpus.len());

    Ok(cpus.len())
}

fn take_map(bpf: &mut Ebpf, name: &str) -> Result<Map> {
    bpf.take_map(name).with_context(|| format!("{name} map not found"))
}

/// Take the stack counts, stack traces and unwind tables maps out of `bpf`
///
/// # Errors
/// Returns an error if a map is missing, or its type or layout does not
/// match what cpuscope expects
pub fn take_bpf_maps(bpf: &mut Ebpf, byte_order: ByteOrder) -> Result<BpfMaps<BpfMap>> {
    let stack_counts = BpfMap::stack_counts(take_map(bpf, STACK_COUNTS_MAP)?, byte_order)
        .with_context(|| format!("Unexpected layout of {STACK_COUNTS_MAP}"))?;
    let stack_traces = BpfMap::stack_traces(take_map(bpf, STACK_TRACES_MAP)?, byte_order)
        .with_context(|| format!("Unexpected layout of {STACK_TRACES_MAP}"))?;
    let unwind_tables = BpfMap::unwind_tables(take_map(bpf, UNWIND_TABLES_MAP)?, byte_order)
        .with_context(|| format!("Unexpected layout of {UNWIND_TABLES_MAP}"))?;
    info!("✓ Opened maps {STACK_COUNTS_MAP}, {STACK_TRACES_MAP}, {UNWIND_TABLES_MAP}");

    Ok(BpfMaps { stack_counts, stack_traces, unwind_tables, byte_order })
}
