//! # cpuscope - userspace side of an eBPF CPU profiler
//!
//! An eBPF sampler attached to a perf event records, on every CPU tick, the
//! user and kernel stack of the running task into shared maps. cpuscope
//! installs DWARF-derived unwind tables for the sampler, periodically reads
//! the recorded stacks back, and drains the maps for the next round.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    eBPF sampler (kernel)                     │
//! │   perf event ──▶ unwind with unwind_tables[pid]              │
//! │              ──▶ stack_traces[id] = frames                   │
//! │              ──▶ stack_counts[(pid, user, kernel)] += 1      │
//! └──────────────────────────┬───────────────────────────────────┘
//!                            │ shared maps (raw bytes)
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    cpuscope (this crate)                     │
//! │                                                              │
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────┐      │
//! │  │   codec    │◀──│    maps    │◀──│    profiling     │      │
//! │  │ wire bytes │   │ MapHandle  │   │ reader / writer  │      │
//! │  └────────────┘   └────────────┘   │ reconciler       │      │
//! │                                    │ collector        │      │
//! │                                    └──────────────────┘      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`codec`]: unwind table wire format, stack and count decoding, map keys
//! - [`maps`]: the [`MapHandle`](maps::MapHandle) boundary, kernel and in-memory maps
//! - [`profiling`]: stack reads, unwind table installation, map draining,
//!   the collection cycle and eBPF setup
//! - [`unwind`]: unwind rows and tables, with conversions from `gimli`
//! - [`convert`]: JFR recordings to a sampled CPU profile
//! - [`cli`]: command-line argument parsing and configuration
//! - [`domain`]: core domain types (Pid, StackId, CpuId) and errors
//! - [`preflight`]: privilege, kernel and object file checks
//!
//! ## Typical Usage
//!
//! ```bash
//! # Collect every 10 seconds until Ctrl+C, exporting each cycle
//! sudo ./cpuscope collect --object sampler.o --export cycles.json
//!
//! # Convert a decoded JFR recording
//! ./cpuscope convert events.json --output profile.json
//! ```

// Expose modules for testing
pub mod cli;
pub mod codec;
pub mod convert;
pub mod domain;
pub mod maps;
pub mod preflight;
pub mod profiling;
pub mod unwind;
