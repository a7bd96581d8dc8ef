//! # cpuscope - Main Entry Point
//!
//! Supports two subcommands:
//! - **collect**: load the sampler, install unwind tables, run collection cycles
//! - **convert**: turn decoded JFR events into a CPU profile

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};

use cpuscope::cli::{Args, CollectArgs, Command, ConvertArgs};
use cpuscope::convert::profile_from_reader;
use cpuscope::domain::Pid;
use cpuscope::maps::BpfMap;
use cpuscope::preflight::run_preflight_checks;
use cpuscope::profiling::{
    attach_cpu_sampler, init_ebpf_logger, load_ebpf_object, load_unwind_table, take_bpf_maps,
    Collector, CycleReport,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    match Args::parse().command {
        Command::Collect(args) => collect(args).await,
        Command::Convert(args) => convert(&args),
    }
}

/// Run one cycle on the blocking pool
///
/// Returns `None` when the previous cycle still holds the collector.
fn spawn_cycle(
    collector: &Arc<Mutex<Collector<BpfMap>>>,
) -> tokio::task::JoinHandle<Option<CycleReport>> {
    let collector = Arc::clone(collector);
    tokio::task::spawn_blocking(move || {
        let mut guard = match collector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(guard.collect_cycle())
    })
}

async fn collect(args: CollectArgs) -> Result<()> {
    run_preflight_checks(&args.object)?;
    let config = args.collector_config();
    let quiet = args.quiet;

    if !quiet {
        println!("cpuscope v{}", env!("CARGO_PKG_VERSION"));
        println!("object: {}", args.object.display());
        println!("interval: {:?}, cycle timeout: {:?}", config.interval, config.cycle_timeout);
    }

    let mut bpf = load_ebpf_object(&args.object)?;
    init_ebpf_logger(&mut bpf);
    let mut maps = take_bpf_maps(&mut bpf, config.byte_order)?;

    // Tables go in before sampling starts so the first samples can unwind
    for (pid, path) in &args.unwind_table {
        let table = load_unwind_table(path)?;
        maps.set_unwind_table(Pid(*pid), &table)
            .with_context(|| format!("Failed to install {}", path.display()))?;
        info!("✓ Installed unwind table for PID {pid} ({} rows)", table.len());
    }

    let cpus = attach_cpu_sampler(&mut bpf, &args.program, args.frequency)?;
    if !quiet {
        println!("CPU sampling: {} Hz on {cpus} CPUs", args.frequency);
    }

    let collector = Arc::new(Mutex::new(Collector::new(maps)));
    let mut reports: Vec<CycleReport> = Vec::new();
    let mut cycles = 0usize;
    let mut total_samples = 0u64;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let profiling_start = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let mut exit_reason = "interrupted";

    let mut interval = tokio::time::interval(config.interval);
    // The first tick completes immediately; nothing has been sampled yet
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut ctrl_c => break,
        }

        match tokio::time::timeout(config.cycle_timeout, spawn_cycle(&collector)).await {
            Ok(Ok(Some(report))) => {
                cycles += 1;
                total_samples += report.samples.iter().map(|s| s.count).sum::<u64>();
                if !quiet {
                    let stats = &report.stats;
                    println!(
                        "cycle {cycles}: {} stacks from {} keys (user ok {}, kernel ok {}, dropped {}){}",
                        report.samples.len(),
                        stats.keys_seen,
                        stats.user.ok,
                        stats.kernel.ok,
                        stats.keys_seen - stats.samples,
                        if report.reconcile_failed { ", maps not drained" } else { "" }
                    );
                }
                if args.export.is_some() {
                    reports.push(report);
                }
            }
            Ok(Ok(None)) => warn!("Previous cycle still running, skipping this one"),
            Ok(Err(e)) => warn!("Collection cycle panicked: {e}"),
            Err(_) => warn!("Collection cycle exceeded {:?}, result discarded", config.cycle_timeout),
        }

        if let Some(limit) = duration_limit {
            if profiling_start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }
    }

    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {cycles} cycles, {total_samples} samples",
            profiling_start.elapsed().as_secs_f64()
        );
    }

    if let Some(export_path) = &args.export {
        let file = File::create(export_path).context("Failed to create export file")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &reports).context("Failed to export cycle reports")?;
        writer.flush()?;

        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    Ok(())
}

fn convert(args: &ConvertArgs) -> Result<()> {
    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let profile = profile_from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to convert {}", args.input.display()))?;
    info!(
        "Converted {} samples into {} stacks, {} locations, {} functions",
        profile.total_samples(),
        profile.samples.len(),
        profile.locations.len(),
        profile.functions.len()
    );

    match &args.output {
        Some(path) => {
            let file = File::create(path).context("Failed to create profile output file")?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &profile)?;
            writer.flush()?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &profile)?;
            writeln!(writer)?;
        }
    }

    Ok(())
}
