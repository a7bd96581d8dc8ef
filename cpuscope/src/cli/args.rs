//! CLI argument definitions

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::ByteOrder;
use crate::profiling::CollectorConfig;

#[derive(Parser)]
#[command(
    name = "cpuscope",
    about = "Collect CPU stack samples from an eBPF sampler",
    after_help = "\
EXAMPLES:
    sudo cpuscope collect --object sampler.o                   Collect until Ctrl+C
    sudo cpuscope collect --object sampler.o --duration 60 --export cycles.json
    sudo cpuscope collect --object sampler.o --unwind-table 1234=app.json
    cpuscope convert events.json --output profile.json         JFR events to a profile"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Load the sampler and periodically collect its stack samples
    Collect(CollectArgs),
    /// Convert decoded JFR events into a CPU profile
    Convert(ConvertArgs),
}

#[derive(ClapArgs)]
pub struct CollectArgs {
    /// Compiled eBPF sampler object
    #[arg(long, value_name = "PATH")]
    pub object: PathBuf,

    /// Name of the perf-event program in the object
    #[arg(long, default_value = "profile_cpu")]
    pub program: String,

    /// Sampling frequency in Hz
    #[arg(long, default_value = "19")]
    pub frequency: u64,

    /// Milliseconds between collection cycles
    #[arg(long, default_value = "10000")]
    pub interval_ms: u64,

    /// Abandon a collection cycle after this many milliseconds
    #[arg(long, default_value = "5000")]
    pub cycle_timeout_ms: u64,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Byte order the sampler was compiled for
    #[arg(long, value_enum, default_value_t)]
    pub byte_order: ByteOrder,

    /// Install an unwind table for a process before collecting
    #[arg(long, value_name = "PID=FILE", value_parser = parse_unwind_table_arg)]
    pub unwind_table: Vec<(u32, PathBuf)>,

    /// Export every cycle report to file (JSON)
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl CollectArgs {
    pub fn collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            interval: Duration::from_millis(self.interval_ms),
            cycle_timeout: Duration::from_millis(self.cycle_timeout_ms),
            byte_order: self.byte_order,
        }
    }
}

#[derive(ClapArgs)]
pub struct ConvertArgs {
    /// JSON file with decoded JFR chunks
    #[arg(value_name = "EVENTS")]
    pub input: PathBuf,

    /// Write the profile here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,
}

fn parse_unwind_table_arg(s: &str) -> Result<(u32, PathBuf), String> {
    let (pid, path) = s.split_once('=').ok_or_else(|| format!("expected PID=FILE, got {s:?}"))?;
    let pid = pid.parse().map_err(|e| format!("invalid PID {pid:?}: {e}"))?;
    if path.is_empty() {
        return Err("missing FILE after '='".to_string());
    }
    Ok((pid, PathBuf::from(path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_defaults() {
        let args = Args::try_parse_from(["cpuscope", "collect", "--object", "sampler.o"]).unwrap();
        let Command::Collect(collect) = args.command else { panic!("expected collect") };

        assert_eq!(collect.program, "profile_cpu");
        assert_eq!(collect.frequency, 19);
        assert!(collect.unwind_table.is_empty());
        assert_eq!(collect.collector_config(), CollectorConfig::default());
    }

    #[test]
    fn test_unwind_tables_and_byte_order() {
        let args = Args::try_parse_from([
            "cpuscope",
            "collect",
            "--object",
            "sampler.o",
            "--byte-order",
            "big",
            "--unwind-table",
            "42=a.json",
            "--unwind-table",
            "7=/tmp/b.json",
        ])
        .unwrap();
        let Command::Collect(collect) = args.command else { panic!("expected collect") };

        assert_eq!(collect.collector_config().byte_order, ByteOrder::Big);
        assert_eq!(
            collect.unwind_table,
            vec![(42, PathBuf::from("a.json")), (7, PathBuf::from("/tmp/b.json"))]
        );
    }

    #[test]
    fn test_native_byte_order() {
        let args = Args::try_parse_from([
            "cpuscope",
            "collect",
            "--object",
            "sampler.o",
            "--byte-order",
            "native",
        ])
        .unwrap();
        let Command::Collect(collect) = args.command else { panic!("expected collect") };

        let order = collect.collector_config().byte_order;
        assert_eq!(order, ByteOrder::Native);
        assert_eq!(order.resolve(), ByteOrder::native());

        assert!(Args::try_parse_from([
            "cpuscope",
            "collect",
            "--object",
            "sampler.o",
            "--byte-order",
            "middle",
        ])
        .is_err());
    }

    #[test]
    fn test_bad_unwind_table_arg() {
        assert!(parse_unwind_table_arg("42").is_err());
        assert!(parse_unwind_table_arg("x=a.json").is_err());
        assert!(parse_unwind_table_arg("42=").is_err());
    }

    #[test]
    fn test_convert_args() {
        let args = Args::try_parse_from(["cpuscope", "convert", "in.json", "-o", "out.json"]).unwrap();
        let Command::Convert(convert) = args.command else { panic!("expected convert") };
        assert_eq!(convert.input, PathBuf::from("in.json"));
        assert_eq!(convert.output, Some(PathBuf::from("out.json")));
    }
}
