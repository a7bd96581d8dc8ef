//! Pre-flight checks for cpuscope
//!
//! Validates system requirements before attempting to load the sampler.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use object::{Object, ObjectSection};
use std::path::Path;

/// Minimum kernel version for perf-event BPF programs
const MIN_KERNEL_VERSION: (u32, u32) = (4, 9);

/// Run all pre-flight checks before eBPF loading
///
/// # Errors
/// Returns the first failed check
pub fn run_preflight_checks(object_path: &Path) -> Result<()> {
    check_privileges()?;
    check_kernel_version()?;
    check_object_file(object_path)?;
    Ok(())
}

/// Check if running with sufficient privileges for eBPF
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: cpuscope requires root privileges to load eBPF programs.\n\n\
         Run with: sudo cpuscope collect ..."
    );
}

/// Extract `(major, minor)` from a `/proc/version` line
fn parse_kernel_version(version: &str) -> Option<(u32, u32)> {
    // "Linux version 5.15.0-generic ..."
    let release = version.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor: String = parts.next()?.chars().take_while(char::is_ascii_digit).collect();
    Some((major, minor.parse().ok()?))
}

/// Check if the kernel version is sufficient for eBPF features
fn check_kernel_version() -> Result<()> {
    let version_str = std::fs::read_to_string("/proc/version")
        .context("Failed to read kernel version from /proc/version")?;

    let Some((major, minor)) = parse_kernel_version(&version_str) else {
        warn!("Could not parse kernel version from {:?}", version_str.trim());
        return Ok(());
    };

    if (major, minor) < MIN_KERNEL_VERSION {
        bail!(
            "Kernel version {major}.{minor} is too old.\n\n\
             cpuscope requires Linux {}.{} or newer.",
            MIN_KERNEL_VERSION.0,
            MIN_KERNEL_VERSION.1,
        );
    }

    Ok(())
}

/// Check that the sampler object exists and looks like a BPF object
fn check_object_file(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "eBPF object not found: {}\n\n\
             Build the sampler first, or point --object at the compiled .o file.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!("Not a file: {}\n\n--object must point to a compiled eBPF object.", path.display());
    }

    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read eBPF object: {}", path.display()))?;
    let obj = object::File::parse(&*data)
        .with_context(|| format!("Not an ELF object: {}", path.display()))?;

    if obj.section_by_name(".maps").is_none() && obj.section_by_name("maps").is_none() {
        bail!("{} defines no maps section; is it the cpuscope sampler?", path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(
            parse_kernel_version("Linux version 5.15.0-91-generic (buildd@lcy02) #101"),
            Some((5, 15))
        );
        assert_eq!(parse_kernel_version("Linux version 6.1rc3 x"), Some((6, 1)));
        assert_eq!(parse_kernel_version("garbage"), None);
    }

    #[test]
    fn test_kernel_version_check() {
        // Don't assert success since test might run on old kernel
        let _ = check_kernel_version();
    }

    #[test]
    fn test_object_not_found() {
        let err = check_object_file(Path::new("/nonexistent/sampler.o")).unwrap_err().to_string();
        assert!(err.contains("eBPF object not found"));
    }

    #[test]
    fn test_object_not_elf() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an object file").unwrap();

        let err = check_object_file(file.path()).unwrap_err().to_string();
        assert!(err.contains("Not an ELF object"));
    }
}
