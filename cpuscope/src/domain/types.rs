//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep PIDs, stack IDs and CPU IDs from being mixed
//! up when they all travel as small integers through map keys.

use serde::Serialize;
use std::fmt;

/// Process ID
///
/// Key of the unwind tables map, and the first field of a stack count key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

impl From<i32> for Pid {
    #[allow(clippy::cast_sign_loss)]
    fn from(pid: i32) -> Self {
        Pid(pid as u32)
    }
}

impl From<Pid> for i32 {
    #[allow(clippy::cast_possible_wrap)]
    fn from(pid: Pid) -> Self {
        pid.0 as i32
    }
}

/// Stack trace ID from the sampler
///
/// Key of the stack traces map. The sampler writes `0` when it attempted to
/// unwind a segment and failed, which is different from a stack that was
/// never sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StackId(pub i32);

impl StackId {
    /// Returns true if the sampler reported an unwinding failure
    pub fn is_unwind_failed(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stack#{}", self.0)
    }
}

/// CPU ID
///
/// Represents a CPU core ID (0, 1, 2, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuId(pub u32);

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CPU:{}", self.0)
    }
}

/// Which half of a combined stack a read targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackSegment {
    User,
    Kernel,
}

impl fmt::Display for StackSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackSegment::User => f.write_str("user"),
            StackSegment::Kernel => f.write_str("kernel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_conversion() {
        let pid = Pid::from(1234i32);
        assert_eq!(pid.0, 1234);
        let back: i32 = pid.into();
        assert_eq!(back, 1234);
        assert_eq!(pid.to_string(), "PID:1234");
    }

    #[test]
    fn test_stack_id_unwind_failed() {
        assert!(StackId(0).is_unwind_failed());
        assert!(!StackId(7).is_unwind_failed());
        assert!(!StackId(-1).is_unwind_failed());
    }

    #[test]
    fn test_segment_display() {
        assert_eq!(StackSegment::User.to_string(), "user");
        assert_eq!(StackSegment::Kernel.to_string(), "kernel");
    }
}
