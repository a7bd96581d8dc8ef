//! # Binary Codec
//!
//! Pure encode/decode of everything that crosses the kernel/userspace
//! boundary as raw bytes. No I/O happens here.
//!
//! - [`unwind_table`] - unwind table wire format written to `unwind_tables`
//! - [`stack`] - stack trace buffers and sample counters read back
//! - key helpers for the three maps (below)
//!
//! ## Byte Order
//!
//! All multi-byte values use one [`ByteOrder`], fixed per deployment. It must
//! match what the sampler was compiled for. A mismatch is not detectable
//! here and shows up as garbage addresses, so it defaults to the host order.

pub mod stack;
pub mod unwind_table;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian, ReadBytesExt};
use cpuscope_common::{StackCountKey, PID_KEY_SIZE, STACK_COUNT_KEY_SIZE, STACK_ID_SIZE};

use crate::domain::{CodecError, Pid, StackId};

pub use stack::{decode_combined_stack, decode_count, decode_stack_segment, CombinedStack};
pub use unwind_table::{decode_unwind_table, encode_unwind_table};

/// Byte order of every integer exchanged with the sampler
///
/// Selects between `byteorder`'s [`LittleEndian`] and [`BigEndian`];
/// `Native` follows the host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ByteOrder {
    #[default]
    Native,
    Little,
    Big,
}

impl ByteOrder {
    /// Concrete byte order of the host (what a locally compiled sampler uses)
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    /// `Native` replaced by the host's concrete order
    pub fn resolve(self) -> Self {
        match self {
            ByteOrder::Native => ByteOrder::native(),
            order => order,
        }
    }

    pub(crate) fn is_big(self) -> bool {
        self.resolve() == ByteOrder::Big
    }

    pub fn put_u64(self, buf: &mut Vec<u8>, value: u64) {
        let mut raw = [0u8; 8];
        if self.is_big() {
            BigEndian::write_u64(&mut raw, value);
        } else {
            LittleEndian::write_u64(&mut raw, value);
        }
        buf.extend_from_slice(&raw);
    }

    pub fn put_i64(self, buf: &mut Vec<u8>, value: i64) {
        let mut raw = [0u8; 8];
        if self.is_big() {
            BigEndian::write_i64(&mut raw, value);
        } else {
            LittleEndian::write_i64(&mut raw, value);
        }
        buf.extend_from_slice(&raw);
    }

    /// Read a `u64` from the first 8 bytes of `bytes`
    ///
    /// Callers guarantee the length (`chunks_exact` or an explicit check).
    pub(crate) fn read_u64(self, bytes: &[u8]) -> u64 {
        if self.is_big() {
            BigEndian::read_u64(bytes)
        } else {
            LittleEndian::read_u64(bytes)
        }
    }

    pub(crate) fn read_i64(self, bytes: &[u8]) -> i64 {
        if self.is_big() {
            BigEndian::read_i64(bytes)
        } else {
            LittleEndian::read_i64(bytes)
        }
    }

    pub(crate) fn read_i32(self, bytes: &[u8]) -> i32 {
        if self.is_big() {
            BigEndian::read_i32(bytes)
        } else {
            LittleEndian::read_i32(bytes)
        }
    }

    pub(crate) fn read_u32(self, bytes: &[u8]) -> u32 {
        if self.is_big() {
            BigEndian::read_u32(bytes)
        } else {
            LittleEndian::read_u32(bytes)
        }
    }

    fn i32_bytes(self, value: i32) -> [u8; 4] {
        let mut raw = [0u8; 4];
        if self.is_big() {
            BigEndian::write_i32(&mut raw, value);
        } else {
            LittleEndian::write_i32(&mut raw, value);
        }
        raw
    }

    fn u32_bytes(self, value: u32) -> [u8; 4] {
        let mut raw = [0u8; 4];
        if self.is_big() {
            BigEndian::write_u32(&mut raw, value);
        } else {
            LittleEndian::write_u32(&mut raw, value);
        }
        raw
    }
}

/// Key bytes of a stack ID in the stack traces map
pub fn encode_stack_id(id: StackId, order: ByteOrder) -> [u8; STACK_ID_SIZE] {
    order.i32_bytes(id.0)
}

/// Key bytes of a PID in the unwind tables map
pub fn encode_pid(pid: Pid, order: ByteOrder) -> [u8; PID_KEY_SIZE] {
    order.u32_bytes(pid.0)
}

/// Key bytes of a stack counts map entry
pub fn encode_stack_count_key(key: &StackCountKey, order: ByteOrder) -> Vec<u8> {
    let fields = [key.pid, key.user_stack_id, key.kernel_stack_id];
    let mut buf = vec![0u8; STACK_COUNT_KEY_SIZE];
    if order.is_big() {
        BigEndian::write_i32_into(&fields, &mut buf);
    } else {
        LittleEndian::write_i32_into(&fields, &mut buf);
    }
    buf
}

fn read_stack_count_key<E: byteorder::ByteOrder>(
    mut bytes: &[u8],
) -> std::io::Result<StackCountKey> {
    Ok(StackCountKey {
        pid: bytes.read_i32::<E>()?,
        user_stack_id: bytes.read_i32::<E>()?,
        kernel_stack_id: bytes.read_i32::<E>()?,
    })
}

/// Decode a stack counts map key
pub fn decode_stack_count_key(bytes: &[u8], order: ByteOrder) -> Result<StackCountKey, CodecError> {
    let key = if order.is_big() {
        read_stack_count_key::<BigEndian>(bytes)
    } else {
        read_stack_count_key::<LittleEndian>(bytes)
    };
    key.map_err(|_| CodecError::Truncated {
        what: "stack count key",
        expected: STACK_COUNT_KEY_SIZE,
        actual: bytes.len(),
    })
}

/// Lowercase hex rendering of raw key bytes, for error messages
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
