//! Stack trace buffers and sample counters

use cpuscope_common::{COUNT_WIDTH, FRAME_WIDTH, STACK_DEPTH};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use std::fmt;

use super::ByteOrder;
use crate::domain::{CodecError, StackSegment};

/// User and kernel stack of one sample in a single fixed-size buffer
///
/// The first `STACK_DEPTH` slots hold the user segment, the next
/// `STACK_DEPTH` the kernel segment. A segment that could not be read stays
/// all-zero. Frames end at the first zero address.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CombinedStack([u64; STACK_DEPTH * 2]);

impl CombinedStack {
    pub fn new() -> Self {
        Self([0; STACK_DEPTH * 2])
    }

    pub fn user(&self) -> &[u64] {
        &self.0[..STACK_DEPTH]
    }

    pub fn kernel(&self) -> &[u64] {
        &self.0[STACK_DEPTH..]
    }

    pub fn segment(&self, segment: StackSegment) -> &[u64] {
        match segment {
            StackSegment::User => self.user(),
            StackSegment::Kernel => self.kernel(),
        }
    }

    pub fn segment_mut(&mut self, segment: StackSegment) -> &mut [u64] {
        match segment {
            StackSegment::User => &mut self.0[..STACK_DEPTH],
            StackSegment::Kernel => &mut self.0[STACK_DEPTH..],
        }
    }

    /// Non-zero frames of a segment, innermost first
    pub fn frames(&self, segment: StackSegment) -> impl Iterator<Item = u64> + '_ {
        self.segment(segment).iter().copied().take_while(|&ip| ip != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&ip| ip == 0)
    }
}

impl Default for CombinedStack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CombinedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = |segment| {
            self.frames(segment).map(|ip| format!("{ip:#x}")).collect::<Vec<_>>()
        };
        f.debug_struct("CombinedStack")
            .field("user", &hex(StackSegment::User))
            .field("kernel", &hex(StackSegment::Kernel))
            .finish()
    }
}

impl Serialize for CombinedStack {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("CombinedStack", 2)?;
        state.serialize_field("user", &self.frames(StackSegment::User).collect::<Vec<_>>())?;
        state.serialize_field("kernel", &self.frames(StackSegment::Kernel).collect::<Vec<_>>())?;
        state.end()
    }
}

/// Decode one stack trace map value into `segment`
///
/// Nothing is written unless the whole segment can be filled. Bytes past
/// `segment.len()` frames are ignored.
///
/// # Errors
/// - [`CodecError::Misaligned`] if the length is not a whole number of frames
/// - [`CodecError::Truncated`] if there are fewer than `segment.len()` frames
pub fn decode_stack_segment(
    bytes: &[u8],
    segment: &mut [u64],
    order: ByteOrder,
) -> Result<(), CodecError> {
    if bytes.len() % FRAME_WIDTH != 0 {
        return Err(CodecError::Misaligned {
            what: "stack segment",
            len: bytes.len(),
            width: FRAME_WIDTH,
        });
    }

    let expected = segment.len() * FRAME_WIDTH;
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            what: "stack segment",
            expected,
            actual: bytes.len(),
        });
    }

    for (slot, frame) in segment.iter_mut().zip(bytes.chunks_exact(FRAME_WIDTH)) {
        *slot = order.read_u64(frame);
    }
    Ok(())
}

/// Decode a user and a kernel stack trace map value into one buffer
///
/// # Errors
/// Same as [`decode_stack_segment`], for either input.
pub fn decode_combined_stack(
    user: &[u8],
    kernel: &[u8],
    order: ByteOrder,
) -> Result<CombinedStack, CodecError> {
    let mut stack = CombinedStack::new();
    decode_stack_segment(user, stack.segment_mut(StackSegment::User), order)?;
    decode_stack_segment(kernel, stack.segment_mut(StackSegment::Kernel), order)?;
    Ok(stack)
}

/// Decode one stack counts map value
///
/// # Errors
/// [`CodecError::Truncated`] if shorter than a counter.
pub fn decode_count(bytes: &[u8], order: ByteOrder) -> Result<u64, CodecError> {
    if bytes.len() < COUNT_WIDTH {
        return Err(CodecError::Truncated {
            what: "stack count",
            expected: COUNT_WIDTH,
            actual: bytes.len(),
        });
    }
    Ok(order.read_u64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpuscope_common::STACK_SEGMENT_SIZE;

    fn segment_bytes(frames: &[u64], order: ByteOrder) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STACK_SEGMENT_SIZE);
        for i in 0..STACK_DEPTH {
            order.put_u64(&mut buf, frames.get(i).copied().unwrap_or(0));
        }
        buf
    }

    #[test]
    fn test_combined_stack_segments() {
        let order = ByteOrder::Little;
        let user = segment_bytes(&[0x4010, 0x4020, 0x4030], order);
        let kernel = segment_bytes(&[0xffff_ffff_8100_0000], order);

        let stack = decode_combined_stack(&user, &kernel, order).unwrap();
        assert_eq!(stack.frames(StackSegment::User).collect::<Vec<_>>(), vec![0x4010, 0x4020, 0x4030]);
        assert_eq!(stack.frames(StackSegment::Kernel).collect::<Vec<_>>(), vec![0xffff_ffff_8100_0000]);
        assert_eq!(stack.user().len(), STACK_DEPTH);
        assert_eq!(stack.kernel().len(), STACK_DEPTH);
    }

    #[test]
    fn test_short_segment_leaves_buffer_untouched() {
        let mut stack = CombinedStack::new();
        let short = vec![0xAB; 8 * 3];

        let err = decode_stack_segment(&short, stack.segment_mut(StackSegment::User), ByteOrder::Little)
            .unwrap_err();
        assert_eq!(
            err,
            CodecError::Truncated { what: "stack segment", expected: STACK_SEGMENT_SIZE, actual: 24 }
        );
        assert!(stack.is_empty());
    }

    #[test]
    fn test_misaligned_segment() {
        let mut stack = CombinedStack::new();
        let odd = vec![0u8; STACK_SEGMENT_SIZE + 3];
        assert!(matches!(
            decode_stack_segment(&odd, stack.segment_mut(StackSegment::Kernel), ByteOrder::Little),
            Err(CodecError::Misaligned { width: 8, .. })
        ));
    }

    #[test]
    fn test_decode_count() {
        assert_eq!(decode_count(&17u64.to_le_bytes(), ByteOrder::Little).unwrap(), 17);
        assert_eq!(decode_count(&17u64.to_be_bytes(), ByteOrder::Big).unwrap(), 17);
        assert!(matches!(
            decode_count(&[1, 2, 3], ByteOrder::Little),
            Err(CodecError::Truncated { what: "stack count", expected: 8, actual: 3 })
        ));
    }

    #[test]
    fn test_serialize_skips_zero_frames() {
        let mut stack = CombinedStack::new();
        stack.segment_mut(StackSegment::User)[0] = 0x10;
        stack.segment_mut(StackSegment::User)[1] = 0x20;
        let json = serde_json::to_string(&stack).unwrap();
        assert_eq!(json, r#"{"user":[16,32],"kernel":[]}"#);
    }
}
