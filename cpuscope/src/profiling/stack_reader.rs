//! Stack and count lookups
//!
//! Reads one sample's stacks and count out of the maps the sampler fills.
//! Lookups never mutate a map. Every failure is classified so the caller can
//! count it and move on to the next sample:
//!
//! | Error | Meaning |
//! |-------|---------|
//! | `UnwindFailed` | stack ID 0: the sampler tried and failed to unwind |
//! | `Missing` | no entry (evicted, or not visible yet) |
//! | `Unrecoverable` | entry present but its bytes don't fit a stack |

use crate::codec::{decode_count, decode_stack_segment, encode_stack_id, ByteOrder, CombinedStack};
use crate::domain::{MapError, StackId, StackReadError, StackSegment};
use crate::maps::MapHandle;

/// Read-only view over the stack traces and stack counts maps
pub struct StackReader<'a, M> {
    stack_traces: &'a M,
    stack_counts: &'a M,
    order: ByteOrder,
}

impl<'a, M: MapHandle> StackReader<'a, M> {
    pub fn new(stack_traces: &'a M, stack_counts: &'a M, order: ByteOrder) -> Self {
        Self { stack_traces, stack_counts, order }
    }

    /// Read the user stack `id` into the user half of `stack`
    ///
    /// # Errors
    /// `UnwindFailed`, `Missing` or `Unrecoverable`; `stack` is untouched on error
    pub fn read_user_stack(&self, id: StackId, stack: &mut CombinedStack) -> Result<(), StackReadError> {
        self.read_stack(StackSegment::User, id, stack)
    }

    /// Read the kernel stack `id` into the kernel half of `stack`
    ///
    /// # Errors
    /// `UnwindFailed`, `Missing` or `Unrecoverable`; `stack` is untouched on error
    pub fn read_kernel_stack(
        &self,
        id: StackId,
        stack: &mut CombinedStack,
    ) -> Result<(), StackReadError> {
        self.read_stack(StackSegment::Kernel, id, stack)
    }

    /// Read the sample count stored under the raw count key
    ///
    /// Counts and stacks are written together by the sampler, so a missing
    /// count is unexpected; it is still reported as a plain lookup error.
    ///
    /// # Errors
    /// `CountLookup` if the key is absent or the lookup fails,
    /// `MalformedCount` if the value is too short
    pub fn read_count(&self, key: &[u8]) -> Result<u64, StackReadError> {
        let bytes = self
            .stack_counts
            .get(key)
            .map_err(StackReadError::CountLookup)?
            .ok_or_else(|| {
                StackReadError::CountLookup(MapError::KeyNotFound {
                    map: self.stack_counts.name().to_string(),
                })
            })?;

        decode_count(&bytes, self.order).map_err(StackReadError::MalformedCount)
    }

    fn read_stack(
        &self,
        segment: StackSegment,
        id: StackId,
        stack: &mut CombinedStack,
    ) -> Result<(), StackReadError> {
        if id.is_unwind_failed() {
            return Err(StackReadError::UnwindFailed);
        }

        let bytes = match self.stack_traces.get(&encode_stack_id(id, self.order)) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(StackReadError::Missing { segment, id, source: None }),
            Err(e) => return Err(StackReadError::Missing { segment, id, source: Some(e) }),
        };

        decode_stack_segment(&bytes, stack.segment_mut(segment), self.order)
            .map_err(|source| StackReadError::Unrecoverable { segment, id, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::MemoryMap;
    use cpuscope_common::{STACK_COUNT_KEY_SIZE, STACK_DEPTH, STACK_ID_SIZE};

    const ORDER: ByteOrder = ByteOrder::Little;

    fn maps() -> (MemoryMap, MemoryMap) {
        (
            MemoryMap::new("stack_traces", STACK_ID_SIZE),
            MemoryMap::new("stack_counts", STACK_COUNT_KEY_SIZE),
        )
    }

    fn put_stack(map: &mut MemoryMap, id: i32, frames: &[u64]) {
        let mut value = Vec::new();
        for i in 0..STACK_DEPTH {
            ORDER.put_u64(&mut value, frames.get(i).copied().unwrap_or(0));
        }
        map.update(&encode_stack_id(StackId(id), ORDER), &value).unwrap();
    }

    #[test]
    fn test_zero_id_is_unwind_failed() {
        let (traces, counts) = maps();
        let reader = StackReader::new(&traces, &counts, ORDER);
        let mut stack = CombinedStack::new();

        assert!(matches!(
            reader.read_user_stack(StackId(0), &mut stack),
            Err(StackReadError::UnwindFailed)
        ));
        assert!(matches!(
            reader.read_kernel_stack(StackId(0), &mut stack),
            Err(StackReadError::UnwindFailed)
        ));
    }

    #[test]
    fn test_absent_id_is_missing() {
        let (traces, counts) = maps();
        let reader = StackReader::new(&traces, &counts, ORDER);
        let mut stack = CombinedStack::new();

        let err = reader.read_user_stack(StackId(5), &mut stack).unwrap_err();
        assert!(err.is_missing());
        assert!(matches!(
            err,
            StackReadError::Missing { segment: StackSegment::User, id: StackId(5), source: None }
        ));
    }

    #[test]
    fn test_short_value_is_unrecoverable() {
        let (mut traces, counts) = maps();
        traces.update(&encode_stack_id(StackId(5), ORDER), &[0u8; 16]).unwrap();
        let reader = StackReader::new(&traces, &counts, ORDER);
        let mut stack = CombinedStack::new();

        let err = reader.read_kernel_stack(StackId(5), &mut stack).unwrap_err();
        assert!(err.is_unrecoverable());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_segments_land_in_their_half() {
        let (mut traces, counts) = maps();
        put_stack(&mut traces, 1, &[0x4001, 0x4002]);
        put_stack(&mut traces, 2, &[0xffff_0001]);
        let reader = StackReader::new(&traces, &counts, ORDER);

        let mut stack = CombinedStack::new();
        reader.read_user_stack(StackId(1), &mut stack).unwrap();
        reader.read_kernel_stack(StackId(2), &mut stack).unwrap();

        assert_eq!(&stack.user()[..3], &[0x4001, 0x4002, 0]);
        assert_eq!(&stack.kernel()[..2], &[0xffff_0001, 0]);
    }

    #[test]
    fn test_read_count() {
        let (traces, mut counts) = maps();
        let key = [1u8; STACK_COUNT_KEY_SIZE];
        counts.update(&key, &42u64.to_le_bytes()).unwrap();
        let short_key = [2u8; STACK_COUNT_KEY_SIZE];
        counts.update(&short_key, &[1, 2]).unwrap();
        let reader = StackReader::new(&traces, &counts, ORDER);

        assert_eq!(reader.read_count(&key).unwrap(), 42);
        assert!(matches!(
            reader.read_count(&[3u8; STACK_COUNT_KEY_SIZE]),
            Err(StackReadError::CountLookup(MapError::KeyNotFound { .. }))
        ));
        assert!(matches!(reader.read_count(&short_key), Err(StackReadError::MalformedCount(_))));
    }
}
