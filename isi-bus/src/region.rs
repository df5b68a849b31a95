use parking_lot::Mutex;

/// A write-only ring buffer for frame payloads.
///
/// Two of these exist side by side in [`crate::SharedFrameBus`] — one for
/// stimulus frames, one for camera frames — each with its own offset and
/// lock, so that writes to one never interleave with the other's byte
/// range (§9: "two memory regions in a single shared-memory file" is a
/// latent bug in the source; this crate keeps them fully separate).
pub struct FrameRegion {
    name: &'static str,
    capacity: usize,
    buffer: Mutex<RegionState>,
}

struct RegionState {
    bytes: Vec<u8>,
    write_offset: usize,
}

impl FrameRegion {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            name,
            capacity,
            buffer: Mutex::new(RegionState {
                bytes: vec![0u8; capacity],
                write_offset: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write `data` into the ring, wrapping to offset 0 if it would not
    /// otherwise fit. Returns the byte offset the write started at.
    ///
    /// Panics if `data` is larger than the region's capacity — that is a
    /// configuration error, not a runtime condition to recover from.
    pub fn write(&self, data: &[u8]) -> usize {
        assert!(
            data.len() <= self.capacity,
            "{}: frame of {} bytes exceeds region capacity {}",
            self.name,
            data.len(),
            self.capacity
        );
        let mut state = self.buffer.lock();
        if state.write_offset + data.len() > self.capacity {
            state.write_offset = 0;
        }
        let offset = state.write_offset;
        state.bytes[offset..offset + data.len()].copy_from_slice(data);
        state.write_offset += data.len();
        offset
    }

    /// Read `len` bytes back out of the region at `offset`, for
    /// in-process consumers and tests. Real out-of-process consumers read
    /// the descriptor's `offset_bytes`/`data_size_bytes` against the
    /// backing store directly.
    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        let state = self.buffer.lock();
        state.bytes[offset..offset + len].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let region = FrameRegion::new("test", 1024);
        let payload = vec![1u8, 2, 3, 4];
        let offset = region.write(&payload);
        assert_eq!(region.read_at(offset, payload.len()), payload);
    }

    #[test]
    fn wraps_to_zero_when_next_write_would_overflow() {
        let region = FrameRegion::new("test", 10);
        let first = region.write(&[1u8; 6]);
        assert_eq!(first, 0);
        // 6 + 6 > 10, so this should wrap rather than overflow.
        let second = region.write(&[2u8; 6]);
        assert_eq!(second, 0);
        assert_eq!(region.read_at(0, 6), vec![2u8; 6]);
    }

    #[test]
    #[should_panic]
    fn write_larger_than_capacity_panics() {
        let region = FrameRegion::new("test", 4);
        region.write(&[0u8; 8]);
    }
}
