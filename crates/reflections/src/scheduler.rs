//! Byte-offset arithmetic for delayed reflections.
//!
//! A reflection's delay becomes a byte distance behind the source's play
//! cursor in the shared circular buffer. Offsets are sample aligned and no
//! two reflections in one pass may share one.

use a3d_core::MAX_SOURCE_REFLECTIONS;

/// Playback geometry the offset and lag arithmetic works in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Length of the source's circular buffer in bytes
    pub buffer_size: u32,
    pub bytes_per_sample: u32,
    /// Nominal source playback rate in Hz
    pub frequency: u32,
}

impl Timing {
    pub fn new(buffer_size: u32, bytes_per_sample: u32, frequency: u32) -> Self {
        Self {
            buffer_size,
            bytes_per_sample,
            frequency,
        }
    }

    /// Bytes the source consumes per second at the nominal rate.
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.frequency) * u64::from(self.bytes_per_sample)
    }

    /// Candidate offset for `delay` seconds: rounded, aligned up to a whole
    /// sample, wrapped into the buffer.
    pub fn delay_to_offset(&self, delay: f32) -> u32 {
        if self.buffer_size == 0 {
            return 0;
        }
        let bytes = (f64::from(delay.max(0.0)) * self.bytes_per_second() as f64).round();
        let bytes = if bytes.is_finite() { bytes as u64 } else { 0 };
        let step = u64::from(self.bytes_per_sample.max(1));
        let size = u64::from(self.buffer_size);
        // Whole multiples of size * step leave the result unchanged
        let bytes = bytes % (size * step);
        let aligned = bytes.div_ceil(step) * step;
        (aligned % size) as u32
    }

    /// `(from - to) mod buffer_size`, the distance `to` trails `from`.
    pub fn circular_distance(&self, from: u32, to: u32) -> u32 {
        if self.buffer_size == 0 {
            return 0;
        }
        let size = u64::from(self.buffer_size);
        ((u64::from(from) % size + size - u64::from(to) % size) % size) as u32
    }
}

/// Offsets handed out during one control-packet pass.
///
/// Lower slots keep their computed offset; a later slot whose offset is
/// already taken probes forward one sample at a time.
#[derive(Debug)]
pub struct OffsetPass {
    timing: Timing,
    assigned: [Option<u32>; MAX_SOURCE_REFLECTIONS],
}

impl OffsetPass {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            assigned: [None; MAX_SOURCE_REFLECTIONS],
        }
    }

    /// Compute and record the offset for `slot`.
    pub fn assign(&mut self, slot: usize, delay: f32) -> u32 {
        let candidate = self.timing.delay_to_offset(delay);
        let offset = self.resolve(slot, candidate);
        self.assigned[slot] = Some(offset);
        offset
    }

    fn resolve(&self, slot: usize, mut offset: u32) -> u32 {
        let step = self.timing.bytes_per_sample.max(1);
        let size = self.timing.buffer_size;
        // More probes than there are earlier slots can only happen when
        // the buffer holds fewer samples than slots.
        let max_probes = (size / step).max(1) as usize;

        for _ in 0..max_probes {
            let taken = self.assigned[..slot]
                .iter()
                .flatten()
                .any(|&other| other == offset);
            if !taken {
                return offset;
            }
            offset = ((u64::from(offset) + u64::from(step)) % u64::from(size.max(1))) as u32;
        }

        offset
    }

    pub fn assigned(&self, slot: usize) -> Option<u32> {
        self.assigned[slot]
    }
}
