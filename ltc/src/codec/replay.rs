use crate::codec::FrameDecoder;
use crate::structs::event::DecodedFrameEvent;

/// Queue depth of a hardware-style decoder; older frames are overwritten.
pub const DEFAULT_QUEUE_LEN: usize = 32;

/// [`FrameDecoder`] that releases pre-demodulated frames once the sample
/// position written so far has passed their end offset.
///
/// Frames must be ordered by `off_end`. The sample data itself is ignored.
#[derive(Debug, Clone)]
pub struct FrameReplay {
    frames: Vec<DecodedFrameEvent>,
    released: usize,
    read_pos: usize,
    queue_len: usize,
    overflows: usize,
}

impl FrameReplay {
    pub fn new(frames: Vec<DecodedFrameEvent>) -> Self {
        Self::with_queue_len(frames, DEFAULT_QUEUE_LEN)
    }

    pub fn with_queue_len(frames: Vec<DecodedFrameEvent>, queue_len: usize) -> Self {
        Self {
            frames,
            released: 0,
            read_pos: 0,
            queue_len: queue_len.max(1),
            overflows: 0,
        }
    }

    /// Frames dropped because the queue was full.
    pub fn overflows(&self) -> usize {
        self.overflows
    }

    /// All frames have been released and read.
    pub fn is_exhausted(&self) -> bool {
        self.read_pos >= self.frames.len()
    }

    /// Sample offset at which the last frame is released.
    pub fn last_offset(&self) -> Option<i64> {
        self.frames.last().map(|f| f.off_end)
    }
}

impl FrameDecoder for FrameReplay {
    fn write(&mut self, samples: &[f32], base_offset: i64) {
        let end = base_offset + samples.len() as i64;
        while self.released < self.frames.len() && self.frames[self.released].off_end < end {
            self.released += 1;
        }
        let pending = self.released - self.read_pos;
        if pending > self.queue_len {
            self.overflows += pending - self.queue_len;
            self.read_pos = self.released - self.queue_len;
        }
    }

    fn read(&mut self) -> Option<DecodedFrameEvent> {
        if self.read_pos < self.released {
            let frame = self.frames[self.read_pos];
            self.read_pos += 1;
            Some(frame)
        } else {
            None
        }
    }

    fn queue_len(&self) -> usize {
        self.released - self.read_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(n: usize, spf: i64) -> Vec<DecodedFrameEvent> {
        (0..n as i64)
            .map(|i| DecodedFrameEvent {
                off_start: i * spf,
                off_end: (i + 1) * spf - 1,
                ..Default::default()
            })
            .collect()
    }

    #[test]
    fn frames_released_as_position_passes_end() {
        let mut replay = FrameReplay::new(events(4, 100));
        let period = [0.0f32; 64];

        replay.write(&period, 0);
        assert_eq!(replay.queue_len(), 0);
        replay.write(&period, 64);
        assert_eq!(replay.queue_len(), 1);
        assert_eq!(replay.read().unwrap().off_end, 99);
        assert!(replay.read().is_none());

        replay.write(&[0.0; 400], 128);
        assert_eq!(replay.queue_len(), 3);
        assert_eq!(replay.last_offset(), Some(399));
    }

    #[test]
    fn full_queue_drops_oldest() {
        let mut replay = FrameReplay::with_queue_len(events(10, 10), 4);
        replay.write(&[0.0; 100], 0);
        assert_eq!(replay.queue_len(), 4);
        assert_eq!(replay.overflows(), 6);
        assert_eq!(replay.read().unwrap().off_start, 60);
    }
}
