//! Codec seam.
//!
//! Bit-level demodulation and modulation live behind [`FrameDecoder`] and
//! [`FrameEncoder`]. Everything in [`crate::process`] only depends on these
//! traits.

use crate::structs::event::DecodedFrameEvent;
use crate::structs::frame::LtcFrame;
use crate::structs::timecode::Timecode;

/// Replays frames that were demodulated ahead of time.
pub mod replay;

/// Square-wave biphase-mark modulator.
pub mod biphase;

/// Demodulator fed from the real-time context.
///
/// `write` must not allocate or block.
pub trait FrameDecoder: Send {
    /// Feeds audio samples whose first sample sits at `base_offset` in the
    /// monotonic sample count.
    fn write(&mut self, samples: &[f32], base_offset: i64);

    /// Pops the oldest decoded frame.
    fn read(&mut self) -> Option<DecodedFrameEvent>;

    /// Number of decoded frames waiting to be read.
    fn queue_len(&self) -> usize;
}

/// Modulator producing LTC audio one byte at a time.
pub trait FrameEncoder: Send {
    /// Renders byte `index` (0..10) of the current frame into the internal
    /// buffer. A negative `speed` renders the bits in reverse order.
    fn encode_byte(&mut self, index: usize, speed: f64);

    /// Moves the rendered samples to `out`.
    fn drain_buffer(&mut self, out: &mut Vec<f32>);

    fn increment_timecode(&mut self);

    fn decrement_timecode(&mut self);

    fn frame(&self) -> LtcFrame;

    fn set_frame(&mut self, frame: LtcFrame);

    fn timecode(&self) -> Timecode;

    fn set_timecode(&mut self, timecode: &Timecode);
}
