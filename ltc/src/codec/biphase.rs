use crate::codec::FrameEncoder;
use crate::structs::frame::{LTC_FRAME_BYTES, LtcFrame, TvStandard};
use crate::structs::framerate::FrameRate;
use crate::structs::timecode::Timecode;

/// Biphase-mark modulator producing an ideal square wave.
///
/// Every bit starts with a level change; a `1` bit changes level again half
/// way through. Fractional samples per bit are carried over between bits so
/// a frame spans `sample_rate / fps` samples on average.
#[derive(Debug, Clone)]
pub struct BiphaseEncoder {
    rate: FrameRate,
    standard: TvStandard,
    samples_per_bit: f64,
    amplitude: f32,
    frame: LtcFrame,
    use_date: bool,
    level: bool,
    remainder: f64,
    buffer: Vec<f32>,
}

impl BiphaseEncoder {
    pub fn new(sample_rate: u32, rate: FrameRate) -> Self {
        let samples_per_bit = rate.samples_per_frame(sample_rate) / (LTC_FRAME_BYTES * 8) as f64;
        let frame = LtcFrame {
            drop_frame: rate.drop_frame && rate.nominal() == 30,
            ..Default::default()
        };
        Self {
            rate,
            standard: rate.tv_standard(),
            samples_per_bit,
            amplitude: 1.0,
            frame,
            use_date: false,
            level: false,
            remainder: 0.0,
            // one frame plus slack for the fractional carry
            buffer: Vec::with_capacity((samples_per_bit * 80.0) as usize + 16),
        }
    }

    /// Output level in dBFS, clamped to `[-192, 0]`.
    pub fn set_volume(&mut self, dbfs: f64) {
        let dbfs = dbfs.clamp(-192.0, 0.0);
        self.amplitude = 10f64.powf(dbfs / 20.0) as f32;
    }

    /// Carries the user-bit date on midnight wrap.
    pub fn set_use_date(&mut self, use_date: bool) {
        self.use_date = use_date;
    }

    pub fn standard(&self) -> TvStandard {
        self.standard
    }

    pub fn rate(&self) -> FrameRate {
        self.rate
    }

    fn half_bit(&mut self, samples_per_half: f64) {
        let exact = self.remainder + samples_per_half;
        let n = (exact + 1e-9).floor().max(0.0) as usize;
        self.remainder = (exact - n as f64).max(0.0);
        let value = if self.level {
            self.amplitude
        } else {
            -self.amplitude
        };
        self.buffer.extend(std::iter::repeat_n(value, n));
    }

    fn encode_bit(&mut self, one: bool, samples_per_bit: f64) {
        self.level = !self.level;
        self.half_bit(samples_per_bit / 2.0);
        if one {
            self.level = !self.level;
        }
        self.half_bit(samples_per_bit / 2.0);
    }

    fn carry_date(&mut self, forward: bool) {
        let mut tc = Timecode::from_frame(&self.frame, true);
        tc.date = tc.date.map(|d| d.shifted(forward));
        tc.write_to(&mut self.frame);
        self.frame.set_parity(self.standard);
    }
}

impl FrameEncoder for BiphaseEncoder {
    fn encode_byte(&mut self, index: usize, speed: f64) {
        if index >= LTC_FRAME_BYTES || speed == 0.0 {
            return;
        }
        let byte = self.frame.to_bytes(self.standard)[index];
        let spb = self.samples_per_bit / speed.abs();
        if speed > 0.0 {
            for bit in 0..8 {
                self.encode_bit((byte >> bit) & 1 == 1, spb);
            }
        } else {
            for bit in (0..8).rev() {
                self.encode_bit((byte >> bit) & 1 == 1, spb);
            }
        }
    }

    fn drain_buffer(&mut self, out: &mut Vec<f32>) {
        out.append(&mut self.buffer);
    }

    fn increment_timecode(&mut self) {
        if self.frame.increment(self.rate.nominal(), self.standard, true) && self.use_date {
            self.carry_date(true);
        }
    }

    fn decrement_timecode(&mut self) {
        if self.frame.decrement(self.rate.nominal(), self.standard, true) && self.use_date {
            self.carry_date(false);
        }
    }

    fn frame(&self) -> LtcFrame {
        self.frame
    }

    fn set_frame(&mut self, frame: LtcFrame) {
        self.frame = frame;
    }

    fn timecode(&self) -> Timecode {
        Timecode::from_frame(&self.frame, self.use_date)
    }

    fn set_timecode(&mut self, timecode: &Timecode) {
        timecode.write_to(&mut self.frame);
        self.frame.drop_frame = self.rate.drop_frame && self.rate.nominal() == 30;
        self.frame.set_parity(self.standard);
    }
}
