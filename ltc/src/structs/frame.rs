//! SMPTE-12M linear timecode frame
//!
//! An [`LtcFrame`] holds the decoded contents of one 80-bit LTC word: BCD
//! digit groups, flag bits, user bits and the sync word. The position of the
//! parity bit and of the binary group flags depends on the television
//! standard, see [`TvStandard`].

use std::fmt::{Display, Formatter};

use crate::utils::arith::{bcd_to_frame_count, frame_count_to_bcd, frames_per_day};
use crate::utils::errors::TimecodeError;
use anyhow::{Result, bail, ensure};

/// Size of a packed LTC word in bytes.
pub const LTC_FRAME_BYTES: usize = 10;

/// Sync word occupying bits 64..79.
pub const LTC_SYNC_WORD: [u8; 2] = [0xFC, 0xBF];

/// Television standard, selecting flag/parity bit placement and frame
/// boundary alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TvStandard {
    /// 525 lines, 30 or 29.97 fps
    #[default]
    Tv525_60,
    /// 625 lines, 25 fps
    Tv625_50,
    /// 1125 lines, 30 fps
    Tv1125_60,
    /// 24 fps film
    Film24,
}

impl TvStandard {
    /// Offset in samples between the start of the LTC word and the start of
    /// the video frame it belongs to.
    pub fn frame_alignment(self, samples_per_frame: f64) -> i64 {
        match self {
            TvStandard::Tv525_60 => (samples_per_frame * 4.0 / 525.0).round() as i64,
            TvStandard::Tv625_50 => (samples_per_frame / 625.0).round() as i64,
            _ => 0,
        }
    }

    fn uses_625_layout(self) -> bool {
        self == TvStandard::Tv625_50
    }
}

impl Display for TvStandard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TvStandard::Tv525_60 => "525/60",
            TvStandard::Tv625_50 => "625/50",
            TvStandard::Tv1125_60 => "1125/60",
            TvStandard::Film24 => "film/24",
        })
    }
}

/// Selects which parts of a frame take part in a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompareMask {
    /// Compare user bits (including any date stored in them).
    pub user_bits: bool,
    /// Compare the parity bit.
    pub parity: bool,
    /// Compare colour frame and binary group flags.
    pub flags: bool,
}

impl CompareMask {
    pub const TIME_ONLY: CompareMask = CompareMask {
        user_bits: false,
        parity: false,
        flags: false,
    };

    pub const ALL: CompareMask = CompareMask {
        user_bits: true,
        parity: true,
        flags: true,
    };
}

/// Decoded content of one LTC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LtcFrame {
    pub frame_units: u8,
    pub frame_tens: u8,
    pub secs_units: u8,
    pub secs_tens: u8,
    pub mins_units: u8,
    pub mins_tens: u8,
    pub hours_units: u8,
    pub hours_tens: u8,

    pub drop_frame: bool,
    pub color_frame: bool,
    /// Binary group flags BGF0, BGF1 and BGF2.
    pub binary_group_flags: [bool; 3],
    /// Biphase mark phase correction (parity) bit.
    pub parity: bool,

    /// User bit nibbles 1 through 8.
    pub user_bits: [u8; 8],
}

impl Display for LtcFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}{}{:02}",
            self.hours(),
            self.minutes(),
            self.seconds(),
            if self.drop_frame { '.' } else { ':' },
            self.frames(),
        )
    }
}

impl LtcFrame {
    pub fn hours(&self) -> u8 {
        self.hours_tens * 10 + self.hours_units
    }

    pub fn minutes(&self) -> u8 {
        self.mins_tens * 10 + self.mins_units
    }

    pub fn seconds(&self) -> u8 {
        self.secs_tens * 10 + self.secs_units
    }

    pub fn frames(&self) -> u8 {
        self.frame_tens * 10 + self.frame_units
    }

    /// Stores `h:m:s:f` as BCD digit pairs.
    pub fn set_time(&mut self, h: u8, m: u8, s: u8, f: u8) {
        self.hours_units = h % 10;
        self.hours_tens = h / 10;
        self.mins_units = m % 10;
        self.mins_tens = m / 10;
        self.secs_units = s % 10;
        self.secs_tens = s / 10;
        self.frame_units = f % 10;
        self.frame_tens = f / 10;
    }

    /// Frames since 00:00:00:00 at the integer rate `fps`.
    pub fn frame_count(&self, fps: u32) -> i64 {
        bcd_to_frame_count(
            fps as f64,
            self.drop_frame,
            self.frames() as i64,
            self.seconds() as i64,
            self.minutes() as i64,
            self.hours() as i64,
        )
    }

    /// Advances the frame by one at `fps`, wrapping at midnight.
    ///
    /// Returns `true` when the time wrapped past 23:59:59, so the caller can
    /// carry into a date.
    pub fn increment(&mut self, fps: u32, standard: TvStandard, update_parity: bool) -> bool {
        self.step(1, fps, standard, update_parity)
    }

    /// Moves the frame back by one at `fps`, wrapping at midnight.
    ///
    /// Returns `true` when the time wrapped below 00:00:00:00.
    pub fn decrement(&mut self, fps: u32, standard: TvStandard, update_parity: bool) -> bool {
        self.step(-1, fps, standard, update_parity)
    }

    fn step(&mut self, delta: i64, fps: u32, standard: TvStandard, update_parity: bool) -> bool {
        let drop = self.drop_frame && fps == 30;
        let day = frames_per_day(fps, drop);
        let next = self.frame_count(fps) + delta;
        let wrapped = next < 0 || next >= day;
        let [f, s, m, h] = frame_count_to_bcd(next, fps, drop);
        self.set_time(h as u8, m as u8, s as u8, f as u8);

        if update_parity {
            self.set_parity(standard);
        }
        wrapped
    }

    /// Compares the two frames under `mask`.
    pub fn matches(&self, other: &LtcFrame, mask: CompareMask) -> bool {
        let time = |fr: &LtcFrame| {
            [
                fr.frame_units,
                fr.frame_tens,
                fr.secs_units,
                fr.secs_tens,
                fr.mins_units,
                fr.mins_tens,
                fr.hours_units,
                fr.hours_tens,
            ]
        };
        if time(self) != time(other) || self.drop_frame != other.drop_frame {
            return false;
        }
        if mask.user_bits && self.user_bits != other.user_bits {
            return false;
        }
        if mask.parity && self.parity != other.parity {
            return false;
        }
        if mask.flags
            && (self.color_frame != other.color_frame
                || self.binary_group_flags != other.binary_group_flags)
        {
            return false;
        }
        true
    }

    /// Sets the parity bit so the packed 80-bit word has an even number of
    /// ones.
    pub fn set_parity(&mut self, standard: TvStandard) {
        self.parity = false;
        let ones: u32 = self
            .to_bytes(standard)
            .iter()
            .map(|b| b.count_ones())
            .sum();
        self.parity = ones % 2 == 1;
    }

    /// Packs the frame into the 80-bit SMPTE-12M word, least significant bit
    /// of each byte first on the wire.
    pub fn to_bytes(&self, standard: TvStandard) -> [u8; LTC_FRAME_BYTES] {
        let u = &self.user_bits;
        let [bgf0, bgf1, bgf2] = self.binary_group_flags.map(u8::from);
        let parity = self.parity as u8;
        let (bit27, bit43, bit59) = if standard.uses_625_layout() {
            (bgf0, bgf2, parity)
        } else {
            (parity, bgf0, bgf2)
        };

        [
            (self.frame_units & 0xF) | (u[0] & 0xF) << 4,
            (self.frame_tens & 0x3)
                | (self.drop_frame as u8) << 2
                | (self.color_frame as u8) << 3
                | (u[1] & 0xF) << 4,
            (self.secs_units & 0xF) | (u[2] & 0xF) << 4,
            (self.secs_tens & 0x7) | bit27 << 3 | (u[3] & 0xF) << 4,
            (self.mins_units & 0xF) | (u[4] & 0xF) << 4,
            (self.mins_tens & 0x7) | bit43 << 3 | (u[5] & 0xF) << 4,
            (self.hours_units & 0xF) | (u[6] & 0xF) << 4,
            (self.hours_tens & 0x3) | bgf1 << 2 | bit59 << 3 | (u[7] & 0xF) << 4,
            LTC_SYNC_WORD[0],
            LTC_SYNC_WORD[1],
        ]
    }

    /// Unpacks an 80-bit SMPTE-12M word.
    pub fn from_bytes(buffer: &[u8], standard: TvStandard) -> Result<Self> {
        ensure!(
            buffer.len() >= LTC_FRAME_BYTES,
            "Insufficient data for parsing an LTC frame"
        );

        let lo = |i: usize| buffer[i] & 0xF;
        let hi = |i: usize| buffer[i] >> 4;
        let bit = |i: usize, n: u8| (buffer[i] >> n) & 1 == 1;

        let (bgf0, bgf2, parity) = if standard.uses_625_layout() {
            (bit(3, 3), bit(5, 3), bit(7, 3))
        } else {
            (bit(5, 3), bit(7, 3), bit(3, 3))
        };

        let frame = LtcFrame {
            frame_units: lo(0),
            frame_tens: buffer[1] & 0x3,
            secs_units: lo(2),
            secs_tens: buffer[3] & 0x7,
            mins_units: lo(4),
            mins_tens: buffer[5] & 0x7,
            hours_units: lo(6),
            hours_tens: buffer[7] & 0x3,
            drop_frame: bit(1, 2),
            color_frame: bit(1, 3),
            binary_group_flags: [bgf0, bit(7, 2), bgf2],
            parity,
            user_bits: [hi(0), hi(1), hi(2), hi(3), hi(4), hi(5), hi(6), hi(7)],
        };

        for (field, value) in [
            ("frame units", frame.frame_units),
            ("seconds units", frame.secs_units),
            ("minutes units", frame.mins_units),
            ("hours units", frame.hours_units),
        ] {
            if value > 9 {
                bail!(TimecodeError::InvalidBcdDigit { field, value });
            }
        }

        Ok(frame)
    }

    /// User bits as a hexadecimal string, nibble 8 first.
    pub fn user_bits_hex(&self) -> String {
        self.user_bits
            .iter()
            .rev()
            .map(|n| format!("{:X}", n & 0xF))
            .collect()
    }

    /// Stores up to 8 decimal digits of `value` in the user bits, least
    /// significant digit in nibble 1.
    pub fn set_user_bits_decimal(&mut self, mut value: u32) {
        for nibble in self.user_bits.iter_mut() {
            *nibble = (value % 10) as u8;
            value /= 10;
        }
    }
}
