//! Human-readable timecode
//!
//! [`Timecode`] is the unpacked form of an [`LtcFrame`]: plain integer
//! fields plus the optional SMPTE 309M date and timezone carried in the user
//! bits.

use std::fmt::{Display, Formatter};

use crate::structs::frame::LtcFrame;
use crate::structs::framerate::FrameRate;
use crate::utils::arith::{BcdArray, SMPTE_OVERFLOW, frame_count_to_bcd, parse_timecode_fields};
use crate::utils::errors::TimecodeError;
use anyhow::{Result, bail};
use chrono::{Datelike, Days, NaiveDate};
use log::warn;

/// Timezone code meaning "user-defined offset" rather than a table entry.
pub const USER_DEFINED_TIMEZONE: u8 = 0x38;

/// SMPTE-12M timezone codes and their offsets in minutes east of UTC.
const TIMEZONES: &[(u8, i32)] = &[
    (0x00, 0),
    (0x01, -60),
    (0x02, -120),
    (0x03, -180),
    (0x04, -240),
    (0x05, -300),
    (0x06, -360),
    (0x07, -420),
    (0x08, -480),
    (0x09, -540),
    (0x0A, -30),
    (0x0B, -390),
    (0x0C, -570),
    (0x0D, 570),
    (0x0E, 390),
    (0x0F, 30),
    (0x10, -600),
    (0x11, -660),
    (0x12, -720),
    (0x13, 780),
    (0x14, 600),
    (0x15, 660),
    (0x16, 720),
    (0x17, 540),
    (0x18, 480),
    (0x19, 420),
    (0x1A, -90),
    (0x1B, -630),
    (0x1C, -690),
    (0x1D, 690),
    (0x1E, 330),
    (0x1F, 270),
    (0x20, 360),
    (0x21, 300),
    (0x22, 240),
    (0x23, 180),
    (0x24, 120),
    (0x25, 60),
    (0x26, -450),
    (0x27, -510),
    (0x28, -750),
    (0x29, 750),
    (0x2A, 510),
    (0x2B, 450),
    (0x2C, 210),
    (0x2D, 150),
    (0x2E, 90),
];

/// Offset in minutes east of UTC for a timezone code.
pub fn timezone_offset(code: u8) -> Option<i32> {
    TIMEZONES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, minutes)| *minutes)
}

/// Timezone code for an offset in minutes east of UTC.
pub fn timezone_code(minutes: i32) -> Option<u8> {
    TIMEZONES
        .iter()
        .find(|(_, m)| *m == minutes)
        .map(|(code, _)| *code)
}

/// Formats minutes east of UTC as `+HHMM`.
pub fn format_timezone(minutes: i32) -> String {
    format!(
        "{}{:02}{:02}",
        if minutes < 0 { '-' } else { '+' },
        minutes.abs() / 60,
        minutes.abs() % 60
    )
}

/// Parses `+HHMM` / `-HHMM` into minutes east of UTC.
pub fn parse_timezone(text: &str) -> Result<i32, TimecodeError> {
    let text = text.trim();
    let value: i32 = text
        .parse()
        .map_err(|_| TimecodeError::InvalidTimezone(text.to_string()))?;
    let hh = value / 100;
    Ok(60 * hh + (value - 100 * hh) % 60)
}

/// Calendar date stored in the user bits, two-digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateStamp {
    pub years: u8,
    pub months: u8,
    pub days: u8,
}

impl Display for DateStamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}-{:02}-{:02}", self.years, self.months, self.days)
    }
}

impl From<NaiveDate> for DateStamp {
    fn from(date: NaiveDate) -> Self {
        Self {
            years: (date.year().rem_euclid(100)) as u8,
            months: date.month() as u8,
            days: date.day() as u8,
        }
    }
}

impl DateStamp {
    /// Parses `DDMMYY` or `MM/DD/YY`.
    pub fn parse(text: &str) -> Result<Self, TimecodeError> {
        let text = text.trim();
        let bad = || TimecodeError::InvalidDate(text.to_string());

        let (days, months, years) = if text.contains('/') {
            let parts: Vec<&str> = text.split('/').collect();
            let field = |i: usize| -> Result<u32, TimecodeError> {
                parts
                    .get(i)
                    .ok_or_else(bad)?
                    .trim()
                    .parse()
                    .map_err(|_| bad())
            };
            let years = if parts.len() > 2 { field(2)? } else { 12 };
            (field(1)?, field(0)?, years)
        } else {
            if text.len() != 6 {
                return Err(bad());
            }
            let value: u32 = text.parse().map_err(|_| bad())?;
            (value / 10000, (value / 100) % 100, value % 100)
        };

        if !(1..=31).contains(&days) || !(1..=12).contains(&months) || years > 99 {
            return Err(bad());
        }

        Ok(Self {
            years: years as u8,
            months: months as u8,
            days: days as u8,
        })
    }

    /// Calendar date, assuming the 21st century.
    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(
            2000 + self.years as i32,
            self.months as u32,
            self.days as u32,
        )
    }

    /// Shifts the date by one day forward or backward.
    pub fn shifted(&self, forward: bool) -> Self {
        let Some(date) = self.to_naive() else {
            return *self;
        };
        let shifted = if forward {
            date.checked_add_days(Days::new(1))
        } else {
            date.checked_sub_days(Days::new(1))
        };
        shifted.map(Self::from).unwrap_or(*self)
    }

    fn read(frame: &LtcFrame) -> Self {
        let u = &frame.user_bits;
        Self {
            days: u[0] + u[1] * 10,
            months: u[2] + u[3] * 10,
            years: u[4] + u[5] * 10,
        }
    }

    fn write(&self, frame: &mut LtcFrame) {
        let u = &mut frame.user_bits;
        u[0] = self.days % 10;
        u[1] = self.days / 10;
        u[2] = self.months % 10;
        u[3] = self.months / 10;
        u[4] = self.years % 10;
        u[5] = self.years / 10;
    }
}

/// Timecode with optional date and timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub date: Option<DateStamp>,
    /// Minutes east of UTC.
    pub timezone: Option<i32>,
}

impl Display for Timecode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(date) = &self.date {
            write!(f, "{date} ")?;
        }
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )?;
        if let Some(tz) = self.timezone {
            write!(f, " {}", format_timezone(tz))?;
        }
        Ok(())
    }
}

impl Timecode {
    pub fn new(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
            date: None,
            timezone: None,
        }
    }

    /// Reads the time from `frame`, and date/timezone from its user bits when
    /// `use_date` is set.
    pub fn from_frame(frame: &LtcFrame, use_date: bool) -> Self {
        let mut tc = Self::new(frame.hours(), frame.minutes(), frame.seconds(), frame.frames());
        if use_date {
            tc.date = Some(DateStamp::read(frame));
            let code = frame_timezone_code(frame);
            tc.timezone = timezone_offset(code);
            if tc.timezone.is_none() && code != USER_DEFINED_TIMEZONE {
                warn!("Unknown LTC timezone code {code:#04X}");
            }
        }
        tc
    }

    /// Writes time, date and timezone into `frame`.
    ///
    /// Frames with a date also get the binary group flags that announce a
    /// SMPTE 309M date (BGF0 clear, BGF2 set).
    pub fn write_to(&self, frame: &mut LtcFrame) {
        frame.set_time(self.hours, self.minutes, self.seconds, self.frames);
        if let Some(date) = &self.date {
            date.write(frame);
            let code = match self.timezone {
                Some(minutes) => timezone_code(minutes).unwrap_or_else(|| {
                    warn!(
                        "Timezone {} has no SMPTE code, using user-defined",
                        format_timezone(minutes)
                    );
                    USER_DEFINED_TIMEZONE
                }),
                None => 0x00,
            };
            frame.user_bits[6] = code & 0xF;
            frame.user_bits[7] = code >> 4;
            frame.binary_group_flags[0] = false;
            frame.binary_group_flags[2] = true;
        }
    }

    /// Timecode at `count` frames after midnight.
    pub fn from_frame_count(count: i64, rate: &FrameRate) -> Self {
        let [f, s, m, h] = frame_count_to_bcd(count, rate.nominal(), rate.drop_frame);
        Self::new(h as u8, m as u8, s as u8, f as u8)
    }

    /// Parses `[[[HH:]MM:]SS:]FF`, carrying overflowing fields.
    pub fn parse(text: &str, rate: &FrameRate) -> Result<Self> {
        let bcd: BcdArray = parse_timecode_fields(text, rate.nominal() as i64)?;
        if bcd[SMPTE_OVERFLOW] != 0 {
            bail!(TimecodeError::FieldOutOfRange {
                field: "days",
                value: bcd[SMPTE_OVERFLOW],
            });
        }
        Ok(Self::new(bcd[3] as u8, bcd[2] as u8, bcd[1] as u8, bcd[0] as u8))
    }

    /// Milliseconds since 00:00:00:00.
    pub fn to_ms(&self, rate: &FrameRate) -> f64 {
        let mut frame = LtcFrame {
            drop_frame: rate.drop_frame,
            ..Default::default()
        };
        frame.set_time(self.hours, self.minutes, self.seconds, self.frames);
        crate::utils::arith::frame_to_ms(&frame, rate)
    }
}

/// Raw timezone code stored in user nibbles 7 and 8.
pub fn frame_timezone_code(frame: &LtcFrame) -> u8 {
    frame.user_bits[6] + (frame.user_bits[7] << 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_and_timezone_round_trip_through_user_bits() {
        let tc = Timecode {
            date: Some(DateStamp {
                years: 24,
                months: 2,
                days: 29,
            }),
            timezone: Some(60),
            ..Timecode::new(10, 20, 30, 12)
        };
        let mut frame = LtcFrame::default();
        tc.write_to(&mut frame);
        assert_eq!(frame_timezone_code(&frame), 0x25);
        assert_eq!(frame.binary_group_flags, [false, false, true]);
        assert_eq!(Timecode::from_frame(&frame, true), tc);
        assert_eq!(tc.to_string(), "24-02-29 10:20:30:12 +0100");
    }

    #[test]
    fn user_defined_timezone_has_no_offset() {
        let mut frame = LtcFrame::default();
        frame.user_bits[6] = 0x8;
        frame.user_bits[7] = 0x3;
        let tc = Timecode::from_frame(&frame, true);
        assert_eq!(tc.timezone, None);
        assert_eq!(frame_timezone_code(&frame), USER_DEFINED_TIMEZONE);
    }

    #[test]
    fn parse_dates() {
        let d = DateStamp::parse("201012").unwrap();
        assert_eq!((d.days, d.months, d.years), (20, 10, 12));
        let d = DateStamp::parse("10/20/12").unwrap();
        assert_eq!((d.days, d.months, d.years), (20, 10, 12));
        assert!(DateStamp::parse("321399").is_err());
        assert_eq!(
            DateStamp::parse("311224").unwrap().shifted(true),
            DateStamp {
                years: 25,
                months: 1,
                days: 1
            }
        );
    }

    #[test]
    fn parse_timezones() {
        assert_eq!(parse_timezone("+0130").unwrap(), 90);
        assert_eq!(parse_timezone("-0530").unwrap(), -330);
        assert_eq!(format_timezone(-330), "-0530");
        assert_eq!(timezone_code(-330), None);
        assert_eq!(timezone_code(330), Some(0x1E));
    }

    #[test]
    fn parse_and_convert_timecode() {
        let rate = FrameRate::new(25, 1, false);
        let tc = Timecode::parse("1:00:00:00", &rate).unwrap();
        assert_eq!(tc, Timecode::new(1, 0, 0, 0));
        assert_eq!(tc.to_ms(&rate), 3_600_000.0);
        assert!(Timecode::parse("24:00:00:00", &rate).is_err());

        let df = FrameRate::new(30000, 1001, true);
        assert_eq!(Timecode::from_frame_count(1800, &df), Timecode::new(0, 1, 0, 2));
    }
}
