use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

use chrono::{DateTime, Local, NaiveTime, Timelike, Utc};

use crate::structs::frame::LtcFrame;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Wall-clock instant: seconds and nanoseconds since the Unix epoch.
///
/// `nanos` is always in `0..1_000_000_000`; negative instants carry the sign
/// in `secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct WallClock {
    pub secs: i64,
    pub nanos: u32,
}

impl Display for WallClock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

impl Add for WallClock {
    type Output = WallClock;

    fn add(self, rhs: WallClock) -> WallClock {
        WallClock::from_nanos(self.as_nanos() + rhs.as_nanos())
    }
}

impl Sub for WallClock {
    type Output = WallClock;

    fn sub(self, rhs: WallClock) -> WallClock {
        WallClock::from_nanos(self.as_nanos() - rhs.as_nanos())
    }
}

impl WallClock {
    pub const ZERO: WallClock = WallClock { secs: 0, nanos: 0 };

    pub fn new(secs: i64, nanos: u32) -> Self {
        Self::from_nanos(secs as i128 * NANOS_PER_SEC as i128 + nanos as i128)
    }

    pub fn from_nanos(nanos: i128) -> Self {
        Self {
            secs: nanos.div_euclid(NANOS_PER_SEC as i128) as i64,
            nanos: nanos.rem_euclid(NANOS_PER_SEC as i128) as u32,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::from_nanos((secs * NANOS_PER_SEC as f64).round() as i128)
    }

    pub fn as_nanos(&self) -> i128 {
        self.secs as i128 * NANOS_PER_SEC as i128 + self.nanos as i128
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.secs as f64 + self.nanos as f64 / NANOS_PER_SEC as f64
    }

    pub fn as_millis(&self) -> i64 {
        (self.as_nanos() / 1_000_000) as i64
    }

    /// Multiplies the duration by `factor`, rounding to the nearest
    /// nanosecond.
    pub fn scale(&self, factor: f64) -> Self {
        Self::from_nanos((self.as_nanos() as f64 * factor).round() as i128)
    }

    /// Milliseconds since midnight UTC.
    pub fn ms_of_day(&self) -> i64 {
        self.as_millis().rem_euclid(86_400_000)
    }

    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.secs, self.nanos)
    }

    pub fn to_local(&self) -> Option<DateTime<Local>> {
        self.to_utc().map(|t| t.with_timezone(&Local))
    }

    /// Local time of day, used in file names and markers.
    pub fn local_time_of_day(&self) -> Option<NaiveTime> {
        self.to_local()
            .and_then(|t| NaiveTime::from_hms_opt(t.hour(), t.minute(), t.second()))
    }
}

/// Sample-clock count paired with the wall clock it was captured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncPoint {
    pub sample_count: i64,
    pub wallclock: WallClock,
}

/// One decoded LTC frame with its position in the sample stream.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DecodedFrameEvent {
    pub frame: LtcFrame,
    /// Sample offset of the first bit.
    pub off_start: i64,
    /// Sample offset of the last bit.
    pub off_end: i64,
    /// Frame was read backwards.
    pub reverse: bool,
    /// Peak level in dBFS.
    pub volume_dbfs: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_keeps_nanos_normalised() {
        let a = WallClock::new(10, 900_000_000);
        let b = WallClock::new(0, 200_000_000);
        assert_eq!(a + b, WallClock::new(11, 100_000_000));
        assert_eq!(b - a, WallClock::from_nanos(-10_700_000_000));
        assert_eq!((b - a).secs, -11);
        assert_eq!((b - a).nanos, 300_000_000);
        assert_eq!(WallClock::new(2, 0).scale(0.25), WallClock::new(0, 500_000_000));
    }

    #[test]
    fn display_and_day_offset() {
        assert_eq!(WallClock::new(5, 42).to_string(), "5.000000042");
        assert_eq!(WallClock::new(86_400 + 1, 500_000_000).ms_of_day(), 1500);
    }
}
