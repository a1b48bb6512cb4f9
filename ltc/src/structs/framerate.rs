use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::structs::frame::TvStandard;
use crate::utils::errors::FrameRateError;

/// Rational frame rate with drop-frame flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
    pub drop_frame: bool,
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::new(25, 1, false)
    }
}

impl Display for FrameRate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)?;
        } else {
            write!(f, "{}/{}", self.num, self.den)?;
        }
        f.write_str(if self.drop_frame { " df" } else { " ndf" })
    }
}

impl FromStr for FrameRate {
    type Err = FrameRateError;

    /// Parses `NUM[/DEN][df|ndf]`.
    ///
    /// Without a suffix, 30000/1001 defaults to drop-frame and everything
    /// else to non-drop.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let lower = text.to_ascii_lowercase();
        let (body, suffix) = if let Some(body) = lower.strip_suffix("ndf") {
            (body, Some(false))
        } else if let Some(body) = lower.strip_suffix("df") {
            (body, Some(true))
        } else {
            (lower.as_str(), None)
        };

        let parse_int = |s: &str| {
            s.trim()
                .parse::<i64>()
                .map_err(|_| FrameRateError::Unparsable(text.to_string()))
        };

        let (num, den) = match body.split_once('/') {
            Some((n, d)) => (parse_int(n)?, parse_int(d)?),
            None => (parse_int(body)?, 1),
        };

        if num <= 0 || den <= 0 {
            return Err(FrameRateError::NonPositive { num, den });
        }

        let (num, den) = (num as u32, den as u32);
        let drop_frame = suffix.unwrap_or(num == 30000 && den == 1001);
        Ok(Self::new(num, den, drop_frame))
    }
}

impl FrameRate {
    pub const fn new(num: u32, den: u32, drop_frame: bool) -> Self {
        Self {
            num,
            den,
            drop_frame,
        }
    }

    pub fn fps(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Integer frame count per second, `ceil(num/den)`.
    pub fn nominal(&self) -> u32 {
        self.num.div_ceil(self.den)
    }

    pub fn samples_per_frame(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.fps()
    }

    /// True for 29.97 fps (30000/1001 and friends).
    pub fn is_ntsc(&self) -> bool {
        (100.0 * self.fps()).floor() as i64 == 2997
    }

    pub fn tv_standard(&self) -> TvStandard {
        match self.nominal() {
            25 => TvStandard::Tv625_50,
            30 if self.drop_frame => TvStandard::Tv525_60,
            30 => TvStandard::Tv1125_60,
            _ => TvStandard::Film24,
        }
    }

    /// Notes about rates that SMPTE-12M does not describe. Empty when the
    /// rate is one of 24, 25, 29.97 df or 30 ndf.
    pub fn sanity_notes(&self) -> Vec<&'static str> {
        let fps = self.fps();
        let mut notes = Vec::new();

        if fps != 24.0 && fps != 25.0 && fps != 30.0 && !self.is_ntsc() {
            notes.push("No SMPTE standard covers the chosen fps; valid choices are 24, 25, 30000/1001 and 30");
        }
        if self.is_ntsc() && !self.drop_frame {
            notes.push("SMPTE-12M requires 29.97 fps to be drop-frame");
        }
        if !self.is_ntsc() && self.drop_frame {
            notes.push("Only 30000/1001 fps may use drop-frame counting");
        }
        notes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rates() {
        assert_eq!("25".parse::<FrameRate>().unwrap(), FrameRate::new(25, 1, false));
        assert_eq!(
            "30000/1001".parse::<FrameRate>().unwrap(),
            FrameRate::new(30000, 1001, true)
        );
        assert_eq!(
            "30000/1001ndf".parse::<FrameRate>().unwrap(),
            FrameRate::new(30000, 1001, false)
        );
        assert_eq!("30df".parse::<FrameRate>().unwrap(), FrameRate::new(30, 1, true));
        assert!("abc".parse::<FrameRate>().is_err());
        assert!("25/0".parse::<FrameRate>().is_err());
    }

    #[test]
    fn standards_and_notes() {
        let ntsc = FrameRate::new(30000, 1001, true);
        assert_eq!(ntsc.nominal(), 30);
        assert_eq!(ntsc.tv_standard(), TvStandard::Tv525_60);
        assert!(ntsc.sanity_notes().is_empty());

        assert_eq!(FrameRate::new(25, 1, false).tv_standard(), TvStandard::Tv625_50);
        assert_eq!(FrameRate::new(30, 1, false).tv_standard(), TvStandard::Tv1125_60);
        assert_eq!(FrameRate::new(24, 1, false).tv_standard(), TvStandard::Film24);

        assert_eq!(FrameRate::new(30000, 1001, false).sanity_notes().len(), 1);
        assert_eq!(FrameRate::new(48, 1, true).sanity_notes().len(), 2);
    }

    #[test]
    fn display() {
        assert_eq!(FrameRate::new(30000, 1001, true).to_string(), "30000/1001 df");
        assert_eq!(FrameRate::new(24, 1, false).to_string(), "24 ndf");
    }
}
