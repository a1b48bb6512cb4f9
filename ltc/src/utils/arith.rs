//! Timecode arithmetic.
//!
//! Conversions between H:M:S:F digit groups and absolute frame counts,
//! SMPTE-12M drop-frame correction and carry normalisation in both
//! directions.

use crate::structs::frame::LtcFrame;
use crate::structs::framerate::FrameRate;
use crate::utils::errors::TimecodeError;

/// Index of the frame field in a digit array.
pub const SMPTE_FRAME: usize = 0;
/// Index of the seconds field in a digit array.
pub const SMPTE_SEC: usize = 1;
/// Index of the minutes field in a digit array.
pub const SMPTE_MIN: usize = 2;
/// Index of the hours field in a digit array.
pub const SMPTE_HOUR: usize = 3;
/// Days carried out of the hours field by [`normalize`].
pub const SMPTE_OVERFLOW: usize = 4;

/// Frames, seconds, minutes, hours and day overflow, lowest unit first.
pub type BcdArray = [i64; 5];

const SECONDS_PER_DAY: i64 = 86_400;

/// Drop-frame applies only to rates that round to 30 with the drop flag set.
pub fn uses_drop_frame(fps: f64, drop_frame: bool) -> bool {
    drop_frame && fps.round() as i64 == 30
}

/// SMPTE-12M drop-frame count: two frame numbers are skipped at the start of
/// every minute except minutes divisible by ten.
pub fn drop_frame_count(fps: f64, f: i64, s: i64, m: i64, h: i64) -> i64 {
    let fps_int = fps.round() as i64;
    let total_minutes = 60 * h + m;
    let dropped = 2 * (total_minutes - total_minutes / 10);
    fps_int * (3600 * h + 60 * m + s) + f - dropped
}

/// Converts a timecode to the number of frames elapsed since 00:00:00:00.
pub fn bcd_to_frame_count(fps: f64, drop_frame: bool, f: i64, s: i64, m: i64, h: i64) -> i64 {
    if uses_drop_frame(fps, drop_frame) {
        drop_frame_count(fps, f, s, m, h)
    } else {
        f + (fps * (s + 60 * m + 3600 * h) as f64) as i64
    }
}

/// Number of frames in one day at the integer rate `fps`.
pub fn frames_per_day(fps: u32, drop_frame: bool) -> i64 {
    let nominal = fps as i64 * SECONDS_PER_DAY;
    if drop_frame && fps == 30 {
        // 2 frames in 9 of every 10 minutes
        nominal - 2 * 9 * (24 * 6)
    } else {
        nominal
    }
}

/// Inverse of [`bcd_to_frame_count`] for integer rates, folded into one day.
///
/// Returns `[f, s, m, h]`.
pub fn frame_count_to_bcd(count: i64, fps: u32, drop_frame: bool) -> [i64; 4] {
    let fps = fps.max(1) as i64;
    let count = count.rem_euclid(frames_per_day(fps as u32, drop_frame));

    let count = if drop_frame && fps == 30 {
        let per_ten_minutes = 10 * 60 * fps - 9 * 2;
        let per_minute = 60 * fps - 2;
        let tens = count / per_ten_minutes;
        let rem = count % per_ten_minutes;
        // re-insert the skipped numbers so the plain split below works
        let skipped = if rem < 2 { 0 } else { 2 * ((rem - 2) / per_minute) };
        count + 18 * tens + skipped
    } else {
        count
    };

    let f = count % fps;
    let total_secs = count / fps;
    [
        f,
        total_secs % 60,
        (total_secs / 60) % 60,
        (total_secs / 3600) % 24,
    ]
}

/// Folds overflow and underflow of each field into the next larger one.
///
/// Moduli are `(fps, 60, 60, 24)`; negative fields borrow from the next field.
/// Whole days end up in [`SMPTE_OVERFLOW`].
pub fn normalize(bcd: &mut BcdArray, fps: i64) {
    let table = [fps.max(1), 60, 60, 24];
    for (i, &modulus) in table.iter().enumerate() {
        if bcd[i] >= modulus || bcd[i] < 0 {
            let carry = bcd[i].div_euclid(modulus);
            bcd[i] -= carry * modulus;
            bcd[i + 1] += carry;
        }
    }
}

/// Parses `[[[HH:]MM:]SS:]FF`, rightmost component first, then normalises.
pub fn parse_timecode_fields(text: &str, fps: i64) -> Result<BcdArray, TimecodeError> {
    let mut bcd: BcdArray = [0; 5];
    let parts: Vec<&str> = text.trim().rsplitn(SMPTE_OVERFLOW, ':').collect();

    for (i, part) in parts.iter().enumerate() {
        let part = part.trim();
        let value = if part.is_empty() {
            0
        } else {
            part.parse::<i64>()
                .map_err(|_| TimecodeError::InvalidComponent(part.to_string()))?
        };
        bcd[i] = value;
    }

    normalize(&mut bcd, fps);
    Ok(bcd)
}

/// Milliseconds since 00:00:00:00 for a digit array at `fps`.
pub fn bcd_to_ms(bcd: &BcdArray, fps: f64, drop_frame: bool) -> f64 {
    let frames = bcd_to_frame_count(
        fps,
        drop_frame,
        bcd[SMPTE_FRAME],
        bcd[SMPTE_SEC],
        bcd[SMPTE_MIN],
        bcd[SMPTE_HOUR],
    );
    1000.0 * frames as f64 / fps
}

/// Milliseconds since 00:00:00:00 for the time stored in `frame`.
pub fn frame_to_ms(frame: &LtcFrame, rate: &FrameRate) -> f64 {
    let fps = rate.fps();
    let frames = bcd_to_frame_count(
        fps,
        frame.drop_frame,
        frame.frames() as i64,
        frame.seconds() as i64,
        frame.minutes() as i64,
        frame.hours() as i64,
    );
    1000.0 * frames as f64 / fps
}

#[cfg(test)]
mod tests {
    use super::*;

    const DF: f64 = 30000.0 / 1001.0;

    #[test]
    fn non_drop_round_trip_covers_whole_day() {
        for fps in [24u32, 25, 30] {
            for count in (0..frames_per_day(fps, false)).step_by(7) {
                let [f, s, m, h] = frame_count_to_bcd(count, fps, false);
                assert_eq!(bcd_to_frame_count(fps as f64, false, f, s, m, h), count);
            }
        }
    }

    #[test]
    fn drop_frame_round_trip_covers_whole_day() {
        for count in (0..frames_per_day(30, true)).step_by(3) {
            let [f, s, m, h] = frame_count_to_bcd(count, 30, true);
            assert_eq!(bcd_to_frame_count(DF, true, f, s, m, h), count, "{h}:{m}:{s};{f}");
        }
    }

    #[test]
    fn drop_frame_matches_smpte_table() {
        // (h, m, s, f) -> published frame count at 29.97 DF
        let table = [
            ((0, 1, 0, 2), 1800),
            ((0, 2, 0, 2), 3598),
            ((0, 9, 0, 2), 16_184),
            ((0, 10, 0, 0), 17_982),
            ((0, 11, 0, 2), 19_782),
            ((1, 0, 0, 0), 107_892),
            ((23, 59, 59, 29), 2_589_407),
        ];
        for ((h, m, s, f), expected) in table {
            assert_eq!(bcd_to_frame_count(DF, true, f, s, m, h), expected);
        }
    }

    #[test]
    fn drop_frame_minute_boundary_skips_two_numbers() {
        for m in [1, 2, 3, 5, 9, 11] {
            let before = bcd_to_frame_count(DF, true, 29, 59, m - 1, 0);
            let after = bcd_to_frame_count(DF, true, 2, 0, m, 0);
            assert_eq!(after, before + 1, "minute {m}");
            assert_eq!(frame_count_to_bcd(before + 1, 30, true), [2, 0, m, 0]);
        }
        let before = bcd_to_frame_count(DF, true, 29, 59, 9, 0);
        assert_eq!(frame_count_to_bcd(before + 1, 30, true), [0, 0, 10, 0]);
    }

    #[test]
    fn drop_flag_ignored_for_other_rates() {
        assert_eq!(
            bcd_to_frame_count(25.0, true, 0, 0, 1, 0),
            bcd_to_frame_count(25.0, false, 0, 0, 1, 0)
        );
    }

    #[test]
    fn normalize_carries_both_directions() {
        let mut bcd = [30, 59, 59, 23, 0];
        normalize(&mut bcd, 25);
        assert_eq!(bcd, [5, 0, 0, 0, 1]);

        let mut bcd = [-1, 0, 0, 1, 0];
        normalize(&mut bcd, 25);
        assert_eq!(bcd, [24, 59, 59, 0, 0]);
    }

    #[test]
    fn frame_position_in_milliseconds() {
        let mut frame = LtcFrame::default();
        frame.set_time(0, 0, 1, 5);
        assert_eq!(frame_to_ms(&frame, &FrameRate::new(25, 1, false)), 1200.0);

        frame.set_time(0, 10, 0, 0);
        frame.drop_frame = true;
        let ms = frame_to_ms(&frame, &FrameRate::new(30000, 1001, true));
        assert!((ms - 600_000.0).abs() < 1.0, "{ms}");
    }

    #[test]
    fn parse_partial_timecodes() {
        assert_eq!(parse_timecode_fields("12", 25).unwrap(), [12, 0, 0, 0, 0]);
        assert_eq!(parse_timecode_fields("1:02", 25).unwrap(), [2, 1, 0, 0, 0]);
        assert_eq!(
            parse_timecode_fields("10:00:00:00", 25).unwrap(),
            [0, 0, 0, 10, 0]
        );
        assert_eq!(parse_timecode_fields("90", 25).unwrap(), [15, 3, 0, 0, 0]);
        assert!(parse_timecode_fields("aa:00", 25).is_err());
    }
}
