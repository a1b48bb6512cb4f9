use log::{debug, info};

use crate::structs::event::DecodedFrameEvent;
use crate::structs::frame::{CompareMask, LtcFrame, TvStandard};

/// Frames that must be seen before a rate window may close.
pub const MIN_WINDOW_FRAMES: u32 = 40;

/// Rate assumed for continuity checks inside a detection window. The BCD
/// frame field holds at most 39.
const UNKNOWN_RATE_GUESS: u32 = 40;

/// How frame number 0 is treated by the [`DiscontinuityDetector`].
///
/// At rates the detector does not know yet, the step across a second
/// boundary is unreliable; it is accepted as a resynchronisation point.
/// That is the step onto frame 0 when playing forward and the step off
/// frame 0 when playing in reverse. The whole frame number is compared, so
/// frames 10 and 20 are checked as usual.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FuzzyPolicy {
    /// Every frame is checked.
    #[default]
    Strict,
    /// Second boundaries (frame 0 on the side of the step entering the
    /// second) never count as a discontinuity.
    SkipFrameZero,
}

/// Flags frames that do not follow their predecessor.
#[derive(Debug, Clone)]
pub struct DiscontinuityDetector {
    prev: Option<LtcFrame>,
    mask: CompareMask,
    policy: FuzzyPolicy,
    standard: TvStandard,
    last_expected: Option<LtcFrame>,
}

impl Default for DiscontinuityDetector {
    fn default() -> Self {
        Self::new(CompareMask::TIME_ONLY, FuzzyPolicy::Strict)
    }
}

impl DiscontinuityDetector {
    pub fn new(mask: CompareMask, policy: FuzzyPolicy) -> Self {
        Self {
            prev: None,
            mask,
            policy,
            standard: TvStandard::default(),
            last_expected: None,
        }
    }

    /// Selects the parity bit position used when the mask includes parity.
    pub fn with_standard(mut self, standard: TvStandard) -> Self {
        self.standard = standard;
        self
    }

    /// Checks `event` against the previous frame advanced by one frame at
    /// `fps` (backward when the event was read in reverse). The previous
    /// frame is replaced by the current one in every case.
    ///
    /// The first frame after construction or [`reset`](Self::reset) is
    /// never a discontinuity.
    pub fn check(&mut self, event: &DecodedFrameEvent, fps: u32) -> bool {
        let current = event.frame;
        let Some(mut expected) = self.prev.replace(current) else {
            self.last_expected = None;
            return false;
        };

        let boundary = if event.reverse {
            expected.frames() == 0
        } else {
            current.frames() == 0
        };
        if self.policy == FuzzyPolicy::SkipFrameZero && boundary {
            self.last_expected = None;
            return false;
        }

        let fps = fps.max(1);
        if event.reverse {
            expected.decrement(fps, self.standard, self.mask.parity);
        } else {
            expected.increment(fps, self.standard, self.mask.parity);
        }
        self.last_expected = Some(expected);

        !expected.matches(&current, self.mask)
    }

    /// Predicted frame of the last [`check`](Self::check), if one was made.
    pub fn expected(&self) -> Option<&LtcFrame> {
        self.last_expected.as_ref()
    }

    pub fn reset(&mut self) {
        self.prev = None;
        self.last_expected = None;
    }
}

/// A closed rate-detection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectedRate {
    /// Frames per second, rounded up for drop-frame timecode.
    pub fps: u32,
    pub drop_frame: bool,
    /// The rate differs from the previously detected one.
    pub changed: bool,
}

/// Infers the integer frame rate from the highest frame number observed.
///
/// A window closes once more than [`MIN_WINDOW_FRAMES`] frames were seen and
/// the count exceeds the maximum frame number, i.e. at least one full second
/// of frames was observed.
#[derive(Debug, Clone)]
pub struct FrameRateTracker {
    max_frame: u32,
    count: u32,
    fps: Option<u32>,
    continuity: DiscontinuityDetector,
}

impl Default for FrameRateTracker {
    fn default() -> Self {
        Self {
            max_frame: 0,
            count: 0,
            fps: None,
            continuity: DiscontinuityDetector::new(
                CompareMask::TIME_ONLY,
                FuzzyPolicy::SkipFrameZero,
            ),
        }
    }
}

impl FrameRateTracker {
    /// Starts with a known rate, used until a window closes.
    pub fn with_initial(fps: u32) -> Self {
        Self {
            fps: Some(fps),
            ..Self::default()
        }
    }

    /// Last detected (or initial) rate.
    pub fn fps(&self) -> Option<u32> {
        self.fps
    }

    /// Feeds one frame, returning the rate whenever a window closes.
    pub fn observe(&mut self, event: &DecodedFrameEvent) -> Option<DetectedRate> {
        let frame_no = event.frame.frames() as u32;

        // frame numbers are only comparable within a continuous run; the
        // last rate may be stale, so frame numbers up to 39 are accepted
        if self.continuity.check(event, UNKNOWN_RATE_GUESS) {
            debug!("Rate window restarted at {}", event.frame);
            self.max_frame = 0;
            self.count = 0;
        }

        self.max_frame = self.max_frame.max(frame_no);
        self.count += 1;

        if self.count > MIN_WINDOW_FRAMES && self.count > self.max_frame {
            let fps = self.max_frame + 1;
            let changed = self.fps != Some(fps);
            if changed {
                info!(
                    "Detected {fps}{} fps",
                    if event.frame.drop_frame { " df" } else { "" }
                );
            }
            self.fps = Some(fps);
            self.max_frame = 0;
            self.count = 0;
            return Some(DetectedRate {
                fps,
                drop_frame: event.frame.drop_frame,
                changed,
            });
        }
        None
    }

    /// Discards the current window, keeping the last detected rate.
    pub fn reset(&mut self) {
        self.max_frame = 0;
        self.count = 0;
        self.continuity.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::arith::frame_count_to_bcd;

    fn event_at(count: i64, fps: u32, drop_frame: bool, reverse: bool) -> DecodedFrameEvent {
        let [f, s, m, h] = frame_count_to_bcd(count, fps, drop_frame);
        let mut frame = LtcFrame {
            drop_frame,
            ..Default::default()
        };
        frame.set_time(h as u8, m as u8, s as u8, f as u8);
        DecodedFrameEvent {
            frame,
            reverse,
            ..Default::default()
        }
    }

    #[test]
    fn single_discontinuity_in_linear_run() {
        let n = 200;
        let mut detector = DiscontinuityDetector::default();
        let flagged: Vec<i64> = (0..n)
            .map(|i| if i >= n / 2 { i + 50 } else { i })
            .enumerate()
            .filter(|(_, count)| detector.check(&event_at(*count, 25, false, false), 25))
            .map(|(i, _)| i as i64)
            .collect();
        assert_eq!(flagged, vec![n / 2]);
    }

    #[test]
    fn reverse_run_is_continuous() {
        let mut detector = DiscontinuityDetector::default();
        for count in (0..100).rev() {
            assert!(!detector.check(&event_at(count, 30, true, true), 30));
        }
        // forward frame read in reverse is a break
        assert!(detector.check(&event_at(1, 30, true, true), 30));
    }

    #[test]
    fn frame_zero_policy() {
        let mut strict = DiscontinuityDetector::default();
        let mut fuzzy = DiscontinuityDetector::new(CompareMask::TIME_ONLY, FuzzyPolicy::SkipFrameZero);
        for d in [&mut strict, &mut fuzzy] {
            d.check(&event_at(10, 25, false, false), 25);
        }
        // 00:00:01:00 does not follow 00:00:00:10
        assert!(strict.check(&event_at(25, 25, false, false), 25));
        assert!(!fuzzy.check(&event_at(25, 25, false, false), 25));
        // frame 20 has a zero units digit but is checked
        assert!(fuzzy.check(&event_at(45, 25, false, false), 25));
    }

    #[test]
    fn frame_zero_policy_follows_direction() {
        let mut fuzzy = DiscontinuityDetector::new(CompareMask::TIME_ONLY, FuzzyPolicy::SkipFrameZero);
        // 00:00:02:00 back to 00:00:01:24 is not predictable at 40 fps
        fuzzy.check(&event_at(50, 25, false, true), 40);
        assert!(!fuzzy.check(&event_at(49, 25, false, true), 40));
        // landing on frame 0 in reverse is checked
        fuzzy.check(&event_at(30, 25, false, true), 40);
        assert!(fuzzy.check(&event_at(25, 25, false, true), 40));
    }

    #[test]
    fn user_bits_only_matter_when_masked() {
        let mut a = event_at(0, 25, false, false);
        let mut b = event_at(1, 25, false, false);
        a.frame.user_bits[0] = 1;
        b.frame.user_bits[0] = 2;

        let mut time_only = DiscontinuityDetector::default();
        time_only.check(&a, 25);
        assert!(!time_only.check(&b, 25));

        let mut with_user = DiscontinuityDetector::new(
            CompareMask {
                user_bits: true,
                ..CompareMask::TIME_ONLY
            },
            FuzzyPolicy::Strict,
        );
        with_user.check(&a, 25);
        assert!(with_user.check(&b, 25));
    }

    #[test]
    fn detects_rate_after_one_window() {
        for (fps, drop_frame) in [(24, false), (25, false), (30, true), (30, false)] {
            let mut tracker = FrameRateTracker::default();
            let mut detected = None;
            for count in 0..(fps as i64 * 3) {
                if let Some(rate) = tracker.observe(&event_at(count, fps, drop_frame, false)) {
                    detected.get_or_insert(rate);
                }
            }
            let rate = detected.expect("window never closed");
            assert_eq!(rate.fps, fps);
            assert_eq!(rate.drop_frame, drop_frame);
            assert!(rate.changed);
        }
    }

    #[test]
    fn rate_reports_every_closed_window() {
        let mut tracker = FrameRateTracker::with_initial(25);
        let closures: Vec<DetectedRate> = (0..250)
            .filter_map(|c| tracker.observe(&event_at(c, 25, false, false)))
            .collect();
        assert!(closures.len() >= 4);
        assert!(closures.iter().all(|r| r.fps == 25 && !r.changed));
    }

    #[test]
    fn redetects_faster_rate_forward() {
        let mut tracker = FrameRateTracker::with_initial(25);
        let detected: Vec<DetectedRate> = (0..300)
            .filter_map(|c| tracker.observe(&event_at(c, 30, false, false)))
            .collect();
        let first = detected.first().expect("window never closed");
        assert_eq!(first.fps, 30);
        assert!(first.changed);
        assert!(detected.iter().all(|r| r.fps == 30));
    }

    #[test]
    fn redetects_slower_rate_in_reverse() {
        let mut tracker = FrameRateTracker::with_initial(30);
        let detected: Vec<DetectedRate> = (0..300)
            .rev()
            .filter_map(|c| tracker.observe(&event_at(c, 25, false, true)))
            .collect();
        let first = detected.first().expect("window never closed");
        assert_eq!(first.fps, 25);
        assert!(first.changed);
        assert_eq!(tracker.fps(), Some(25));
    }

    #[test]
    fn discontinuity_restarts_window() {
        let mut tracker = FrameRateTracker::default();
        for c in 0..30 {
            assert!(tracker.observe(&event_at(c, 25, false, false)).is_none());
        }
        // jump forward by 3s + 7 frames
        for c in 112..140 {
            assert!(tracker.observe(&event_at(c, 25, false, false)).is_none());
        }
    }
}
