/// Frame-rate detection and continuity checks.
///
/// Provides the [`FrameRateTracker`](detect::FrameRateTracker) and the
/// [`DiscontinuityDetector`](detect::DiscontinuityDetector).
pub mod detect;

/// Sample-clock to wall-clock correlation.
///
/// Provides [`correlator_channel`](correlate::correlator_channel), which
/// splits into the real-time [`SyncWriter`](correlate::SyncWriter) and the
/// [`ClockCorrelator`](correlate::ClockCorrelator).
pub mod correlate;

/// MIDI Time Code sequencing and delivery.
pub mod mtc;

/// Run/stop signal detection and recording windows.
pub mod runstop;

/// Generator phase alignment and drift measurement.
pub mod drift;

/// Decode pipeline: real-time producer, consumer and text log.
///
/// Provides [`decode_channel`](decode::decode_channel) and the
/// [`FrameHandler`](decode::FrameHandler) trait.
pub mod decode;

/// Generator pipeline.
///
/// Provides [`generate_channel`](generate::generate_channel), which splits
/// into the [`Generator`](generate::Generator) and its real-time
/// [`GenerateProducer`](generate::GenerateProducer).
pub mod generate;

/// NTP shared-memory clock samples.
pub mod ntp;

/// Timecode-triggered actions.
pub mod trigger;
