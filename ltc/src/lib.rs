//! ## Technical Overview
//!
//! Decoding, translation and generation of SMPTE/EBU Linear Timecode (LTC)
//! carried as an audio signal.
//!
//! ### Contexts
//!
//! Every pipeline is split in two halves. The real-time half runs once per
//! host period, never blocks and never allocates; it stamps the sample clock
//! against the wall clock, feeds the codec and moves results through
//! single-producer single-consumer rings. The consumer half does the rest.
//!
//! ### Decoding
//!
//! Decoded frames are checked for rate and continuity, placed on the wall
//! clock by interpolating between sync points and handed to a
//! [`FrameHandler`](process::decode::FrameHandler): a text log, MIDI Time
//! Code, NTP clock samples or trigger actions. An optional run/stop signal
//! gates output into recording windows.
//!
//! ### Generation
//!
//! The generator aligns the first frame to the wall clock at sub-frame
//! precision, keeps the output ring filled and measures drift between the
//! played timecode and the clock.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ltc::codec::replay::FrameReplay;
//! use ltc::process::decode::{DecodeSettings, TextLog, decode_channel};
//! use ltc::structs::framerate::FrameRate;
//! use ltc::utils::clock::SystemClock;
//!
//! let settings = DecodeSettings::new(48000, FrameRate::new(25, 1, false));
//! let decoder = FrameReplay::new(Vec::new());
//! let (mut producer, mut consumer) =
//!     decode_channel(settings, Box::new(decoder), Arc::new(SystemClock));
//!
//! // real-time context, once per period
//! let silence = [0.0f32; 1024];
//! producer.process(&[&silence], None, silence.len());
//!
//! // consumer context
//! let mut log = TextLog::new(std::io::stdout(), false);
//! consumer.drain(&mut log)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Codec seam.
///
/// - **Decoder** ([`codec::FrameDecoder`]): demodulated frames with sample offsets
/// - **Encoder** ([`codec::FrameEncoder`]): byte-wise modulation of the current frame
pub mod codec;

/// Processing stages.
///
/// 1. **Detection** ([`process::detect`]): frame rate and discontinuities
/// 2. **Correlation** ([`process::correlate`]): sample clock to wall clock
/// 3. **Translation** ([`process::mtc`], [`process::ntp`], [`process::trigger`])
/// 4. **Gating** ([`process::runstop`]): recording windows
/// 5. **Generation** ([`process::drift`], [`process::generate`])
pub mod process;

/// Data structures for timecode handling.
///
/// - **LTC Frames** ([`structs::frame`]): the packed 80-bit word
/// - **Timecode** ([`structs::timecode`]): time, date and timezone
/// - **Frame Rates** ([`structs::framerate`]): rational rates
/// - **Events** ([`structs::event`]): decoded frames, sync points, wall clock
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Arithmetic** ([`utils::arith`]): BCD and drop-frame counting
/// - **Clocks** ([`utils::clock`]): wall-clock sources
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Wake-up** ([`utils::wakeup`]): run state and signalling
pub mod utils;
