use std::path::PathBuf;

use clap::{Args, Parser as ClapParser, Subcommand, ValueEnum};

#[derive(Debug, ClapParser)]
#[command(
    name       = env!("CARGO_PKG_NAME"),
    version    = env!("CARGO_PKG_VERSION"),
    long_version = concat!(
        env!("CARGO_PKG_VERSION"), "\nltc ", env!("LTC_VERSION"), "\nbuilt ", env!("BUILD_TIMESTAMP")
    ),
    author     = env!("CARGO_PKG_AUTHORS"),
    about      = "Tools for decoding, translating and generating SMPTE linear timecode",
    long_about = None,
)]
pub struct Cli {
    /// Set the log level
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub loglevel: LogLevel,

    /// Treat warnings as fatal errors (fail on first warning).
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain)]
    pub log_format: LogFormat,

    /// Show progress bars during operations.
    #[arg(long, global = true)]
    pub progress: bool,

    /// Choose an operation to perform.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level at which warnings become errors.
    pub fn fail_level(&self) -> log::Level {
        if self.strict {
            log::Level::Warn
        } else {
            log::Level::Error
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print decoded frames with wall-clock time.
    Dump(DumpArgs),

    /// Translate decoded LTC into MIDI time code.
    Mtc(MtcArgs),

    /// Feed decoded time of day to an NTP shared-memory segment.
    Ntp(NtpArgs),

    /// Run commands when the timecode passes given points.
    Trigger(TriggerArgs),

    /// Generate LTC audio locked to the system clock.
    Gen(GenArgs),
}

/// Options of the offline replay host.
#[derive(Debug, Args)]
pub struct ReplayArgs {
    /// Capture of demodulated frames, YAML (use "-" for stdin).
    #[arg(value_name = "CAPTURE")]
    pub input: PathBuf,

    /// Expected frame rate, NUM[/DEN][df|ndf]. Overrides the capture.
    #[arg(short, long, value_name = "RATE")]
    pub fps: Option<String>,

    /// Host period in samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 1024)]
    pub period: usize,

    /// Capture latency in samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 0)]
    pub capture_latency: i64,

    /// Playback latency in samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 0)]
    pub playback_latency: i64,

    /// Pace the host at real time on its own thread.
    #[arg(long)]
    pub realtime: bool,

    /// Wall clock at the first sample, RFC 3339 or Unix seconds. Defaults
    /// to now.
    #[arg(long, value_name = "TIME")]
    pub start_time: Option<String>,

    /// Run/stop signal as raw 32-bit float little-endian samples.
    #[arg(long, value_name = "PATH")]
    pub runstop_signal: Option<PathBuf>,

    /// Treat frames numbered 0 as resync points, not discontinuities.
    #[arg(long)]
    pub fuzzy: bool,
}

#[derive(Debug, Args)]
pub struct DumpArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Detect the frame rate from the signal.
    #[arg(short = 'F', long)]
    pub detect_fps: bool,

    /// Print the date and timezone from the user bits.
    #[arg(long)]
    pub use_date: bool,

    /// Only output frames while the run/stop signal is present.
    #[arg(short, long)]
    pub runstop: bool,

    /// Run/stop signal threshold, RMS of the filtered signal.
    #[arg(short = 'R', long, value_name = "LEVEL", default_value_t = 0.01)]
    pub rs_threshold: f32,

    /// High-pass filter coefficient of the run/stop signal, 0.1 to 1.
    #[arg(short = 'H', long, value_name = "ALPHA", default_value_t = 0.6)]
    pub highpass: f32,

    /// Write each run/stop window to PREFIX-YYYYmmdd-HHMMSS.tme.
    #[arg(short, long, value_name = "PREFIX")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct MtcArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Detect the frame rate from the signal.
    #[arg(short = 'F', long)]
    pub detect_fps: bool,

    /// Send full-frame sysex instead of quarter frames.
    #[arg(short, long)]
    pub sysex: bool,

    /// Announce 30 fps as drop-frame.
    #[arg(long)]
    pub force_drop: bool,

    /// Write MIDI events to this file instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct NtpArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// NTP SHM unit.
    #[arg(short, long, value_name = "UNIT", default_value_t = 0)]
    pub unit: u32,

    /// Ignore the date in the user bits and assume today.
    #[arg(short, long)]
    pub no_date: bool,

    /// File standing in for the shared-memory segment.
    #[arg(long, value_name = "PATH")]
    pub segment: PathBuf,
}

#[derive(Debug, Args)]
pub struct TriggerArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Action list, one `TIMECODE COMMAND` per line.
    #[arg(short, long, value_name = "PATH")]
    pub actions: PathBuf,

    /// Detect the frame rate from the signal.
    #[arg(short = 'F', long)]
    pub detect_fps: bool,

    /// Print each frame.
    #[arg(short, long)]
    pub print: bool,
}

#[derive(Debug, Args)]
pub struct GenArgs {
    /// Output Wave64 file.
    #[arg(value_name = "OUTPUT")]
    pub output: PathBuf,

    /// Frame rate, NUM[/DEN][df|ndf].
    #[arg(short, long, value_name = "RATE", default_value = "25")]
    pub fps: String,

    /// Sample rate of the output.
    #[arg(long, value_name = "HZ", default_value_t = 48000)]
    pub sample_rate: u32,

    /// Start timecode [[[HH:]MM:]SS:]FF instead of the time of day.
    #[arg(short, long, value_name = "TIMECODE")]
    pub timecode: Option<String>,

    /// Date in the user bits, DDMMYY or MM/DD/YY.
    #[arg(short, long, value_name = "DATE")]
    pub date: Option<String>,

    /// Timezone in the user bits, +HHMM.
    #[arg(short = 'z', long, value_name = "ZONE", allow_hyphen_values = true, conflicts_with = "minuteswest")]
    pub timezone: Option<String>,

    /// Timezone in the user bits, minutes west of UTC.
    #[arg(short, long, value_name = "MINUTES", allow_hyphen_values = true)]
    pub minuteswest: Option<i32>,

    /// User bits as a decimal number of up to 8 digits.
    #[arg(long, value_name = "NUMBER", conflicts_with = "date")]
    pub user_bits: Option<u32>,

    /// Output level in dBFS, -192 to 0.
    #[arg(short = 'g', long, value_name = "DBFS", allow_hyphen_values = true, default_value_t = -18.0)]
    pub volume: f64,

    /// Length of the output in seconds.
    #[arg(long, value_name = "SECONDS", default_value_t = 10.0)]
    pub duration: f64,

    /// Host period in samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 1024)]
    pub period: usize,

    /// Playback latency in samples.
    #[arg(long, value_name = "SAMPLES", default_value_t = 0)]
    pub playback_latency: i64,

    /// Resync when the drift exceeds the limit.
    #[arg(long)]
    pub auto_resync: bool,

    /// Drift limit in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 40)]
    pub drift_limit: i64,

    /// Seconds between drift reports; 0 disables them.
    #[arg(long, value_name = "SECONDS", default_value_t = 0.0)]
    pub drift_interval: f64,

    /// Simulated wall-clock speed relative to the sample clock, in ppm.
    #[arg(long, value_name = "PPM", allow_hyphen_values = true, default_value_t = 0.0)]
    pub clock_skew: f64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Disable logging output.
    Off,
    /// No output except errors.
    Error,
    /// Show warnings and errors.
    Warn,
    /// Show info, warnings and errors (default).
    Info,
    /// Show debug, info, warnings and errors.
    Debug,
    /// Show all log messages including trace.
    Trace,
}

impl LogLevel {
    /// Convert LogLevel to log::LevelFilter
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Colorized human-readable text.
    Plain,
    /// Structured JSON per log record.
    Json,
}
