/// Logs `$err` at `$level`, or returns it when `$level` is at or above the
/// configured `fail_level` of `$state`.
#[macro_export]
macro_rules! log_or_err {
    ($state:expr, $level:expr, $err:expr $(,)?) => {{
        if $level <= $state.fail_level {
            return Err($err.into());
        } else {
            match $level {
                ::log::Level::Error => ::log::error!("{}", $err),
                ::log::Level::Warn => ::log::warn!("{}", $err),
                ::log::Level::Info => ::log::info!("{}", $err),
                ::log::Level::Debug => ::log::debug!("{}", $err),
                ::log::Level::Trace => ::log::trace!("{}", $err),
            }
        }
    }};
}

#[derive(thiserror::Error, Debug)]
pub enum TimecodeError {
    #[error("Invalid BCD digit in {field}: {value:#X}")]
    InvalidBcdDigit { field: &'static str, value: u8 },

    #[error("Timecode field out of range: {field} = {value}")]
    FieldOutOfRange { field: &'static str, value: i64 },

    #[error("Cannot parse timecode component `{0}`")]
    InvalidComponent(String),

    #[error("Invalid date `{0}`: expected DDMMYY or MM/DD/YY")]
    InvalidDate(String),

    #[error("Invalid timezone `{0}`: expected +HHMM")]
    InvalidTimezone(String),

    #[error("Frame count {0} is negative")]
    NegativeFrameCount(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum FrameRateError {
    #[error("Cannot parse frame rate `{0}`: expected NUM[/DEN][df|ndf]")]
    Unparsable(String),

    #[error("Frame rate numerator and denominator must be positive, got {num}/{den}")]
    NonPositive { num: i64, den: i64 },

    #[error("Unsupported MTC frame rate {0} fps, announcing 25 fps instead")]
    UnsupportedMtcRate(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum SignalError {
    #[error("Timecode discontinuity at sample {sample}: expected {expected}, got {actual}")]
    Discontinuity {
        sample: i64,
        expected: String,
        actual: String,
    },

    #[error("Run/stop {edge} edge ignored in state {state}")]
    IgnoredEdge {
        edge: &'static str,
        state: &'static str,
    },

    #[error("{count} MTC message(s) were scheduled for an already delivered cycle")]
    LateMidi { count: usize },

    #[error("Output ring buffer underrun ({0} total)")]
    Underrun(usize),

    #[error("Clock drift {drift_ms:+} ms exceeds the limit of {limit_ms} ms")]
    DriftExceeded { drift_ms: i64, limit_ms: i64 },
}

#[derive(thiserror::Error, Debug)]
pub enum TriggerError {
    #[error("Line {line}: missing command after timecode")]
    MissingCommand { line: usize },

    #[error("Line {line}: {source}")]
    BadTimecode {
        line: usize,
        #[source]
        source: TimecodeError,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum SegmentError {
    #[error("Clock segment is smaller than the shmTime record ({0} bytes)")]
    Truncated(u64),
}
