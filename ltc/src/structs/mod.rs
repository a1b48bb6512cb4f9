//! Data structures for timecode handling.
//!
//! Contains the packed LTC frame, the unpacked timecode with date and
//! timezone, rational frame rates and the events passed between the
//! real-time and consumer contexts.

pub mod event;
pub mod frame;
pub mod framerate;
pub mod timecode;
