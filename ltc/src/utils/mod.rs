//! Utility functions and supporting infrastructure.
//!
//! Provides timecode arithmetic, error types, wall-clock sources and the
//! wake-up primitives shared by the real-time and consumer contexts.

pub mod arith;
pub mod clock;
pub mod errors;
pub mod wakeup;
