pub mod command;
pub mod dump;
pub mod generate;
pub mod mtc;
pub mod ntp;
pub mod progress;
pub mod replay;
pub mod trigger;
