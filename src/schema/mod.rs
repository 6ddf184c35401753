//! Schema module - Configuration, protocol and record types for region telemetry.

mod config;
mod phase;
mod protocol;
mod region;

pub use config::*;
pub use phase::*;
pub use protocol::*;
pub use region::*;
