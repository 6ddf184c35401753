//! Region Scope - snapshot timeline engine for region-based GC telemetry.
//!
//! This crate decodes the bit-packed per-region telemetry a region-based
//! garbage collector exports, aggregates it into immutable point-in-time
//! snapshots, and stores them in a chronological timeline whose cursor is
//! driven either live (following new samples) or by replaying a recorded log
//! at an adjustable speed.
//!
//! # Architecture
//!
//! - `schema`: Region, phase and protocol types plus session configuration
//! - `telemetry`: Word decoding, snapshots and the live counter source
//! - `replay`: Log reading and recording, the timeline and the playback clock
//! - `selection`: Compact region-index selection syntax
//! - `session`: Background worker for live polling or replay
//!
//! # Example
//!
//! ```rust,no_run
//! use region_scope::{
//!     replay::{CursorMode, LogReader, Timeline},
//!     selection::parse_selection,
//! };
//!
//! let snapshots = LogReader::new().parse("gc-regions.log")?;
//! let timeline = Timeline::new(CursorMode::Manual);
//! timeline.replace(snapshots, CursorMode::Manual)?;
//!
//! // Everything up to half a second after the first sample
//! let start = timeline.first_timestamp().unwrap_or(0);
//! timeline.advance_to(start + 500);
//!
//! if let Some(snapshot) = timeline.latest() {
//!     println!("Phase: {:?}", snapshot.phase());
//!     for index in parse_selection("0-3, 10")? {
//!         if let Some(region) = snapshot.region(index) {
//!             println!("region {index}: {:?} used={:.0}%", region.state(), region.used() * 100.0);
//!         }
//!     }
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod replay;
pub mod schema;
pub mod selection;
pub mod session;
pub mod telemetry;

// Re-export commonly used types
pub use replay::{CursorMode, LogReader, LogRecorder, PlaybackClock, Timeline};
pub use schema::{GcPhase, Phase, ProtocolVersion, RegionRecord, RegionState, SessionConfig};
pub use session::{Session, SessionError, SessionStatus};
pub use telemetry::{CounterSource, Snapshot};
