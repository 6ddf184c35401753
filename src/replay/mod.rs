//! Recording, loading and replaying snapshot timelines.
//!
//! A session's snapshots live in a [`Timeline`]. Live sampling appends to it
//! with the cursor following the newest entry; replay loads a recorded log
//! with [`LogReader`] and drives the cursor from a [`PlaybackClock`].
//! [`LogRecorder`] writes the same line-pair format the reader accepts, so a
//! live session can be captured and replayed later.

mod clock;
mod log_reader;
mod recorder;
mod timeline;

pub use clock::{ClockError, ClockTransition, PlaybackClock};
pub use log_reader::{FormatError, LogReader, NANOS_PER_MILLI, REFS_SEPARATOR, strip_decorations};
pub use recorder::{LogRecorder, RecordError, RecorderConfig, RecordingStats};
pub use timeline::{CursorMode, Timeline, TimelineError};
