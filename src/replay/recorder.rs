//! Recorder writing snapshots in the recorded-log text format.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::log_reader::{NANOS_PER_MILLI, REFS_SEPARATOR};
use crate::telemetry::{EncodeError, Snapshot, encode, pack_bits};

/// Configuration for log recording.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Record every Nth snapshot (1 = every snapshot).
    pub snapshot_skip: u32,
    /// Maximum snapshots to record (0 = unlimited).
    pub max_snapshots: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            snapshot_skip: 1,
            max_snapshots: 0,
        }
    }
}

/// Errors raised while recording.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Failed to write log: {0}")]
    Io(#[from] io::Error),
    #[error("Region {region} cannot be encoded: {source}")]
    Encode {
        region: usize,
        #[source]
        source: EncodeError,
    },
}

/// Writes snapshots as metadata and region-data line pairs.
///
/// Usage:
/// ```ignore
/// let mut recorder = LogRecorder::create("session.log", RecorderConfig::default())?;
/// for snapshot in timeline.in_range() {
///     recorder.record(&snapshot)?;
/// }
/// recorder.finalize()?;
/// ```
pub struct LogRecorder<W: Write> {
    writer: W,
    config: RecorderConfig,
    snapshots_written: u64,
    bytes_written: u64,
    step_counter: u32,
    /// Reused line buffer.
    line: String,
}

impl LogRecorder<BufWriter<File>> {
    /// Create a recorder writing to a new file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, config: RecorderConfig) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file), config))
    }
}

impl<W: Write> LogRecorder<W> {
    pub fn new(writer: W, config: RecorderConfig) -> Self {
        Self {
            writer,
            config,
            snapshots_written: 0,
            bytes_written: 0,
            step_counter: 0,
            line: String::new(),
        }
    }

    /// Record a snapshot.
    ///
    /// Returns true if the snapshot was written (may skip based on config).
    pub fn record(&mut self, snapshot: &Snapshot) -> Result<bool, RecordError> {
        self.step_counter += 1;

        if self.step_counter < self.config.snapshot_skip {
            return Ok(false);
        }
        self.step_counter = 0;

        if self.config.max_snapshots > 0 && self.snapshots_written >= self.config.max_snapshots {
            return Ok(false);
        }

        let version = snapshot.protocol_version();
        self.line.clear();
        // Writing to a String cannot fail.
        let _ = writeln!(
            self.line,
            "{} {} {} {} {}",
            snapshot.timestamp() * NANOS_PER_MILLI,
            snapshot.status_word(),
            snapshot.region_count(),
            snapshot.region_size(),
            version.number()
        );

        for (region, record) in snapshot.regions().iter().enumerate() {
            let word = encode(record, version).map_err(|source| RecordError::Encode { region, source })?;
            if region > 0 {
                self.line.push(' ');
            }
            let _ = write!(self.line, "{word}");
            if let Some(refs) = record.incoming_refs() {
                self.line.push(REFS_SEPARATOR);
                self.line.extend(pack_bits(refs).into_iter().map(char::from));
            }
        }
        self.line.push('\n');

        self.writer.write_all(self.line.as_bytes())?;
        self.bytes_written += self.line.len() as u64;
        self.snapshots_written += 1;
        Ok(true)
    }

    /// Number of snapshots recorded so far.
    pub fn snapshots_written(&self) -> u64 {
        self.snapshots_written
    }

    /// Flush the log and return recording statistics.
    pub fn finalize(mut self) -> io::Result<RecordingStats> {
        self.writer.flush()?;
        Ok(RecordingStats {
            snapshot_count: self.snapshots_written,
            total_bytes: self.bytes_written,
        })
    }
}

/// Statistics from a recording session.
#[derive(Debug, Clone)]
pub struct RecordingStats {
    /// Total snapshots recorded.
    pub snapshot_count: u64,
    /// Total bytes written.
    pub total_bytes: u64,
}

impl std::fmt::Display for RecordingStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} snapshots, {} bytes total",
            self.snapshot_count, self.total_bytes
        )
    }
}
