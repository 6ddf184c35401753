//! Live counter sources and per-tick sampling.

use crate::schema::ProtocolVersion;

use super::{DecodeError, Snapshot, decode};

/// Errors reported by a live counter source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// No fresh data this tick. The session keeps polling.
    #[error("Telemetry source stalled: {0}")]
    Stalled(String),
    /// A counter the sampler depends on does not exist. Ends the live session.
    #[error("Counter {0} is not exported by the target process")]
    MissingCounter(String),
    #[error("Failed to decode region {index}: {source}")]
    Decode {
        index: usize,
        #[source]
        source: DecodeError,
    },
}

impl SourceError {
    /// Whether the live session has to end.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SourceError::Stalled(_))
    }
}

/// Performance counters exported by a running collector.
///
/// Implementations must report a structurally absent counter as
/// [`SourceError::MissingCounter`] rather than a zero value, and must not
/// block for longer than one poll interval; a slow read is reported as
/// [`SourceError::Stalled`].
pub trait CounterSource: Send {
    fn max_regions(&self) -> Result<usize, SourceError>;

    /// Region size in bytes.
    fn region_size(&self) -> Result<u64, SourceError>;

    fn status_word(&self) -> Result<u64, SourceError>;

    fn region_word(&self, index: usize) -> Result<u64, SourceError>;

    /// Sample time in milliseconds.
    fn timestamp_millis(&self) -> Result<u64, SourceError>;

    fn protocol_version(&self) -> ProtocolVersion {
        ProtocolVersion::LATEST
    }
}

/// Read every counter once and build a snapshot.
pub fn sample(source: &dyn CounterSource) -> Result<Snapshot, SourceError> {
    let version = source.protocol_version();
    let timestamp = source.timestamp_millis()?;
    let status_word = source.status_word()?;
    let region_size = source.region_size()?;
    let count = source.max_regions()?;

    let mut regions = Vec::with_capacity(count);
    for index in 0..count {
        let word = source.region_word(index)?;
        let record =
            decode(word, version).map_err(|err| SourceError::Decode { index, source: err })?;
        regions.push(record);
    }

    Ok(Snapshot::new(
        timestamp,
        region_size,
        version,
        regions,
        status_word,
    ))
}
