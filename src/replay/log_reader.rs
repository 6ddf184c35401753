//! Reader for recorded region logs.
//!
//! A recorded log alternates a metadata line and a region-data line:
//!
//! ```text
//! [0.512s][info][gc,region] 512000000 1 4 1048576 2
//! [0.512s][info][gc,region] 288230376151711794 288230376151711744 0 0
//! ```
//!
//! Metadata fields are `timestampNanos statusWord regionCount regionSize
//! [protocolVersion]`. The region-data line holds `regionCount` packed words;
//! under protocols carrying incoming references a word may be followed by
//! `:` and its packed reference units. Any number of bracketed decorations at
//! the start of a line are ignored, as are blank lines, except that the
//! region-data line of a snapshot with zero regions is itself empty.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::schema::{ProtocolVersion, RegionRecord};
use crate::telemetry::{
    DecodeError, PARALLEL_DECODE_THRESHOLD, Snapshot, decode, decode_with_refs, decode_words,
};

/// Nanoseconds per millisecond; log timestamps are nanoseconds.
pub const NANOS_PER_MILLI: u64 = 1_000_000;

/// Separator between a region word and its packed incoming references.
pub const REFS_SEPARATOR: char = ':';

/// Errors raised while parsing a recorded log. Line numbers are 1-based.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("Failed to read log: {0}")]
    Io(#[from] io::Error),
    #[error("line {line}: expected 4 or 5 metadata fields, found {found}")]
    MetadataFields { line: usize, found: usize },
    #[error("line {line}: metadata has no region-data line")]
    MissingRegionLine { line: usize },
    #[error("line {line}: expected {expected} region words, found {found}")]
    TokenCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid integer {token:?}")]
    InvalidInteger { line: usize, token: String },
    #[error("line {line}: unsupported protocol version {version}")]
    UnsupportedVersion { line: usize, version: u64 },
    #[error("line {line}, region {region}: {source}")]
    Decode {
        line: usize,
        region: usize,
        #[source]
        source: DecodeError,
    },
}

/// Strip leading `[...]` decorations and surrounding whitespace.
pub fn strip_decorations(line: &str) -> &str {
    let mut rest = line.trim();
    while let Some(inner) = rest.strip_prefix('[') {
        match inner.find(']') {
            Some(end) => rest = inner[end + 1..].trim_start(),
            None => break,
        }
    }
    rest
}

fn parse_int(token: &str, line: usize) -> Result<u64, FormatError> {
    token.parse().map_err(|_| FormatError::InvalidInteger {
        line,
        token: token.to_string(),
    })
}

#[derive(Debug, Clone, Copy)]
struct Metadata {
    line: usize,
    timestamp_nanos: u64,
    status_word: u64,
    region_count: usize,
    region_size: u64,
    version: ProtocolVersion,
}

/// Parser for recorded region logs.
///
/// Usage:
/// ```ignore
/// let snapshots = LogReader::new().parse("gc-regions.log")?;
/// println!("Loaded {} snapshots", snapshots.len());
/// ```
#[derive(Debug, Clone)]
pub struct LogReader {
    default_version: ProtocolVersion,
    parallel_threshold: usize,
}

impl Default for LogReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LogReader {
    /// Create a reader that assumes the latest protocol when a log omits it.
    pub fn new() -> Self {
        Self {
            default_version: ProtocolVersion::LATEST,
            parallel_threshold: PARALLEL_DECODE_THRESHOLD,
        }
    }

    /// Protocol assumed for metadata lines without a version field.
    pub fn with_default_version(mut self, version: ProtocolVersion) -> Self {
        self.default_version = version;
        self
    }

    /// Region count above which a line's words are decoded in parallel.
    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    /// Parse a whole log file into memory.
    pub fn parse<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Snapshot>, FormatError> {
        let file = File::open(path)?;
        self.parse_reader(BufReader::new(file))
    }

    pub fn parse_str(&self, text: &str) -> Result<Vec<Snapshot>, FormatError> {
        self.parse_reader(text.as_bytes())
    }

    /// Parse line pairs from any buffered reader, preserving input order.
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<Vec<Snapshot>, FormatError> {
        let mut snapshots = Vec::new();
        let mut pending: Option<Metadata> = None;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let number = i + 1;
            let content = strip_decorations(&line);
            if content.is_empty() && !pending.is_some_and(|meta| meta.region_count == 0) {
                continue;
            }

            match pending.take() {
                None => pending = Some(self.parse_metadata(content, number)?),
                Some(meta) => snapshots.push(self.parse_regions(&meta, content, number)?),
            }
        }

        if let Some(meta) = pending {
            return Err(FormatError::MissingRegionLine { line: meta.line });
        }

        log::debug!("Parsed {} snapshots from log", snapshots.len());
        Ok(snapshots)
    }

    fn parse_metadata(&self, content: &str, line: usize) -> Result<Metadata, FormatError> {
        let fields: Vec<&str> = content.split_whitespace().collect();
        if !(4..=5).contains(&fields.len()) {
            return Err(FormatError::MetadataFields {
                line,
                found: fields.len(),
            });
        }

        let version = match fields.get(4) {
            Some(token) => {
                let number = parse_int(token, line)?;
                ProtocolVersion::from_number(number).ok_or(FormatError::UnsupportedVersion {
                    line,
                    version: number,
                })?
            }
            None => self.default_version,
        };

        Ok(Metadata {
            line,
            timestamp_nanos: parse_int(fields[0], line)?,
            status_word: parse_int(fields[1], line)?,
            region_count: parse_int(fields[2], line)? as usize,
            region_size: parse_int(fields[3], line)?,
            version,
        })
    }

    fn parse_regions(
        &self,
        meta: &Metadata,
        content: &str,
        line: usize,
    ) -> Result<Snapshot, FormatError> {
        let tokens: Vec<&str> = content.split_whitespace().collect();
        if tokens.len() != meta.region_count {
            return Err(FormatError::TokenCount {
                line,
                expected: meta.region_count,
                found: tokens.len(),
            });
        }

        let regions = if tokens.iter().any(|t| t.contains(REFS_SEPARATOR)) {
            self.decode_tokens(meta, &tokens, line)?
        } else {
            let words = tokens
                .iter()
                .map(|t| parse_int(t, line))
                .collect::<Result<Vec<_>, _>>()?;
            decode_words(&words, meta.version, self.parallel_threshold).map_err(|err| {
                // Parallel decoding may surface any failing region; name the first.
                let (region, source) = words
                    .iter()
                    .enumerate()
                    .find_map(|(i, &w)| decode(w, meta.version).err().map(|e| (i, e)))
                    .unwrap_or((0, err));
                FormatError::Decode {
                    line,
                    region,
                    source,
                }
            })?
        };

        Ok(Snapshot::new(
            meta.timestamp_nanos / NANOS_PER_MILLI,
            meta.region_size,
            meta.version,
            regions,
            meta.status_word,
        ))
    }

    /// Decode tokens that may carry packed references, one at a time.
    fn decode_tokens(
        &self,
        meta: &Metadata,
        tokens: &[&str],
        line: usize,
    ) -> Result<Vec<RegionRecord>, FormatError> {
        tokens
            .iter()
            .enumerate()
            .map(|(region, token)| {
                let decode_error = |source| FormatError::Decode {
                    line,
                    region,
                    source,
                };
                match token.split_once(REFS_SEPARATOR) {
                    Some((word, units)) => {
                        let word = parse_int(word, line)?;
                        decode_with_refs(word, meta.version, units.as_bytes(), meta.region_count)
                            .map_err(decode_error)
                    }
                    None => {
                        let word = parse_int(token, line)?;
                        decode(word, meta.version).map_err(decode_error)
                    }
                }
            })
            .collect()
    }
}
