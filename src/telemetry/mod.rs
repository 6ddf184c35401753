//! Telemetry module - Decoding packed region words into snapshots.
//!
//! A live collector exports one packed 64-bit word per region plus a status
//! word describing the current collector phase. This module turns those raw
//! counters into immutable [`Snapshot`]s:
//!
//! - `decode`: versioned bit layouts and the region state table
//! - `refs`: incoming-reference bitsets packed into printable units
//! - `snapshot`: per-instant aggregation with eagerly computed tallies
//! - `source`: the live counter interface and per-tick sampling

mod decode;
mod refs;
mod snapshot;
mod source;

pub use decode::{
    DecodeError, EncodeError, PARALLEL_DECODE_THRESHOLD, decode, decode_with_refs, decode_words,
    encode,
};
pub use refs::{BITS_PER_UNIT, IncomingRefs, UNIT_BASE, pack_bits, units_for, unpack_bits};
pub use snapshot::{PauseHistogram, RegionSummary, Snapshot};
pub use source::{CounterSource, SourceError, sample};

#[cfg(test)]
pub(crate) use source::tests::FakeSource;
