//! Bit-level decoding of packed region telemetry words.
//!
//! Layout of one 64-bit region word (shift, width):
//!
//! ```text
//! field        v1        v2
//! used         0, 7      0, 7
//! live         7, 7      7, 7
//! tlab         14, 7     14, 7
//! gclab        21, 7     21, 7
//! shared       28, 7     28, 7
//! plab         -         35, 7
//! age          -         51, 5
//! affiliation  -         56, 2
//! state        58, 6     59, 5
//! ```

use rayon::prelude::*;

use super::refs::unpack_bits;
use crate::schema::{Affiliation, ProtocolVersion, RegionLevels, RegionRecord, RegionState};

/// Region count above which [`decode_words`] fans out across threads by default.
pub const PARALLEL_DECODE_THRESHOLD: usize = 4096;

/// Errors raised while decoding region telemetry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unrecognized region state ordinal {0}")]
    UnknownState(u64),
    #[error("{field} level {value}% exceeds 100%")]
    PercentOutOfRange { field: &'static str, value: u64 },
    #[error("Unrecognized affiliation code {0}")]
    UnknownAffiliation(u64),
    #[error("Incoming reference unit {byte:#04x} at offset {offset} is outside the packed alphabet")]
    InvalidRefUnit { offset: usize, byte: u8 },
    #[error("Incoming reference bitset needs {expected} units, found {found}")]
    RefsLength { expected: usize, found: usize },
    #[error("Protocol {0} does not carry incoming references")]
    RefsUnsupported(ProtocolVersion),
}

/// Errors raised while packing a record back into a word.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("{field} value {value} does not fit in {width} bits")]
    FieldOverflow {
        field: &'static str,
        value: u64,
        width: u32,
    },
    #[error("{field} cannot be represented in protocol {version}")]
    FieldUnsupported {
        field: &'static str,
        version: ProtocolVersion,
    },
}

/// A fixed bit slice of a region word.
#[derive(Debug, Clone, Copy)]
struct Slice {
    shift: u32,
    width: u32,
}

impl Slice {
    const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    #[inline]
    fn mask(self) -> u64 {
        (1u64 << self.width) - 1
    }

    #[inline]
    fn extract(self, word: u64) -> u64 {
        (word >> self.shift) & self.mask()
    }

    fn insert(self, field: &'static str, value: u64) -> Result<u64, EncodeError> {
        if value > self.mask() {
            return Err(EncodeError::FieldOverflow {
                field,
                value,
                width: self.width,
            });
        }
        Ok(value << self.shift)
    }
}

struct Layout {
    used: Slice,
    live: Slice,
    tlab: Slice,
    gclab: Slice,
    shared: Slice,
    plab: Option<Slice>,
    age: Option<Slice>,
    affiliation: Option<Slice>,
    state: Slice,
}

const LAYOUT_V1: Layout = Layout {
    used: Slice::new(0, 7),
    live: Slice::new(7, 7),
    tlab: Slice::new(14, 7),
    gclab: Slice::new(21, 7),
    shared: Slice::new(28, 7),
    plab: None,
    age: None,
    affiliation: None,
    state: Slice::new(58, 6),
};

const LAYOUT_V2: Layout = Layout {
    used: Slice::new(0, 7),
    live: Slice::new(7, 7),
    tlab: Slice::new(14, 7),
    gclab: Slice::new(21, 7),
    shared: Slice::new(28, 7),
    plab: Some(Slice::new(35, 7)),
    age: Some(Slice::new(51, 5)),
    affiliation: Some(Slice::new(56, 2)),
    state: Slice::new(59, 5),
};

fn layout(version: ProtocolVersion) -> &'static Layout {
    match version {
        ProtocolVersion::V1 => &LAYOUT_V1,
        ProtocolVersion::V2 => &LAYOUT_V2,
    }
}

/// Map a raw state ordinal to a region state.
///
/// Ordinals 3 and 4 both decode to `Humongous` (start and continuation regions
/// as exported by the producer). Whether the producer means them to be
/// indistinguishable is unconfirmed, so nothing downstream should rely on
/// telling them apart or on them being merged.
fn state_from_ordinal(ordinal: u64) -> Result<RegionState, DecodeError> {
    let state = match ordinal {
        0 => RegionState::EmptyUncommitted,
        1 => RegionState::EmptyCommitted,
        2 => RegionState::Regular,
        3 | 4 => RegionState::Humongous,
        5 => RegionState::CollectionSet,
        6 => RegionState::Pinned,
        7 => RegionState::Trash,
        8 => RegionState::PinnedCollectionSet,
        9 => RegionState::PinnedHumongous,
        other => return Err(DecodeError::UnknownState(other)),
    };
    Ok(state)
}

fn state_ordinal(state: RegionState) -> u64 {
    match state {
        RegionState::EmptyUncommitted => 0,
        RegionState::EmptyCommitted => 1,
        RegionState::Regular => 2,
        RegionState::Humongous => 3,
        RegionState::CollectionSet => 5,
        RegionState::Pinned => 6,
        RegionState::Trash => 7,
        RegionState::PinnedCollectionSet => 8,
        RegionState::PinnedHumongous => 9,
    }
}

fn percent(word: u64, slice: Slice, field: &'static str) -> Result<u8, DecodeError> {
    let value = slice.extract(word);
    if value > 100 {
        return Err(DecodeError::PercentOutOfRange { field, value });
    }
    Ok(value as u8)
}

/// Decode one packed region word.
pub fn decode(word: u64, version: ProtocolVersion) -> Result<RegionRecord, DecodeError> {
    let layout = layout(version);

    let state = state_from_ordinal(layout.state.extract(word))?;
    let levels = RegionLevels {
        used: percent(word, layout.used, "used")?,
        live: percent(word, layout.live, "live")?,
        tlab: percent(word, layout.tlab, "tlab")?,
        gclab: percent(word, layout.gclab, "gclab")?,
        plab: match layout.plab {
            Some(slice) => percent(word, slice, "plab")?,
            None => 0,
        },
        shared: percent(word, layout.shared, "shared")?,
    };
    let age = layout.age.map_or(0, |slice| slice.extract(word) as u8);
    let affiliation = match layout.affiliation.map(|slice| slice.extract(word)) {
        None | Some(0) => Affiliation::Young,
        Some(1) => Affiliation::Old,
        Some(code) => return Err(DecodeError::UnknownAffiliation(code)),
    };

    Ok(RegionRecord::new(levels, state, age, affiliation))
}

/// Decode a region word followed by its packed incoming-reference units.
///
/// `region_count` is the number of regions in the snapshot, which is also the
/// length of the bitset.
pub fn decode_with_refs(
    word: u64,
    version: ProtocolVersion,
    units: &[u8],
    region_count: usize,
) -> Result<RegionRecord, DecodeError> {
    if !version.supports_incoming_refs() {
        return Err(DecodeError::RefsUnsupported(version));
    }
    let record = decode(word, version)?;
    let refs = unpack_bits(units, region_count)?;
    Ok(record.with_incoming_refs(refs))
}

/// Decode every word of a snapshot, in parallel once `words.len()` reaches
/// `parallel_threshold`.
pub fn decode_words(
    words: &[u64],
    version: ProtocolVersion,
    parallel_threshold: usize,
) -> Result<Vec<RegionRecord>, DecodeError> {
    if words.len() >= parallel_threshold {
        words.par_iter().map(|&w| decode(w, version)).collect()
    } else {
        words.iter().map(|&w| decode(w, version)).collect()
    }
}

/// Pack a record into a region word, the inverse of [`decode`].
///
/// Incoming references are not part of the word; see
/// [`pack_bits`](super::pack_bits).
pub fn encode(record: &RegionRecord, version: ProtocolVersion) -> Result<u64, EncodeError> {
    let layout = layout(version);
    let levels = record.levels();

    let mut word = 0u64;
    word |= layout.used.insert("used", levels.used.into())?;
    word |= layout.live.insert("live", levels.live.into())?;
    word |= layout.tlab.insert("tlab", levels.tlab.into())?;
    word |= layout.gclab.insert("gclab", levels.gclab.into())?;
    word |= layout.shared.insert("shared", levels.shared.into())?;
    word |= optional_field(layout.plab, "plab", levels.plab.into(), version)?;
    word |= optional_field(layout.age, "age", record.age().into(), version)?;
    let affiliation = match record.affiliation() {
        Affiliation::Young => 0,
        Affiliation::Old => 1,
    };
    word |= optional_field(layout.affiliation, "affiliation", affiliation, version)?;
    word |= layout.state.insert("state", state_ordinal(record.state()))?;
    Ok(word)
}

/// Insert a field that only some versions carry. Zero is representable everywhere.
fn optional_field(
    slice: Option<Slice>,
    field: &'static str,
    value: u64,
    version: ProtocolVersion,
) -> Result<u64, EncodeError> {
    match slice {
        Some(slice) => slice.insert(field, value),
        None if value == 0 => Ok(0),
        None => Err(EncodeError::FieldUnsupported { field, version }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v1_word(used: u64, live: u64, state: u64) -> u64 {
        used | (live << 7) | (state << 58)
    }

    fn v2_word(used: u64, live: u64, age: u64, affiliation: u64, state: u64) -> u64 {
        used | (live << 7) | (age << 51) | (affiliation << 56) | (state << 59)
    }

    #[test]
    fn test_decode_regular_each_version() {
        for (version, word) in [
            (ProtocolVersion::V1, v1_word(50, 25, 2)),
            (ProtocolVersion::V2, v2_word(50, 25, 0, 0, 2)),
        ] {
            let record = decode(word, version).unwrap();
            assert_eq!(record.used(), 0.50, "{version}");
            assert_eq!(record.live(), 0.25, "{version}");
            assert_eq!(record.state(), RegionState::Regular, "{version}");
        }
    }

    #[test]
    fn test_decode_v2_extended_fields() {
        let word = v2_word(80, 40, 17, 1, 5) | (33 << 35) | (10 << 14) | (7 << 21) | (3 << 28);
        let record = decode(word, ProtocolVersion::V2).unwrap();
        assert_eq!(record.levels().plab, 33);
        assert_eq!(record.levels().tlab, 10);
        assert_eq!(record.levels().gclab, 7);
        assert_eq!(record.levels().shared, 3);
        assert_eq!(record.age(), 17);
        assert_eq!(record.age_bucket(), 5);
        assert_eq!(record.affiliation(), Affiliation::Old);
        assert_eq!(record.state(), RegionState::CollectionSet);
    }

    #[test]
    fn test_layouts_disagree() {
        // The same word means different things under each version.
        let word = v1_word(10, 10, 2);
        let v1 = decode(word, ProtocolVersion::V1).unwrap();
        let v2 = decode(word, ProtocolVersion::V2).unwrap();
        assert_eq!(v1.state(), RegionState::Regular);
        assert_eq!(v2.state(), RegionState::EmptyCommitted);
    }

    #[test]
    fn test_humongous_ordinals_collapse() {
        let start = decode(v2_word(100, 100, 0, 1, 3), ProtocolVersion::V2).unwrap();
        let cont = decode(v2_word(100, 100, 0, 1, 4), ProtocolVersion::V2).unwrap();
        assert_eq!(start.state(), RegionState::Humongous);
        assert_eq!(cont.state(), RegionState::Humongous);
        assert_eq!(start, cont);
    }

    #[test]
    fn test_unknown_state_rejected() {
        assert_eq!(
            decode(v1_word(0, 0, 10), ProtocolVersion::V1),
            Err(DecodeError::UnknownState(10))
        );
        assert_eq!(
            decode(v2_word(0, 0, 0, 0, 31), ProtocolVersion::V2),
            Err(DecodeError::UnknownState(31))
        );
    }

    #[test]
    fn test_malformed_fields_rejected() {
        assert_eq!(
            decode(v1_word(101, 0, 2), ProtocolVersion::V1),
            Err(DecodeError::PercentOutOfRange {
                field: "used",
                value: 101
            })
        );
        assert_eq!(
            decode(v2_word(0, 0, 0, 2, 2), ProtocolVersion::V2),
            Err(DecodeError::UnknownAffiliation(2))
        );
    }

    #[test]
    fn test_decode_with_refs() {
        let record = decode_with_refs(v2_word(1, 1, 0, 0, 2), ProtocolVersion::V2, b"3", 4).unwrap();
        let refs = record.incoming_refs().unwrap();
        assert_eq!(refs.iter().collect::<Vec<_>>(), vec![0, 1]);

        assert_eq!(
            decode_with_refs(v1_word(1, 1, 2), ProtocolVersion::V1, b"3", 4),
            Err(DecodeError::RefsUnsupported(ProtocolVersion::V1))
        );
    }

    #[test]
    fn test_encode_inverts_decode() {
        for version in [ProtocolVersion::V1, ProtocolVersion::V2] {
            for word in [v1_word(50, 25, 2), v1_word(100, 0, 9), v1_word(0, 0, 0)] {
                let word = if version == ProtocolVersion::V2 {
                    // Move the state into the v2 slice.
                    (word & ((1 << 58) - 1)) | ((word >> 58) << 59)
                } else {
                    word
                };
                let record = decode(word, version).unwrap();
                assert_eq!(encode(&record, version).unwrap(), word);
            }
        }
        let word = v2_word(70, 30, 12, 1, 8) | (4 << 35);
        let record = decode(word, ProtocolVersion::V2).unwrap();
        assert_eq!(encode(&record, ProtocolVersion::V2).unwrap(), word);
    }

    #[test]
    fn test_encode_rejects_unrepresentable() {
        let old = RegionRecord::new(
            RegionLevels::default(),
            RegionState::Regular,
            0,
            Affiliation::Old,
        );
        assert_eq!(
            encode(&old, ProtocolVersion::V1),
            Err(EncodeError::FieldUnsupported {
                field: "affiliation",
                version: ProtocolVersion::V1
            })
        );

        let ancient = RegionRecord::new(
            RegionLevels::default(),
            RegionState::Regular,
            40,
            Affiliation::Young,
        );
        assert!(matches!(
            encode(&ancient, ProtocolVersion::V2),
            Err(EncodeError::FieldOverflow { field: "age", .. })
        ));
    }

    #[test]
    fn test_decode_words_parallel_matches_serial() {
        let words: Vec<u64> = (0..64).map(|i| v2_word(i % 101, i % 50, i % 32, i % 2, i % 10)).collect();
        let serial = decode_words(&words, ProtocolVersion::V2, usize::MAX).unwrap();
        let parallel = decode_words(&words, ProtocolVersion::V2, 1).unwrap();
        assert_eq!(serial, parallel);

        let mut bad = words.clone();
        bad[40] = v2_word(0, 0, 0, 0, 12);
        assert_eq!(
            decode_words(&bad, ProtocolVersion::V2, 1),
            Err(DecodeError::UnknownState(12))
        );
    }
}
