//! Per-region telemetry records.

use serde::{Deserialize, Serialize};

use crate::telemetry::IncomingRefs;

/// Number of age buckets tracked per snapshot.
pub const AGE_BUCKETS: usize = 6;

/// Width of one age bucket in collector cycles. The last bucket is open-ended.
pub const AGE_BUCKET_WIDTH: u8 = 3;

/// Map a region age to its bucket: [0,3), [3,6), [6,9), [9,12), [12,15), 15+.
#[inline]
pub fn age_bucket(age: u8) -> usize {
    ((age / AGE_BUCKET_WIDTH) as usize).min(AGE_BUCKETS - 1)
}

/// Human-readable label for an age bucket.
pub fn age_bucket_label(bucket: usize) -> &'static str {
    match bucket {
        0 => "0-2",
        1 => "3-5",
        2 => "6-8",
        3 => "9-11",
        4 => "12-14",
        _ => "15+",
    }
}

/// Lifecycle state of a heap region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RegionState {
    EmptyUncommitted,
    EmptyCommitted,
    Regular,
    Humongous,
    CollectionSet,
    Pinned,
    Trash,
    PinnedCollectionSet,
    PinnedHumongous,
}

impl RegionState {
    pub const COUNT: usize = 9;

    pub const ALL: [RegionState; RegionState::COUNT] = [
        RegionState::EmptyUncommitted,
        RegionState::EmptyCommitted,
        RegionState::Regular,
        RegionState::Humongous,
        RegionState::CollectionSet,
        RegionState::Pinned,
        RegionState::Trash,
        RegionState::PinnedCollectionSet,
        RegionState::PinnedHumongous,
    ];

    /// Dense index used by snapshot histograms.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn is_empty(self) -> bool {
        matches!(
            self,
            RegionState::EmptyUncommitted | RegionState::EmptyCommitted
        )
    }

    pub fn is_pinned(self) -> bool {
        matches!(
            self,
            RegionState::Pinned | RegionState::PinnedCollectionSet | RegionState::PinnedHumongous
        )
    }

    /// Regions selected for evacuation, pinned or not.
    pub fn is_collection_set(self) -> bool {
        matches!(
            self,
            RegionState::CollectionSet | RegionState::PinnedCollectionSet
        )
    }

    pub fn is_humongous(self) -> bool {
        matches!(
            self,
            RegionState::Humongous | RegionState::PinnedHumongous
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            RegionState::EmptyUncommitted => "Empty Uncommitted",
            RegionState::EmptyCommitted => "Empty Committed",
            RegionState::Regular => "Regular",
            RegionState::Humongous => "Humongous",
            RegionState::CollectionSet => "Collection Set",
            RegionState::Pinned => "Pinned",
            RegionState::Trash => "Trash",
            RegionState::PinnedCollectionSet => "Pinned Collection Set",
            RegionState::PinnedHumongous => "Pinned Humongous",
        }
    }
}

/// Generation a region belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Affiliation {
    #[default]
    Young,
    Old,
}

impl Affiliation {
    pub const COUNT: usize = 2;

    pub const ALL: [Affiliation; Affiliation::COUNT] = [Affiliation::Young, Affiliation::Old];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Occupancy levels of one region, as integer percentages in 0..=100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RegionLevels {
    /// Bytes allocated in the region.
    pub used: u8,
    /// Bytes found live by the last marking.
    pub live: u8,
    /// Bytes allocated through thread-local allocation buffers.
    pub tlab: u8,
    /// Bytes allocated through GC-local allocation buffers.
    pub gclab: u8,
    /// Bytes allocated through promotion-local allocation buffers.
    pub plab: u8,
    /// Bytes allocated outside any buffer.
    pub shared: u8,
}

/// Decoded state of a single region at one instant.
///
/// Records are produced by the decoder and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionRecord {
    levels: RegionLevels,
    state: RegionState,
    age: u8,
    affiliation: Affiliation,
    incoming: Option<IncomingRefs>,
}

impl RegionRecord {
    /// Create a record from percentages, state, age and affiliation.
    pub fn new(levels: RegionLevels, state: RegionState, age: u8, affiliation: Affiliation) -> Self {
        Self {
            levels,
            state,
            age,
            affiliation,
            incoming: None,
        }
    }

    /// Attach the set of regions holding references into this one.
    pub fn with_incoming_refs(mut self, refs: IncomingRefs) -> Self {
        self.incoming = Some(refs);
        self
    }

    #[inline]
    pub fn levels(&self) -> &RegionLevels {
        &self.levels
    }

    /// Used fraction in [0, 1].
    #[inline]
    pub fn used(&self) -> f32 {
        fraction(self.levels.used)
    }

    #[inline]
    pub fn live(&self) -> f32 {
        fraction(self.levels.live)
    }

    #[inline]
    pub fn tlab(&self) -> f32 {
        fraction(self.levels.tlab)
    }

    #[inline]
    pub fn gclab(&self) -> f32 {
        fraction(self.levels.gclab)
    }

    #[inline]
    pub fn plab(&self) -> f32 {
        fraction(self.levels.plab)
    }

    #[inline]
    pub fn shared(&self) -> f32 {
        fraction(self.levels.shared)
    }

    #[inline]
    pub fn state(&self) -> RegionState {
        self.state
    }

    /// Number of collector cycles this region has survived.
    #[inline]
    pub fn age(&self) -> u8 {
        self.age
    }

    #[inline]
    pub fn age_bucket(&self) -> usize {
        age_bucket(self.age)
    }

    #[inline]
    pub fn affiliation(&self) -> Affiliation {
        self.affiliation
    }

    pub fn incoming_refs(&self) -> Option<&IncomingRefs> {
        self.incoming.as_ref()
    }
}

#[inline]
fn fraction(percent: u8) -> f32 {
    percent as f32 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_buckets() {
        assert_eq!(age_bucket(0), 0);
        assert_eq!(age_bucket(2), 0);
        assert_eq!(age_bucket(3), 1);
        assert_eq!(age_bucket(11), 3);
        assert_eq!(age_bucket(14), 4);
        assert_eq!(age_bucket(15), 5);
        assert_eq!(age_bucket(31), 5);
        assert_eq!(age_bucket_label(5), "15+");
    }

    #[test]
    fn test_fractions_are_exact() {
        let record = RegionRecord::new(
            RegionLevels {
                used: 50,
                live: 25,
                ..Default::default()
            },
            RegionState::Regular,
            0,
            Affiliation::Young,
        );
        assert_eq!(record.used(), 0.50);
        assert_eq!(record.live(), 0.25);
        assert_eq!(record.tlab(), 0.0);
        assert!(record.incoming_refs().is_none());
    }

    #[test]
    fn test_state_predicates() {
        assert!(RegionState::PinnedCollectionSet.is_collection_set());
        assert!(RegionState::PinnedCollectionSet.is_pinned());
        assert!(RegionState::PinnedHumongous.is_humongous());
        assert!(!RegionState::Regular.is_empty());
        assert!(RegionState::EmptyCommitted.is_empty());
        for (i, state) in RegionState::ALL.iter().enumerate() {
            assert_eq!(state.index(), i);
        }
    }
}
