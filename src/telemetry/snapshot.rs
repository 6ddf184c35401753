//! Immutable point-in-time snapshots of every region.

use crate::schema::{
    AGE_BUCKETS, Affiliation, GcPhase, Phase, ProtocolVersion, RegionRecord, RegionState,
    StatusFlags,
};

use super::{DecodeError, decode_words};

/// Counts of collector pauses by duration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PauseHistogram {
    /// `(upper bound in microseconds, pause count)`, ascending by bound.
    buckets: Vec<(u64, u64)>,
}

impl PauseHistogram {
    /// Build a histogram; buckets are sorted by upper bound.
    pub fn new(mut buckets: Vec<(u64, u64)>) -> Self {
        buckets.sort_unstable_by_key(|&(bound, _)| bound);
        Self { buckets }
    }

    pub fn buckets(&self) -> &[(u64, u64)] {
        &self.buckets
    }

    pub fn total_pauses(&self) -> u64 {
        self.buckets.iter().map(|&(_, count)| count).sum()
    }
}

/// Region tallies computed once when a snapshot is built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegionSummary {
    /// Region counts keyed by `[state][age bucket][affiliation]`.
    histogram: [[[u32; Affiliation::COUNT]; AGE_BUCKETS]; RegionState::COUNT],
    /// Sum of used percentages per affiliation.
    used_percent: [u64; Affiliation::COUNT],
    /// Sum of live percentages per affiliation.
    live_percent: [u64; Affiliation::COUNT],
    collection_set_percent: u64,
    humongous_percent: u64,
}

impl RegionSummary {
    fn from_regions(regions: &[RegionRecord]) -> Self {
        let mut summary = Self::default();
        for region in regions {
            let state = region.state();
            let affiliation = region.affiliation().index();
            let used = u64::from(region.levels().used);

            summary.histogram[state.index()][region.age_bucket()][affiliation] += 1;
            summary.used_percent[affiliation] += used;
            summary.live_percent[affiliation] += u64::from(region.levels().live);
            if state.is_collection_set() {
                summary.collection_set_percent += used;
            }
            if state.is_humongous() {
                summary.humongous_percent += used;
            }
        }
        summary
    }

    /// Regions in `state`, of `age_bucket`, with `affiliation`.
    #[inline]
    pub fn count(&self, state: RegionState, age_bucket: usize, affiliation: Affiliation) -> usize {
        self.histogram[state.index()][age_bucket][affiliation.index()] as usize
    }

    pub fn state_count(&self, state: RegionState) -> usize {
        self.histogram[state.index()]
            .iter()
            .flatten()
            .map(|&n| n as usize)
            .sum()
    }

    pub fn age_bucket_count(&self, age_bucket: usize) -> usize {
        self.histogram
            .iter()
            .flat_map(|by_age| by_age[age_bucket].iter())
            .map(|&n| n as usize)
            .sum()
    }

    pub fn affiliation_count(&self, affiliation: Affiliation) -> usize {
        self.histogram
            .iter()
            .flatten()
            .map(|by_affiliation| by_affiliation[affiliation.index()] as usize)
            .sum()
    }
}

/// All regions of the heap at one instant, plus the collector status.
///
/// Snapshots are immutable. Equality compares the timestamp, the region
/// records and the raw status word, which is enough to tell whether a live
/// sample changed since the previous poll.
#[derive(Debug, Clone)]
pub struct Snapshot {
    timestamp: u64,
    region_size: u64,
    protocol_version: ProtocolVersion,
    regions: Vec<RegionRecord>,
    status_word: u64,
    flags: StatusFlags,
    phase: GcPhase,
    pauses: Option<PauseHistogram>,
    summary: RegionSummary,
}

impl Snapshot {
    /// Build a snapshot. `timestamp` is in milliseconds, `region_size` in bytes.
    pub fn new(
        timestamp: u64,
        region_size: u64,
        protocol_version: ProtocolVersion,
        regions: Vec<RegionRecord>,
        status_word: u64,
    ) -> Self {
        let flags = StatusFlags::from_status_word(status_word, protocol_version);
        let summary = RegionSummary::from_regions(&regions);
        Self {
            timestamp,
            region_size,
            protocol_version,
            regions,
            status_word,
            flags,
            phase: flags.resolve(),
            pauses: None,
            summary,
        }
    }

    /// Decode raw region words and build a snapshot from them.
    pub fn from_words(
        timestamp: u64,
        region_size: u64,
        protocol_version: ProtocolVersion,
        words: &[u64],
        status_word: u64,
        parallel_threshold: usize,
    ) -> Result<Self, DecodeError> {
        let regions = decode_words(words, protocol_version, parallel_threshold)?;
        Ok(Self::new(
            timestamp,
            region_size,
            protocol_version,
            regions,
            status_word,
        ))
    }

    pub fn with_pauses(mut self, pauses: PauseHistogram) -> Self {
        self.pauses = Some(pauses);
        self
    }

    /// Sample time in milliseconds.
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Size of one region in bytes.
    #[inline]
    pub fn region_size(&self) -> u64 {
        self.region_size
    }

    #[inline]
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    #[inline]
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn regions(&self) -> &[RegionRecord] {
        &self.regions
    }

    pub fn region(&self, index: usize) -> Option<&RegionRecord> {
        self.regions.get(index)
    }

    #[inline]
    pub fn status_word(&self) -> u64 {
        self.status_word
    }

    #[inline]
    pub fn flags(&self) -> &StatusFlags {
        &self.flags
    }

    /// Active phase tagged with its generation.
    #[inline]
    pub fn gc_phase(&self) -> GcPhase {
        self.phase
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase.phase()
    }

    #[inline]
    pub fn is_degenerated(&self) -> bool {
        self.flags.degenerated
    }

    #[inline]
    pub fn is_full_gc(&self) -> bool {
        self.flags.full_gc
    }

    pub fn pauses(&self) -> Option<&PauseHistogram> {
        self.pauses.as_ref()
    }

    pub fn summary(&self) -> &RegionSummary {
        &self.summary
    }

    /// Heap capacity in bytes, saturating at `u64::MAX`.
    pub fn total(&self) -> u64 {
        self.region_size.saturating_mul(self.regions.len() as u64)
    }

    /// Bytes used across all regions.
    pub fn used(&self) -> u64 {
        self.bytes(self.summary.used_percent.iter().sum())
    }

    /// Bytes found live across all regions.
    pub fn live(&self) -> u64 {
        self.bytes(self.summary.live_percent.iter().sum())
    }

    /// Bytes used by collection-set regions, pinned or not.
    pub fn collection_set_used(&self) -> u64 {
        self.bytes(self.summary.collection_set_percent)
    }

    /// Bytes used by humongous regions, pinned or not.
    pub fn humongous_used(&self) -> u64 {
        self.bytes(self.summary.humongous_percent)
    }

    pub fn used_by(&self, affiliation: Affiliation) -> u64 {
        self.bytes(self.summary.used_percent[affiliation.index()])
    }

    pub fn live_by(&self, affiliation: Affiliation) -> u64 {
        self.bytes(self.summary.live_percent[affiliation.index()])
    }

    pub fn state_count(&self, state: RegionState) -> usize {
        self.summary.state_count(state)
    }

    pub fn age_bucket_count(&self, age_bucket: usize) -> usize {
        self.summary.age_bucket_count(age_bucket)
    }

    pub fn affiliation_count(&self, affiliation: Affiliation) -> usize {
        self.summary.affiliation_count(affiliation)
    }

    #[inline]
    fn bytes(&self, percent_sum: u64) -> u64 {
        let bytes = u128::from(self.region_size) * u128::from(percent_sum) / 100;
        u64::try_from(bytes).unwrap_or(u64::MAX)
    }
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
            && self.status_word == other.status_word
            && self.regions == other.regions
    }
}

impl Eq for Snapshot {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AGE_BUCKETS, RegionLevels};

    const MB: u64 = 1024 * 1024;

    fn region(used: u8, live: u8, state: RegionState, age: u8, affiliation: Affiliation) -> RegionRecord {
        RegionRecord::new(
            RegionLevels {
                used,
                live,
                ..Default::default()
            },
            state,
            age,
            affiliation,
        )
    }

    fn sample_regions() -> Vec<RegionRecord> {
        vec![
            region(100, 50, RegionState::Regular, 0, Affiliation::Young),
            region(50, 10, RegionState::CollectionSet, 4, Affiliation::Young),
            region(100, 100, RegionState::Humongous, 16, Affiliation::Old),
            region(100, 100, RegionState::PinnedHumongous, 16, Affiliation::Old),
            region(20, 0, RegionState::PinnedCollectionSet, 7, Affiliation::Old),
            region(0, 0, RegionState::EmptyCommitted, 0, Affiliation::Young),
        ]
    }

    #[test]
    fn test_byte_totals() {
        let snapshot = Snapshot::new(10, 4 * MB, ProtocolVersion::V2, sample_regions(), 0);
        assert_eq!(snapshot.region_count(), 6);
        assert_eq!(snapshot.total(), 24 * MB);
        assert_eq!(snapshot.used(), 4 * MB * 370 / 100);
        assert_eq!(snapshot.live(), 4 * MB * 260 / 100);
        assert_eq!(snapshot.collection_set_used(), 4 * MB * 70 / 100);
        assert_eq!(snapshot.humongous_used(), 8 * MB);
        assert_eq!(snapshot.used_by(Affiliation::Young), 4 * MB * 150 / 100);
        assert_eq!(snapshot.used_by(Affiliation::Old), 4 * MB * 220 / 100);
        assert_eq!(snapshot.live_by(Affiliation::Old), 4 * MB * 200 / 100);
    }

    #[test]
    fn test_counts_match_records() {
        let regions = sample_regions();
        let snapshot = Snapshot::new(10, MB, ProtocolVersion::V2, regions.clone(), 0);

        for state in RegionState::ALL {
            let expected = regions.iter().filter(|r| r.state() == state).count();
            assert_eq!(snapshot.state_count(state), expected, "{state:?}");
        }
        for bucket in 0..AGE_BUCKETS {
            let expected = regions.iter().filter(|r| r.age_bucket() == bucket).count();
            assert_eq!(snapshot.age_bucket_count(bucket), expected);
        }
        assert_eq!(snapshot.affiliation_count(Affiliation::Young), 3);
        assert_eq!(snapshot.affiliation_count(Affiliation::Old), 3);
        assert_eq!(
            snapshot
                .summary()
                .count(RegionState::Humongous, 5, Affiliation::Old),
            1
        );
        assert_eq!(
            snapshot
                .summary()
                .count(RegionState::CollectionSet, 1, Affiliation::Young),
            1
        );
    }

    #[test]
    fn test_phase_resolved_once() {
        // Young evacuating, global marking.
        let snapshot = Snapshot::new(0, MB, ProtocolVersion::V2, sample_regions(), 0b01_00_10);
        assert_eq!(snapshot.gc_phase(), GcPhase::Young(Phase::Evacuating));
        assert_eq!(snapshot.phase(), Phase::Evacuating);
        assert_eq!(snapshot.flags().global, Phase::Marking);

        let snapshot = Snapshot::new(0, MB, ProtocolVersion::V1, vec![], 1 << 7);
        assert_eq!(snapshot.phase(), Phase::Idle);
        assert!(snapshot.is_full_gc());
        assert!(!snapshot.is_degenerated());
    }

    #[test]
    fn test_value_equality() {
        let a = Snapshot::new(42, MB, ProtocolVersion::V2, sample_regions(), 1);
        let b = Snapshot::new(42, MB, ProtocolVersion::V2, sample_regions(), 1);
        assert_eq!(a, b);

        let later = Snapshot::new(43, MB, ProtocolVersion::V2, sample_regions(), 1);
        assert_ne!(a, later);

        let other_phase = Snapshot::new(42, MB, ProtocolVersion::V2, sample_regions(), 2);
        assert_ne!(a, other_phase);

        let mut regions = sample_regions();
        regions[0] = region(99, 50, RegionState::Regular, 0, Affiliation::Young);
        let other_regions = Snapshot::new(42, MB, ProtocolVersion::V2, regions, 1);
        assert_ne!(a, other_regions);
    }

    #[test]
    fn test_huge_region_size_saturates() {
        let size = 1u64 << 60;
        let snapshot = Snapshot::new(0, size, ProtocolVersion::V2, sample_regions(), 0);
        // 370% of a region still fits once the product is widened.
        assert_eq!(snapshot.used(), size / 100 * 370 + (size % 100) * 370 / 100);
        assert_eq!(snapshot.humongous_used(), 2 * size);
        assert_eq!(snapshot.total(), 6 * size);

        let snapshot = Snapshot::new(0, u64::MAX, ProtocolVersion::V2, sample_regions(), 0);
        assert_eq!(snapshot.used(), u64::MAX);
        assert_eq!(snapshot.total(), u64::MAX);
        assert_eq!(snapshot.collection_set_used(), u64::MAX / 100 * 70 + (u64::MAX % 100) * 70 / 100);
    }

    #[test]
    fn test_from_words() {
        let words = [50 | (25 << 7) | (2 << 59), 1 << 59];
        let snapshot = Snapshot::from_words(5, MB, ProtocolVersion::V2, &words, 0, 4096).unwrap();
        assert_eq!(snapshot.region_count(), 2);
        assert_eq!(snapshot.region(0).unwrap().used(), 0.5);
        assert_eq!(snapshot.region(1).unwrap().state(), RegionState::EmptyCommitted);
        assert!(snapshot.region(2).is_none());

        let bad = [15 << 59];
        assert!(Snapshot::from_words(5, MB, ProtocolVersion::V2, &bad, 0, 4096).is_err());
    }

    #[test]
    fn test_pause_histogram() {
        let pauses = PauseHistogram::new(vec![(1000, 3), (100, 7), (10_000, 1)]);
        assert_eq!(pauses.buckets()[0], (100, 7));
        assert_eq!(pauses.total_pauses(), 11);

        let snapshot = Snapshot::new(0, MB, ProtocolVersion::V2, vec![], 0).with_pauses(pauses);
        assert_eq!(snapshot.pauses().unwrap().total_pauses(), 11);
    }
}
