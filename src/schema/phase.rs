//! Collector phase decoding from the status word.

use serde::{Deserialize, Serialize};

use super::ProtocolVersion;

// Version 1: one global phase, one bit per activity.
const V1_MARKING: u64 = 1 << 0;
const V1_EVACUATING: u64 = 1 << 1;
const V1_UPDATE_REFS: u64 = 1 << 2;

// Version 2: a two-bit phase code per generation.
const PHASE_CODE_MASK: u64 = 0b11;
const YOUNG_SHIFT: u32 = 0;
const OLD_SHIFT: u32 = 2;
const GLOBAL_SHIFT: u32 = 4;

const DEGENERATED_BIT: u64 = 1 << 6;
const FULL_GC_BIT: u64 = 1 << 7;

/// Collector activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Marking,
    Evacuating,
    UpdateRefs,
    Unknown,
}

impl Phase {
    fn from_code(code: u64) -> Self {
        match code & PHASE_CODE_MASK {
            0 => Phase::Idle,
            1 => Phase::Marking,
            2 => Phase::Evacuating,
            _ => Phase::UpdateRefs,
        }
    }

    #[inline]
    pub fn is_active(self) -> bool {
        self != Phase::Idle
    }
}

/// Generation a collection cycle operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Generation {
    Young,
    Global,
    Old,
}

/// Order in which concurrently active generations win phase resolution.
const PRECEDENCE: [Generation; 3] = [Generation::Young, Generation::Global, Generation::Old];

/// Resolved collector phase, tagged with the generation that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GcPhase {
    #[default]
    Idle,
    Young(Phase),
    Global(Phase),
    Old(Phase),
}

impl GcPhase {
    fn tagged(generation: Generation, phase: Phase) -> Self {
        match generation {
            Generation::Young => GcPhase::Young(phase),
            Generation::Global => GcPhase::Global(phase),
            Generation::Old => GcPhase::Old(phase),
        }
    }

    /// Untagged phase of the winning generation.
    pub fn phase(self) -> Phase {
        match self {
            GcPhase::Idle => Phase::Idle,
            GcPhase::Young(p) | GcPhase::Global(p) | GcPhase::Old(p) => p,
        }
    }

    pub fn generation(self) -> Option<Generation> {
        match self {
            GcPhase::Idle => None,
            GcPhase::Young(_) => Some(Generation::Young),
            GcPhase::Global(_) => Some(Generation::Global),
            GcPhase::Old(_) => Some(Generation::Old),
        }
    }
}

/// Flags decoded from a snapshot's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusFlags {
    pub young: Phase,
    pub global: Phase,
    pub old: Phase,
    /// A concurrent cycle fell back to a stop-the-world degenerated cycle.
    pub degenerated: bool,
    /// A full stop-the-world collection is running.
    pub full_gc: bool,
}

impl StatusFlags {
    /// Decode the status word using the bit semantics of `version`.
    pub fn from_status_word(word: u64, version: ProtocolVersion) -> Self {
        let degenerated = word & DEGENERATED_BIT != 0;
        let full_gc = word & FULL_GC_BIT != 0;

        if version.is_generational() {
            return Self {
                young: Phase::from_code(word >> YOUNG_SHIFT),
                global: Phase::from_code(word >> GLOBAL_SHIFT),
                old: Phase::from_code(word >> OLD_SHIFT),
                degenerated,
                full_gc,
            };
        }

        let active = [
            (V1_MARKING, Phase::Marking),
            (V1_EVACUATING, Phase::Evacuating),
            (V1_UPDATE_REFS, Phase::UpdateRefs),
        ];
        let mut set = active.iter().filter(|(bit, _)| word & bit != 0);
        let global = match (set.next(), set.next()) {
            (None, _) => Phase::Idle,
            (Some(&(_, phase)), None) => phase,
            (Some(_), Some(_)) => Phase::Unknown,
        };

        Self {
            young: Phase::Idle,
            global,
            old: Phase::Idle,
            degenerated,
            full_gc,
        }
    }

    pub fn phase_of(&self, generation: Generation) -> Phase {
        match generation {
            Generation::Young => self.young,
            Generation::Global => self.global,
            Generation::Old => self.old,
        }
    }

    /// Resolve the active phase: young wins over global, global over old.
    pub fn resolve(&self) -> GcPhase {
        PRECEDENCE
            .iter()
            .map(|&generation| (generation, self.phase_of(generation)))
            .find(|(_, phase)| phase.is_active())
            .map(|(generation, phase)| GcPhase::tagged(generation, phase))
            .unwrap_or(GcPhase::Idle)
    }
}
