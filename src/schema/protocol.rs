//! Telemetry protocol versions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire protocol version of the packed region telemetry.
///
/// Version 1 carries occupancy levels and the region state only. Version 2 adds
/// the PLAB level, region age, generational affiliation, an optional trailing
/// incoming-reference bitset, and per-generation phase bits in the status word.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum ProtocolVersion {
    V1 = 1,
    #[default]
    V2 = 2,
}

impl ProtocolVersion {
    /// Oldest version this crate can decode.
    pub const OLDEST: ProtocolVersion = ProtocolVersion::V1;
    /// Newest version this crate can decode.
    pub const LATEST: ProtocolVersion = ProtocolVersion::V2;

    pub fn from_number(n: u64) -> Option<Self> {
        match n {
            1 => Some(ProtocolVersion::V1),
            2 => Some(ProtocolVersion::V2),
            _ => None,
        }
    }

    /// Numeric version as written in recorded logs.
    #[inline]
    pub fn number(self) -> u32 {
        self as u32
    }

    /// Whether region words of this version may carry an incoming-reference bitset.
    #[inline]
    pub fn supports_incoming_refs(self) -> bool {
        self >= ProtocolVersion::V2
    }

    /// Whether the status word separates young, old and global phases.
    #[inline]
    pub fn is_generational(self) -> bool {
        self >= ProtocolVersion::V2
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.number())
    }
}
