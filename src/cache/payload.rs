//! Payload entry types and tier definitions.
//!
//! A payload is a cacheable unit (one model layer, one embedding blob).
//! Payloads are the unit of movement between tiers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::blob::BlobLocation;

/// Unique identifier for a payload.
pub type PayloadId = String;

/// Identifier of the model that owns a group of payloads.
pub type ModelId = String;

/// Storage class a payload currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Tier 0: resident buffer (hot).
    Memory,
    /// Tier 1: warm blob copy.
    Ssd,
    /// Tier 2: durable origin (cold).
    Cold,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Memory, Tier::Ssd, Tier::Cold];

    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::Memory => 0,
            Tier::Ssd => 1,
            Tier::Cold => 2,
        }
    }

    /// Whether this tier is at least as fast as `other`.
    pub fn at_least(&self, other: Tier) -> bool {
        self.level() <= other.level()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Memory => "memory",
            Tier::Ssd => "ssd",
            Tier::Cold => "cold",
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.level() as usize
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Arguments for registering a payload that already lives in cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadRegistration {
    pub id: PayloadId,
    pub owner_model_id: ModelId,
    /// Position within the owning model; used to pick first/last layers.
    #[serde(default)]
    pub layer_index: Option<u32>,
    pub size_bytes: u64,
    pub blob_location: BlobLocation,
}

/// A single cached payload.
///
/// `buffer` is present exactly when `tier == Memory`. Access metadata is kept
/// across demotions.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadEntry {
    pub id: PayloadId,

    pub size_bytes: u64,

    /// Current storage tier.
    pub tier: Tier,

    pub owner_model_id: ModelId,

    pub layer_index: Option<u32>,

    pub last_accessed_at: Option<DateTime<Utc>>,

    /// Access count over the rolling scoring window, refreshed on each
    /// eviction cycle and bumped on every access.
    pub access_count_window: u64,

    /// Durable cold-storage location.
    pub blob_location: BlobLocation,

    /// Warm copy on the SSD store, if one was written.
    pub ssd_location: Option<BlobLocation>,

    /// Resident data when in Memory.
    #[serde(skip)]
    pub buffer: Option<Bytes>,

    pub demoted_at: Option<DateTime<Utc>>,

    pub registered_at: DateTime<Utc>,

    /// Outstanding pins; pinned entries are never demoted.
    pub pins: u32,

    /// A promotion for this entry is in flight.
    #[serde(skip)]
    pub(crate) promoting: bool,

    /// Claimed by an eviction cycle; its demotion is in flight.
    #[serde(skip)]
    pub(crate) demoting: bool,
}

impl PayloadEntry {
    /// Create an entry at the Cold tier.
    pub fn new_cold(reg: PayloadRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id: reg.id,
            size_bytes: reg.size_bytes,
            tier: Tier::Cold,
            owner_model_id: reg.owner_model_id,
            layer_index: reg.layer_index,
            last_accessed_at: None,
            access_count_window: 0,
            blob_location: reg.blob_location,
            ssd_location: None,
            buffer: None,
            demoted_at: None,
            registered_at: now,
            pins: 0,
            promoting: false,
            demoting: false,
        }
    }

    /// Record an access, updating timestamp and counter.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_accessed_at = Some(match self.last_accessed_at {
            Some(prev) if prev > now => prev,
            _ => now,
        });
        self.access_count_window += 1;
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    /// `buffer` present iff resident, and a warm copy exists when on SSD.
    pub fn is_consistent(&self) -> bool {
        let resident = self.buffer.is_some() == (self.tier == Tier::Memory);
        let warm = self.tier != Tier::Ssd || self.ssd_location.is_some();
        resident && warm
    }
}
