//! Flash plan: the complete set of segments written in one operation.

use {
    crate::{
        error::{Error, Result},
        firmware::{FirmwareSegment, SegmentRole},
    },
    std::collections::HashSet,
};

/// One segment and the address it is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    /// Segment contents.
    pub segment: FirmwareSegment,
    /// Target flash address.
    pub address: u32,
}

/// Ordered, fully materialized list of segments to write.
///
/// Construction fails unless every role is present exactly once, in plan
/// order, at distinct and non-overlapping addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPlan {
    entries: Vec<PlanEntry>,
}

impl FlashPlan {
    /// Build a plan from fetched segments, placing each at its role address.
    pub fn new(segments: Vec<FirmwareSegment>, app_offset: u32) -> Result<Self> {
        if segments.len() != SegmentRole::ALL.len() {
            return Err(Error::Config(format!(
                "Flash plan needs {} segments, got {}",
                SegmentRole::ALL.len(),
                segments.len()
            )));
        }

        let mut entries = Vec::with_capacity(segments.len());
        let mut seen = HashSet::new();

        for (segment, role) in segments.into_iter().zip(SegmentRole::ALL) {
            if segment.role != role {
                return Err(Error::Config(format!(
                    "Expected {role} segment, got {}",
                    segment.role
                )));
            }
            let address = role.address(app_offset);
            if !seen.insert(address) {
                return Err(Error::Config(format!(
                    "Address 0x{address:X} used by more than one segment"
                )));
            }
            entries.push(PlanEntry { segment, address });
        }

        let plan = Self { entries };
        plan.check_overlap()?;
        Ok(plan)
    }

    fn check_overlap(&self) -> Result<()> {
        let mut ranges: Vec<(u64, u64, &str)> = self
            .entries
            .iter()
            .map(|e| {
                let start = u64::from(e.address);
                (start, start + e.segment.len() as u64, e.segment.name.as_str())
            })
            .collect();
        ranges.sort_by_key(|r| r.0);

        for pair in ranges.windows(2) {
            let (_, end, name) = pair[0];
            let (start, _, next) = pair[1];
            if end > start {
                return Err(Error::Config(format!(
                    "Segment {name} overlaps {next} at 0x{start:X}"
                )));
            }
        }
        Ok(())
    }

    /// Entries in write order.
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    /// Target addresses in write order.
    pub fn addresses(&self) -> Vec<u32> {
        self.entries.iter().map(|e| e.address).collect()
    }

    /// Entry for a role.
    pub fn entry(&self, role: SegmentRole) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.segment.role == role)
    }

    /// Total bytes across all segments.
    pub fn total_bytes(&self) -> usize {
        self.entries.iter().map(|e| e.segment.len()).sum()
    }
}
