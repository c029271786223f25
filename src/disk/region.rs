//! Byte regions on a disk and alignment helpers

use crate::disk::size::DiskSize;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition alignment grain (1 MiB, as sfdisk and parted align by default)
pub const ALIGN_GRAIN: u64 = 1024 * 1024;

/// Space consumed in front of every logical partition by its EBR
pub const LOGICAL_OVERHEAD: u64 = ALIGN_GRAIN;

/// Align value down to alignment boundary
pub fn floor_align(value: u64, align: u64) -> u64 {
    (value / align) * align
}

/// Align value up to alignment boundary
pub fn ceil_align(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

/// Contiguous byte range `[start, start + length)` on a disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    pub start: u64,
    pub length: u64,
}

impl Region {
    pub fn new(start: u64, length: u64) -> Self {
        Self { start, length }
    }

    /// Region spanning `[start, end)`; empty when `end <= start`
    pub fn from_bounds(start: u64, end: u64) -> Self {
        Self {
            start,
            length: end.saturating_sub(start),
        }
    }

    /// Exclusive end offset
    pub fn end(&self) -> u64 {
        self.start + self.length
    }

    pub fn size(&self) -> DiskSize {
        DiskSize::b(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn contains(&self, other: &Region) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end() && other.start < self.end()
    }

    /// Shrink the region inwards so both ends sit on `grain` boundaries
    pub fn aligned(&self, grain: u64) -> Region {
        let start = ceil_align(self.start, grain);
        let end = floor_align(self.end(), grain);
        Region::from_bounds(start, end)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} - {}) ({})",
            self.start,
            self.end(),
            self.size().to_human_string()
        )
    }
}
