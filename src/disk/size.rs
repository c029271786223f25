//! Disk size value type
//!
//! Every size the planner handles is a [`DiskSize`]: a byte count or the
//! `Unlimited` sentinel used for open-ended maximum sizes. Arithmetic
//! saturates instead of overflowing and treats `Unlimited` as absorbing.

use crate::utils::error::{PlannerError, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;
const TIB: u64 = GIB * 1024;
const PIB: u64 = TIB * 1024;

const UNITS: [(&str, u64); 6] = [
    ("PiB", PIB),
    ("TiB", TIB),
    ("GiB", GIB),
    ("MiB", MIB),
    ("KiB", KIB),
    ("B", 1),
];

/// A size in bytes, or unlimited.
///
/// The derived ordering puts every finite size below `Unlimited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiskSize {
    Bytes(u64),
    Unlimited,
}

impl DiskSize {
    pub const fn zero() -> Self {
        DiskSize::Bytes(0)
    }

    pub const fn b(bytes: u64) -> Self {
        DiskSize::Bytes(bytes)
    }

    pub const fn kib(n: u64) -> Self {
        DiskSize::Bytes(n * KIB)
    }

    pub const fn mib(n: u64) -> Self {
        DiskSize::Bytes(n * MIB)
    }

    pub const fn gib(n: u64) -> Self {
        DiskSize::Bytes(n * GIB)
    }

    pub const fn tib(n: u64) -> Self {
        DiskSize::Bytes(n * TIB)
    }

    pub const fn unlimited() -> Self {
        DiskSize::Unlimited
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, DiskSize::Unlimited)
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, DiskSize::Bytes(0))
    }

    /// Byte count, `None` when unlimited
    pub fn to_bytes(&self) -> Option<u64> {
        match self {
            DiskSize::Bytes(b) => Some(*b),
            DiskSize::Unlimited => None,
        }
    }

    /// Byte count, saturating `Unlimited` to `u64::MAX`
    pub fn bytes_or_max(&self) -> u64 {
        self.to_bytes().unwrap_or(u64::MAX)
    }

    /// Round down to a multiple of `grain`
    pub fn floor(&self, grain: DiskSize) -> DiskSize {
        match (self, grain) {
            (DiskSize::Bytes(v), DiskSize::Bytes(g)) if g > 0 => DiskSize::Bytes(v / g * g),
            _ => *self,
        }
    }

    /// Round up to a multiple of `grain`
    pub fn ceil(&self, grain: DiskSize) -> DiskSize {
        match (self, grain) {
            (DiskSize::Bytes(v), DiskSize::Bytes(g)) if g > 0 => {
                DiskSize::Bytes(v.div_ceil(g).saturating_mul(g))
            }
            _ => *self,
        }
    }

    /// Human readable form with two decimals, e.g. `"10.50 GiB"`
    pub fn to_human_string(&self) -> String {
        let bytes = match self {
            DiskSize::Unlimited => return "unlimited".to_string(),
            DiskSize::Bytes(b) => *b,
        };
        for (unit, factor) in UNITS {
            if factor > 1 && bytes >= factor {
                return format!("{:.2} {}", bytes as f64 / factor as f64, unit);
            }
        }
        format!("{} B", bytes)
    }

    /// Lossless form using the largest unit that divides the value exactly
    pub fn to_exact_string(&self) -> String {
        let bytes = match self {
            DiskSize::Unlimited => return "unlimited".to_string(),
            DiskSize::Bytes(b) => *b,
        };
        if bytes == 0 {
            return "0 B".to_string();
        }
        for (unit, factor) in UNITS {
            if bytes % factor == 0 {
                return format!("{} {}", bytes / factor, unit);
            }
        }
        format!("{} B", bytes)
    }
}

impl Default for DiskSize {
    fn default() -> Self {
        DiskSize::zero()
    }
}

impl fmt::Display for DiskSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_human_string())
    }
}

impl Add for DiskSize {
    type Output = DiskSize;

    fn add(self, other: DiskSize) -> DiskSize {
        match (self, other) {
            (DiskSize::Bytes(a), DiskSize::Bytes(b)) => DiskSize::Bytes(a.saturating_add(b)),
            _ => DiskSize::Unlimited,
        }
    }
}

impl AddAssign for DiskSize {
    fn add_assign(&mut self, other: DiskSize) {
        *self = *self + other;
    }
}

impl Sub for DiskSize {
    type Output = DiskSize;

    fn sub(self, other: DiskSize) -> DiskSize {
        match (self, other) {
            (DiskSize::Bytes(a), DiskSize::Bytes(b)) => DiskSize::Bytes(a.saturating_sub(b)),
            (DiskSize::Unlimited, _) => DiskSize::Unlimited,
            (DiskSize::Bytes(_), DiskSize::Unlimited) => DiskSize::zero(),
        }
    }
}

impl SubAssign for DiskSize {
    fn sub_assign(&mut self, other: DiskSize) {
        *self = *self - other;
    }
}

impl Mul<u64> for DiskSize {
    type Output = DiskSize;

    fn mul(self, factor: u64) -> DiskSize {
        match self {
            DiskSize::Bytes(a) => DiskSize::Bytes(a.saturating_mul(factor)),
            DiskSize::Unlimited => DiskSize::Unlimited,
        }
    }
}

impl Div<u64> for DiskSize {
    type Output = DiskSize;

    fn div(self, divisor: u64) -> DiskSize {
        match self {
            DiskSize::Bytes(a) if divisor > 0 => DiskSize::Bytes(a / divisor),
            _ => DiskSize::Unlimited,
        }
    }
}

impl Sum for DiskSize {
    fn sum<I: Iterator<Item = DiskSize>>(iter: I) -> DiskSize {
        iter.fold(DiskSize::zero(), |acc, s| acc + s)
    }
}

impl<'a> Sum<&'a DiskSize> for DiskSize {
    fn sum<I: Iterator<Item = &'a DiskSize>>(iter: I) -> DiskSize {
        iter.fold(DiskSize::zero(), |acc, s| acc + *s)
    }
}

impl FromStr for DiskSize {
    type Err = PlannerError;

    /// Parses `"10 GiB"`, `"10GiB"`, `"10G"`, `"1.5 TiB"`, `"4096"` or
    /// `"unlimited"`. Units are binary; a trailing `B` is optional.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(DiskSize::Unlimited);
        }

        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (number, unit) = trimmed.split_at(split);
        let unit = unit.trim();

        let factor = match unit.to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => KIB,
            "m" | "mb" | "mib" => MIB,
            "g" | "gb" | "gib" => GIB,
            "t" | "tb" | "tib" => TIB,
            "p" | "pb" | "pib" => PIB,
            _ => return Err(PlannerError::InvalidSize(s.to_string())),
        };

        if number.contains('.') {
            let value: f64 = number
                .parse()
                .map_err(|_| PlannerError::InvalidSize(s.to_string()))?;
            Ok(DiskSize::Bytes((value * factor as f64).round() as u64))
        } else {
            let value: u64 = number
                .parse()
                .map_err(|_| PlannerError::InvalidSize(s.to_string()))?;
            value
                .checked_mul(factor)
                .map(DiskSize::Bytes)
                .ok_or_else(|| PlannerError::InvalidSize(s.to_string()))
        }
    }
}

impl Serialize for DiskSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_exact_string())
    }
}

struct DiskSizeVisitor;

impl<'de> Visitor<'de> for DiskSizeVisitor {
    type Value = DiskSize;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a byte count or a size string such as \"10 GiB\"")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<DiskSize, E> {
        Ok(DiskSize::Bytes(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<DiskSize, E> {
        u64::try_from(v)
            .map(DiskSize::Bytes)
            .map_err(|_| E::custom("negative size"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<DiskSize, E> {
        v.parse().map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for DiskSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(DiskSizeVisitor)
    }
}
