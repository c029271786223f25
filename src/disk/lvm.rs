//! LVM sizing rules and naming helpers
//!
//! Physical volume overhead, extent rounding and the name rules shared by
//! the device graph and the LVM planning code.

use crate::disk::size::DiskSize;
use once_cell::sync::Lazy;
use regex::Regex;

/// Default extent size of new volume groups
pub const DEFAULT_EXTENT_SIZE: DiskSize = DiskSize::mib(4);

/// Space taken by LVM metadata at the start of every physical volume
pub const PV_METADATA_SIZE: DiskSize = DiskSize::mib(1);

/// Characters LVM accepts in VG and LV names
static LVM_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+_.][A-Za-z0-9+_.-]*$").expect("valid regex"));

/// Capacity a PV of `raw_size` contributes to a VG with `extent_size`
///
/// The metadata area is subtracted and the rest floored to whole extents.
pub fn useful_pv_space(raw_size: DiskSize, extent_size: DiskSize) -> DiskSize {
    (raw_size - PV_METADATA_SIZE).floor(extent_size)
}

/// Raw device size needed for a PV to contribute `useful` bytes
pub fn raw_pv_size(useful: DiskSize, extent_size: DiskSize) -> DiskSize {
    if useful.is_unlimited() {
        return DiskSize::Unlimited;
    }
    useful.ceil(extent_size) + PV_METADATA_SIZE
}

/// Get the device path for a logical volume
pub fn lv_path(vg_name: &str, lv_name: &str) -> String {
    format!("/dev/{}/{}", vg_name, lv_name)
}

/// Whether LVM would accept `name` for a VG or LV
pub fn is_valid_lvm_name(name: &str) -> bool {
    name.len() <= 127 && name != "." && name != ".." && LVM_NAME_RE.is_match(name)
}

/// First name of `base`, `base0`, `base1`, ... not rejected by `taken`
pub fn unique_name<F>(base: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    if !taken(base) {
        return base.to_string();
    }
    (0u32..)
        .map(|suffix| format!("{}{}", base, suffix))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn useful_space_drops_metadata_and_rounds_down() {
        let extent = DiskSize::mib(4);
        assert_eq!(useful_pv_space(DiskSize::mib(10), extent), DiskSize::mib(8));
        assert_eq!(useful_pv_space(DiskSize::mib(9), extent), DiskSize::mib(8));
        assert_eq!(useful_pv_space(DiskSize::mib(1), extent), DiskSize::zero());
    }

    #[test]
    fn raw_size_inverts_useful_space() {
        let extent = DiskSize::mib(4);
        let raw = raw_pv_size(DiskSize::mib(10), extent);
        assert_eq!(raw, DiskSize::mib(13));
        assert_eq!(useful_pv_space(raw, extent), DiskSize::mib(12));
    }

    #[test]
    fn test_lv_path() {
        assert_eq!(lv_path("system", "root"), "/dev/system/root");
    }

    #[test]
    fn validates_names() {
        assert!(is_valid_lvm_name("system"));
        assert!(is_valid_lvm_name("vg_data-1"));
        assert!(!is_valid_lvm_name("-vg"));
        assert!(!is_valid_lvm_name("my vg"));
        assert!(!is_valid_lvm_name(".."));
    }

    #[test]
    fn unique_name_appends_increasing_suffix() {
        let existing = ["system", "system0"];
        let name = unique_name("system", |n| existing.contains(&n));
        assert_eq!(name, "system1");
        assert_eq!(unique_name("root", |n| existing.contains(&n)), "root");
    }
}
