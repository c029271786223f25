//! Proposal settings

use crate::disk::devicegraph::FilesystemType;
use crate::disk::lvm::{is_valid_lvm_name, DEFAULT_EXTENT_SIZE};
use crate::disk::size::DiskSize;
use crate::proposal::planned::MakeSpacePolicy;
use crate::utils::error::{PlannerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;

/// Everything the proposal needs to know besides the device graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProposalSettings {
    /// Disks the proposal may use (e.g., ["/dev/sda"])
    #[serde(default)]
    pub candidate_disks: Vec<String>,
    /// Disk for the root filesystem and boot partitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device: Option<String>,
    #[serde(default)]
    pub boot_mode: BootMode,
    #[serde(default = "default_root_filesystem")]
    pub root_filesystem: FilesystemType,
    #[serde(default = "default_root_base_size")]
    pub root_base_size: DiskSize,
    #[serde(default = "default_root_max_size")]
    pub root_max_size: DiskSize,
    #[serde(default = "default_root_weight")]
    pub root_weight: u32,
    /// Enlarge root for Btrfs snapshots
    #[serde(default = "default_true")]
    pub btrfs_snapshots: bool,
    #[serde(default = "default_btrfs_increase_percentage")]
    pub btrfs_increase_percentage: u32,
    #[serde(default = "default_true")]
    pub use_separate_home: bool,
    #[serde(default = "default_home_filesystem")]
    pub home_filesystem: FilesystemType,
    #[serde(default = "default_home_min_size")]
    pub home_min_size: DiskSize,
    #[serde(default = "DiskSize::unlimited")]
    pub home_max_size: DiskSize,
    #[serde(default = "default_home_weight")]
    pub home_weight: u32,
    #[serde(default)]
    pub swap: SwapSettings,
    #[serde(default)]
    pub lvm: LvmSettings,
    /// Encrypt new partitions (or the PVs, with LVM)
    #[serde(default, skip_serializing)]
    pub encryption_password: Option<String>,
    #[serde(default)]
    pub delete_resize: DeleteSettings,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    #[default]
    Uefi,
    Legacy,
}

impl std::fmt::Display for BootMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uefi => write!(f, "UEFI"),
            Self::Legacy => write!(f, "Legacy BIOS"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SwapSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_swap_min_size")]
    pub min_size: DiskSize,
    #[serde(default = "default_swap_max_size")]
    pub max_size: DiskSize,
    #[serde(default = "default_swap_weight")]
    pub weight: u32,
    /// Make swap at least as big as the RAM
    #[serde(default)]
    pub enlarge_for_suspend: bool,
    /// RAM size (None = read from /proc/meminfo)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_size: Option<DiskSize>,
    /// Use an existing swap partition instead of creating one
    #[serde(default = "default_true")]
    pub reuse_existing: bool,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: default_swap_min_size(),
            max_size: default_swap_max_size(),
            weight: default_swap_weight(),
            enlarge_for_suspend: false,
            ram_size: None,
            reuse_existing: true,
        }
    }
}

impl SwapSettings {
    /// Configured RAM size, or the one of this machine
    pub fn effective_ram_size(&self) -> DiskSize {
        self.ram_size.unwrap_or_else(get_ram_size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LvmSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_vg_name")]
    pub vg_name: String,
    #[serde(default = "default_extent_size")]
    pub extent_size: DiskSize,
    /// Reuse the most suitable existing volume group
    #[serde(default)]
    pub reuse_volume_group: bool,
    #[serde(default)]
    pub make_space_policy: MakeSpacePolicy,
}

impl Default for LvmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            vg_name: default_vg_name(),
            extent_size: default_extent_size(),
            reuse_volume_group: false,
            make_space_policy: MakeSpacePolicy::default(),
        }
    }
}

/// Which existing partitions may be deleted to make space
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteSettings {
    /// Linux, swap and LVM partitions
    #[serde(default = "default_true")]
    pub linux: bool,
    /// Everything else (Windows, unknown, ESP)
    #[serde(default)]
    pub other: bool,
}

impl Default for DeleteSettings {
    fn default() -> Self {
        Self {
            linux: true,
            other: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_root_filesystem() -> FilesystemType {
    FilesystemType::Btrfs
}

fn default_root_base_size() -> DiskSize {
    DiskSize::gib(3)
}

fn default_root_max_size() -> DiskSize {
    DiskSize::gib(10)
}

fn default_root_weight() -> u32 {
    40
}

fn default_btrfs_increase_percentage() -> u32 {
    300
}

fn default_home_filesystem() -> FilesystemType {
    FilesystemType::Xfs
}

fn default_home_min_size() -> DiskSize {
    DiskSize::gib(10)
}

fn default_home_weight() -> u32 {
    60
}

fn default_swap_min_size() -> DiskSize {
    DiskSize::mib(512)
}

fn default_swap_max_size() -> DiskSize {
    DiskSize::gib(2)
}

fn default_swap_weight() -> u32 {
    10
}

fn default_vg_name() -> String {
    "system".to_string()
}

fn default_extent_size() -> DiskSize {
    DEFAULT_EXTENT_SIZE
}

/// Total RAM of this machine
pub fn get_ram_size() -> DiskSize {
    let meminfo = fs::read_to_string("/proc/meminfo").unwrap_or_default();
    for line in meminfo.lines() {
        if line.starts_with("MemTotal:") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                if let Ok(kb) = parts[1].parse::<u64>() {
                    return DiskSize::kib(kb);
                }
            }
        }
    }
    // Fallback: 8GB
    DiskSize::gib(8)
}

impl Default for ProposalSettings {
    fn default() -> Self {
        Self {
            candidate_disks: Vec::new(),
            root_device: None,
            boot_mode: BootMode::default(),
            root_filesystem: default_root_filesystem(),
            root_base_size: default_root_base_size(),
            root_max_size: default_root_max_size(),
            root_weight: default_root_weight(),
            btrfs_snapshots: true,
            btrfs_increase_percentage: default_btrfs_increase_percentage(),
            use_separate_home: true,
            home_filesystem: default_home_filesystem(),
            home_min_size: default_home_min_size(),
            home_max_size: DiskSize::Unlimited,
            home_weight: default_home_weight(),
            swap: SwapSettings::default(),
            lvm: LvmSettings::default(),
            encryption_password: None,
            delete_resize: DeleteSettings::default(),
        }
    }
}

impl ProposalSettings {
    /// Load settings from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: ProposalSettings = toml::from_str(&content)?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate sample settings
    pub fn sample() -> Self {
        ProposalSettings {
            candidate_disks: vec!["/dev/sda".to_string()],
            root_device: Some("/dev/sda".to_string()),
            swap: SwapSettings {
                ram_size: Some(DiskSize::gib(8)),
                ..SwapSettings::default()
            },
            ..ProposalSettings::default()
        }
    }

    /// Disk root and boot partitions go to
    pub fn root_disk(&self) -> Option<&str> {
        self.root_device
            .as_deref()
            .or_else(|| self.candidate_disks.first().map(String::as_str))
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        if self.candidate_disks.is_empty() {
            return Err(PlannerError::ValidationError(
                "At least one candidate disk is required".to_string(),
            ));
        }
        if let Some(root) = &self.root_device {
            if !self.candidate_disks.contains(root) {
                return Err(PlannerError::ValidationError(format!(
                    "Root device {} is not a candidate disk",
                    root
                )));
            }
        }

        check_range("root", self.root_base_size, self.root_max_size)?;
        if self.use_separate_home {
            check_range("home", self.home_min_size, self.home_max_size)?;
        }
        if self.swap.enabled {
            check_range("swap", self.swap.min_size, self.swap.max_size)?;
        }

        if self.lvm.enabled {
            if !is_valid_lvm_name(&self.lvm.vg_name) {
                return Err(PlannerError::ValidationError(format!(
                    "Invalid volume group name: {}",
                    self.lvm.vg_name
                )));
            }
            let extent = self.lvm.extent_size.to_bytes().unwrap_or(0);
            if extent == 0 || !extent.is_power_of_two() {
                return Err(PlannerError::ValidationError(format!(
                    "Extent size must be a power of two, got {}",
                    self.lvm.extent_size
                )));
            }
        }

        if self
            .encryption_password
            .as_deref()
            .is_some_and(|p| p.is_empty())
        {
            return Err(PlannerError::ValidationError(
                "Encryption password cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_range(what: &str, min: DiskSize, max: DiskSize) -> Result<()> {
    if min > max {
        return Err(PlannerError::ValidationError(format!(
            "{} minimum size {} exceeds maximum {}",
            what, min, max
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_is_valid() {
        ProposalSettings::sample().validate().unwrap();
    }

    #[test]
    fn sample_round_trips_through_toml() {
        let sample = ProposalSettings::sample();
        let text = sample.to_toml().unwrap();
        let parsed: ProposalSettings = toml::from_str(&text).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings: ProposalSettings = toml::from_str(
            r#"
            candidate_disks = ["/dev/vda"]
            root_max_size = "unlimited"

            [swap]
            max_size = "4 GiB"

            [lvm]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(settings.root_base_size, DiskSize::gib(3));
        assert!(settings.root_max_size.is_unlimited());
        assert_eq!(settings.swap.max_size, DiskSize::gib(4));
        assert_eq!(settings.swap.min_size, DiskSize::mib(512));
        assert_eq!(settings.lvm.vg_name, "system");
        assert_eq!(settings.lvm.make_space_policy, MakeSpacePolicy::Needed);
        assert_eq!(settings.root_disk(), Some("/dev/vda"));
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let mut settings = ProposalSettings::sample();
        settings.root_device = Some("/dev/sdz".to_string());
        assert!(settings.validate().is_err());

        let mut settings = ProposalSettings::sample();
        settings.swap.min_size = DiskSize::gib(4);
        assert!(settings.validate().is_err());

        let mut settings = ProposalSettings::sample();
        settings.lvm.enabled = true;
        settings.lvm.extent_size = DiskSize::mib(3);
        assert!(settings.validate().is_err());

        let mut settings = ProposalSettings::sample();
        settings.lvm.enabled = true;
        settings.lvm.vg_name = "bad name".to_string();
        assert!(settings.validate().is_err());

        let mut settings = ProposalSettings::sample();
        settings.candidate_disks.clear();
        settings.root_device = None;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn configured_ram_size_wins() {
        let swap = SwapSettings {
            ram_size: Some(DiskSize::gib(16)),
            ..SwapSettings::default()
        };
        assert_eq!(swap.effective_ram_size(), DiskSize::gib(16));
        assert!(!get_ram_size().is_zero());
    }
}
