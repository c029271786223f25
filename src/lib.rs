//! spacedist library - lays out planned partitions and LVM volumes over the
//! free space of a set of disks

pub mod config;
pub mod disk;
pub mod proposal;
pub mod utils;

pub use config::ProposalSettings;
pub use disk::devicegraph::Devicegraph;
pub use disk::free_space::FreeDiskSpace;
pub use disk::size::DiskSize;
pub use proposal::{Proposal, ProposalResult, SpaceDistribution, SpaceDistributionCalculator};
pub use utils::error::PlannerError;
