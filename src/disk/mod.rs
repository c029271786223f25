//! Disk model: sizes, regions, the device graph and LVM rules

pub mod devicegraph;
pub mod free_space;
pub mod lvm;
pub mod region;
pub mod size;
