//! Search for the best assignment of planned partitions to free spaces
//!
//! The search walks every assignment of partitions to the spaces they are
//! allowed on, depth first, dropping branches as soon as the minimum sizes
//! assigned to a space exceed it. Interchangeable partitions (same sizes,
//! weight and disk) are only assigned in non-decreasing space order, so their
//! permutations are not walked again. Without LVM, branches already bound to
//! leave more gaps than the best candidate are dropped as well. Each complete
//! assignment is turned into a [`SpaceDistribution`] (which settles partition
//! types and sizes) and the best one according to
//! [`SpaceDistribution::compare`] wins.

use crate::disk::free_space::FreeDiskSpace;
use crate::disk::region::{ALIGN_GRAIN, LOGICAL_OVERHEAD};
use crate::disk::size::DiskSize;
use crate::proposal::assigned_space::AssignedSpace;
use crate::proposal::lvm_helper::LvmHelper;
use crate::proposal::planned::{to_distribute, total_min_size, PlannedPartition};
use crate::proposal::space_distribution::SpaceDistribution;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Complete assignments evaluated before the search gives up exploring
pub const MAX_CANDIDATES: usize = 1_000_000;

#[derive(Debug, Clone, Default)]
pub struct SpaceDistributionCalculator {
    lvm_helper: Option<LvmHelper>,
}

impl SpaceDistributionCalculator {
    pub fn new(lvm_helper: Option<LvmHelper>) -> Self {
        Self { lvm_helper }
    }

    pub fn lvm_helper(&self) -> Option<&LvmHelper> {
        self.lvm_helper.as_ref()
    }

    /// Physical volume capacity still to be placed
    pub fn lvm_missing_space(&self) -> DiskSize {
        self.lvm_helper
            .as_ref()
            .map(|h| h.missing_space())
            .unwrap_or_default()
    }

    /// Best distribution of `volumes` over `spaces`, `None` if there is none
    ///
    /// Reused volumes are ignored. When an LVM helper is set, physical
    /// volumes for the missing LVM capacity are placed as well.
    pub fn best_distribution(
        &self,
        volumes: &[PlannedPartition],
        spaces: &[FreeDiskSpace],
    ) -> Option<SpaceDistribution> {
        let volumes = to_distribute(volumes);
        let lvm_missing = self.lvm_missing_space();
        let helper = self.lvm_helper.as_ref().filter(|_| !lvm_missing.is_zero());

        if volumes.is_empty() && helper.is_none() {
            return Some(SpaceDistribution::empty());
        }

        let mut spaces = spaces.to_vec();
        spaces.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let pv_min = helper
            .map(|h| h.raw_size_for(lvm_missing))
            .unwrap_or_default();
        if !enough_total_space(&volumes, &spaces, pv_min) {
            debug!("Free spaces are too small for the planned partitions");
            return None;
        }

        let grain = DiskSize::b(ALIGN_GRAIN);
        let mut candidates = Vec::with_capacity(volumes.len());
        for volume in &volumes {
            let min = volume.min_size.ceil(grain);
            let allowed: Vec<usize> = spaces
                .iter()
                .enumerate()
                .filter(|(_, s)| volume.disk.as_deref().map_or(true, |d| d == s.disk_name))
                .filter(|(_, s)| min <= s.disk_size())
                .map(|(i, _)| i)
                .collect();
            if allowed.is_empty() {
                debug!("No free space can hold {}", volume);
                return None;
            }
            candidates.push(allowed);
        }

        // Biggest first; interchangeable volumes end up next to each other
        let key = |i: usize| {
            let v = &volumes[i];
            (
                std::cmp::Reverse(v.min_size.ceil(grain)),
                v.max_size,
                v.weight,
                v.disk.as_deref(),
            )
        };
        let mut order: Vec<usize> = (0..volumes.len()).collect();
        order.sort_by(|&a, &b| key(a).cmp(&key(b)));
        let same_as_previous: Vec<bool> = (0..order.len())
            .map(|d| d > 0 && key(order[d]) == key(order[d - 1]))
            .collect();
        let reach = volumes.iter().map(|v| reach_size(v, grain)).collect();

        let mut search = Search {
            volumes: &volumes,
            spaces: &spaces,
            candidates,
            order,
            same_as_previous,
            reach,
            chosen: vec![0; volumes.len()],
            assigned: vec![Vec::new(); spaces.len()],
            footprint: vec![DiskSize::zero(); spaces.len()],
            lvm_helper: helper,
            leaves: 0,
            capped: false,
            best: None,
        };
        search.explore(0);

        if search.capped {
            warn!(
                "Stopped the distribution search after {} candidates",
                MAX_CANDIDATES
            );
        }
        debug!(
            "Evaluated {} candidate assignments, best found: {}",
            search.leaves,
            search.best.is_some()
        );
        search.best
    }
}

/// Cheap rejection before any search: minimum sizes against available space,
/// globally and for every disk volumes are restricted to
fn enough_total_space(
    volumes: &[PlannedPartition],
    spaces: &[FreeDiskSpace],
    pv_min: DiskSize,
) -> bool {
    let grain = DiskSize::b(ALIGN_GRAIN);
    let available: DiskSize = spaces.iter().map(|s| s.disk_size()).sum();
    if total_min_size(volumes, grain) + pv_min > available {
        return false;
    }

    let mut per_disk: BTreeMap<&str, DiskSize> = BTreeMap::new();
    for volume in volumes {
        if let Some(disk) = volume.disk.as_deref() {
            *per_disk.entry(disk).or_default() += volume.min_size.ceil(grain);
        }
    }
    per_disk.into_iter().all(|(disk, needed)| {
        let on_disk: DiskSize = spaces
            .iter()
            .filter(|s| s.disk_name == disk)
            .map(|s| s.disk_size())
            .sum();
        needed <= on_disk
    })
}

/// Biggest size `volume` can end up with: its minimum when it does not
/// take extra space, its maximum otherwise
fn reach_size(volume: &PlannedPartition, grain: DiskSize) -> DiskSize {
    let min = volume.min_size.ceil(grain);
    if volume.weight == 0 {
        min
    } else {
        volume.max_size.floor(grain).max(min)
    }
}

struct Search<'a> {
    volumes: &'a [PlannedPartition],
    spaces: &'a [FreeDiskSpace],
    /// Allowed spaces of every volume
    candidates: Vec<Vec<usize>>,
    /// Volumes in the order they get assigned, biggest first
    order: Vec<usize>,
    /// Whether the volume at a depth is interchangeable with the one before
    same_as_previous: Vec<bool>,
    /// Biggest final size of every volume
    reach: Vec<DiskSize>,
    /// Space picked at every depth
    chosen: Vec<usize>,
    /// Volumes assigned to every space
    assigned: Vec<Vec<usize>>,
    /// Minimum space taken in every space, EBRs included
    footprint: Vec<DiskSize>,
    lvm_helper: Option<&'a LvmHelper>,
    leaves: usize,
    capped: bool,
    best: Option<SpaceDistribution>,
}

impl Search<'_> {
    fn explore(&mut self, depth: usize) {
        if self.capped || self.beaten_on_gaps(depth) {
            return;
        }
        if depth == self.order.len() {
            self.evaluate();
            return;
        }

        let volume = self.order[depth];
        let need = self.volumes[volume].min_size.ceil(AssignedSpace::grain());
        let lowest = if self.same_as_previous[depth] {
            self.chosen[depth - 1]
        } else {
            0
        };
        for k in 0..self.candidates[volume].len() {
            let space = self.candidates[volume][k];
            if space < lowest {
                continue;
            }
            let cost = need + self.ebr_cost(space);
            if self.footprint[space] + cost > self.spaces[space].disk_size() {
                continue;
            }

            self.chosen[depth] = space;
            self.assigned[space].push(volume);
            self.footprint[space] += cost;
            self.explore(depth + 1);
            self.footprint[space] -= cost;
            self.assigned[space].pop();

            if self.capped {
                return;
            }
        }
    }

    /// Whether every completion of the current assignment leaves more gaps
    /// than the best candidate so far
    ///
    /// A used space is sure to keep a gap when its volumes, plus every
    /// unassigned volume allowed there, cannot reach its usable size even
    /// with one EBR each. Physical volumes fill leftovers, so the bound is
    /// only applied without LVM.
    fn beaten_on_gaps(&self, depth: usize) -> bool {
        if self.lvm_helper.is_some() {
            return false;
        }
        let Some(best) = &self.best else {
            return false;
        };

        let remaining = &self.order[depth..];
        let sure_gaps = (0..self.spaces.len())
            .filter(|&s| !self.assigned[s].is_empty())
            .filter(|&s| {
                let mut count = self.assigned[s].len();
                let mut reach: DiskSize = self.assigned[s].iter().map(|&v| self.reach[v]).sum();
                for &v in remaining {
                    if self.candidates[v].contains(&s) {
                        count += 1;
                        reach += self.reach[v];
                    }
                }
                let space = &self.spaces[s];
                let logicals = if space.in_extended || space.extended_possible {
                    count
                } else {
                    0
                };
                reach < space.usable_size(logicals)
            })
            .count();
        sure_gaps > best.gaps_count()
    }

    fn ebr_cost(&self, space: usize) -> DiskSize {
        if self.spaces[space].in_extended {
            DiskSize::b(LOGICAL_OVERHEAD)
        } else {
            DiskSize::zero()
        }
    }

    fn evaluate(&mut self) {
        self.leaves += 1;
        if self.leaves >= MAX_CANDIDATES {
            self.capped = true;
        }

        let per_space: Vec<Vec<PlannedPartition>> = self
            .assigned
            .iter()
            .map(|indexes| {
                let mut indexes = indexes.clone();
                indexes.sort_unstable();
                indexes.iter().map(|&i| self.volumes[i].clone()).collect()
            })
            .collect();

        let Some(helper) = self.lvm_helper else {
            self.consider(per_space);
            return;
        };

        let leftovers: Vec<DiskSize> = (0..self.spaces.len())
            .map(|i| self.spaces[i].disk_size() - self.footprint[i] - self.ebr_cost(i))
            .collect();
        for placement in helper.pv_placements(&leftovers) {
            let mut with_pvs = per_space.clone();
            for (space, pv) in placement {
                with_pvs[space].push(pv);
            }
            self.consider(with_pvs);
        }
    }

    fn consider(&mut self, per_space: Vec<Vec<PlannedPartition>>) {
        let assignments = self.spaces.iter().cloned().zip(per_space).collect();
        let Some(candidate) = SpaceDistribution::new(assignments) else {
            return;
        };
        let better = self
            .best
            .as_ref()
            .map_or(true, |best| candidate.is_better_than(best));
        if better {
            self.best = Some(candidate);
        }
    }
}
