use spacedist::config::settings::{BootMode, ProposalSettings};
use spacedist::disk::devicegraph::{
    Devicegraph, Disk, FilesystemType, LogicalVolume, PartitionId, PartitionTableType,
    PartitionType,
};
use spacedist::disk::region::Region;
use spacedist::disk::size::DiskSize;
use spacedist::proposal::{
    LvmCreator, MakeSpacePolicy, PartitionCreator, PlannedLv, PlannedPartition, PlannedVg,
    Proposal, SpaceDistributionCalculator,
};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn volume(mount: &str, min: DiskSize, max: DiskSize, weight: u32) -> PlannedPartition {
    PlannedPartition::new(Some(mount), Some(FilesystemType::Ext4)).with_sizes(min, max, weight)
}

/// MBR disk with three 1 GiB primaries followed by 22 GiB of free space
fn mbr_with_three_primaries() -> Devicegraph {
    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new(
        "/dev/sda",
        DiskSize::b(MIB + 25 * GIB),
        PartitionTableType::Msdos,
    ));
    for i in 0..3 {
        let name = graph
            .create_partition("/dev/sda", Region::new(MIB + i * GIB, GIB), PartitionType::Primary)
            .unwrap();
        graph.set_partition_id(&name, PartitionId::Windows).unwrap();
    }
    graph
}

#[test]
fn logical_partitions_in_new_extended() {
    let graph = mbr_with_three_primaries();
    let spaces = graph.free_disk_spaces();
    assert_eq!(spaces.len(), 1);
    assert_eq!(spaces[0].disk_size(), DiskSize::gib(22));

    let volumes = vec![
        volume("/", DiskSize::gib(5), DiskSize::Unlimited, 1),
        volume("/home", DiskSize::gib(5), DiskSize::Unlimited, 1),
    ];
    let calculator = SpaceDistributionCalculator::new(None);
    let dist = calculator.best_distribution(&volumes, &spaces).unwrap();
    let assigned = &dist.spaces()[0];
    assert_eq!(assigned.partition_type, Some(PartitionType::Extended));
    assert_eq!(assigned.num_logical, volumes.len());

    let result = PartitionCreator::new(&graph).create_partitions(&dist).unwrap();
    let disk = result.devicegraph.disk("/dev/sda").unwrap();
    let extended = disk.extended().unwrap();
    assert_eq!(extended.region, spaces[0].region);

    let logicals: Vec<_> = disk.partitions.iter().filter(|p| p.is_logical()).collect();
    assert_eq!(logicals.len(), 2);
    for part in &logicals {
        assert!(extended.region.contains(&part.region));
    }
    // Both logical partitions plus their EBRs fill the extended partition
    let used: u64 = logicals.iter().map(|p| p.region.length + MIB).sum();
    assert_eq!(used, extended.region.length);
}

#[test]
fn two_spaces_filled_exactly() {
    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new(
        "/dev/sda",
        DiskSize::b(9 * GIB + 2 * MIB),
        PartitionTableType::Gpt,
    ));
    graph
        .create_partition("/dev/sda", Region::new(MIB + 5 * GIB, GIB), PartitionType::Primary)
        .unwrap();
    let spaces = graph.free_disk_spaces();
    let sizes: Vec<DiskSize> = spaces.iter().map(|s| s.disk_size()).collect();
    assert_eq!(sizes, vec![DiskSize::gib(5), DiskSize::gib(3)]);

    let volumes = vec![
        volume("/a", DiskSize::gib(3), DiskSize::gib(3), 0),
        volume("/b", DiskSize::gib(2), DiskSize::gib(2), 0),
        volume("/c", DiskSize::gib(3), DiskSize::gib(3), 0),
    ];
    let dist = SpaceDistributionCalculator::new(None)
        .best_distribution(&volumes, &spaces)
        .unwrap();
    assert_eq!(dist.spaces_count(), 2);
    assert_eq!(dist.gaps_count(), 0);
    assert!(dist.gaps_total_disk_size().is_zero());
    assert_eq!(dist.volumes_count(), 3);
}

#[test]
fn reused_group_drops_only_the_needed_lv() {
    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(20), PartitionTableType::Gpt));
    let pv = graph
        .create_partition("/dev/sda", Region::new(MIB, 10 * GIB), PartitionType::Primary)
        .unwrap();
    graph.create_lvm_vg("vg1", DiskSize::mib(4)).unwrap();
    graph.add_pv("vg1", &pv).unwrap();
    let vg = graph.volume_groups.iter_mut().find(|vg| vg.name == "vg1").unwrap();
    for (name, gib) in [("lv1", 4), ("lv2", 4)] {
        vg.lvs.push(LogicalVolume {
            name: name.to_string(),
            size: DiskSize::gib(gib),
            stripes: 1,
            stripe_size: None,
            filesystem: None,
        });
    }

    let mut planned = PlannedVg::new("vg1");
    planned.reuse = Some("vg1".to_string());
    planned.make_space_policy = MakeSpacePolicy::Needed;
    let mut keep = PlannedLv::new("lv1", Some("/data"), Some(FilesystemType::Xfs));
    keep.reuse = Some("lv1".to_string());
    let new = PlannedLv::new("root", Some("/"), Some(FilesystemType::Ext4)).with_sizes(
        DiskSize::gib(5),
        DiskSize::Unlimited,
        1,
    );
    planned.lvs = vec![keep, new];

    let result = LvmCreator::new(&graph).create_volumes(&planned, &[]).unwrap();
    assert_eq!(result.deleted_lvs, vec!["/dev/vg1/lv2".to_string()]);
    let vg = result.devicegraph.find_vg("vg1").unwrap();
    assert!(vg.lv("lv1").is_some());
    assert!(vg.lv("lv2").is_none());
    assert_eq!(vg.lv("root").unwrap().size, vg.size() - DiskSize::gib(4));
}

#[test]
fn proposal_sizes_survive_materialization() {
    let settings = ProposalSettings::sample();
    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(80), PartitionTableType::Gpt));

    let result = Proposal::new(settings).propose(&graph).unwrap();
    let planned: Vec<DiskSize> = result.distribution.planned_sizes().map(|(_, s)| s).collect();
    let created: Vec<DiskSize> = result.created_partitions.iter().map(|c| c.size).collect();
    assert_eq!(planned, created);

    for part in &result.created_partitions {
        let actual = result.devicegraph.find_partition(&part.name).unwrap();
        assert_eq!(actual.size(), part.size);
        assert!(part.size >= part.planned.min_size);
        assert!(part.size <= part.planned.max_size);
    }
}

#[test]
fn proposal_deletes_old_linux_install() {
    let mut settings = ProposalSettings::sample();
    settings.boot_mode = BootMode::Legacy;
    settings.use_separate_home = false;

    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new("/dev/sda", DiskSize::gib(40), PartitionTableType::Msdos));
    let windows = graph
        .create_partition("/dev/sda", Region::new(MIB, 20 * GIB), PartitionType::Primary)
        .unwrap();
    graph.set_partition_id(&windows, PartitionId::Windows).unwrap();
    let linux = graph
        .create_partition(
            "/dev/sda",
            Region::new(MIB + 20 * GIB, 20 * GIB - MIB),
            PartitionType::Primary,
        )
        .unwrap();
    graph.create_filesystem(&linux, FilesystemType::Ext4, Some("/")).unwrap();

    let result = Proposal::new(settings).propose(&graph).unwrap();
    assert_eq!(result.deleted_partitions, vec![linux.clone()]);
    assert!(result.devicegraph.find_partition(&windows).is_some());

    let root = result
        .created_partitions
        .iter()
        .find(|c| c.planned.mount_point.as_deref() == Some("/"))
        .unwrap();
    let part = result.devicegraph.find_partition(&root.name).unwrap();
    assert!(part.boot);
}

#[test]
fn encrypted_lvm_proposal() {
    let mut settings = ProposalSettings::sample();
    settings.lvm.enabled = true;
    settings.encryption_password = Some("secret".to_string());

    let mut graph = Devicegraph::new();
    graph.add_disk(Disk::new("/dev/nvme0n1", DiskSize::gib(120), PartitionTableType::Gpt));
    settings.candidate_disks = vec!["/dev/nvme0n1".to_string()];
    settings.root_device = Some("/dev/nvme0n1".to_string());

    let result = Proposal::new(settings).propose(&graph).unwrap();
    let vg = result.devicegraph.find_vg("system").unwrap();
    assert_eq!(vg.pvs.len(), 1);
    assert!(vg.pvs[0].device.starts_with("/dev/mapper/cr_nvme0n1p"));
    let root = vg.lv("root").unwrap();
    assert_eq!(root.filesystem.as_ref().unwrap().mount_point.as_deref(), Some("/"));
}
