use std::collections::HashSet;

use clusterfs::{
    Disk, FileSystem, FormatOptions, FsError, InodeKind, Resource, ROOT_INODE_ID,
};
use tempfile::TempDir;

const MIB: u64 = 1024 * 1024;

fn formatted(size: u64) -> (TempDir, FileSystem) {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = FileSystem::open(dir.path().join("disk.img")).unwrap();
    fs.format(size).unwrap();
    (dir, fs)
}

/// Every cluster marked used belongs to exactly one inode chain and vice versa.
fn assert_bitmap_matches_chains(fs: &mut FileSystem) {
    let disk = fs.disk_mut();
    let mut owned = HashSet::new();
    for id in disk.used_inodes().unwrap() {
        for cluster in disk.chain(id).unwrap().clusters() {
            assert!(owned.insert(cluster), "cluster {} owned twice", cluster);
        }
    }
    let used: HashSet<u32> = disk.used_clusters().unwrap().into_iter().collect();
    assert_eq!(used, owned);
}

#[test]
fn can_initialize_disk_with_filesystem() {
    let (_dir, fs) = formatted(MIB);

    let info = fs.info().unwrap();
    assert_eq!(info.cluster_size, 512);
    assert_eq!(info.cluster_count, 2014);
    // Only the root directory is allocated.
    assert_eq!(info.used_inodes, 1);
    assert_eq!(info.used_clusters, 1);
}

#[test]
fn creating_directory_uses_one_inode() {
    let (_dir, mut fs) = formatted(MIB);
    let before = fs.info().unwrap();

    fs.create("/a", InodeKind::Directory).unwrap();

    let after = fs.info().unwrap();
    assert_eq!(after.used_inodes, before.used_inodes + 1);
    assert_eq!(after.used_clusters, before.used_clusters + 1);
}

#[test]
fn copied_in_file_occupies_expected_clusters() {
    let (dir, mut fs) = formatted(MIB);
    let host = dir.path().join("payload.bin");
    let payload: Vec<u8> = (0..2000).map(|i| (i % 256) as u8).collect();
    std::fs::write(&host, &payload).unwrap();
    fs.create("/a", InodeKind::Directory).unwrap();

    fs.copy_in(&host, Some("/a/f")).unwrap();

    let stat = fs.stat("/a/f").unwrap();
    assert_eq!(stat.size, 2000);
    assert_eq!(stat.data_clusters.len(), 4);
    assert!(stat.index_clusters.is_empty());
    assert_eq!(fs.read_file("/a/f").unwrap(), payload);
}

#[test]
fn recursive_remove_restores_usage() {
    let (dir, mut fs) = formatted(MIB);
    let host = dir.path().join("big.bin");
    std::fs::write(&host, vec![0xAB; 100_000]).unwrap();
    let before = fs.info().unwrap();

    fs.create("/a", InodeKind::Directory).unwrap();
    fs.create("/a/b", InodeKind::Directory).unwrap();
    fs.copy_in(&host, Some("/a/b/big")).unwrap();
    fs.create("/a/empty", InodeKind::File).unwrap();
    fs.make_symbolic_link("/a/link", "b/big").unwrap();
    assert!(matches!(fs.remove("/a", false), Err(FsError::DirectoryNotEmpty(_))));

    fs.remove("/a", true).unwrap();

    let after = fs.info().unwrap();
    assert_eq!(after.used_inodes, before.used_inodes);
    assert_eq!(after.used_clusters, before.used_clusters);
    assert!(matches!(fs.resolve_path("/a", false), Err(FsError::NotFound(_))));
    assert!(fs.check().unwrap().is_consistent());
}

#[test]
fn dangling_link_is_created_but_does_not_resolve() {
    let (_dir, mut fs) = formatted(MIB);

    fs.make_symbolic_link("/l", "/missing").unwrap();

    assert!(matches!(fs.resolve_path("/l", true), Err(FsError::NotFound(_))));
    assert_eq!(fs.read_link("/l").unwrap(), "/missing");
    // Removing a link never touches its target.
    fs.create("/missing", InodeKind::File).unwrap();
    fs.remove("/l", false).unwrap();
    assert!(fs.resolve_path("/missing", false).is_ok());
}

#[test]
fn bitmap_tracks_exactly_the_allocated_chains() {
    let (dir, mut fs) = formatted(4 * MIB);
    let host = dir.path().join("large.bin");
    // Large enough to need the double indirect cluster.
    std::fs::write(&host, vec![0x11; 200 * 512 + 7]).unwrap();

    fs.create("/d", InodeKind::Directory).unwrap();
    fs.copy_in(&host, Some("/d")).unwrap();
    fs.copy("/d/large.bin", "/copy").unwrap();
    fs.make_symbolic_link("/d/ln", "/copy").unwrap();
    for i in 0..40 {
        fs.create(&format!("/d/f{}", i), InodeKind::File).unwrap();
    }
    assert_bitmap_matches_chains(&mut fs);

    fs.remove("/copy", false).unwrap();
    for i in 0..40 {
        fs.remove(&format!("/d/f{}", i), false).unwrap();
    }
    assert_bitmap_matches_chains(&mut fs);
    assert!(fs.check().unwrap().is_consistent());
}

#[test]
fn every_inode_is_listed_once() {
    let (_dir, mut fs) = formatted(MIB);
    fs.create("/a", InodeKind::Directory).unwrap();
    fs.create("/a/x", InodeKind::File).unwrap();
    fs.create("/b", InodeKind::Directory).unwrap();
    fs.rename("/a/x", "/b").unwrap();
    fs.rename("/b", "/a").unwrap();

    let report = fs.check().unwrap();
    assert!(report.is_consistent(), "{}", report);
    assert_eq!(report.inodes, 4);
    assert_eq!(fs.resolve_path("/a/b/x", false).unwrap(), 2);
}

#[test]
fn host_file_round_trips() {
    let (dir, mut fs) = formatted(MIB);
    let source = dir.path().join("in.bin");
    let target = dir.path().join("out.bin");
    let payload: Vec<u8> = (0..70_000u32).map(|i| (i * 31 % 253) as u8).collect();
    std::fs::write(&source, &payload).unwrap();

    fs.copy_in(&source, None).unwrap();
    fs.make_symbolic_link("/via", "in.bin").unwrap();
    let written = fs.copy_out("/via", &target).unwrap();

    assert_eq!(written, payload.len() as u64);
    assert_eq!(std::fs::read(&target).unwrap(), payload);
}

#[test]
fn copy_in_overwrites_existing_file() {
    let (dir, mut fs) = formatted(MIB);
    let host = dir.path().join("v.txt");
    std::fs::write(&host, vec![b'a'; 3000]).unwrap();
    let id = fs.copy_in(&host, Some("/v")).unwrap();
    let used = fs.info().unwrap().used_clusters;

    std::fs::write(&host, b"second").unwrap();
    assert_eq!(fs.copy_in(&host, Some("/v")).unwrap(), id);

    assert_eq!(fs.read_file("/v").unwrap(), b"second");
    // Six data clusters and the single indirect cluster shrink to one cluster.
    assert_eq!(fs.info().unwrap().used_clusters, used - 6);
}

#[test]
fn copy_in_overwrites_in_place_when_disk_is_crowded() {
    let (dir, mut fs) = formatted(64 * 1024);
    let host = dir.path().join("big.bin");
    std::fs::write(&host, vec![1; 80 * 512]).unwrap();
    fs.copy_in(&host, Some("/big")).unwrap();
    let used = fs.info().unwrap().used_clusters;
    assert!(fs.info().unwrap().cluster_count - used < 81);

    let second: Vec<u8> = (0..80 * 512).map(|i| (i % 251) as u8).collect();
    std::fs::write(&host, &second).unwrap();
    fs.copy_in(&host, Some("/big")).unwrap();

    assert_eq!(fs.info().unwrap().used_clusters, used);
    assert_eq!(fs.read_file("/big").unwrap(), second);
    assert_bitmap_matches_chains(&mut fs);
}

#[test]
fn copy_out_of_directory_fails() {
    let (dir, mut fs) = formatted(MIB);
    fs.create("/d", InodeKind::Directory).unwrap();
    assert!(matches!(
        fs.copy_out("/d", dir.path().join("x")),
        Err(FsError::IsADirectory(_))
    ));
}

#[test]
fn rename_between_kinds_is_refused() {
    let (_dir, mut fs) = formatted(MIB);
    fs.create("/d", InodeKind::Directory).unwrap();
    fs.create("/d/x", InodeKind::Directory).unwrap();
    fs.create("/x", InodeKind::File).unwrap();
    fs.create("/y", InodeKind::File).unwrap();

    assert!(matches!(fs.rename("/x", "/d"), Err(FsError::CrossKind { .. })));
    assert!(matches!(fs.rename("/d", "/y"), Err(FsError::CrossKind { .. })));
    assert!(matches!(fs.rename("/x", "/y"), Err(FsError::AlreadyExists(_))));
}

#[test]
fn running_out_of_space_changes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = FileSystem::open(dir.path().join("small.img")).unwrap();
    fs.format(64 * 1024).unwrap();
    let host = dir.path().join("huge.bin");
    std::fs::write(&host, vec![0; 200 * 512]).unwrap();
    let before = fs.info().unwrap();

    assert!(matches!(
        fs.copy_in(&host, Some("/huge")),
        Err(FsError::ResourceExhausted(Resource::Clusters))
    ));

    assert_eq!(fs.info().unwrap(), before);
    assert!(matches!(fs.resolve_path("/huge", false), Err(FsError::NotFound(_))));
}

#[test]
fn running_out_of_inodes_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut fs = FileSystem::open(dir.path().join("few.img")).unwrap();
    let opts = FormatOptions {
        inode_count: Some(2),
        ..FormatOptions::default()
    };
    fs.format_with(64 * 1024, &opts).unwrap();

    fs.create("/one", InodeKind::File).unwrap();
    assert!(matches!(
        fs.create("/two", InodeKind::File),
        Err(FsError::ResourceExhausted(Resource::Inodes))
    ));
}

#[test]
fn image_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("persist.img");
    {
        let mut fs = FileSystem::open(&path).unwrap();
        fs.format(MIB).unwrap();
        fs.create("/etc", InodeKind::Directory).unwrap();
        fs.make_symbolic_link("/etc/motd", "/hello").unwrap();
    }

    let mut fs = FileSystem::open(&path).unwrap();
    assert!(fs.is_formatted());
    assert_eq!(fs.read_link("/etc/motd").unwrap(), "/hello");
    let names: Vec<String> = fs.list(Some("/")).unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec![".", "..", "etc"]);
}

#[test]
fn format_resets_working_directory_and_content() {
    let (_dir, mut fs) = formatted(MIB);
    fs.create("/a", InodeKind::Directory).unwrap();
    fs.change_directory("/a").unwrap();

    fs.format(2 * MIB).unwrap();

    assert_eq!(fs.current_path().unwrap(), "/");
    assert_eq!(fs.resolve_path(".", true).unwrap(), ROOT_INODE_ID);
    assert_eq!(fs.list(None).unwrap().len(), 2);
}

#[test]
fn directories_grow_past_one_cluster() {
    let (_dir, mut fs) = formatted(MIB);
    fs.create("/many", InodeKind::Directory).unwrap();
    // 16 items fit in a 512 byte cluster, '.' and '..' included.
    for i in 0..30 {
        fs.create(&format!("/many/{}", i), InodeKind::File).unwrap();
    }

    assert_eq!(fs.stat("/many").unwrap().data_clusters.len(), 2);
    assert_eq!(fs.list(Some("/many")).unwrap().len(), 32);
}

#[test]
fn unformatted_disk_rejects_everything_but_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("later.img");
    let mut disk = Disk::open(&path).unwrap();
    assert!(matches!(disk.claim_clusters(1), Err(FsError::NotInitialized)));

    disk.format(MIB).unwrap();
    let mut fs = FileSystem::new(disk);
    fs.create("/now", InodeKind::File).unwrap();
}
