use raftstream::{
    ConfigurationDirectory, DirectoryConfig, DirectoryError, Endpoint, EntryKind, Member,
    RaftLog,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn data_dirs(tmp: &TempDir, count: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| tmp.path().join(format!("data-{i}")))
        .collect()
}

fn open(dirs: Vec<PathBuf>) -> ConfigurationDirectory {
    ConfigurationDirectory::open(DirectoryConfig::new(dirs)).unwrap()
}

fn members() -> Vec<Member> {
    vec![
        Member::active(Endpoint::new("broker-0", 26502)),
        Member::active(Endpoint::new("broker-1", 26502)),
    ]
}

#[test]
fn partitions_are_rediscovered_on_open() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 2);
    {
        let directory = open(dirs.clone());
        for id in 0..3 {
            directory
                .create_configuration("orders", id, 2, &members())
                .unwrap();
        }
    }

    let directory = open(dirs.clone());
    let found = directory.configurations();
    assert_eq!(found.len(), 3);
    assert_eq!(
        directory.partitions_per_dir(),
        vec![(dirs[0].clone(), 2), (dirs[1].clone(), 1)]
    );
    let configuration = directory.configuration(1).unwrap();
    assert_eq!(configuration.topic_name(), "orders");
    assert_eq!(configuration.data_dir, dirs[1]);
    let paths = configuration.layout.paths();
    assert_eq!(paths.root, dirs[1].join("orders-1"));
    assert!(paths.segments_dir.is_dir());
    assert!(paths.snapshots_dir.is_dir());

    let store = configuration.open_store().unwrap();
    assert_eq!(store.members(), members());
    assert_eq!(store.metadata().replication_factor, 2);
    assert!(directory.configuration(9).is_none());
}

#[test]
fn duplicate_partition_on_disk_keeps_the_first_directory() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 2);
    open(vec![dirs[0].clone()])
        .create_configuration("orders", 4, 1, &[])
        .unwrap();
    open(vec![dirs[1].clone()])
        .create_configuration("orders", 4, 1, &[])
        .unwrap();

    let directory = open(dirs.clone());
    let found = directory.configurations();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].data_dir, dirs[0]);
}

#[test]
fn existing_partition_id_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let directory = open(data_dirs(&tmp, 2));
    directory.create_configuration("orders", 1, 3, &[]).unwrap();
    let err = directory
        .create_configuration("orders", 1, 3, &[])
        .unwrap_err();
    assert!(matches!(err, DirectoryError::PartitionExists(1)));
    assert_eq!(directory.configurations().len(), 1);
}

#[test]
fn leftover_directory_without_metadata_is_not_reused() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 1);
    fs::create_dir_all(dirs[0].join("orders-9")).unwrap();

    let directory = open(dirs.clone());
    assert!(directory.configurations().is_empty());
    let err = directory
        .create_configuration("orders", 9, 1, &[])
        .unwrap_err();
    assert!(matches!(err, DirectoryError::DirectoryOccupied(path) if path == dirs[0].join("orders-9")));
}

#[test]
fn failed_create_leaves_the_catalog_untouched() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 1);
    let directory = open(dirs.clone());
    fs::remove_dir_all(&dirs[0]).unwrap();
    fs::write(&dirs[0], b"not a directory").unwrap();

    let result = directory.create_configuration("orders", 1, 3, &members());
    assert!(matches!(result, Err(DirectoryError::Io(_))));
    assert!(directory.configurations().is_empty());
    assert!(directory.configuration(1).is_none());
}

#[test]
fn empty_directory_list_is_rejected() {
    let err = ConfigurationDirectory::open(DirectoryConfig::new(Vec::new())).unwrap_err();
    assert!(matches!(err, DirectoryError::NoDataDirectories));
}

#[test]
fn concurrent_creates_assign_each_id_once() {
    let tmp = TempDir::new().unwrap();
    let directory = Arc::new(open(data_dirs(&tmp, 3)));

    let handles: Vec<_> = (0..8u32)
        .map(|worker| {
            let directory = Arc::clone(&directory);
            thread::spawn(move || {
                let own = directory.create_configuration("orders", worker, 3, &[]).is_ok();
                let contended = directory
                    .create_configuration("payments", 100, 3, &[])
                    .is_ok();
                (own, contended)
            })
        })
        .collect();
    let outcomes: Vec<(bool, bool)> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    assert!(outcomes.iter().all(|(own, _)| *own));
    assert_eq!(outcomes.iter().filter(|(_, won)| *won).count(), 1);
    let ids: BTreeSet<u32> = directory
        .configurations()
        .iter()
        .map(|configuration| configuration.partition_id())
        .collect();
    assert_eq!(ids.len(), 9);
    assert!(ids.contains(&100));
    let mut counts: Vec<usize> = directory
        .partitions_per_dir()
        .into_iter()
        .map(|(_, count)| count)
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![3, 3, 3]);
}

#[test]
fn removed_partition_is_gone_from_disk_and_catalog() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 1);
    let directory = open(dirs.clone());
    let configuration = directory
        .create_configuration("orders", 6, 1, &members())
        .unwrap();
    let root = configuration.layout.root().to_path_buf();
    assert!(root.is_dir());

    assert!(directory.remove_configuration(6).unwrap());
    assert!(!root.exists());
    assert!(directory.configuration(6).is_none());
    assert!(!directory.remove_configuration(6).unwrap());
    assert!(open(dirs).configurations().is_empty());
}

#[test]
fn partition_log_lives_in_the_segments_directory() {
    let tmp = TempDir::new().unwrap();
    let dirs = data_dirs(&tmp, 1);
    let mut config = DirectoryConfig::new(dirs.clone());
    config.index_interval = 4;
    let directory = ConfigurationDirectory::open(config.clone()).unwrap();
    let configuration = directory
        .create_configuration("orders", 3, 1, &[])
        .unwrap();
    assert_eq!(configuration.index_interval, 4);
    {
        let mut log = configuration.open_log().unwrap();
        for i in 0..6u8 {
            log.append(1, EntryKind::Data, vec![i]).unwrap();
        }
        assert_eq!(log.dir(), configuration.layout.paths().segments_dir.as_path());
        assert_eq!(log.index_interval(), 4);
    }

    let reopened = ConfigurationDirectory::open(config).unwrap();
    let log = reopened.configuration(3).unwrap().open_log().unwrap();
    assert_eq!(log.index_interval(), 4);
    assert_eq!(log.last_position().unwrap(), 5);
    assert_eq!(log.entry_at(4).unwrap().unwrap().payload, vec![4]);
}
