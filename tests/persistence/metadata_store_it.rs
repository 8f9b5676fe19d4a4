use raftstream::{Endpoint, Member, PartitionMetadata, PartitionMetadataStore};
use std::fs;
use tempfile::TempDir;

fn defaults() -> PartitionMetadata {
    PartitionMetadata::new("orders", 2, 3, 64 * 1024)
}

#[test]
fn saved_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("orders-2").join("metadata.json");
    let candidate = Endpoint::new("broker-1", 26502);
    let members = vec![
        Member::active(Endpoint::new("broker-0", 26502)),
        Member::active(candidate.clone()),
        Member::inactive(Endpoint::new("broker-2", 26502)),
    ];
    {
        let mut store = PartitionMetadataStore::new(&path, defaults());
        store.set_term(7);
        store.set_voted_for(Some(&candidate)).unwrap();
        for member in &members {
            store.add_member(member);
        }
        store.save().unwrap();
    }

    let store = PartitionMetadataStore::open(&path, defaults()).unwrap();
    assert_eq!(store.term(), 7);
    assert_eq!(store.voted_for(), Some(candidate));
    assert_eq!(store.members(), members);
    assert_eq!(store.metadata().topic_name, "orders");
    assert_eq!(store.metadata().replication_factor, 3);
}

#[test]
fn unsaved_changes_are_not_durable() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("metadata.json");
    let mut store = PartitionMetadataStore::new(&path, defaults());
    store.set_term(1);
    store.save().unwrap();
    store.set_term(2);

    let reopened = PartitionMetadataStore::open(&path, defaults()).unwrap();
    assert_eq!(reopened.term(), 1);
}

#[test]
fn leftover_temporary_file_is_ignored() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("metadata.json");
    let mut store = PartitionMetadataStore::new(&path, defaults());
    store.set_term(3);
    store.save().unwrap();

    // crash between writing the temporary file and the rename
    fs::write(store.tmp_path(), b"{\"topicName\":\"ord").unwrap();

    let mut reopened = PartitionMetadataStore::open(&path, defaults()).unwrap();
    assert_eq!(reopened.term(), 3);

    reopened.set_term(4);
    reopened.save().unwrap();
    assert!(!reopened.tmp_path().exists());
    assert_eq!(
        PartitionMetadataStore::open(&path, defaults()).unwrap().term(),
        4
    );
}

#[test]
fn corrupted_live_file_fails_to_load() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("metadata.json");
    fs::write(&path, b"not json").unwrap();
    assert!(PartitionMetadataStore::open(&path, defaults()).is_err());
}

#[test]
fn delete_removes_live_and_temporary_files() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("metadata.json");
    let store = PartitionMetadataStore::new(&path, defaults());
    store.save().unwrap();
    fs::write(store.tmp_path(), b"partial").unwrap();

    store.delete().unwrap();
    assert!(!path.exists());
    assert!(!store.tmp_path().exists());
    // deleting twice is fine
    store.delete().unwrap();

    let reopened = PartitionMetadataStore::open(&path, defaults()).unwrap();
    assert_eq!(reopened.term(), 0);
    assert!(reopened.members().is_empty());
}
