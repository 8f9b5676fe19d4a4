use raftstream::{
    Endpoint, EntryKind, FileLog, LogError, LoggedEntry, LoopbackNetwork, Member, MemberType,
    NodeConfig, PartitionMetadata, PartitionMetadataStore, RaftLog, RaftNode, RaftRole,
    ReplicationSession,
};
use std::time::{Duration, Instant};
use tempfile::TempDir;

const SMALL_SEGMENT: u64 = 256;

fn filled(tmp: &TempDir, count: u8, index_interval: usize) -> FileLog {
    let mut log = FileLog::open_with(tmp.path(), SMALL_SEGMENT, index_interval).unwrap();
    for i in 0..count {
        log.append(1, EntryKind::Data, vec![i; 8]).unwrap();
    }
    log
}

fn terms(log: &FileLog) -> Vec<(i64, i32)> {
    let mut out = Vec::new();
    let mut address = log.first_address();
    while let Some((entry, next)) = log.read(address).unwrap() {
        out.push((entry.position, entry.term));
        address = next;
    }
    out
}

#[test]
fn segments_rotate_and_reopen_in_order() {
    let tmp = TempDir::new().unwrap();
    {
        let log = filled(&tmp, 40, 8);
        assert!(log.segment_count() > 1);
        assert_eq!(log.last_position().unwrap(), 39);
    }
    let log = FileLog::open_with(tmp.path(), SMALL_SEGMENT, 8).unwrap();
    assert!(log.segment_count() > 1);
    let all = terms(&log);
    assert_eq!(all.len(), 40);
    assert!(all.iter().enumerate().all(|(i, (p, t))| *p == i as i64 && *t == 1));
    for position in [0, 7, 8, 23, 39] {
        let entry = log.entry_at(position).unwrap().unwrap();
        assert_eq!(entry.payload, vec![position as u8; 8]);
    }
    assert!(log.entry_at(40).unwrap().is_none());
}

#[test]
fn truncation_spans_segments_and_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let mut log = filled(&tmp, 40, 8);
    let before = log.segment_count();
    log.truncate_from(5).unwrap();
    assert!(log.segment_count() < before);
    assert_eq!(log.last_position().unwrap(), 4);
    assert!(log.entry_at(5).unwrap().is_none());

    let replacement = LoggedEntry::new(5, 2, EntryKind::Data, b"leader-2".to_vec());
    log.append_entry(&replacement).unwrap();
    drop(log);

    let log = FileLog::open_with(tmp.path(), SMALL_SEGMENT, 8).unwrap();
    assert_eq!(
        terms(&log),
        vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1), (5, 2)]
    );
    assert_eq!(log.entry_at(5).unwrap().unwrap(), replacement);
}

#[test]
fn truncating_everything_restarts_at_zero() {
    let tmp = TempDir::new().unwrap();
    let mut log = filled(&tmp, 10, 4);
    log.truncate_from(0).unwrap();
    assert_eq!(log.last_entry().unwrap(), None);
    assert_eq!(log.append(3, EntryKind::Initial, Vec::new()).unwrap(), 0);
    assert!(matches!(
        log.truncate_from(-1),
        Err(LogError::InvalidTruncatePosition(-1))
    ));
}

#[test]
fn appends_must_extend_the_log() {
    let tmp = TempDir::new().unwrap();
    let mut log = filled(&tmp, 3, 4);
    let gap = LoggedEntry::new(5, 1, EntryKind::Data, Vec::new());
    assert!(matches!(
        log.append_entry(&gap),
        Err(LogError::NonSequentialAppend {
            expected: 3,
            attempted: 5
        })
    ));
    let regression = LoggedEntry::new(3, 0, EntryKind::Data, Vec::new());
    assert!(matches!(
        log.append_entry(&regression),
        Err(LogError::TermRegression { .. })
    ));
    assert_eq!(log.last_position().unwrap(), 2);
}

#[test]
fn session_backtracks_across_segments() {
    let tmp = TempDir::new().unwrap();
    let log = filled(&tmp, 120, 8);
    let mut session = ReplicationSession::new(
        Endpoint::new("follower", 26502),
        MemberType::Active,
        &log,
    );
    session.reset_to_last_entry(&log).unwrap();
    assert_eq!(session.current_entry_position(), 119);
    assert!(!session.has_next_entry(&log).unwrap());

    session.reset_to_previous_entry(&log, 95).unwrap();
    assert_eq!(session.current_entry_position(), 94);
    assert_eq!(session.current_entry_term(), 1);
    let next = session.next_entry(&log).unwrap().unwrap();
    assert_eq!(next.position, 95);

    session.reset_to_previous_entry(&log, 0).unwrap();
    assert_eq!(session.current_entry_position(), -1);
    assert_eq!(session.next_entry(&log).unwrap().unwrap().position, 0);
}

#[test]
fn single_node_on_file_log_recovers_after_restart() {
    let tmp = TempDir::new().unwrap();
    let own = Endpoint::new("solo", 26502);
    let metadata_path = tmp.path().join("metadata.json");
    let log_dir = tmp.path().join("segments");
    let defaults = PartitionMetadata::new("orders", 0, 1, SMALL_SEGMENT);
    let network = LoopbackNetwork::new();
    let now = Instant::now();

    {
        let mut store = PartitionMetadataStore::new(&metadata_path, defaults.clone());
        store.add_member(&Member::active(own.clone()));
        let log = FileLog::open_with(&log_dir, SMALL_SEGMENT, 4).unwrap();
        let mut node = RaftNode::new(
            NodeConfig::new("orders", 0, own.clone()),
            log,
            network.transport(own.clone()),
            store,
        )
        .unwrap();
        node.start(now).unwrap();
        node.transition(RaftRole::Candidate, now).unwrap();
        node.do_work(now).unwrap();
        assert!(node.is_leader());
        for payload in ["a", "b", "c"] {
            node.append(payload.as_bytes().to_vec()).unwrap();
        }
        node.do_work(now + Duration::from_millis(1)).unwrap();
        assert_eq!(node.commit_position(), 3);
    }

    let store = PartitionMetadataStore::open(&metadata_path, defaults).unwrap();
    let log = FileLog::open_with(&log_dir, SMALL_SEGMENT, 4).unwrap();
    let mut node = RaftNode::new(
        NodeConfig::new("orders", 0, own.clone()),
        log,
        network.transport(own.clone()),
        store,
    )
    .unwrap();
    node.start(now).unwrap();
    assert_eq!(node.role(), RaftRole::Follower);
    assert_eq!(node.term(), 1);
    assert_eq!(node.voted_for(), Some(own));
    assert_eq!(node.log().last_position().unwrap(), 3);
    assert_eq!(node.log().entry_at(0).unwrap().unwrap().kind, EntryKind::Initial);

    node.transition(RaftRole::Candidate, now).unwrap();
    node.do_work(now).unwrap();
    assert_eq!(node.term(), 2);
    assert!(node.is_leader());
}
