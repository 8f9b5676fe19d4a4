#[path = "../support/cluster.rs"]
mod cluster;

use cluster::{endpoint, TestCluster};
use raftstream::{
    Configuration, Member, MemberType, PartitionMetadataStore, RaftError, RaftLog, RaftRole,
    NO_POSITION,
};

fn persisted_members(cluster: &TestCluster, name: &str) -> Vec<Member> {
    PartitionMetadataStore::open(cluster.metadata_path(name), TestCluster::defaults(3))
        .unwrap()
        .members()
}

#[test]
fn configure_reconciles_sessions_and_persists_members() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    let now = cluster.now;
    let members = vec![
        Member::active(endpoint("a")),
        Member::inactive(endpoint("b")),
        Member::active(endpoint("d")),
    ];
    let old = cluster.node("a").members().to_vec();
    cluster
        .node_mut("a")
        .configure(Configuration::new(7, members.clone(), old), now)
        .unwrap();

    let node = cluster.node("a");
    assert_eq!(node.configuration().position, 7);
    assert_eq!(node.role(), RaftRole::Follower);
    assert!(node.session(&endpoint("c")).is_none());
    assert_eq!(
        node.session(&endpoint("b")).unwrap().member_type(),
        MemberType::Inactive
    );
    let added = node.session(&endpoint("d")).unwrap();
    assert_eq!(added.member_type(), MemberType::Active);
    assert_eq!(added.current_entry_position(), NO_POSITION);
    assert_eq!(node.active_member_count(), 2);
    assert_eq!(node.quorum_size(), 2);
    assert!(node.is_under_replicated());

    assert_eq!(persisted_members(&cluster, "a"), members);
}

#[test]
fn own_member_type_drives_the_role() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    let now = cluster.now;
    let all = cluster.node("a").members().to_vec();
    let without_a: Vec<Member> = all
        .iter()
        .map(|member| {
            if member.endpoint == endpoint("a") {
                Member::inactive(member.endpoint.clone())
            } else {
                member.clone()
            }
        })
        .collect();

    let node = cluster.node_mut("a");
    node.configure(Configuration::new(1, without_a.clone(), all.clone()), now)
        .unwrap();
    assert_eq!(node.role(), RaftRole::Inactive);
    assert_eq!(node.member_type(), MemberType::Inactive);
    assert_eq!(node.sessions().count(), 0);
    assert!(matches!(
        node.transition(RaftRole::Candidate, now),
        Err(RaftError::InactiveMember(_))
    ));

    node.configure(Configuration::new(2, all, without_a), now)
        .unwrap();
    assert_eq!(node.role(), RaftRole::Follower);
    assert_eq!(node.member_type(), MemberType::Active);
    assert_eq!(node.sessions().count(), 2);
}

#[test]
fn removed_member_loses_its_role() {
    let mut cluster = TestCluster::new(&["a", "b"]);
    let now = cluster.now;
    let members = vec![Member::active(endpoint("b"))];
    let old = cluster.node("a").members().to_vec();
    let node = cluster.node_mut("a");
    node.configure(Configuration::new(3, members, old), now)
        .unwrap();
    assert_eq!(node.role(), RaftRole::Inactive);
    assert_eq!(node.active_member_count(), 1);
}

#[test]
fn joining_member_catches_up_and_becomes_follower() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.node_mut("a").append(b"before-join".to_vec()).unwrap();
    cluster.run(4);

    cluster.add_node("d", &[]);
    assert_eq!(cluster.node("d").role(), RaftRole::Inactive);
    let now = cluster.now;
    let position = cluster
        .node_mut("a")
        .join(Member::active(endpoint("d")), now)
        .unwrap();
    assert_eq!(position, 2);
    assert_eq!(cluster.node("a").quorum_size(), 3);

    cluster.run(25);
    let joined = cluster.node("d");
    assert_eq!(joined.role(), RaftRole::Follower);
    assert_eq!(joined.member_type(), MemberType::Active);
    assert_eq!(joined.members().len(), 4);
    assert_eq!(joined.leader(), Some(&endpoint("a")));
    assert_eq!(cluster.log_terms("d"), cluster.log_terms("a"));
    assert_eq!(cluster.node("a").commit_position(), 2);
    assert_eq!(persisted_members(&cluster, "d").len(), 4);
    for name in ["b", "c"] {
        assert!(cluster.node(name).session(&endpoint("d")).is_some());
    }

    cluster.restart("d");
    let restarted = cluster.node("d");
    assert_eq!(restarted.configuration().position, 2);
    assert_eq!(restarted.members().len(), 4);
}

#[test]
fn inactive_member_keeps_no_sessions() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    let mut members = cluster.node("a").members().to_vec();
    members.push(Member::inactive(endpoint("d")));
    cluster.add_node("d", &members);
    let now = cluster.now;

    let node = cluster.node_mut("d");
    assert_eq!(node.role(), RaftRole::Inactive);
    assert_eq!(node.sessions().count(), 0);

    let mut grown = members.clone();
    grown.push(Member::active(endpoint("e")));
    node.configure(Configuration::new(4, grown.clone(), members), now)
        .unwrap();
    assert_eq!(node.role(), RaftRole::Inactive);
    assert_eq!(node.members().len(), 5);
    assert_eq!(node.sessions().count(), 0);

    let promoted: Vec<Member> = grown
        .iter()
        .map(|member| Member::active(member.endpoint.clone()))
        .collect();
    node.configure(Configuration::new(5, promoted, grown), now)
        .unwrap();
    assert_eq!(node.role(), RaftRole::Follower);
    assert_eq!(node.sessions().count(), 4);
}

#[test]
fn leave_drops_the_member_from_quorum() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.run(3);
    let now = cluster.now;

    let missing = endpoint("z");
    assert!(matches!(
        cluster.node_mut("a").leave(&missing, now),
        Err(RaftError::UnknownMember(member)) if member == missing
    ));

    let position = cluster.node_mut("a").leave(&endpoint("c"), now).unwrap();
    let leader = cluster.node("a");
    assert!(leader.session(&endpoint("c")).is_none());
    assert_eq!(leader.quorum_size(), 2);
    assert!(leader.is_under_replicated());

    cluster.run(3);
    assert_eq!(cluster.node("a").commit_position(), position);
    assert_eq!(cluster.node("b").members().len(), 2);
    assert_eq!(persisted_members(&cluster, "b").len(), 2);
}

#[test]
fn demote_and_promote_change_quorum() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.run(3);
    let now = cluster.now;

    cluster.node_mut("a").demote(&endpoint("c"), now).unwrap();
    {
        let leader = cluster.node("a");
        assert_eq!(leader.active_member_count(), 2);
        assert_eq!(leader.quorum_size(), 2);
        assert!(leader.is_under_replicated());
        assert_eq!(
            leader.session(&endpoint("c")).unwrap().member_type(),
            MemberType::Inactive
        );
    }
    cluster.run(3);
    assert_eq!(cluster.node("c").role(), RaftRole::Inactive);
    assert_eq!(cluster.node("c").member_type(), MemberType::Inactive);

    // inactive members still replicate but never vote
    let now = cluster.now;
    let position = cluster.node_mut("a").promote(&endpoint("c"), now).unwrap();
    assert!(!cluster.node("a").is_under_replicated());
    cluster.run(3);
    let promoted = cluster.node("c");
    assert_eq!(promoted.role(), RaftRole::Follower);
    assert_eq!(promoted.log().last_position().unwrap(), position);
    assert!(matches!(
        cluster.node_mut("a").promote(&endpoint("z"), now),
        Err(RaftError::UnknownMember(_))
    ));
}

#[test]
fn membership_changes_require_leadership() {
    let mut cluster = TestCluster::new(&["a", "b", "c"]);
    cluster.elect("a");
    cluster.run(3);
    let now = cluster.now;

    let result = cluster.node_mut("b").join(Member::active(endpoint("d")), now);
    assert!(matches!(
        result,
        Err(RaftError::NotLeader { leader: Some(leader) }) if leader == endpoint("a")
    ));
    let result = cluster.node_mut("b").leave(&endpoint("c"), now);
    assert!(matches!(result, Err(RaftError::NotLeader { .. })));
    assert_eq!(cluster.node("b").members().len(), 3);
}
