#![allow(dead_code)]

use raftstream::{
    Endpoint, Member, MemoryLog, NodeConfig, PartitionMetadata, PartitionMetadataStore, RaftNode,
    RaftRole, LoopbackNetwork, LoopbackTransport,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub type TestNode = RaftNode<MemoryLog, LoopbackTransport>;

pub const TOPIC: &str = "orders";
pub const PARTITION: u32 = 1;
pub const STEP: Duration = Duration::from_millis(10);

pub fn endpoint(name: &str) -> Endpoint {
    Endpoint::new(name, 26502)
}

/// In-process cluster over a [`LoopbackNetwork`]. Time only moves when a test
/// advances it; no election timers run, so leaders are chosen explicitly.
pub struct TestCluster {
    pub tmp: TempDir,
    pub network: LoopbackNetwork,
    pub nodes: BTreeMap<Endpoint, TestNode>,
    pub now: Instant,
}

impl TestCluster {
    /// Every name becomes an ACTIVE member and every node starts as follower.
    pub fn new(names: &[&str]) -> Self {
        let members: Vec<Member> = names.iter().map(|name| Member::active(endpoint(name))).collect();
        let mut cluster = Self::empty();
        for name in names {
            cluster.add_node(name, &members);
        }
        cluster
    }

    pub fn empty() -> Self {
        Self {
            tmp: TempDir::new().expect("tempdir"),
            network: LoopbackNetwork::new(),
            nodes: BTreeMap::new(),
            now: Instant::now(),
        }
    }

    pub fn metadata_path(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name).join("metadata.json")
    }

    pub fn defaults(replication_factor: u32) -> PartitionMetadata {
        PartitionMetadata::new(TOPIC, PARTITION, replication_factor, 1024 * 1024)
    }

    /// Adds a node whose persisted membership is `members` and starts it.
    pub fn add_node(&mut self, name: &str, members: &[Member]) {
        let mut store =
            PartitionMetadataStore::new(self.metadata_path(name), Self::defaults(3));
        for member in members {
            store.add_member(member);
        }
        store.save().expect("save metadata");
        self.start_node(name, store, MemoryLog::new());
    }

    fn start_node(&mut self, name: &str, store: PartitionMetadataStore, log: MemoryLog) {
        let own = endpoint(name);
        let mut node = RaftNode::new(
            NodeConfig::new(TOPIC, PARTITION, own.clone()),
            log,
            self.network.transport(own.clone()),
            store,
        )
        .expect("node");
        node.start(self.now).expect("start");
        self.nodes.insert(own, node);
    }

    /// Simulates a crash: the node is rebuilt from its metadata file and a copy
    /// of its log; every in-memory field starts over.
    pub fn restart(&mut self, name: &str) {
        let own = endpoint(name);
        let node = self.nodes.remove(&own).expect("node to restart");
        let log = node.log().clone();
        drop(node);
        let store = PartitionMetadataStore::open(self.metadata_path(name), Self::defaults(3))
            .expect("reopen metadata");
        self.start_node(name, store, log);
    }

    pub fn node(&self, name: &str) -> &TestNode {
        self.nodes.get(&endpoint(name)).expect("unknown node")
    }

    pub fn node_mut(&mut self, name: &str) -> &mut TestNode {
        self.nodes.get_mut(&endpoint(name)).expect("unknown node")
    }

    pub fn advance(&mut self, by: Duration) {
        self.now += by;
    }

    /// Lets every node do one unit of work.
    pub fn work(&mut self) -> usize {
        let now = self.now;
        self.nodes
            .values_mut()
            .map(|node| node.do_work(now).expect("do_work"))
            .sum()
    }

    /// Hands every queued request to its receiver.
    pub fn deliver(&mut self) -> usize {
        let now = self.now;
        let nodes = &mut self.nodes;
        self.network.deliver(|to, request| {
            nodes
                .get_mut(to)
                .map(|node| node.handle_request(request, now).expect("handle request"))
        })
    }

    /// `rounds` times: advance the clock one step, work, deliver.
    pub fn run(&mut self, rounds: usize) {
        for _ in 0..rounds {
            self.advance(STEP);
            self.work();
            self.deliver();
        }
    }

    /// Starts an election on `name` and runs until it leads.
    pub fn elect(&mut self, name: &str) {
        let now = self.now;
        self.node_mut(name)
            .transition(RaftRole::Candidate, now)
            .expect("campaign");
        for _ in 0..10 {
            self.run(1);
            if self.node(name).role() == RaftRole::Leader {
                return;
            }
        }
        panic!("{name} did not win the election");
    }

    pub fn leaders(&self) -> Vec<Endpoint> {
        self.nodes
            .values()
            .filter(|node| node.role() == RaftRole::Leader)
            .map(|node| node.endpoint().clone())
            .collect()
    }

    /// `(position, term)` of every entry in the node's log.
    pub fn log_terms(&self, name: &str) -> Vec<(i64, i32)> {
        use raftstream::RaftLog;
        let log = self.node(name).log();
        let last = log.last_position().expect("last position");
        (0..=last)
            .map(|position| {
                let entry = log
                    .entry_at(position)
                    .expect("read")
                    .expect("contiguous log");
                (entry.position, entry.term)
            })
            .collect()
    }
}
