use tpkv_replica::cmd;
use tpkv_replica::config::ReplicaConfig;
use tpkv_replica::msg::{Abort, Commit, Message, Prepare, Reply, ReplyKind, Timestamp};
use tpkv_replica::net::Transport;
use tpkv_replica::store::LocalStore;
use tpkv_replica::Replica;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Default)]
struct TestStore {
    map: Mutex<HashMap<String, String>>,
}

impl LocalStore for TestStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.map.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.lock().remove(key).is_some())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.map.lock().keys().cloned().collect())
    }
}

/// A store whose writes always fail, as a full disk would.
struct FailingStore;

impl LocalStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: &str) -> Result<()> {
        Err(anyhow::anyhow!("disk full"))
    }

    fn delete(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

struct MockNet {
    tx: mpsc::UnboundedSender<(Vec<SocketAddr>, Message)>,
}

impl Transport for MockNet {
    fn broadcast(&self, targets: &[SocketAddr], msg: Message) {
        let _ = self.tx.send((targets.to_vec(), msg));
    }

    fn send_one(&self, target: SocketAddr, msg: Message) {
        let _ = self.tx.send((vec![target], msg));
    }
}

type TestReplica = Replica<TestStore, MockNet>;

fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn five_node_replica(
    config: ReplicaConfig,
) -> (Arc<TestReplica>, mpsc::UnboundedReceiver<(Vec<SocketAddr>, Message)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let peers: Vec<SocketAddr> = (9091..=9094).map(addr).collect();
    let replica =
        Replica::new(addr(9090), peers, TestStore::default(), MockNet { tx }, config).unwrap();
    (Arc::new(replica), rx)
}

fn vote_commit(from: u16) -> Message {
    Message::Reply(Reply { sender: addr(from), kind: ReplyKind::VoteCommit })
}

fn ack(from: u16) -> Message {
    Message::Reply(Reply { sender: addr(from), kind: ReplyKind::Ack })
}

#[tokio::test]
async fn put_applies_with_quorum() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());
    assert_eq!(replica.quorum(), 2);

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k1 v1").await })
    };

    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets.len(), 4);
    assert!(matches!(msg, Message::Prepare(_)));

    replica.handle_message(vote_commit(9091)).unwrap();
    replica.handle_message(vote_commit(9092)).unwrap();

    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets.len(), 4);
    assert!(matches!(msg, Message::Commit(_)));

    replica.handle_message(ack(9091)).unwrap();
    replica.handle_message(ack(9092)).unwrap();

    let response = task.await.unwrap();
    assert_eq!(response, cmd::WRITE_OK);
    assert_eq!(replica.store().get("k1").unwrap().as_deref(), Some("v1"));

    // the slot is idle again: a fresh read works and a new write may start
    assert_eq!(replica.handle_query("get k1").await, "{v1}");
}

#[tokio::test]
async fn busy_rejection_and_vote_abort() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k1 v1").await })
    };

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Prepare(_)));

    // a second write while the first is awaiting votes is rejected
    assert_eq!(replica.handle_query("put k2 v2").await, cmd::BUSY);

    // a vote-abort terminates the transaction and triggers the abort broadcast
    let abort = Message::Reply(Reply { sender: addr(9091), kind: ReplyKind::VoteAbort });
    replica.handle_message(abort).unwrap();

    let response = task.await.unwrap();
    assert_eq!(response, cmd::ABORTED);

    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets.len(), 4);
    assert!(matches!(msg, Message::Abort(_)));

    assert_eq!(replica.store().get("k1").unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn timeout_aborts_without_quorum() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k1 v1").await })
    };

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Prepare(_)));

    // one vote is below quorum; the deadline must fire, not hang
    replica.handle_message(vote_commit(9091)).unwrap();

    let response = task.await.unwrap();
    assert_eq!(response, cmd::ABORTED);

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Abort(_)));
}

#[tokio::test]
async fn prepare_promise_ordering() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let prepare = |from: u16, ts: u64| {
        Message::Prepare(Prepare { sender: addr(from), ts: Timestamp::from_micros(ts) })
    };

    replica.handle_message(prepare(9091, 100)).unwrap();
    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets, vec![addr(9091)]);
    assert!(matches!(msg, Message::Reply(Reply { kind: ReplyKind::VoteCommit, .. })));

    // an equal timestamp never steals the promise, and neither does an older one
    replica.handle_message(prepare(9092, 100)).unwrap();
    replica.handle_message(prepare(9092, 99)).unwrap();
    assert!(rx.try_recv().is_err());

    // a strictly newer proposal does
    replica.handle_message(prepare(9092, 101)).unwrap();
    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets, vec![addr(9092)]);
    assert!(matches!(msg, Message::Reply(Reply { kind: ReplyKind::VoteCommit, .. })));
}

#[tokio::test]
async fn weak_commit_acceptance() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let prepare = Message::Prepare(Prepare { sender: addr(9091), ts: Timestamp::from_micros(100) });
    replica.handle_message(prepare).unwrap();
    let _ = rx.recv().await.unwrap();

    // faithful mode: a promised peer applies a commit from a coordinator it
    // never promised to, and acks that coordinator
    let commit = Message::Commit(Commit {
        sender: addr(9093),
        mutation: tpkv_replica::cmd::Mutation::Put { key: "k".to_owned(), value: "v".to_owned() },
    });
    replica.handle_message(commit).unwrap();

    assert_eq!(replica.store().get("k").unwrap().as_deref(), Some("v"));
    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets, vec![addr(9093)]);
    assert!(matches!(msg, Message::Reply(Reply { kind: ReplyKind::Ack, .. })));
}

#[tokio::test]
async fn strict_commit_acceptance() {
    let config = ReplicaConfig { strict_commit: true, ..ReplicaConfig::default() };
    let (replica, mut rx) = five_node_replica(config);

    let prepare = Message::Prepare(Prepare { sender: addr(9091), ts: Timestamp::from_micros(100) });
    replica.handle_message(prepare).unwrap();
    let _ = rx.recv().await.unwrap();

    // strict mode: the non-matching coordinator is refused and nothing is applied
    let commit = Message::Commit(Commit {
        sender: addr(9093),
        mutation: tpkv_replica::cmd::Mutation::Put { key: "k".to_owned(), value: "v".to_owned() },
    });
    replica.handle_message(commit).unwrap();

    assert_eq!(replica.store().get("k").unwrap(), None);
    assert!(rx.try_recv().is_err());

    // a matching coordinator still goes through after a fresh promise
    let prepare = Message::Prepare(Prepare { sender: addr(9091), ts: Timestamp::from_micros(200) });
    replica.handle_message(prepare).unwrap();
    let _ = rx.recv().await.unwrap();

    let commit = Message::Commit(Commit {
        sender: addr(9091),
        mutation: tpkv_replica::cmd::Mutation::Put { key: "k".to_owned(), value: "v".to_owned() },
    });
    replica.handle_message(commit).unwrap();
    assert_eq!(replica.store().get("k").unwrap().as_deref(), Some("v"));
}

#[tokio::test]
async fn abort_resets_peer_state() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let prepare = Message::Prepare(Prepare { sender: addr(9091), ts: Timestamp::from_micros(100) });
    replica.handle_message(prepare).unwrap();
    let _ = rx.recv().await.unwrap();

    replica.handle_message(Message::Abort(Abort { sender: addr(9091) })).unwrap();

    // after the reset even an older proposal is accepted again
    let prepare = Message::Prepare(Prepare { sender: addr(9092), ts: Timestamp::from_micros(50) });
    replica.handle_message(prepare).unwrap();
    let (targets, _) = rx.recv().await.unwrap();
    assert_eq!(targets, vec![addr(9092)]);
}

#[tokio::test]
async fn failed_apply_releases_the_slot() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let peers: Vec<SocketAddr> = (9091..=9094).map(addr).collect();
    let replica = Arc::new(
        Replica::new(addr(9090), peers, FailingStore, MockNet { tx }, ReplicaConfig::default())
            .unwrap(),
    );

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k1 v1").await })
    };

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Prepare(_)));
    replica.handle_message(vote_commit(9091)).unwrap();
    replica.handle_message(vote_commit(9092)).unwrap();

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Commit(_)));
    replica.handle_message(ack(9091)).unwrap();
    replica.handle_message(ack(9092)).unwrap();

    // the store failure surfaces as the generic error text
    let response = task.await.unwrap();
    assert_eq!(response, cmd::INTERNAL_ERROR);

    // and the slot is idle again: the next write opens a fresh transaction
    // instead of answering busy
    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k2 v2").await })
    };
    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets.len(), 4);
    assert!(matches!(msg, Message::Prepare(_)));

    let abort = Message::Reply(Reply { sender: addr(9091), kind: ReplyKind::VoteAbort });
    replica.handle_message(abort).unwrap();
    assert_eq!(task.await.unwrap(), cmd::ABORTED);
}

#[tokio::test]
async fn failed_apply_on_commit_resets_the_peer() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let peers: Vec<SocketAddr> = (9091..=9094).map(addr).collect();
    let replica =
        Replica::new(addr(9090), peers, FailingStore, MockNet { tx }, ReplicaConfig::default())
            .unwrap();

    let prepare = Message::Prepare(Prepare { sender: addr(9091), ts: Timestamp::from_micros(100) });
    replica.handle_message(prepare).unwrap();
    let _ = rx.recv().await.unwrap();

    let commit = Message::Commit(Commit {
        sender: addr(9091),
        mutation: cmd::Mutation::Put { key: "k".to_owned(), value: "v".to_owned() },
    });
    assert!(replica.handle_message(commit).is_err());

    // the failed apply is never acked
    assert!(rx.try_recv().is_err());

    // the promise was released: even an older proposal is accepted again
    let prepare = Message::Prepare(Prepare { sender: addr(9092), ts: Timestamp::from_micros(50) });
    replica.handle_message(prepare).unwrap();
    let (targets, msg) = rx.recv().await.unwrap();
    assert_eq!(targets, vec![addr(9092)]);
    assert!(matches!(msg, Message::Reply(Reply { kind: ReplyKind::VoteCommit, .. })));
}

#[tokio::test]
async fn foreign_abort_ends_coordination() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k1 v1").await })
    };

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Prepare(_)));

    // another coordinator's abort lands while this node is collecting votes
    replica.handle_message(Message::Abort(Abort { sender: addr(9093) })).unwrap();

    // the coordinator notices the reclaimed slot and gives up instead of
    // driving a transaction it no longer owns
    let response = task.await.unwrap();
    assert_eq!(response, cmd::ABORTED);
    assert_eq!(replica.store().get("k1").unwrap(), None);

    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Abort(_)));

    // late votes for the dead transaction do not leak into the next one
    replica.handle_message(vote_commit(9091)).unwrap();
    replica.handle_message(vote_commit(9092)).unwrap();

    let task = {
        let replica = Arc::clone(&replica);
        tokio::spawn(async move { replica.handle_query("put k2 v2").await })
    };
    let (_, msg) = rx.recv().await.unwrap();
    assert!(matches!(msg, Message::Prepare(_)));

    let abort = Message::Reply(Reply { sender: addr(9091), kind: ReplyKind::VoteAbort });
    replica.handle_message(abort).unwrap();
    assert_eq!(task.await.unwrap(), cmd::ABORTED);
}

#[tokio::test]
async fn delete_missing_key_is_immediate() {
    let (replica, mut rx) = five_node_replica(ReplicaConfig::default());

    let response = replica.handle_query("delete nope").await;
    assert_eq!(response, cmd::NOT_FOUND);

    // no transaction was opened and no peer was contacted
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn read_paths() {
    let (replica, _rx) = five_node_replica(ReplicaConfig::default());

    replica.store().put("b", "2").unwrap();
    replica.store().put("a", "1").unwrap();

    assert_eq!(replica.handle_query("get a").await, "{1}");
    assert_eq!(replica.handle_query("get missing").await, cmd::NOT_FOUND);
    assert_eq!(replica.handle_query("read a").await, "1");
    assert_eq!(replica.handle_query("list").await, "a\nb");
    assert_eq!(replica.handle_query("frobnicate").await, cmd::INVALID_OP);
}
