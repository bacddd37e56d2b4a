//! the per-node transaction slot and the commit coordinator

use crate::cmd::{self, Command, Mutation};
use crate::config::ReplicaConfig;
use crate::msg::{Abort, Commit, Message, Prepare, Reply, ReplyKind, Timestamp};
use crate::net::Transport;
use crate::store::LocalStore;

use tpkv_utils::lock::with_mutex;

use std::net::SocketAddr;
use std::ops::Not;

use anyhow::{ensure, Result};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingVotes,
    Committing,
    AwaitingAcks,
}

/// The single transaction slot of one node.
///
/// Coordinator-side fields (`phase`, `votes`, `acks`, `committing`,
/// `aborted`) and peer-side fields (`ready`, `promised`, `promise_ts`) live
/// together because one node can play both roles across transactions; every
/// access goes through the slot mutex.
#[derive(Debug)]
struct TxnSlot {
    phase: Phase,
    mutation: Option<Mutation>,
    promised: Option<SocketAddr>,
    promise_ts: Option<Timestamp>,
    ready: bool,
    committing: bool,
    votes: usize,
    acks: usize,
    aborted: bool,
}

impl TxnSlot {
    const fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            mutation: None,
            promised: None,
            promise_ts: None,
            ready: false,
            committing: false,
            votes: 0,
            acks: 0,
            aborted: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::idle();
    }
}

enum Step {
    Wait,
    SendCommits,
    Apply,
    Abort,
}

enum Outcome {
    Applied,
    Aborted,
}

pub struct Replica<S, N> {
    self_addr: SocketAddr,
    peers: Vec<SocketAddr>,
    quorum: usize,
    config: ReplicaConfig,
    store: S,
    network: N,
    slot: SyncMutex<TxnSlot>,
    progress_tx: watch::Sender<u64>,
}

impl<S: LocalStore, N: Transport> Replica<S, N> {
    pub fn new(
        self_addr: SocketAddr,
        peers: Vec<SocketAddr>,
        store: S,
        network: N,
        config: ReplicaConfig,
    ) -> Result<Self> {
        ensure!(peers.iter().all(|&p| p != self_addr), "peer list contains the node itself");
        ensure!(peers.is_empty().not(), "replica set needs at least one peer");

        let cluster_size = peers.len().wrapping_add(1);
        // strict majority of the cluster, counting the coordinator itself:
        // quorum peer votes + the coordinator = floor(n/2) + 1 nodes.
        // 2 of 4 peers in the reference five-node deployment.
        let quorum = cluster_size / 2;

        let (progress_tx, _) = watch::channel(0u64);

        Ok(Self {
            self_addr,
            peers,
            quorum,
            config,
            store,
            network,
            slot: SyncMutex::new(TxnSlot::idle()),
            progress_tx,
        })
    }

    #[must_use]
    pub const fn quorum(&self) -> usize {
        self.quorum
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Entry point for one client command. Always answers with text; store
    /// failures are logged and surfaced as the generic error response.
    pub async fn handle_query(&self, command: &str) -> String {
        let cmd = match Command::parse(command) {
            Some(cmd) => cmd,
            None => return cmd::INVALID_OP.to_owned(),
        };

        let result = match cmd {
            Command::Get { key } => self.read_get(&key),
            Command::Read { key } => self.read_raw(&key),
            Command::List => self.read_list(),
            Command::Write(mutation) => self.coordinate(mutation).await,
        };

        match result {
            Ok(response) => response,
            Err(err) => {
                warn!(?err, ?command, "query failed");
                cmd::INTERNAL_ERROR.to_owned()
            }
        }
    }

    fn read_get(&self, key: &str) -> Result<String> {
        Ok(match self.store.get(key)? {
            Some(value) => format!("{{{value}}}"),
            None => cmd::NOT_FOUND.to_owned(),
        })
    }

    fn read_raw(&self, key: &str) -> Result<String> {
        Ok(match self.store.get(key)? {
            Some(value) => value,
            None => cmd::NOT_FOUND.to_owned(),
        })
    }

    fn read_list(&self) -> Result<String> {
        let mut keys = self.store.list()?;
        keys.sort_unstable();
        Ok(keys.join("\n"))
    }

    /// Runs one write transaction with this node as coordinator:
    /// prepare -> vote collection -> commit -> ack collection -> apply,
    /// bounded by the transaction deadline.
    async fn coordinate(&self, mutation: Mutation) -> Result<String> {
        // deleting an absent key never opens a transaction
        if let Mutation::Delete { ref key } = mutation {
            if self.store.get(key)?.is_none() {
                return Ok(cmd::NOT_FOUND.to_owned());
            }
        }

        let ts = Timestamp::now();

        let busy = with_mutex(&self.slot, |s| {
            if s.phase != Phase::Idle {
                return true;
            }
            s.phase = Phase::AwaitingVotes;
            s.mutation = Some(mutation.clone());
            s.votes = 0;
            s.acks = 0;
            s.committing = false;
            s.aborted = false;
            false
        });
        if busy {
            return Ok(cmd::BUSY.to_owned());
        }

        debug!(?mutation, ?ts, "begin commit");
        let mut progress_rx = self.progress_tx.subscribe();
        self.network
            .broadcast(&self.peers, Message::Prepare(Prepare { sender: self.self_addr, ts }));

        let deadline = Instant::now() + self.config.txn_timeout();

        let outcome = loop {
            let step = with_mutex(&self.slot, |s| {
                if s.aborted {
                    return Step::Abort;
                }
                match s.phase {
                    // another coordinator's abort reclaimed the slot
                    Phase::Idle => Step::Abort,
                    Phase::AwaitingVotes if s.votes >= self.quorum => {
                        s.phase = Phase::Committing;
                        s.committing = true;
                        Step::SendCommits
                    }
                    Phase::AwaitingAcks if s.acks >= self.quorum => Step::Apply,
                    _ => Step::Wait,
                }
            });

            match step {
                Step::SendCommits => {
                    debug!("vote quorum reached, committing");
                    let msg = Commit { sender: self.self_addr, mutation: mutation.clone() };
                    self.network.broadcast(&self.peers, Message::Commit(msg));
                    with_mutex(&self.slot, |s| {
                        if s.phase == Phase::Committing {
                            s.phase = Phase::AwaitingAcks;
                        }
                    });
                }
                Step::Apply => break Outcome::Applied,
                Step::Abort => break Outcome::Aborted,
                Step::Wait => match timeout_at(deadline, progress_rx.changed()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => break Outcome::Aborted,
                    Err(_) => {
                        debug!("transaction deadline elapsed");
                        break Outcome::Aborted;
                    }
                },
            }
        };

        match outcome {
            Outcome::Applied => {
                // the slot must reach Idle even if the store fails
                let applied = self.apply(&mutation);
                with_mutex(&self.slot, TxnSlot::reset);
                applied?;
                debug!(?mutation, "end of transaction");
                Ok(mutation.applied_response().to_owned())
            }
            Outcome::Aborted => {
                self.network.broadcast(&self.peers, Message::Abort(Abort { sender: self.self_addr }));
                with_mutex(&self.slot, TxnSlot::reset);
                debug!(?mutation, "transaction aborted");
                Ok(cmd::ABORTED.to_owned())
            }
        }
    }

    fn apply(&self, mutation: &Mutation) -> Result<()> {
        match mutation {
            Mutation::Put { key, value } => self.store.put(key, value),
            Mutation::Delete { key } => self.store.delete(key).map(drop),
        }
    }

    /// Dispatch for inbound peer-plane messages.
    pub fn handle_message(&self, msg: Message) -> Result<()> {
        match msg {
            Message::Prepare(msg) => {
                self.handle_prepare(msg);
                Ok(())
            }
            Message::Commit(msg) => self.handle_commit(msg),
            Message::Reply(msg) => {
                self.handle_reply(msg);
                Ok(())
            }
            Message::Abort(msg) => {
                self.handle_abort(msg);
                Ok(())
            }
        }
    }

    /// A peer promises to the proposal if it holds no promise and is not
    /// itself coordinating, or if the proposal is strictly newer than its
    /// current promise. Stale proposals are dropped without a reply.
    fn handle_prepare(&self, msg: Prepare) {
        let accepted = with_mutex(&self.slot, |s| {
            let coordinating = s.phase != Phase::Idle;
            let strictly_newer = s.promise_ts.map_or(false, |t| msg.ts > t);
            if (!coordinating && !s.ready) || (s.ready && strictly_newer) {
                s.ready = true;
                s.promised = Some(msg.sender);
                s.promise_ts = Some(msg.ts);
                true
            } else {
                false
            }
        });

        if accepted {
            debug!(coordinator = ?msg.sender, ts = ?msg.ts, "ready to commit");
            let reply = Reply { sender: self.self_addr, kind: ReplyKind::VoteCommit };
            self.network.send_one(msg.sender, Message::Reply(reply));
        } else {
            debug!(coordinator = ?msg.sender, ts = ?msg.ts, "stale proposal ignored");
        }
    }

    /// A peer applies the mutation if the sender matches its promise while
    /// the commit flag is set, or if it is simply in promised state. The
    /// second arm lets a promised peer commit on behalf of a coordinator it
    /// never matched; `strict_commit` tightens it to a matching promise.
    fn handle_commit(&self, msg: Commit) -> Result<()> {
        let send_ack = with_mutex(&self.slot, |s| {
            let matches_promise = s.promised == Some(msg.sender);
            let accept = if self.config.strict_commit {
                matches_promise && s.ready
            } else {
                (matches_promise && s.committing) || s.ready
            };
            accept.then_some(s.ready)
        });

        match send_ack {
            Some(send_ack) => {
                // the slot must reach Idle even if the store fails; a failed
                // apply is never acked
                let applied = self.apply(&msg.mutation);
                with_mutex(&self.slot, TxnSlot::reset);
                applied?;
                debug!(coordinator = ?msg.sender, "commit recorded");
                if send_ack {
                    let reply = Reply { sender: self.self_addr, kind: ReplyKind::Ack };
                    self.network.send_one(msg.sender, Message::Reply(reply));
                }
            }
            None => {
                warn!(coordinator = ?msg.sender, "commit from unpromised coordinator, aborting");
                with_mutex(&self.slot, TxnSlot::reset);
            }
        }
        Ok(())
    }

    /// Coordinator-side tally of peer signals. Counters are only meaningful
    /// in their own collection phase; acks may arrive while the commit
    /// broadcast is still in flight, so they also count during `Committing`.
    fn handle_reply(&self, msg: Reply) {
        with_mutex(&self.slot, |s| match msg.kind {
            ReplyKind::VoteCommit => {
                if s.phase == Phase::AwaitingVotes {
                    s.votes = s.votes.wrapping_add(1);
                }
            }
            ReplyKind::VoteAbort => s.aborted = true,
            ReplyKind::Ack => {
                if matches!(s.phase, Phase::Committing | Phase::AwaitingAcks) {
                    s.acks = s.acks.wrapping_add(1);
                }
            }
        });
        self.progress_tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    fn handle_abort(&self, msg: Abort) {
        debug!(coordinator = ?msg.sender, "abort received");
        with_mutex(&self.slot, TxnSlot::reset);
        self.progress_tx.send_modify(|v| *v = v.wrapping_add(1));
    }
}
