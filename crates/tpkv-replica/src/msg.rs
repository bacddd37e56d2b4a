//! replica-to-replica message contract

use crate::cmd::Mutation;

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock microseconds since the Unix epoch.
///
/// Acts as the ballot number: a prepare only steals an existing promise if
/// its timestamp is strictly greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    #[must_use]
    pub const fn from_micros(val: u64) -> Self {
        Self(val)
    }

    #[inline]
    #[must_use]
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before the unix epoch");
        Self(u64::try_from(since_epoch.as_micros()).expect("timestamp overflow"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prepare {
    pub sender: SocketAddr,
    pub ts: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub sender: SocketAddr,
    pub mutation: Mutation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    VoteCommit,
    VoteAbort,
    Ack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub sender: SocketAddr,
    pub kind: ReplyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Abort {
    pub sender: SocketAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Prepare(Prepare),
    Commit(Commit),
    Reply(Reply),
    Abort(Abort),
}
