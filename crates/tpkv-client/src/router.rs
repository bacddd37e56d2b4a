//! client-side quorum routing
//!
//! Reads fan out to every replica and the majority answer wins; writes walk
//! the replica list in order and the first node that accepts coordinator
//! duty answers for the cluster.

use tpkv_protocol::cs;
use tpkv_protocol::rpc::RpcClientConfig;
use tpkv_replica::cmd;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Result};
use futures_util::future::join_all;
use tracing::debug;

pub struct QuorumRouter {
    servers: Vec<SocketAddr>,
    rpc_client: RpcClientConfig,
    query_timeout: Duration,
}

impl QuorumRouter {
    pub fn new(
        servers: Vec<SocketAddr>,
        rpc_client: RpcClientConfig,
        query_timeout: Duration,
    ) -> Result<Self> {
        ensure!(!servers.is_empty(), "server list must not be empty");
        Ok(Self { servers, rpc_client, query_timeout })
    }

    /// One attempt against one replica. Any failure (unreachable node, rpc
    /// timeout) degrades to the empty response and takes part in the tally
    /// like any other answer.
    async fn try_query(&self, addr: SocketAddr, command: &str) -> String {
        let result = async {
            let node = cs::ReplicaNode::connect(addr, &self.rpc_client).await?;
            let args = cs::QueryArgs { command: command.to_owned() };
            let output = node.query_timeout(args, self.query_timeout).await??;
            Ok::<_, anyhow::Error>(output.response)
        }
        .await;

        match result {
            Ok(response) => response,
            Err(err) => {
                debug!(?err, ?addr, "replica query failed");
                String::new()
            }
        }
    }

    /// Read path: every replica is asked, the majority answer is returned.
    pub async fn read_majority(&self, command: &str) -> String {
        let futures: Vec<_> =
            self.servers.iter().map(|&addr| self.try_query(addr, command)).collect();
        let responses = join_all(futures).await;
        majority_response(responses, self.servers.len())
    }

    /// Write path: first non-empty response wins; an unreachable node just
    /// moves the walk to the next one.
    pub async fn write_any(&self, command: &str) -> String {
        for &addr in &self.servers {
            let response = self.try_query(addr, command).await;
            if !response.is_empty() {
                return response;
            }
        }
        String::new()
    }
}

/// Returns the response seen on a strict majority of the `n` replicas, or
/// the distinguished no-quorum answer. A plurality below the majority
/// threshold never wins, so a single stale replica cannot dominate.
#[must_use]
pub fn majority_response(responses: Vec<String>, n: usize) -> String {
    let mut tally: HashMap<String, usize> = HashMap::new();
    for response in responses {
        *tally.entry(response).or_insert(0) += 1;
    }

    let winner = tally.into_iter().max_by_key(|&(_, count)| count);
    match winner {
        Some((response, count)) if count > n / 2 => response,
        _ => cmd::NOT_FOUND.to_owned(),
    }
}
