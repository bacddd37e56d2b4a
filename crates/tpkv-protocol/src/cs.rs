//! client calls a replica node

use crate::rpc::{RpcClientConfig, RpcConnection};

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::time::error::Elapsed;

#[derive(Debug, Serialize, Deserialize)]
pub enum Args {
    Query(QueryArgs),
}

#[derive(Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Output {
    Query(QueryOutput),
}

/// A raw text command, exactly as the user typed it.
#[derive(Debug, Serialize, Deserialize)]
pub struct QueryArgs {
    pub command: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueryOutput {
    pub response: String,
}

pub struct ReplicaNode {
    conn: RpcConnection<Args, Output>,
}

impl ReplicaNode {
    #[inline]
    pub async fn connect(remote_addr: SocketAddr, config: &RpcClientConfig) -> Result<Self> {
        let conn = RpcConnection::connect(remote_addr, config).await?;
        Ok(Self { conn })
    }

    #[inline]
    pub async fn query(&self, args: QueryArgs) -> Result<QueryOutput> {
        let output = self.conn.call(Args::Query(args)).await?;
        match output {
            Output::Query(output) => Ok(output),
        }
    }

    #[inline]
    pub async fn query_timeout(
        &self,
        args: QueryArgs,
        timeout: Duration,
    ) -> Result<Result<QueryOutput>, Elapsed> {
        let result = self.conn.call_timeout(Args::Query(args), timeout).await?;
        Ok(result.map(|output| match output {
            Output::Query(output) => output,
        }))
    }
}
