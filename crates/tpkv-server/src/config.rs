use tpkv_protocol::rpc::RpcServerConfig;
use tpkv_replica::config::ReplicaConfig;

use std::net::SocketAddr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Config {
    pub server: ServerConfig,
    pub replica: ReplicaConfig,
    pub network: NetworkConfig,
    pub rpc_server: RpcServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct ServerConfig {
    /// peer-plane addresses of the whole replica set, this node first
    pub nodes: Vec<SocketAddr>,
    pub listen_client_addr: SocketAddr,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageConfig {
    Memory,
    File { dir: Utf8PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub max_frame_length: usize,
    pub inbound_chan_size: usize,
    pub outbound_chan_size: usize,
    pub initial_reconnect_timeout_us: u64,
    pub max_reconnect_timeout_us: u64,
}
