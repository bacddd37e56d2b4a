#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

pub mod config;
pub mod net;

// -----------------------------------------------------------------------------

use self::config::{Config, StorageConfig};
use self::net::{PeerListener, TcpTransport};

use tpkv_protocol::{cs, rpc};
use tpkv_replica::store::LocalStore;
use tpkv_replica::Replica;
use tpkv_store::{FileStore, MemStore};
use tpkv_utils::shutdown::ShutdownFlag;

use std::sync::Arc;

use anyhow::{ensure, Context as _, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::spawn;
use tracing::{debug, error};
use wgp::WaitGroup;

pub struct Server<S> {
    replica: Arc<Replica<S, TcpTransport>>,

    config: Config,

    shutdown: ShutdownFlag,
    waitgroup: WaitGroup,
}

/// Starts a replica node with the storage backend selected by the config.
pub async fn run(config: Config) -> Result<()> {
    match config.server.storage.clone() {
        StorageConfig::Memory => Server::run_with_store(config, MemStore::new()).await,
        StorageConfig::File { dir } => {
            let store = FileStore::new(&dir)?;
            Server::run_with_store(config, store).await
        }
    }
}

impl<S: LocalStore> Server<S> {
    async fn run_with_store(config: Config, store: S) -> Result<()> {
        let (self_addr, peers) = {
            let nodes = &config.server.nodes;
            ensure!(nodes.len() >= 3, "replica set needs at least three nodes");
            let (&self_addr, peers) = nodes.split_first().expect("node list is non-empty");
            (self_addr, peers.to_vec())
        };

        let peer_listener = {
            let listener = TcpListener::bind(self_addr)
                .await
                .with_context(|| format!("failed to bind to {self_addr}"))?;
            TcpTransport::spawn_listener(listener, &config.network)
        };

        let replica = {
            let network = TcpTransport::new(&peers, &config.network);
            let replica = Replica::new(self_addr, peers, store, network, config.replica.clone())?;
            Arc::new(replica)
        };

        let server = {
            let shutdown = ShutdownFlag::new();
            let waitgroup = WaitGroup::new();
            Arc::new(Server { replica, config, shutdown, waitgroup })
        };

        let mut bg_tasks = Vec::new();

        {
            let this = Arc::clone(&server);
            bg_tasks.push(spawn(this.serve_peer(peer_listener)));
        }

        {
            let this = Arc::clone(&server);
            let listener = TcpListener::bind(this.config.server.listen_client_addr).await?;
            bg_tasks.push(spawn(this.serve_client(listener)));
        }

        debug!(?self_addr, "replica node started");

        {
            tokio::signal::ctrl_c().await?;
        }

        {
            server.shutdown.raise();
            for task in &bg_tasks {
                task.abort();
            }
            drop(bg_tasks);

            let task_count = server.waitgroup.count();
            debug!(?task_count, "waiting running tasks");
            server.waitgroup.wait().await;
        }

        Ok(())
    }

    async fn serve_peer(self: Arc<Self>, mut listener: PeerListener) -> Result<()> {
        while let Some(result) = listener.recv().await {
            if self.shutdown.is_raised() {
                break;
            }
            match result {
                Ok(msg) => {
                    let this = Arc::clone(&self);
                    let working = self.waitgroup.working();
                    spawn(async move {
                        if let Err(err) = this.replica.handle_message(msg) {
                            error!(?err, "handle_message");
                        }
                        drop(working);
                    });
                }
                Err(err) => {
                    error!(?err, "peer listener recv");
                    continue;
                }
            }
        }
        Ok(())
    }

    async fn serve_client(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        let config = self.config.rpc_server.clone();
        let working = self.waitgroup.working();
        rpc::serve(self, listener, config, working).await
    }

    async fn handle_client_rpc(self: &Arc<Self>, args: cs::Args) -> Result<cs::Output> {
        match args {
            cs::Args::Query(args) => {
                let response = self.replica.handle_query(&args.command).await;
                Ok(cs::Output::Query(cs::QueryOutput { response }))
            }
        }
    }
}

impl<S: LocalStore> rpc::Service<cs::Args> for Server<S> {
    type Output = cs::Output;

    fn call(self: &Arc<Self>, args: cs::Args) -> BoxFuture<'_, Result<Self::Output>> {
        self.handle_client_rpc(args).boxed()
    }

    fn needs_stop(&self) -> bool {
        self.shutdown.is_raised()
    }
}
