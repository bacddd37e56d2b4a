//! peer-plane transport: one-way messages over persistent tcp connections

use crate::config::NetworkConfig;

use tpkv_replica::msg::Message;
use tpkv_replica::net::Transport;

use tpkv_utils::codec::{self, bytes_sink, bytes_stream};
use tpkv_utils::{chan, clone};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::spawn;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error};

pub struct Connection {
    tx: mpsc::Sender<Bytes>,
    task: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Outbound side. Membership is static, so the connection table is built
/// once and never locked.
pub struct TcpTransport {
    conns: HashMap<SocketAddr, Connection>,
}

impl Transport for TcpTransport {
    fn broadcast(&self, targets: &[SocketAddr], msg: Message) {
        let msg_bytes = codec::serialize(&msg).expect("message should be able to be serialized");
        let txs: Vec<_> =
            targets.iter().filter_map(|addr| self.conns.get(addr)).map(|conn| conn.tx.clone()).collect();
        spawn(async move {
            let futures: Vec<_> = txs.iter().map(|tx| chan::send(tx, msg_bytes.clone())).collect();
            let _ = join_all(futures).await;
        });
    }

    fn send_one(&self, target: SocketAddr, msg: Message) {
        let msg_bytes = codec::serialize(&msg).expect("message should be able to be serialized");
        if let Some(conn) = self.conns.get(&target) {
            let tx = conn.tx.clone();
            spawn(async move {
                let _ = chan::send(&tx, msg_bytes).await;
            });
        }
    }
}

impl TcpTransport {
    #[must_use]
    pub fn new(peers: &[SocketAddr], config: &NetworkConfig) -> Self {
        let conns = peers
            .iter()
            .map(|&addr| (addr, Self::spawn_connector(addr, config)))
            .collect::<HashMap<_, _>>();
        Self { conns }
    }

    fn spawn_connector(addr: SocketAddr, config: &NetworkConfig) -> Connection {
        let chan_size = config.outbound_chan_size;
        let max_frame_length = config.max_frame_length;

        let initial_reconnect_timeout = config.initial_reconnect_timeout_us;
        let max_reconnect_timeout = config.max_reconnect_timeout_us;

        let (tx, rx) = mpsc::channel::<Bytes>(chan_size);

        let task = spawn(async move {
            let mut rx = rx;

            'drive: loop {
                let mut sink = {
                    let mut spin_weight: u64 = 1;
                    loop {
                        match TcpStream::connect(addr).await {
                            Ok(tcp) => break bytes_sink(tcp, max_frame_length),
                            Err(err) => {
                                spin_weight = spin_weight.wrapping_mul(2);

                                let timeout = Duration::from_micros(
                                    initial_reconnect_timeout
                                        .saturating_mul(spin_weight)
                                        .min(max_reconnect_timeout),
                                );

                                error!(?err, ?addr, ?timeout, "failed to reconnect");

                                sleep(timeout).await;
                            }
                        }
                    }
                };
                debug!(?addr, "tcp connection established");

                'forward: loop {
                    let item = match rx.recv().await {
                        Some(x) => x,
                        None => break 'drive,
                    };

                    match sink.send(item).await {
                        Ok(()) => {}
                        Err(err) => {
                            error!(?err, "tcp connection error");
                            break 'forward;
                        }
                    }
                }
            }
        });

        Connection { tx, task }
    }

    pub fn spawn_listener(listener: TcpListener, config: &NetworkConfig) -> PeerListener {
        let chan_size = config.inbound_chan_size;
        let max_frame_length = config.max_frame_length;

        let (tx, rx) = mpsc::channel::<Bytes>(chan_size);

        let task = spawn(async move {
            loop {
                let (tcp, _) = match listener.accept().await {
                    Ok(x) => x,
                    Err(err) => {
                        error!(?err, "tcp listener error");
                        break;
                    }
                };
                if tx.is_closed() {
                    break;
                }
                let mut stream = bytes_stream(tcp, max_frame_length);
                clone!(tx);
                spawn(async move {
                    while let Some(result) = stream.next().await {
                        let item = match result {
                            Ok(x) => x,
                            Err(err) => {
                                error!(?err, "tcp stream error");
                                break;
                            }
                        };
                        if chan::send(&tx, item).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        PeerListener { rx, task }
    }
}

/// Inbound side: a merged stream of decoded peer messages.
pub struct PeerListener {
    rx: mpsc::Receiver<Bytes>,
    task: JoinHandle<()>,
}

impl Drop for PeerListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl PeerListener {
    pub async fn recv(&mut self) -> Option<Result<Message>> {
        let bytes = self.rx.recv().await?;
        Some(codec::deserialize_owned(&bytes))
    }
}
