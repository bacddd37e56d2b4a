use crate::msg::Message;

use std::net::SocketAddr;

/// Fire-and-forget delivery to peer replicas.
///
/// Implementations must never block the caller; an unreachable peer is a
/// silent non-delivery, not an error.
pub trait Transport: Send + Sync + 'static {
    fn broadcast(&self, targets: &[SocketAddr], msg: Message);
    fn send_one(&self, target: SocketAddr, msg: Message);
}
