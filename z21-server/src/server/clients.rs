//! Mapping between peer addresses and engine client ids.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use log::{debug, warn};
use z21_server::ClientId;

/// Assigns a stable [`ClientId`] to every peer address seen by the host.
///
/// Ids run from 1 to 255; 0 is the broadcast id and never handed out.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    by_addr: HashMap<SocketAddr, ClientId>,
    by_id: HashMap<ClientId, SocketAddr>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `addr`, allocating the lowest free one for a new peer.
    pub fn register(&mut self, addr: SocketAddr) -> Option<ClientId> {
        if let Some(id) = self.by_addr.get(&addr) {
            return Some(*id);
        }

        let Some(id) = (1..=u8::MAX).map(ClientId).find(|id| !self.by_id.contains_key(id)) else {
            warn!("No client id left for {}", addr);
            return None;
        };
        debug!("[Client {}] Registered {}", id, addr);
        self.by_addr.insert(addr, id);
        self.by_id.insert(id, addr);
        Some(id)
    }

    pub fn addr_of(&self, id: ClientId) -> Option<SocketAddr> {
        self.by_id.get(&id).copied()
    }

    pub fn remove(&mut self, id: ClientId) -> Option<SocketAddr> {
        let addr = self.by_id.remove(&id)?;
        self.by_addr.remove(&addr);
        debug!("[Client {}] Unregistered {}", id, addr);
        Some(addr)
    }

    /// Every registered peer, the targets of a network-wide broadcast.
    pub fn addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.by_addr.keys().copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.by_id.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    /// One-byte hash of the peer's IP address, XOR of its octets.
    ///
    /// It keys the persisted subscriptions, so it survives a port change.
    pub fn hash(&self, id: ClientId) -> Option<u8> {
        let addr = self.by_id.get(&id)?;
        let hash = match addr.ip() {
            IpAddr::V4(ip) => ip.octets().iter().fold(0, |acc, b| acc ^ b),
            IpAddr::V6(ip) => ip.octets().iter().fold(0, |acc, b| acc ^ b),
        };
        Some(hash)
    }
}
