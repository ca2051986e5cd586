//! Per-client session table.
//!
//! A fixed number of slots, scanned linearly. A client keeps its slot for as
//! long as it sends at least one frame every `SESSION_TTL` ticks.

use std::fmt;

use z21_protocol::SubscriptionSet;

/// Maximum number of concurrently tracked clients.
pub const MAX_CLIENTS: usize = 30;

/// Ticks a session survives without traffic.
pub const SESSION_TTL: u8 = 20;

/// Transport-assigned client identifier.
///
/// `ClientId(0)` is reserved for a network-wide broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u8);

impl ClientId {
    /// Target of a network-wide broadcast.
    pub const BROADCAST: ClientId = ClientId(0);

    pub fn is_broadcast(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State kept for one active client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub client: ClientId,
    pub subscriptions: SubscriptionSet,
    /// Remaining ticks before eviction; never 0 for a stored session.
    pub ttl: u8,
    /// Loco this client drove last, if it still owns it.
    pub owned_loco: Option<u16>,
}

impl Session {
    fn new(client: ClientId) -> Self {
        Self {
            client,
            subscriptions: SubscriptionSet::empty(),
            ttl: SESSION_TTL,
            owned_loco: None,
        }
    }
}

/// Result of [`SessionTable::touch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    /// The client already had a session in this slot; its ttl was refreshed.
    Existing(usize),
    /// A new session was created in this slot.
    Created(usize),
    /// No slot was free.
    Full,
}

/// Fixed-capacity table of sessions.
#[derive(Debug, Clone)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_CLIENTS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of active sessions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refresh the client's session, or create one in the first free slot.
    ///
    /// A matching session anywhere in the table wins over a free slot that
    /// comes before it.
    pub fn touch(&mut self, client: ClientId) -> Touch {
        let mut free = None;
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(session) if session.client == client => {
                    session.ttl = SESSION_TTL;
                    return Touch::Existing(slot);
                }
                None if free.is_none() => free = Some(slot),
                _ => {}
            }
        }

        match free {
            Some(slot) => {
                self.slots[slot] = Some(Session::new(client));
                Touch::Created(slot)
            }
            None => Touch::Full,
        }
    }

    /// Slot index of the client's session.
    pub fn slot_of(&self, client: ClientId) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(session) if session.client == client))
    }

    pub fn get(&self, client: ClientId) -> Option<&Session> {
        self.iter().find(|s| s.client == client)
    }

    pub fn get_mut(&mut self, client: ClientId) -> Option<&mut Session> {
        self.iter_mut().find(|s| s.client == client)
    }

    /// Clear the client's session.
    pub fn remove(&mut self, client: ClientId) -> Option<Session> {
        let slot = self.slot_of(client)?;
        self.slots[slot].take()
    }

    /// Age every session by one tick and evict those that expire.
    ///
    /// Returns the evicted client ids in slot order.
    pub fn tick(&mut self) -> Vec<ClientId> {
        let mut evicted = Vec::new();
        for entry in self.slots.iter_mut() {
            let expired = match entry {
                Some(session) => {
                    session.ttl = session.ttl.saturating_sub(1);
                    session.ttl == 0
                }
                None => false,
            };
            if expired {
                if let Some(session) = entry.take() {
                    evicted.push(session.client);
                }
            }
        }
        evicted
    }

    /// Active sessions in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.slots.iter_mut().flatten()
    }
}
