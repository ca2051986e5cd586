//! The command-station engine.
//!
//! [`Engine`] owns the power state, the session table, the extended
//! accessory cache, the [`Notifier`] and the [`ConfigStore`]. The host feeds
//! it frames with [`Engine::receive`], calls [`Engine::tick`] periodically and
//! reports decoder events through the `set_*` methods in [`events`].

pub mod busy;
mod dispatcher;
pub mod events;
mod loco;
pub mod router;

use log::{debug, info, warn};
use z21_protocol::{
    decode_frame, decode_request, PowerState, ProtocolError, SubscriptionSet,
};

use crate::notifier::Notifier;
use crate::session::{ClientId, SessionTable, Touch};
use crate::store::{ConfigStore, CLIENT_FLAGS, ERASED};

pub use events::SystemInfo;

/// Protocol engine for one command station.
pub struct Engine<N: Notifier, S: ConfigStore> {
    power: PowerState,
    sessions: SessionTable,
    /// Last extended accessory state, `None` until one was set.
    ext_accessory: Option<u8>,
    notifier: N,
    store: S,
}

impl<N: Notifier, S: ConfigStore> Engine<N, S> {
    /// Create an engine with the track switched off.
    pub fn new(notifier: N, store: S) -> Self {
        Self {
            power: PowerState::TrackVoltageOff,
            sessions: SessionTable::new(),
            ext_accessory: None,
            notifier,
            store,
        }
    }

    /// Start in `power` instead of `TrackVoltageOff`.
    pub fn with_power(mut self, power: PowerState) -> Self {
        self.power = power;
        self
    }

    /// Process one frame received from `client`.
    ///
    /// The client's session is refreshed even when the frame turns out to be
    /// malformed.
    pub fn receive(&mut self, client: ClientId, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.touch(client);

        let frame = decode_frame(bytes)?;
        let request = decode_request(frame.header.command, frame.payload)?;
        debug!("[Client {}] {:?}", client, request);

        self.dispatch(client, request);
        Ok(())
    }

    /// Age all sessions by one tick. Returns the clients that were evicted.
    pub fn tick(&mut self) -> Vec<ClientId> {
        let evicted = self.sessions.tick();
        for client in &evicted {
            info!("[Client {}] Session expired", client);
        }
        evicted
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    fn touch(&mut self, client: ClientId) {
        match self.sessions.touch(client) {
            Touch::Existing(_) => {}
            Touch::Created(slot) => {
                info!("[Client {}] New session in slot {}", client, slot);
                self.broadcast_power();
                let restored = self.stored_subscriptions(client);
                if let Some(session) = self.sessions.get_mut(client) {
                    session.subscriptions = restored;
                }
            }
            Touch::Full => {
                warn!(
                    "[Client {}] Session table full ({} clients), handling frame without a session",
                    client,
                    self.sessions.capacity()
                );
            }
        }
    }

    fn stored_subscriptions(&mut self, client: ClientId) -> SubscriptionSet {
        let Some(hash) = self.notifier.client_hash(client) else {
            return SubscriptionSet::empty();
        };
        match self.store.read(CLIENT_FLAGS | u16::from(hash)) {
            ERASED => SubscriptionSet::empty(),
            byte => {
                let restored = SubscriptionSet::from_local(byte);
                debug!("[Client {}] Restored subscriptions {:?}", client, restored);
                restored
            }
        }
    }

    fn persist_subscriptions(&mut self, client: ClientId, subscriptions: SubscriptionSet) {
        let Some(hash) = self.notifier.client_hash(client) else {
            return;
        };
        let offset = CLIENT_FLAGS | u16::from(hash);
        if let Err(e) = self.store.write(offset, subscriptions.to_local()) {
            warn!("[Client {}] Failed to persist subscriptions: {}", client, e);
        }
    }
}
