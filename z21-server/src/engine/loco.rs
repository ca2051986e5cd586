//! Locomotive state replies with per-recipient busy flags.

use log::trace;
use z21_protocol::{BroadcastCategory, StationMessage};

use super::Engine;
use crate::notifier::Notifier;
use crate::session::ClientId;
use crate::store::ConfigStore;

/// Categories that hear about loco changes made by other clients.
const LOCO_WATCHERS: [BroadcastCategory; 2] = [BroadcastCategory::All, BroadcastCategory::NetAll];

impl<N: Notifier, S: ConfigStore> Engine<N, S> {
    /// Report the state of loco `address`.
    ///
    /// The requester always gets a copy, with the busy bit clear when it owns
    /// the loco. With `broadcast` set, every other session watching locos gets
    /// a copy with the busy bit set.
    pub(crate) fn return_loco_state(
        &mut self,
        requester: Option<ClientId>,
        address: u16,
        broadcast: bool,
    ) {
        if address == 0 {
            return;
        }

        let state = self.notifier.loco_state_query(address).unwrap_or_default();
        trace!("Loco {} state {:?}", address, state);

        let recipients: Vec<(ClientId, bool)> = self
            .sessions
            .iter()
            .filter_map(|session| {
                if Some(session.client) == requester {
                    Some((session.client, session.owned_loco != Some(address)))
                } else if broadcast && session.subscriptions.contains_any(&LOCO_WATCHERS) {
                    Some((session.client, true))
                } else {
                    None
                }
            })
            .collect();

        for (client, busy) in recipients {
            self.reply(client, &StationMessage::LocoInfo { address, state, busy });
        }
    }
}

#[cfg(test)]
mod tests {
    use z21_protocol::{LocoState, SpeedSteps};

    use super::*;
    use crate::engine::tests::{engine, subscribe, x};

    const BUSY: u8 = 0x08;

    fn loco_info_db2(payload: &[u8]) -> u8 {
        assert_eq!(payload[0], 0xEF);
        payload[3]
    }

    #[test]
    fn test_busy_bit_follows_owner() {
        let mut engine = engine();
        engine.notifier_mut().locos.insert(
            3,
            LocoState { steps: SpeedSteps::Dcc128, speed: 0x80, functions: [0; 4] },
        );
        subscribe(&mut engine, 1, 0x0000_0001);
        subscribe(&mut engine, 2, 0x0000_0001);

        // S1 drives 3
        engine.receive(ClientId(1), &x(&[0xE4, 0x13, 0x00, 0x03, 0x80])).unwrap();
        // S2 drives 3 and takes it over
        engine.notifier_mut().clear();
        engine.receive(ClientId(2), &x(&[0xE4, 0x13, 0x00, 0x03, 0x85])).unwrap();

        let to_two = engine.notifier().payloads_to(ClientId(2));
        assert_eq!(to_two.len(), 1);
        assert_eq!(loco_info_db2(&to_two[0]) & BUSY, 0);

        // S1 sees the change as busy
        let to_one = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(to_one.len(), 1);
        assert_eq!(loco_info_db2(&to_one[0]), 0x04 | BUSY);

        // S1's next query still reports busy
        engine.notifier_mut().clear();
        engine.receive(ClientId(1), &x(&[0xE3, 0xF0, 0x00, 0x03])).unwrap();
        let to_one = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(loco_info_db2(&to_one[0]) & BUSY, BUSY);
    }

    #[test]
    fn test_query_does_not_broadcast() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        subscribe(&mut engine, 2, 0x0001_0000);
        engine.notifier_mut().clear();

        engine.receive(ClientId(1), &x(&[0xE3, 0xF0, 0x00, 0x03])).unwrap();

        assert_eq!(engine.notifier().sent.len(), 1);
        assert_eq!(engine.notifier().sent[0].0, ClientId(1));
    }

    #[test]
    fn test_non_watchers_are_skipped() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        subscribe(&mut engine, 2, 0x0000_0002);
        subscribe(&mut engine, 3, 0x0001_0000);
        engine.notifier_mut().clear();

        engine.receive(ClientId(1), &x(&[0xE4, 0x13, 0x00, 0x07, 0x10])).unwrap();

        assert_eq!(engine.notifier().sent_to(ClientId(1)).len(), 1);
        assert!(engine.notifier().sent_to(ClientId(2)).is_empty());
        assert_eq!(engine.notifier().sent_to(ClientId(3)).len(), 1);
    }

    #[test]
    fn test_address_zero_is_ignored() {
        let mut engine = engine();
        subscribe(&mut engine, 1, 0x0000_0001);
        engine.notifier_mut().clear();

        engine.receive(ClientId(1), &x(&[0xE3, 0xF0, 0x00, 0x00])).unwrap();
        assert!(engine.notifier().sent.is_empty());
    }

    #[test]
    fn test_unknown_loco_reports_default_state() {
        let mut engine = engine();
        engine.receive(ClientId(1), &x(&[0xE3, 0xF0, 0x00, 0x03])).unwrap();

        let to_one = engine.notifier().payloads_to(ClientId(1));
        assert_eq!(&to_one[0][..10], &[0xEF, 0x00, 0x03, 0x04 | BUSY, 0, 0, 0, 0, 0, 0]);
    }
}
