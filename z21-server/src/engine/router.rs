//! Broadcast routing.

use log::{trace, warn};
use z21_protocol::{encode_station_message, BroadcastCategory, StationMessage};

use super::Engine;
use crate::notifier::Notifier;
use crate::session::{ClientId, SessionTable};
use crate::store::ConfigStore;

/// Targets for a frame sent on behalf of `origin`.
///
/// Without a category the frame goes back to `origin` alone (nowhere when
/// `origin` is the broadcast id). With a category it goes to every session
/// subscribed to it except `origin`. Category `All` is delivered as a single
/// network-wide broadcast to [`ClientId::BROADCAST`].
pub fn route(
    sessions: &SessionTable,
    origin: ClientId,
    category: Option<BroadcastCategory>,
) -> Vec<ClientId> {
    let Some(category) = category else {
        return if origin.is_broadcast() { Vec::new() } else { vec![origin] };
    };

    let mut targets = Vec::new();
    for session in sessions.iter() {
        if !session.subscriptions.contains(category) {
            continue;
        }
        let target = if category == BroadcastCategory::All {
            ClientId::BROADCAST
        } else {
            session.client
        };
        if target == origin && !target.is_broadcast() {
            continue;
        }
        targets.push(target);
        if target.is_broadcast() {
            break;
        }
    }
    targets
}

impl<N: Notifier, S: ConfigStore> Engine<N, S> {
    /// Encode `msg` and hand it to the transport for each routed target.
    pub(crate) fn send(
        &mut self,
        origin: ClientId,
        msg: &StationMessage,
        category: Option<BroadcastCategory>,
    ) {
        let frame = match encode_station_message(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping {:?} frame: {}", msg.command(), e);
                return;
            }
        };

        for target in route(&self.sessions, origin, category) {
            trace!("[Client {}] TX {:02X?}", target, &frame[..]);
            self.notifier.send_frame(target, &frame);
        }
    }

    /// Send `msg` to `client` only.
    pub(crate) fn reply(&mut self, client: ClientId, msg: &StationMessage) {
        self.send(client, msg, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z21_protocol::SubscriptionSet;

    fn table(entries: &[(u8, &[BroadcastCategory])]) -> SessionTable {
        let mut table = SessionTable::new();
        for (client, categories) in entries {
            table.touch(ClientId(*client));
            table.get_mut(ClientId(*client)).unwrap().subscriptions =
                categories.iter().copied().collect::<SubscriptionSet>();
        }
        table
    }

    #[test]
    fn test_unicast_without_category() {
        let sessions = table(&[(1, &[BroadcastCategory::All]), (2, &[BroadcastCategory::All])]);
        assert_eq!(route(&sessions, ClientId(2), None), vec![ClientId(2)]);
        assert!(route(&sessions, ClientId::BROADCAST, None).is_empty());
    }

    #[test]
    fn test_unicast_reaches_client_without_session() {
        let sessions = SessionTable::new();
        assert_eq!(route(&sessions, ClientId(9), None), vec![ClientId(9)]);
    }

    #[test]
    fn test_all_is_one_network_broadcast() {
        let sessions = table(&[
            (1, &[BroadcastCategory::All]),
            (2, &[BroadcastCategory::All]),
            (3, &[BroadcastCategory::All]),
        ]);
        assert_eq!(
            route(&sessions, ClientId(1), Some(BroadcastCategory::All)),
            vec![ClientId::BROADCAST]
        );
    }

    #[test]
    fn test_all_without_subscribers_sends_nothing() {
        let sessions = table(&[(1, &[BroadcastCategory::RBus])]);
        assert!(route(&sessions, ClientId(1), Some(BroadcastCategory::All)).is_empty());
    }

    #[test]
    fn test_category_skips_origin_and_non_subscribers() {
        let sessions = table(&[
            (1, &[BroadcastCategory::RBus]),
            (2, &[BroadcastCategory::All]),
            (3, &[BroadcastCategory::RBus, BroadcastCategory::All]),
            (4, &[BroadcastCategory::RBus]),
        ]);
        assert_eq!(
            route(&sessions, ClientId(1), Some(BroadcastCategory::RBus)),
            vec![ClientId(3), ClientId(4)]
        );
        assert_eq!(
            route(&sessions, ClientId::BROADCAST, Some(BroadcastCategory::RBus)),
            vec![ClientId(1), ClientId(3), ClientId(4)]
        );
    }

    #[test]
    fn test_loconet_subcategories_are_distinct() {
        let sessions = table(&[
            (1, &[BroadcastCategory::LocoNetLocos]),
            (2, &[BroadcastCategory::LocoNet]),
        ]);
        assert_eq!(
            route(&sessions, ClientId::BROADCAST, Some(BroadcastCategory::LocoNet)),
            vec![ClientId(2)]
        );
    }
}
