//! Single-owner arbitration for locomotives.
//!
//! The client that last drove a loco owns it. Everyone else sees the busy bit
//! set in `LAN_X_LOCO_INFO` for that address. At most one session holds any
//! given address.

use crate::session::{ClientId, SessionTable};

/// Make `client` the owner of `address`, taking it from any other session.
///
/// Address 0 releases whatever the client owned. Nothing is sent.
pub fn claim(sessions: &mut SessionTable, client: ClientId, address: u16) {
    let wanted = (address != 0).then_some(address);

    let Some(session) = sessions.get_mut(client) else {
        return;
    };
    if session.owned_loco == wanted {
        return;
    }
    session.owned_loco = wanted;

    if wanted.is_some() {
        for other in sessions.iter_mut().filter(|s| s.client != client) {
            if other.owned_loco == wanted {
                other.owned_loco = None;
            }
        }
    }
}

/// Clear `address` from every session, e.g. when a non-LAN throttle takes it.
pub fn release(sessions: &mut SessionTable, address: u16) {
    for session in sessions.iter_mut() {
        if session.owned_loco == Some(address) {
            session.owned_loco = None;
        }
    }
}

/// Client currently owning `address`.
pub fn owner_of(sessions: &SessionTable, address: u16) -> Option<ClientId> {
    sessions
        .iter()
        .find(|s| s.owned_loco == Some(address))
        .map(|s| s.client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(clients: &[u8]) -> SessionTable {
        let mut table = SessionTable::new();
        for client in clients {
            table.touch(ClientId(*client));
        }
        table
    }

    fn owners(sessions: &SessionTable, address: u16) -> usize {
        sessions.iter().filter(|s| s.owned_loco == Some(address)).count()
    }

    #[test]
    fn test_claim_moves_ownership() {
        let mut sessions = table(&[1, 2, 3]);
        claim(&mut sessions, ClientId(1), 3);
        assert_eq!(owner_of(&sessions, 3), Some(ClientId(1)));

        claim(&mut sessions, ClientId(2), 3);
        assert_eq!(owner_of(&sessions, 3), Some(ClientId(2)));
        assert_eq!(sessions.get(ClientId(1)).unwrap().owned_loco, None);
        assert_eq!(owners(&sessions, 3), 1);
    }

    #[test]
    fn test_claim_other_address_keeps_other_owners() {
        let mut sessions = table(&[1, 2]);
        claim(&mut sessions, ClientId(1), 3);
        claim(&mut sessions, ClientId(2), 4);
        claim(&mut sessions, ClientId(2), 4);

        assert_eq!(owner_of(&sessions, 3), Some(ClientId(1)));
        assert_eq!(owner_of(&sessions, 4), Some(ClientId(2)));
    }

    #[test]
    fn test_claim_new_address_drops_previous() {
        let mut sessions = table(&[1]);
        claim(&mut sessions, ClientId(1), 3);
        claim(&mut sessions, ClientId(1), 5);
        assert_eq!(owner_of(&sessions, 3), None);
        assert_eq!(owner_of(&sessions, 5), Some(ClientId(1)));
    }

    #[test]
    fn test_claim_address_zero_releases() {
        let mut sessions = table(&[1, 2]);
        claim(&mut sessions, ClientId(1), 3);
        claim(&mut sessions, ClientId(1), 0);
        assert_eq!(sessions.get(ClientId(1)).unwrap().owned_loco, None);
    }

    #[test]
    fn test_claim_without_session_is_ignored() {
        let mut sessions = table(&[1]);
        claim(&mut sessions, ClientId(1), 3);
        claim(&mut sessions, ClientId(9), 3);
        assert_eq!(owner_of(&sessions, 3), Some(ClientId(1)));
    }

    #[test]
    fn test_release() {
        let mut sessions = table(&[1, 2]);
        claim(&mut sessions, ClientId(1), 3);
        claim(&mut sessions, ClientId(2), 4);
        release(&mut sessions, 3);
        assert_eq!(owner_of(&sessions, 3), None);
        assert_eq!(owner_of(&sessions, 4), Some(ClientId(2)));
    }

    #[test]
    fn test_single_owner_under_many_claims() {
        let mut sessions = table(&[1, 2, 3, 4]);
        let claims = [(1, 3), (2, 3), (3, 5), (4, 3), (1, 5), (2, 5), (3, 3)];
        for (client, address) in claims {
            claim(&mut sessions, ClientId(client), address);
            assert!(owners(&sessions, 3) <= 1);
            assert!(owners(&sessions, 5) <= 1);
        }
        assert_eq!(owner_of(&sessions, 3), Some(ClientId(3)));
        assert_eq!(owner_of(&sessions, 5), Some(ClientId(2)));
    }
}
