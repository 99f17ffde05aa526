//! Translation between store events and wire notifications
//!
//! Outbound, every [`Event`] maps to exactly one [`Notification`]. Inbound,
//! [`apply`] performs the receipt effect of each method on the local store.
//! The master re-raises token changes it receives so they are relayed to
//! every other player; replicas apply everything silently.

use crate::campaign::ChatEntry;
use crate::error::StoreError;
use crate::protocol::Notification;
use crate::reconciler::Reconciler;
use crate::store::{Event, Store};
use log::{debug, warn};
use std::net::SocketAddr;

/// Receives every event the store raises, after it has been sent out.
///
/// Front ends register one of these with the session instead of polling the
/// store for changes.
pub trait EventObserver: Send {
    fn on_event(&mut self, event: &Event, store: &Store);
}

/// Builds the wire notification announcing `event`.
pub fn notification_for(event: &Event, store: &Store) -> Result<Notification, StoreError> {
    let notification = match event {
        Event::TokenUpdated(id) => Notification::UpdateToken {
            token: store.token(id)?.token.record().clone(),
        },
        Event::TokenTempPositionChanged { token_id, position } => Notification::TokenTempPositionChanged {
            token_id: token_id.clone(),
            position: *position,
        },
        Event::PageChanged(index) => Notification::PageChanged { players_page: *index },
        Event::VeilsUpdated { page_id, veils } => Notification::VeilsUpdated {
            page_id: *page_id,
            veils: veils.clone(),
        },
        Event::NewChat(entry) => Notification::NewChat {
            message: entry.clone(),
        },
    };
    Ok(notification)
}

/// The change an inbound notification makes, for observers of replicas.
///
/// `None` for handshakes, for chat that still has to go through the master
/// and for previews the reconciler is going to drop.
pub fn event_for(notification: &Notification, reconciler: &Reconciler) -> Option<Event> {
    match notification {
        Notification::UpdateToken { token } => Some(Event::TokenUpdated(token.id.clone())),
        Notification::TokenTempPositionChanged { token_id, position } => reconciler
            .should_apply(token_id)
            .then(|| Event::TokenTempPositionChanged {
                token_id: token_id.clone(),
                position: *position,
            }),
        Notification::PageChanged { players_page } => Some(Event::PageChanged(*players_page)),
        Notification::VeilsUpdated { page_id, veils } => Some(Event::VeilsUpdated {
            page_id: *page_id,
            veils: veils.clone(),
        }),
        Notification::NewChat { message } => Some(Event::NewChat(message.clone())),
        Notification::Hi { .. } | Notification::PlayerChat { .. } => None,
    }
}

/// The message a player sends instead of appending its own chat line.
pub fn player_chat(entry: ChatEntry) -> Notification {
    Notification::PlayerChat { message: entry }
}

/// Applies an inbound notification from `sender` to the store.
///
/// Errors mean the message referenced something this replica does not have;
/// callers log them and move on.
pub fn apply(
    notification: Notification,
    sender: SocketAddr,
    store: &mut Store,
    reconciler: &Reconciler,
) -> Result<(), StoreError> {
    let relay = store.is_master();
    match notification {
        Notification::Hi { player } => {
            if relay {
                store.register_player(sender, &player);
            } else {
                warn!("Ignoring hi from {} ({}): not the master", sender, player);
            }
        }
        Notification::UpdateToken { token } => {
            debug!("update_token {} from {}", token.id, sender);
            store.replace_token_data(token, relay)?;
        }
        Notification::TokenTempPositionChanged { token_id, position } => {
            if reconciler.should_apply(&token_id) {
                store.set_token_temp_position(&token_id, position.0, position.1, relay)?;
            } else {
                debug!("Dropped temp position for dragged token {}", token_id);
            }
        }
        Notification::PageChanged { players_page } => {
            store.apply_players_page(players_page)?;
        }
        Notification::VeilsUpdated { page_id, veils } => {
            store.replace_veils(page_id, veils)?;
        }
        Notification::PlayerChat { message } => {
            if relay {
                store.add_chat_message(message, true);
            } else {
                warn!("Ignoring player_chat from {}: not the master", sender);
            }
        }
        Notification::NewChat { message } => {
            store.add_chat_message(message, false);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::fixtures::two_page_campaign;
    use crate::store::Role;

    fn master() -> Store {
        Store::new(two_page_campaign(), Role::Master)
    }

    fn alice() -> Store {
        Store::new(two_page_campaign(), Role::Player("Alice".to_string()))
    }

    fn alice_addr() -> SocketAddr {
        "192.168.1.20:2216".parse().unwrap()
    }

    fn master_addr() -> SocketAddr {
        "192.168.1.10:2214".parse().unwrap()
    }

    /// Carries every pending event of `from` over to `to`, as the wire would.
    fn deliver(from: &mut Store, sender: SocketAddr, to: &mut Store, reconciler: &Reconciler) {
        for event in from.take_events() {
            let notification = notification_for(&event, from).unwrap();
            apply(notification, sender, to, reconciler).unwrap();
        }
    }

    #[test]
    fn test_players_page_reaches_replica() {
        let mut master = master();
        let mut player = alice();
        player.apply_players_page(1).unwrap();

        master.set_players_page(0).unwrap();
        deliver(&mut master, master_addr(), &mut player, &Reconciler::new());

        assert_eq!(player.campaign().players_page(), 0);
        assert!(!player.has_pending_events());
    }

    #[test]
    fn test_hi_registers_player_on_master() {
        let mut master = master();
        apply(
            Notification::Hi {
                player: "Alice".to_string(),
            },
            alice_addr(),
            &mut master,
            &Reconciler::new(),
        )
        .unwrap();

        assert_eq!(master.registry().addresses(), vec![alice_addr()]);
        assert_eq!(master.registry().get(&alice_addr()).unwrap().name, "Alice");
    }

    #[test]
    fn test_hi_is_ignored_by_players() {
        let mut player = alice();
        let hi = Notification::Hi {
            player: "Bob".to_string(),
        };
        apply(hi, alice_addr(), &mut player, &Reconciler::new()).unwrap();
        assert!(player.registry().is_empty());
    }

    #[test]
    fn test_player_drag_is_applied_and_relayed_by_master() {
        let mut player = alice();
        let mut master = master();

        player.set_token_temp_position("tok1", 1.0, 1.0, true).unwrap();
        let events = player.take_events();
        assert_eq!(events.len(), 1);
        let notification = notification_for(&events[0], &player).unwrap();
        assert_eq!(
            notification,
            Notification::TokenTempPositionChanged {
                token_id: "tok1".to_string(),
                position: (1.0, 1.0),
            }
        );

        apply(notification, alice_addr(), &mut master, &Reconciler::new()).unwrap();
        assert_eq!(master.token("tok1").unwrap().temp_position(), (1.0, 1.0));

        // The master raises its own event so the change is relayed.
        assert!(matches!(
            master.take_events().as_slice(),
            [Event::TokenTempPositionChanged { .. }]
        ));
    }

    #[test]
    fn test_dragged_token_ignores_inbound_temp_position() {
        let mut player = alice();
        let mut reconciler = Reconciler::new();
        reconciler.begin_drag("tok1");
        player.set_token_temp_position("tok1", 3.0, 3.0, false).unwrap();

        let echo = Notification::TokenTempPositionChanged {
            token_id: "tok1".to_string(),
            position: (2.0, 2.0),
        };
        apply(echo, master_addr(), &mut player, &reconciler).unwrap();
        assert_eq!(player.token("tok1").unwrap().temp_position(), (3.0, 3.0));

        let other = Notification::TokenTempPositionChanged {
            token_id: "tok2".to_string(),
            position: (8.0, 8.0),
        };
        apply(other, master_addr(), &mut player, &reconciler).unwrap();
        assert_eq!(player.token("tok2").unwrap().temp_position(), (8.0, 8.0));
    }

    #[test]
    fn test_veil_toggle_replicates_full_list() {
        let mut master = master();
        let mut player = alice();

        master.toggle_veil(1, 5.0, 5.0).unwrap();
        let events = master.take_events();
        match notification_for(&events[0], &master).unwrap() {
            Notification::VeilsUpdated { page_id, veils } => {
                assert_eq!(page_id, 1);
                assert_eq!(veils.len(), 1);
                assert!(!veils[0].covered);
                apply(
                    Notification::VeilsUpdated { page_id, veils },
                    master_addr(),
                    &mut player,
                    &Reconciler::new(),
                )
                .unwrap();
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!player.campaign().pages()[1].veils()[0].covered);
    }

    #[test]
    fn test_update_token_is_idempotent_on_replica() {
        let mut master = master();
        let mut player = alice();

        master.set_token_position("tok1", 7.0, 1.0, true).unwrap();
        let events = master.take_events();
        let notification = notification_for(&events[0], &master).unwrap();

        apply(notification.clone(), master_addr(), &mut player, &Reconciler::new()).unwrap();
        let once = player.campaign().to_data();
        apply(notification, master_addr(), &mut player, &Reconciler::new()).unwrap();

        assert_eq!(player.campaign().to_data(), once);
        assert_eq!(player.token("tok1").unwrap().position(), (7.0, 1.0));
        assert!(!player.has_pending_events());
    }

    #[test]
    fn test_player_chat_is_rebroadcast_as_new_chat() {
        let mut master = master();
        let mut player = alice();

        let line = ChatEntry::new(Some("Alice".to_string()), "I open the door");
        apply(player_chat(line), alice_addr(), &mut master, &Reconciler::new()).unwrap();
        assert_eq!(master.campaign().chat().len(), 1);

        deliver(&mut master, master_addr(), &mut player, &Reconciler::new());
        assert_eq!(player.campaign().chat().len(), 1);
        assert_eq!(player.campaign().chat()[0].speaker(), "Alice");
    }

    #[test]
    fn test_event_for_skips_suppressed_previews() {
        let mut reconciler = Reconciler::new();
        let preview = Notification::TokenTempPositionChanged {
            token_id: "tok1".to_string(),
            position: (1.0, 1.0),
        };
        assert!(event_for(&preview, &reconciler).is_some());

        reconciler.begin_drag("tok1");
        assert!(event_for(&preview, &reconciler).is_none());
        assert!(event_for(&player_chat(ChatEntry::new(None, "x")), &reconciler).is_none());
    }

    #[test]
    fn test_inbound_unknown_token_is_an_error() {
        let mut player = alice();
        let result = apply(
            Notification::TokenTempPositionChanged {
                token_id: "ghost".to_string(),
                position: (0.0, 0.0),
            },
            master_addr(),
            &mut player,
            &Reconciler::new(),
        );
        assert_eq!(result, Err(StoreError::UnknownToken("ghost".to_string())));
    }
}
