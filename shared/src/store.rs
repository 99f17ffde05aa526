//! Queries and mutations over the local campaign copy
//!
//! Every mutation that is told to notify queues an [`Event`]. The session
//! drains the queue after each unit of work and turns the events into wire
//! notifications. Mutations applied on behalf of a remote peer pass
//! `notify = false` (or use the `apply_*` variants) so they are not echoed.

use crate::campaign::{Campaign, ChatEntry, Page, Position, TokenId, TokenRecord, TokenView, Veil};
use crate::error::StoreError;
use crate::registry::PlayerRegistry;
use chrono::Utc;
use log::{debug, info};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Which side of the protocol this process is on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    Player(String),
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    /// The operator's player name; `None` for the master.
    pub fn player_name(&self) -> Option<&str> {
        match self {
            Role::Master => None,
            Role::Player(name) => Some(name.as_str()),
        }
    }
}

/// Local change events, one per notifying mutation
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TokenUpdated(TokenId),
    TokenTempPositionChanged {
        token_id: TokenId,
        position: Position,
    },
    PageChanged(usize),
    VeilsUpdated {
        page_id: usize,
        veils: Vec<Veil>,
    },
    NewChat(ChatEntry),
}

pub struct Store {
    campaign: Campaign,
    role: Role,
    registry: PlayerRegistry,
    pending: VecDeque<Event>,
}

impl Store {
    pub fn new(campaign: Campaign, role: Role) -> Self {
        Self {
            campaign,
            role,
            registry: PlayerRegistry::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn into_campaign(self) -> Campaign {
        self.campaign
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn is_master(&self) -> bool {
        self.role.is_master()
    }

    pub fn registry(&self) -> &PlayerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PlayerRegistry {
        &mut self.registry
    }

    /// Drains the events raised since the last call, oldest first.
    pub fn take_events(&mut self) -> Vec<Event> {
        self.pending.drain(..).collect()
    }

    pub fn has_pending_events(&self) -> bool {
        !self.pending.is_empty()
    }

    fn raise(&mut self, event: Event) {
        debug!("Raised {:?}", event);
        self.pending.push_back(event);
    }

    fn page(&self, index: usize) -> Result<&Page, StoreError> {
        let len = self.campaign.pages.len();
        self.campaign
            .pages
            .get(index)
            .ok_or(StoreError::PageOutOfRange { index, len })
    }

    fn check_page(&self, index: usize) -> Result<(), StoreError> {
        self.page(index).map(|_| ())
    }

    /// The page this operator looks at: `master_page` for the master,
    /// `players_page` for everyone else.
    pub fn current_page_index(&self) -> usize {
        if self.is_master() {
            self.campaign.master_page
        } else {
            self.campaign.players_page
        }
    }

    pub fn current_page(&self) -> &Page {
        // Both cursors are kept in range by every mutator.
        &self.campaign.pages[self.current_page_index()]
    }

    pub fn token(&self, id: &str) -> Result<TokenView<'_>, StoreError> {
        self.campaign
            .token_view(id)
            .ok_or_else(|| StoreError::UnknownToken(id.to_string()))
    }

    /// First token (not tile) on `page`, in page order, whose footprint
    /// contains the point.
    pub fn find_token(&self, page: usize, x: f64, y: f64) -> Result<Option<TokenView<'_>>, StoreError> {
        let page = self.page(page)?;
        Ok(page
            .tokens()
            .iter()
            .map(|token| self.campaign.view(token))
            .find(|view| view.is_token() && view.contains(x, y)))
    }

    /// Commits a token's position and clears its preview.
    ///
    /// With `notify` the change is queued as [`Event::TokenUpdated`], which
    /// travels as a full `update_token`.
    pub fn set_token_position(&mut self, id: &str, x: f64, y: f64, notify: bool) -> Result<(), StoreError> {
        let token = self
            .campaign
            .token_mut(id)
            .ok_or_else(|| StoreError::UnknownToken(id.to_string()))?;
        token.set_position((x, y));
        if notify {
            self.raise(Event::TokenUpdated(id.to_string()));
        }
        Ok(())
    }

    /// Moves a token's preview without touching the persisted position.
    ///
    /// Used while dragging; with `notify` every step is announced as
    /// `token_temp_position_changed`.
    pub fn set_token_temp_position(&mut self, id: &str, x: f64, y: f64, notify: bool) -> Result<(), StoreError> {
        let token = self
            .campaign
            .token_mut(id)
            .ok_or_else(|| StoreError::UnknownToken(id.to_string()))?;
        token.set_temp_position((x, y));
        if notify {
            self.raise(Event::TokenTempPositionChanged {
                token_id: id.to_string(),
                position: (x, y),
            });
        }
        Ok(())
    }

    /// Commits the preview position, optionally snapped to the unit grid.
    pub fn commit_temp_position(&mut self, id: &str, align: bool) -> Result<(), StoreError> {
        let (mut x, mut y) = self.token(id)?.temp_position();
        if align {
            x = x.round();
            y = y.round();
        }
        self.set_token_position(id, x, y, true)
    }

    /// Overwrites a token's editable fields and drops any preview position.
    pub fn replace_token_data(&mut self, record: TokenRecord, notify: bool) -> Result<(), StoreError> {
        if self.campaign.token_location(&record.id).is_none() {
            return Err(StoreError::UnknownToken(record.id));
        }
        let fragment_id = self
            .campaign
            .fragment_for(&record)
            .map_err(|e| StoreError::InvalidToken {
                id: record.id.clone(),
                reason: e.to_string(),
            })?;
        let id = record.id.clone();
        self.campaign.replace_token_record(record, fragment_id);
        if notify {
            self.raise(Event::TokenUpdated(id));
        }
        Ok(())
    }

    /// Flips every veil on `page` that strictly contains the point.
    ///
    /// Returns how many veils flipped. The full veil list is announced even
    /// when none did.
    pub fn toggle_veil(&mut self, page: usize, x: f64, y: f64) -> Result<usize, StoreError> {
        self.check_page(page)?;
        let veils = &mut self.campaign.pages[page].veils;
        let mut flipped = 0;
        for veil in veils.iter_mut().filter(|v| v.strictly_contains(x, y)) {
            veil.covered = !veil.covered;
            flipped += 1;
        }
        let veils = veils.clone();
        self.raise(Event::VeilsUpdated { page_id: page, veils });
        Ok(flipped)
    }

    /// Replaces a page's veils with a peer's list, without notifying.
    pub fn replace_veils(&mut self, page: usize, veils: Vec<Veil>) -> Result<(), StoreError> {
        self.check_page(page)?;
        self.campaign.pages[page].veils = veils;
        Ok(())
    }

    /// Shows page `index` to the players. Master only.
    pub fn set_players_page(&mut self, index: usize) -> Result<(), StoreError> {
        if !self.is_master() {
            return Err(StoreError::NotMaster("change the players' page"));
        }
        self.check_page(index)?;
        self.campaign.players_page = index;
        info!("Players now see page {}", index);
        self.raise(Event::PageChanged(index));
        Ok(())
    }

    /// Adopts the players' page announced by the master, without notifying.
    pub fn apply_players_page(&mut self, index: usize) -> Result<(), StoreError> {
        self.check_page(index)?;
        self.campaign.players_page = index;
        Ok(())
    }

    /// Advances the master's own page; players and the last page are no-ops.
    pub fn next_page(&mut self) {
        if self.is_master() && self.campaign.master_page + 1 < self.campaign.pages.len() {
            self.campaign.master_page += 1;
        }
    }

    /// Steps the master's own page back; players and page 0 are no-ops.
    pub fn prev_page(&mut self) {
        if self.is_master() && self.campaign.master_page > 0 {
            self.campaign.master_page -= 1;
        }
    }

    /// Appends to the chat log, stamping the current time when missing.
    pub fn add_chat_message(&mut self, mut entry: ChatEntry, notify: bool) {
        if entry.time.is_none() {
            entry.time = Some(Utc::now());
        }
        info!("{}: {}", entry.speaker(), entry.text);
        self.campaign.chat.push(entry.clone());
        if notify {
            self.raise(Event::NewChat(entry));
        }
    }

    /// Adds or refreshes a player in the broadcast registry.
    pub fn register_player(&mut self, addr: SocketAddr, name: &str) {
        self.registry.add(addr, name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::fixtures::two_page_campaign;
    use assert_approx_eq::assert_approx_eq;

    fn master() -> Store {
        Store::new(two_page_campaign(), Role::Master)
    }

    fn alice() -> Store {
        Store::new(two_page_campaign(), Role::Player("Alice".to_string()))
    }

    #[test]
    fn test_temp_then_commit_without_align() {
        let mut store = master();
        store.set_token_temp_position("tok1", 2.25, -1.5, true).unwrap();
        store.commit_temp_position("tok1", false).unwrap();

        let view = store.token("tok1").unwrap();
        assert_eq!(view.position(), (2.25, -1.5));
        assert_eq!(view.temp_position(), view.position());
        assert!(!view.token.has_temp_position());
    }

    #[test]
    fn test_commit_with_align_rounds_to_grid() {
        let mut store = master();
        store.set_token_temp_position("tok1", 2.6, 3.4, false).unwrap();
        store.commit_temp_position("tok1", true).unwrap();

        let (x, y) = store.token("tok1").unwrap().position();
        assert_approx_eq!(x, 3.0);
        assert_approx_eq!(y, 3.0);
    }

    #[test]
    fn test_events_follow_notify_flag() {
        let mut store = master();
        store.set_token_temp_position("tok1", 1.0, 1.0, false).unwrap();
        store.set_token_position("tok1", 1.0, 1.0, false).unwrap();
        assert!(!store.has_pending_events());

        store.set_token_temp_position("tok1", 1.0, 1.0, true).unwrap();
        store.commit_temp_position("tok1", false).unwrap();
        assert_eq!(
            store.take_events(),
            vec![
                Event::TokenTempPositionChanged {
                    token_id: "tok1".to_string(),
                    position: (1.0, 1.0),
                },
                Event::TokenUpdated("tok1".to_string()),
            ]
        );
        assert!(store.take_events().is_empty());
    }

    #[test]
    fn test_unknown_token_is_an_error() {
        let mut store = master();
        assert_eq!(
            store.set_token_position("nope", 0.0, 0.0, true),
            Err(StoreError::UnknownToken("nope".to_string()))
        );
    }

    #[test]
    fn test_find_token_skips_tiles_and_respects_order() {
        let store = master();
        // The background tile covers (0.5, 0.5) too, but only tokens are hit.
        let hit = store.find_token(0, 0.5, 0.5).unwrap().unwrap();
        assert_eq!(hit.id(), "tok1");

        // Inclusive upper edge of a 1x2 token at (5, 5).
        assert_eq!(store.find_token(0, 6.0, 7.0).unwrap().unwrap().id(), "tok2");
        assert!(store.find_token(0, 3.0, 3.0).unwrap().is_none());
        assert!(store.find_token(5, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_replace_token_data_clears_temp_and_is_idempotent() {
        let mut store = master();
        store.set_token_temp_position("tok1", 9.0, 9.0, false).unwrap();

        let mut record = store.token("tok1").unwrap().token.record().clone();
        record.position = Some((4.0, 2.0));
        store.replace_token_data(record.clone(), false).unwrap();
        let once = store.campaign().to_data();
        assert_eq!(store.token("tok1").unwrap().temp_position(), (4.0, 2.0));

        store.replace_token_data(record, false).unwrap();
        assert_eq!(store.campaign().to_data(), once);
    }

    #[test]
    fn test_replace_token_data_rejects_bad_fragment() {
        let mut store = master();
        let mut record = store.token("tok1").unwrap().token.record().clone();
        record.fragment_id = Some("nope".to_string());
        assert!(matches!(
            store.replace_token_data(record, true),
            Err(StoreError::InvalidToken { .. })
        ));
    }

    #[test]
    fn test_toggle_veil_flips_and_announces() {
        let mut store = master();
        assert_eq!(store.toggle_veil(1, 5.0, 5.0).unwrap(), 1);
        assert!(!store.campaign().pages()[1].veils()[0].covered);

        match store.take_events().as_slice() {
            [Event::VeilsUpdated { page_id: 1, veils }] => assert!(!veils[0].covered),
            other => panic!("unexpected events {:?}", other),
        }

        // On the border nothing flips.
        assert_eq!(store.toggle_veil(1, 4.0, 5.0).unwrap(), 0);
    }

    #[test]
    fn test_players_page_is_master_only_and_bounded() {
        let mut store = master();
        for i in 0..store.campaign().pages().len() {
            store.set_players_page(i).unwrap();
            assert!(store.campaign().players_page() < store.campaign().pages().len());
        }
        assert_eq!(
            store.set_players_page(2),
            Err(StoreError::PageOutOfRange { index: 2, len: 2 })
        );
        assert_eq!(store.campaign().players_page(), 1);

        let mut player = alice();
        assert!(matches!(player.set_players_page(1), Err(StoreError::NotMaster(_))));
    }

    #[test]
    fn test_page_navigation_is_master_only() {
        let mut store = master();
        store.prev_page();
        assert_eq!(store.campaign().master_page(), 0);
        store.next_page();
        store.next_page();
        assert_eq!(store.campaign().master_page(), 1);
        assert_eq!(store.current_page_index(), 1);

        let mut player = alice();
        player.next_page();
        assert_eq!(player.campaign().master_page(), 0);
        player.apply_players_page(1).unwrap();
        assert_eq!(player.current_page_index(), 1);
    }

    #[test]
    fn test_add_chat_message_stamps_time() {
        let mut store = master();
        store.add_chat_message(ChatEntry::new(None, "Roll initiative"), true);
        let entry = &store.campaign().chat()[0];
        assert!(entry.time.is_some());
        assert_eq!(entry.speaker(), "GM");
        assert!(matches!(store.take_events().as_slice(), [Event::NewChat(_)]));
    }

    #[test]
    fn test_register_player() {
        let mut store = master();
        let addr: SocketAddr = "[::1]:2216".parse().unwrap();
        store.register_player(addr, "Alice");
        assert!(store.registry().contains(&addr));
    }
}
