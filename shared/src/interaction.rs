//! Pointer-level operations in map coordinates
//!
//! A front end translates its own input into [`LocalCommand`]s; the session
//! applies them through [`Interaction`], which tracks the drag in progress.

use crate::campaign::{Position, TokenId};
use crate::error::StoreError;
use crate::reconciler::Reconciler;
use crate::store::Store;
use log::debug;

/// Something the local operator did
#[derive(Debug, Clone, PartialEq)]
pub enum LocalCommand {
    Press { x: f64, y: f64 },
    DragTo { x: f64, y: f64 },
    Release { align: bool },
    ToggleVeil { x: f64, y: f64 },
    NextPage,
    PrevPage,
    /// Show the master's current page to the players
    ShowPageToPlayers,
    Chat(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Drag {
    token_id: TokenId,
    offset: Position,
}

#[derive(Debug, Default)]
pub struct Interaction {
    drag: Option<Drag>,
}

impl Interaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dragging(&self) -> Option<&str> {
        self.drag.as_ref().map(|d| d.token_id.as_str())
    }

    /// Starts dragging the token under the pointer if the operator controls it.
    pub fn press(
        &mut self,
        store: &Store,
        reconciler: &mut Reconciler,
        x: f64,
        y: f64,
    ) -> Result<Option<TokenId>, StoreError> {
        let page = store.current_page_index();
        let Some(view) = store.find_token(page, x, y)? else {
            return Ok(None);
        };
        if !view.controlled_by(store.role().player_name()) {
            debug!("{} is not ours to move", view.id());
            return Ok(None);
        }

        let (tx, ty) = view.position();
        let token_id = view.id().to_string();
        reconciler.begin_drag(token_id.clone());
        self.drag = Some(Drag {
            token_id: token_id.clone(),
            offset: (x - tx, y - ty),
        });
        Ok(Some(token_id))
    }

    /// Master only: flips the veils around the point on the current page.
    pub fn press_veil(&mut self, store: &mut Store, x: f64, y: f64) -> Result<usize, StoreError> {
        if !store.is_master() {
            return Err(StoreError::NotMaster("toggle veils"));
        }
        let page = store.current_page_index();
        store.toggle_veil(page, x, y)
    }

    pub fn drag_to(&mut self, store: &mut Store, x: f64, y: f64) -> Result<(), StoreError> {
        let Some(drag) = &self.drag else {
            return Ok(());
        };
        let (ox, oy) = drag.offset;
        store.set_token_temp_position(&drag.token_id, x - ox, y - oy, true)
    }

    pub fn release(&mut self, store: &mut Store, reconciler: &mut Reconciler, align: bool) -> Result<(), StoreError> {
        let Some(drag) = self.drag.take() else {
            return Ok(());
        };
        reconciler.end_drag();
        store.commit_temp_position(&drag.token_id, align)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::fixtures::two_page_campaign;
    use crate::store::{Event, Role};
    use assert_approx_eq::assert_approx_eq;

    fn player(name: &str) -> Store {
        Store::new(two_page_campaign(), Role::Player(name.to_string()))
    }

    #[test]
    fn test_drag_keeps_grab_offset() {
        let mut store = Store::new(two_page_campaign(), Role::Master);
        let mut reconciler = Reconciler::new();
        let mut interaction = Interaction::new();

        let grabbed = interaction.press(&store, &mut reconciler, 0.25, 0.5).unwrap();
        assert_eq!(grabbed.as_deref(), Some("tok1"));
        assert_eq!(reconciler.dragged(), Some("tok1"));

        interaction.drag_to(&mut store, 2.25, 1.5).unwrap();
        let (x, y) = store.token("tok1").unwrap().temp_position();
        assert_approx_eq!(x, 2.0);
        assert_approx_eq!(y, 1.0);

        interaction.release(&mut store, &mut reconciler, false).unwrap();
        assert_eq!(store.token("tok1").unwrap().position(), (2.0, 1.0));
        assert!(reconciler.dragged().is_none());
        assert!(interaction.dragging().is_none());

        assert!(matches!(
            store.take_events().as_slice(),
            [Event::TokenTempPositionChanged { .. }, Event::TokenUpdated(_)]
        ));
    }

    #[test]
    fn test_players_only_grab_their_own_tokens() {
        let mut reconciler = Reconciler::new();

        // tok2 belongs to Alice through its character; tok1 belongs to nobody.
        let alice = player("Alice");
        let mut interaction = Interaction::new();
        assert!(interaction.press(&alice, &mut reconciler, 0.5, 0.5).unwrap().is_none());
        assert_eq!(
            interaction.press(&alice, &mut reconciler, 5.5, 5.5).unwrap().as_deref(),
            Some("tok2")
        );

        let bob = player("Bob");
        let mut interaction = Interaction::new();
        let mut reconciler = Reconciler::new();
        assert!(interaction.press(&bob, &mut reconciler, 5.5, 5.5).unwrap().is_none());
        assert!(reconciler.dragged().is_none());
    }

    #[test]
    fn test_release_without_drag_is_noop() {
        let mut store = Store::new(two_page_campaign(), Role::Master);
        let mut reconciler = Reconciler::new();
        let mut interaction = Interaction::new();

        interaction.drag_to(&mut store, 1.0, 1.0).unwrap();
        interaction.release(&mut store, &mut reconciler, true).unwrap();
        assert!(!store.has_pending_events());
    }

    #[test]
    fn test_press_veil_uses_master_page() {
        let mut store = Store::new(two_page_campaign(), Role::Master);
        let mut interaction = Interaction::new();

        // Page 0 has no veils.
        assert_eq!(interaction.press_veil(&mut store, 5.0, 5.0).unwrap(), 0);
        store.next_page();
        assert_eq!(interaction.press_veil(&mut store, 5.0, 5.0).unwrap(), 1);

        let mut alice = player("Alice");
        assert!(matches!(
            interaction.press_veil(&mut alice, 5.0, 5.0),
            Err(StoreError::NotMaster(_))
        ));
    }
}
