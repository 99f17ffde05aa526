//! Echo suppression for the token the local operator is dragging
//!
//! While a drag is in progress the local preview position is authoritative
//! for this process. Inbound temp positions for that token would make it
//! jitter between the pointer and a slightly older remote value, so they are
//! dropped. Every other token is applied as received.

use crate::campaign::TokenId;
use log::debug;

#[derive(Debug, Default, Clone)]
pub struct Reconciler {
    dragged: Option<TokenId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_drag(&mut self, token_id: impl Into<TokenId>) {
        let token_id = token_id.into();
        debug!("Dragging {}", token_id);
        self.dragged = Some(token_id);
    }

    pub fn end_drag(&mut self) -> Option<TokenId> {
        self.dragged.take()
    }

    pub fn dragged(&self) -> Option<&str> {
        self.dragged.as_deref()
    }

    /// False only for a temp position aimed at the locally dragged token.
    pub fn should_apply(&self, token_id: &str) -> bool {
        self.dragged.as_deref() != Some(token_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_applies_everything() {
        let reconciler = Reconciler::new();
        assert!(reconciler.dragged().is_none());
        assert!(reconciler.should_apply("tok1"));
    }

    #[test]
    fn test_dragged_token_is_suppressed() {
        let mut reconciler = Reconciler::new();
        reconciler.begin_drag("tok1");
        assert!(!reconciler.should_apply("tok1"));
        assert!(reconciler.should_apply("tok2"));

        assert_eq!(reconciler.end_drag().as_deref(), Some("tok1"));
        assert!(reconciler.should_apply("tok1"));
        assert!(reconciler.end_drag().is_none());
    }
}
