//! # Seer player
//!
//! A player's process keeps a full replica of the master's campaign.
//!
//! ## Startup
//!
//! 1. Fetch `/data.json` and every image it references over HTTP (`fetch`).
//! 2. Validate the document against the fetched images.
//! 3. Bind the notification socket and send `hi` to the master (`network`).
//!
//! From then on the replica only changes through notifications from the
//! master and through the player's own drags. Chat lines typed here go to
//! the master first and appear once it broadcasts them back.
//!
//! The player can only move tokens that resolve to their own name.

pub mod fetch;
pub mod network;
