//! # Seer master
//!
//! The game master's process. It owns the campaign directory, decides which
//! page the players see and relays every change a player makes to all the
//! others.
//!
//! ## Channels
//!
//! ### Notifications (UDP, port 2214)
//! Small JSON messages in both directions. Players register with `hi`;
//! from then on every change made here or relayed from another player is
//! sent to their address.
//!
//! ### Bulk resources (HTTP, port 2215)
//! `/data.json` returns the live document, every other path is a file under
//! the campaign directory. Players fetch both once at startup.
//!
//! ## Persistence
//! When the session ends the campaign is written back to `data.json`; the
//! previous file is kept under `backups/`.

pub mod network;
pub mod resources;
