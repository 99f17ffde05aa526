//! # Seer shared library
//!
//! Everything the master and the players have in common: the campaign
//! document, the store that mutates it, the JSON-over-UDP notification
//! protocol and the session loop that ties them together.
//!
//! ## Replication model
//!
//! Every process holds a full copy of the campaign. Local changes are
//! applied immediately and announced; the master relays what players send
//! so that every replica converges. There is no sequencing and no
//! acknowledgement: a lost datagram stays lost until the same field is
//! written again.
//!
//! ## Modules
//!
//! - `campaign`: typed document records, validation on load, token attribute
//!   resolution
//! - `store`: queries and notifying mutations, raising [`store::Event`]s
//! - `protocol`: the closed catalog of wire methods
//! - `bus`: event → notification, and the receipt effect of each method
//! - `reconciler`: drops remote previews of the token being dragged here
//! - `registry`: players known to the master
//! - `transport`: UDP receiver and sender tasks
//! - `session`: the single loop owning the store
//! - `interaction`, `console`: local operator input
//! - `resources`: campaign directory on disk, asset cache on players

pub mod bus;
pub mod campaign;
pub mod console;
pub mod error;
pub mod interaction;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod resources;
pub mod session;
pub mod store;
pub mod transport;

pub use campaign::{Campaign, CampaignData, ChatEntry, TokenRecord, Veil};
pub use error::{CampaignError, ProtocolError, StoreError};
pub use interaction::LocalCommand;
pub use protocol::{Notification, Packet, HI_ID, MASTER_API_PORT, MAX_DATAGRAM, PLAYER_API_PORT, RESOURCE_PORT};
pub use session::{Session, SessionConfig, SessionMessage};
pub use store::{Event, Role, Store};
