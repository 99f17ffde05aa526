//! Known player addresses on the master
//!
//! Players announce themselves with `hi`; from then on every broadcast goes
//! to their address. Nothing removes a player unless an expiry timeout is
//! configured, in which case players that have sent nothing for that long are
//! swept out on the session tick.

use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A player that has said `hi`
#[derive(Debug, Clone)]
pub struct PlayerSession {
    /// Name given in the handshake
    pub name: String,
    pub addr: SocketAddr,
    /// Last time any datagram arrived from this address
    pub last_seen: Instant,
}

impl PlayerSession {
    pub fn new(name: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            last_seen: Instant::now(),
        }
    }

    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

#[derive(Debug, Default)]
pub struct PlayerRegistry {
    sessions: HashMap<SocketAddr, PlayerSession>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr`. A repeated `hi` from the same address renames and
    /// refreshes the existing entry. Returns true for a new address.
    pub fn add(&mut self, addr: SocketAddr, name: impl Into<String>) -> bool {
        let name = name.into();
        match self.sessions.get_mut(&addr) {
            Some(session) => {
                session.name = name;
                session.last_seen = Instant::now();
                false
            }
            None => {
                info!("Player {} joined from {}", name, addr);
                self.sessions.insert(addr, PlayerSession::new(name, addr));
                true
            }
        }
    }

    /// Drops `addr` from broadcasts until it says `hi` again.
    pub fn remove(&mut self, addr: &SocketAddr) -> Option<PlayerSession> {
        let removed = self.sessions.remove(addr);
        if let Some(session) = &removed {
            info!("Player {} at {} removed", session.name, addr);
        }
        removed
    }

    /// Refreshes the liveness timestamp of a known address.
    pub fn touch(&mut self, addr: &SocketAddr) {
        if let Some(session) = self.sessions.get_mut(addr) {
            session.last_seen = Instant::now();
        }
    }

    /// Removes players silent for longer than `timeout`; returns them.
    pub fn sweep(&mut self, timeout: Duration) -> Vec<PlayerSession> {
        let expired: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|s| s.is_timed_out(timeout))
            .map(|s| s.addr)
            .collect();

        expired.iter().filter_map(|addr| self.remove(addr)).collect()
    }

    /// The player registered at `addr`, if any.
    pub fn get(&self, addr: &SocketAddr) -> Option<&PlayerSession> {
        self.sessions.get(addr)
    }

    /// Whether `addr` currently receives broadcasts.
    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.sessions.contains_key(addr)
    }

    /// Every registered address, in no particular order.
    ///
    /// Collected into a vector so the caller can broadcast while the
    /// registry stays borrowed elsewhere.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        self.sessions.keys().copied().collect()
    }

    /// Number of registered players.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
