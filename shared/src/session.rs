//! The single loop that owns a process's campaign copy
//!
//! Network tasks, the console and the bulk channel all talk to the loop
//! through [`SessionMessage`]s. Each message is one unit of work; afterwards
//! every event the store raised is turned into a notification, routed to
//! the peers and handed to the registered observers.

use crate::bus::{self, EventObserver};
use crate::campaign::{Campaign, CampaignData, ChatEntry};
use crate::error::StoreError;
use crate::interaction::{Interaction, LocalCommand};
use crate::protocol::{Notification, Packet, HI_ID};
use crate::reconciler::Reconciler;
use crate::store::{Event, Role, Store};
use crate::transport::Transport;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

/// Housekeeping ticks between periodic stats lines
const STATS_EVERY: u64 = 60;
/// How often a player repeats `hi` unless configured otherwise
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// Inputs of the session loop
#[derive(Debug)]
pub enum SessionMessage {
    DatagramReceived {
        notification: Notification,
        addr: SocketAddr,
    },
    Local(LocalCommand),
    /// The bulk channel wants the current document
    SnapshotRequested {
        reply: oneshot::Sender<CampaignData>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick: Duration,
    /// Forget players silent for this long; `None` keeps them forever
    pub player_timeout: Option<Duration>,
    /// Players repeat `hi` this often so an expiring master keeps them.
    /// Checked on the tick, so it is only as precise as `tick`.
    pub keepalive: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            player_timeout: None,
            keepalive: Some(DEFAULT_KEEPALIVE),
        }
    }
}

pub struct Session<T: Transport> {
    store: Store,
    reconciler: Reconciler,
    interaction: Interaction,
    transport: T,
    master_addr: Option<SocketAddr>,
    observers: Vec<Box<dyn EventObserver>>,
    /// When this player last said `hi`
    announced: Option<Instant>,
}

impl<T: Transport> Session<T> {
    /// The authoritative side: broadcasts to every registered player.
    pub fn master(campaign: Campaign, transport: T) -> Self {
        Self::new(Store::new(campaign, Role::Master), transport, None)
    }

    /// A replica that only ever talks to `master_addr`.
    pub fn player(campaign: Campaign, name: impl Into<String>, master_addr: SocketAddr, transport: T) -> Self {
        Self::new(
            Store::new(campaign, Role::Player(name.into())),
            transport,
            Some(master_addr),
        )
    }

    fn new(store: Store, transport: T, master_addr: Option<SocketAddr>) -> Self {
        Self {
            store,
            reconciler: Reconciler::new(),
            interaction: Interaction::new(),
            transport,
            master_addr,
            observers: Vec::new(),
            announced: None,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn snapshot(&self) -> CampaignData {
        self.store.campaign().to_data()
    }

    /// Applies a notification from a peer. Failures are logged, never fatal.
    ///
    /// Observers hear about silently applied changes here; changes the
    /// master relays reach them through [`Session::flush_events`].
    pub fn handle_notification(&mut self, notification: Notification, addr: SocketAddr) {
        self.store.registry_mut().touch(&addr);
        let method = notification.method();
        let observed = bus::event_for(&notification, &self.reconciler);
        match bus::apply(notification, addr, &mut self.store, &self.reconciler) {
            Ok(()) if !self.store.has_pending_events() => {
                if let Some(event) = observed {
                    self.observe(&event);
                }
            }
            Ok(()) => {}
            Err(e) => warn!("Discarding {} from {}: {}", method, addr, e),
        }
    }

    /// Applies something the local operator did.
    pub fn handle_local(&mut self, command: LocalCommand) -> Result<(), StoreError> {
        debug!("Local {:?}", command);
        match command {
            LocalCommand::Press { x, y } => {
                self.interaction.press(&self.store, &mut self.reconciler, x, y)?;
            }
            LocalCommand::DragTo { x, y } => self.interaction.drag_to(&mut self.store, x, y)?,
            LocalCommand::Release { align } => {
                self.interaction
                    .release(&mut self.store, &mut self.reconciler, align)?;
            }
            LocalCommand::ToggleVeil { x, y } => {
                self.interaction.press_veil(&mut self.store, x, y)?;
            }
            LocalCommand::NextPage => self.store.next_page(),
            LocalCommand::PrevPage => self.store.prev_page(),
            LocalCommand::ShowPageToPlayers => {
                let page = self.store.campaign().master_page();
                self.store.set_players_page(page)?;
            }
            LocalCommand::Chat(text) => match self.store.role().player_name().map(str::to_string) {
                None => self.store.add_chat_message(ChatEntry::new(None, text), true),
                Some(name) => {
                    // Shows up locally once the master's new_chat comes back.
                    self.route(&bus::player_chat(ChatEntry::new(Some(name), text)));
                }
            },
        }
        Ok(())
    }

    /// Says `hi` to the master so it keeps broadcasting to this address.
    /// Does nothing on the master.
    pub fn announce(&mut self) {
        let (Some(master), Some(name)) = (self.master_addr, self.store.role().player_name()) else {
            return;
        };
        debug!("Saying hi to {} as {}", master, name);
        let hi = Packet::with_id(
            HI_ID,
            Notification::Hi {
                player: name.to_string(),
            },
        );
        self.transport.send_packet(&hi, master);
        self.announced = Some(Instant::now());
    }

    /// Sends out and reports every event raised since the last flush.
    pub fn flush_events(&mut self) -> Result<(), StoreError> {
        for event in self.store.take_events() {
            let notification = bus::notification_for(&event, &self.store)?;
            self.route(&notification);
            self.observe(&event);
        }
        Ok(())
    }

    fn observe(&mut self, event: &Event) {
        for observer in self.observers.iter_mut() {
            observer.on_event(event, &self.store);
        }
    }

    fn route(&mut self, notification: &Notification) {
        match self.master_addr {
            Some(master) => self.transport.send(notification, master),
            None => {
                let players = self.store.registry().addresses();
                self.transport.broadcast(notification, &players);
            }
        }
    }

    fn housekeeping(&mut self, config: &SessionConfig, ticks: u64) {
        if let Some(every) = config.keepalive {
            if self.announced.is_some_and(|at| at.elapsed() >= every) {
                self.announce();
            }
        }

        if let Some(timeout) = config.player_timeout {
            for player in self.store.registry_mut().sweep(timeout) {
                info!("Player {} at {} timed out", player.name, player.addr);
            }
        }

        if ticks % STATS_EVERY == 0 && !self.store.registry().is_empty() {
            debug!(
                "Tick {}: {} players, {} chat lines, players on page {}",
                ticks,
                self.store.registry().len(),
                self.store.campaign().chat().len(),
                self.store.campaign().players_page()
            );
        }
    }

    /// Runs until `Shutdown` or until every sender is gone, then hands back
    /// the campaign for persisting. A player says `hi` first.
    ///
    /// Local commands that break a store invariant end the loop with that
    /// error. A player attempting a master-only action is only warned about.
    pub async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<SessionMessage>,
        config: SessionConfig,
    ) -> Result<Campaign, StoreError> {
        let mut tick_interval = interval(config.tick);
        let mut ticks: u64 = 0;

        info!(
            "Session started as {}",
            match self.store.role() {
                Role::Master => "master".to_string(),
                Role::Player(name) => format!("player {}", name),
            }
        );
        self.announce();

        loop {
            tokio::select! {
                message = rx.recv() => {
                    match message {
                        Some(SessionMessage::DatagramReceived { notification, addr }) => {
                            self.handle_notification(notification, addr);
                        }
                        Some(SessionMessage::Local(command)) => match self.handle_local(command) {
                            Ok(()) => {}
                            Err(StoreError::NotMaster(action)) => warn!("Only the master may {}", action),
                            Err(e) => return Err(e),
                        },
                        Some(SessionMessage::SnapshotRequested { reply }) => {
                            if reply.send(self.snapshot()).is_err() {
                                debug!("Snapshot requester went away");
                            }
                        }
                        Some(SessionMessage::Shutdown) | None => {
                            info!("Session shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    ticks += 1;
                    self.housekeeping(&config, ticks);
                },
            }

            self.flush_events()?;
        }

        Ok(self.store.into_campaign())
    }
}
