//! Player network layer: fetches the campaign, announces itself to the
//! master and runs the replica session

use crate::fetch::ResourceClient;
use log::{error, info};
use shared::bus::EventObserver;
use shared::resources::AssetCache;
use shared::transport::{spawn_receiver, spawn_sender, UdpTransport};
use shared::{Campaign, Session, SessionConfig, SessionMessage};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub master: IpAddr,
    pub name: String,
    pub api_port: u16,
    pub master_api_port: u16,
    pub resource_port: u16,
    pub session: SessionConfig,
}

pub struct PlayerClient {
    name: String,
    master_addr: SocketAddr,
    campaign: Campaign,
    assets: AssetCache,
    socket: Arc<UdpSocket>,
    config: SessionConfig,
    observers: Vec<Box<dyn EventObserver>>,

    session_tx: mpsc::UnboundedSender<SessionMessage>,
    session_rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl PlayerClient {
    /// Fetches the campaign over HTTP and binds the notification socket.
    pub async fn connect(config: PlayerConfig) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        info!("Fetching campaign from {}", config.master);
        let resources = ResourceClient::new(config.master, config.resource_port)?;
        let (campaign, assets) = resources.campaign().await?;

        if campaign.player(&config.name).is_none() {
            info!("{} has no default character in this campaign", config.name);
        }

        let unspecified = match config.master {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let socket = Arc::new(UdpSocket::bind(SocketAddr::new(unspecified, config.api_port)).await?);
        info!("Player listening for notifications on {}", socket.local_addr()?);

        let (session_tx, session_rx) = mpsc::unbounded_channel();

        Ok(PlayerClient {
            name: config.name,
            master_addr: SocketAddr::new(config.master, config.master_api_port),
            campaign,
            assets,
            socket,
            config: config.session,
            observers: Vec::new(),
            session_tx,
            session_rx,
        })
    }

    pub fn sender(&self) -> mpsc::UnboundedSender<SessionMessage> {
        self.session_tx.clone()
    }

    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    /// Images fetched at startup, for whatever draws the map.
    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn campaign(&self) -> &Campaign {
        &self.campaign
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the session until shutdown. The session says `hi` on start and
    /// repeats it every `keepalive` so the master never expires this player.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let PlayerClient {
            name,
            master_addr,
            campaign,
            socket,
            config,
            observers,
            session_tx,
            session_rx,
            ..
        } = self;

        let receiver = spawn_receiver(Arc::clone(&socket), session_tx);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let sender = spawn_sender(socket, outbox_rx);

        info!("Joining {} as {}", master_addr, name);

        let mut session = Session::player(campaign, name, master_addr, UdpTransport::new(outbox_tx));
        for observer in observers {
            session.add_observer(observer);
        }

        let result = session.run(session_rx, config).await;

        receiver.abort();
        if let Err(e) = sender.await {
            error!("Sender task failed: {}", e);
        }

        result?;
        Ok(())
    }
}
