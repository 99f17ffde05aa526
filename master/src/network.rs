//! Master network layer: binds the sockets, wires the tasks to the session
//! loop and persists the campaign when the loop ends

use crate::resources::{self, ResourceServer};
use log::{error, info};
use shared::bus::EventObserver;
use shared::resources::CampaignDir;
use shared::transport::{spawn_receiver, spawn_sender, UdpTransport};
use shared::{Campaign, Session, SessionConfig, SessionMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

/// Where the master listens
#[derive(Debug, Clone)]
pub struct MasterConfig {
    pub host: String,
    pub api_port: u16,
    pub resource_port: u16,
    pub session: SessionConfig,
}

/// Authoritative side of a game
pub struct MasterServer {
    campaign_dir: CampaignDir,
    campaign: Campaign,
    socket: Arc<UdpSocket>,
    listener: TcpListener,
    config: SessionConfig,
    observers: Vec<Box<dyn EventObserver>>,

    session_tx: mpsc::UnboundedSender<SessionMessage>,
    session_rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl MasterServer {
    /// Loads and validates the campaign, then binds both channels.
    pub async fn new(
        campaign_dir: CampaignDir,
        config: MasterConfig,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let data = campaign_dir.load()?;
        let campaign = Campaign::load(data, &campaign_dir)?;
        info!(
            "Campaign has {} pages, {} fragments, {} characters",
            campaign.pages().len(),
            campaign.fragments().len(),
            campaign.characters().len()
        );

        let socket = Arc::new(UdpSocket::bind((config.host.as_str(), config.api_port)).await?);
        info!("Master listening for notifications on {}", socket.local_addr()?);
        let listener = TcpListener::bind((config.host.as_str(), config.resource_port)).await?;

        let (session_tx, session_rx) = mpsc::unbounded_channel();

        Ok(MasterServer {
            campaign_dir,
            campaign,
            socket,
            listener,
            config: config.session,
            observers: Vec::new(),
            session_tx,
            session_rx,
        })
    }

    /// A handle for the console and signal handlers.
    pub fn sender(&self) -> mpsc::UnboundedSender<SessionMessage> {
        self.session_tx.clone()
    }

    pub fn add_observer(&mut self, observer: Box<dyn EventObserver>) {
        self.observers.push(observer);
    }

    pub fn api_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn resource_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the session until shutdown, then saves the campaign.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let MasterServer {
            campaign_dir,
            campaign,
            socket,
            listener,
            config,
            observers,
            session_tx,
            session_rx,
        } = self;

        let receiver = spawn_receiver(Arc::clone(&socket), session_tx.clone());
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        let sender = spawn_sender(socket, outbox_rx);

        let resource_server = Arc::new(ResourceServer::new(campaign_dir.root(), session_tx.clone()));
        let http = tokio::spawn(async move {
            if let Err(e) = resources::serve(listener, resource_server).await {
                error!("Resource server stopped: {}", e);
            }
        });
        drop(session_tx);

        let mut session = Session::master(campaign, UdpTransport::new(outbox_tx));
        for observer in observers {
            session.add_observer(observer);
        }

        info!("Master started successfully");
        let result = session.run(session_rx, config).await;

        receiver.abort();
        http.abort();
        // The transport is gone with the session, so the sender drains and stops.
        if let Err(e) = sender.await {
            error!("Sender task failed: {}", e);
        }

        let campaign = result?;
        campaign_dir.save(&campaign.to_data())?;
        Ok(())
    }
}
