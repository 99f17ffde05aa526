use clap::Parser;
use log::info;
use master::network::{MasterConfig, MasterServer};
use shared::console::{self, ConsoleEcho};
use shared::resources::CampaignDir;
use shared::{SessionConfig, SessionMessage, MASTER_API_PORT, RESOURCE_PORT};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs a campaign and shares it with the players", long_about = None)]
struct Args {
    /// Campaign directory containing data.json and its images
    campaign_dir: PathBuf,

    /// Address to bind both channels to. The default `::` also accepts IPv4
    /// players where the system allows dual-stack sockets
    #[arg(short = 'H', long, default_value = "::")]
    host: String,

    /// UDP port for notifications
    #[arg(long, default_value_t = MASTER_API_PORT)]
    api_port: u16,

    /// HTTP port players fetch the campaign from
    #[arg(long, default_value_t = RESOURCE_PORT)]
    resource_port: u16,

    /// Forget players that have been silent this long (never, if unset).
    /// Players repeat `hi` every 10 seconds by default, so keep this well above
    #[arg(long)]
    player_timeout_secs: Option<u64>,

    /// Housekeeping interval in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting master for {}", args.campaign_dir.display());
    let config = MasterConfig {
        host: args.host,
        api_port: args.api_port,
        resource_port: args.resource_port,
        session: SessionConfig {
            tick: Duration::from_millis(args.tick_ms.max(1)),
            player_timeout: args.player_timeout_secs.map(Duration::from_secs),
            keepalive: None,
        },
    };

    let mut server = MasterServer::new(CampaignDir::new(args.campaign_dir), config).await?;
    server.add_observer(Box::new(ConsoleEcho));
    info!("Players fetch the campaign from port {}", server.resource_addr()?.port());
    println!("{}", console::HELP);

    let session_tx = server.sender();
    tokio::spawn(console::read_stdin(session_tx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = session_tx.send(SessionMessage::Shutdown);
        }
    });

    server.run().await?;

    Ok(())
}
