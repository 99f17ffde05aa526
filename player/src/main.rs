use clap::Parser;
use log::info;
use player::network::{PlayerClient, PlayerConfig};
use shared::console::{self, ConsoleEcho};
use shared::{SessionConfig, SessionMessage, MASTER_API_PORT, PLAYER_API_PORT, RESOURCE_PORT};
use std::net::IpAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Joins a campaign run by a game master", long_about = None)]
struct Args {
    /// Master's IP address
    master: IpAddr,

    /// Player name, as listed in the campaign
    name: String,

    /// Local UDP port for notifications
    #[arg(long, default_value_t = PLAYER_API_PORT)]
    api_port: u16,

    /// Master's UDP port
    #[arg(long, default_value_t = MASTER_API_PORT)]
    master_api_port: u16,

    /// Master's HTTP port
    #[arg(long, default_value_t = RESOURCE_PORT)]
    resource_port: u16,

    /// Seconds between repeated `hi`s, which keep the master from expiring us
    #[arg(long, default_value = "10")]
    hi_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting player {}...", args.name);
    info!("Connecting to: {}", args.master);

    let config = PlayerConfig {
        master: args.master,
        name: args.name,
        api_port: args.api_port,
        master_api_port: args.master_api_port,
        resource_port: args.resource_port,
        session: SessionConfig {
            keepalive: Some(Duration::from_secs(args.hi_interval_secs.max(1))),
            ..SessionConfig::default()
        },
    };

    let mut client = PlayerClient::connect(config).await?;
    client.add_observer(Box::new(ConsoleEcho));
    println!("{}", console::HELP);

    let session_tx = client.sender();
    tokio::spawn(console::read_stdin(session_tx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, leaving the game");
            let _ = session_tx.send(SessionMessage::Shutdown);
        }
    });

    client.run().await?;

    Ok(())
}
