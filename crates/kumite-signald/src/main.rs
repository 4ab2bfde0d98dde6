use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use kumite_signald::{ServerConfig, net::bind_and_listen, run_server};

/// Kumite signaling daemon
#[derive(Parser, Debug)]
#[command(name = "kumite-signald")]
#[command(about = "Out-of-band signaling relay for kumite peer sessions", long_about = None)]
struct Args {
    /// TCP bind address
    #[arg(short, long, default_value = "0.0.0.0:5400")]
    bind: String,

    /// Drop connections that haven't sent anything for N seconds
    #[arg(long, default_value_t = 120)]
    idle_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: Level,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Network layer -> server loop events.
    let (tx, rx) = mpsc::channel(1024);

    let bind_addr: SocketAddr = args.bind.parse()?;
    tokio::spawn(async move {
        let _ = bind_and_listen(bind_addr, tx).await;
    });

    info!("signaling server started on {}", args.bind);

    let config = ServerConfig {
        idle_timeout: Duration::from_secs(args.idle_timeout_secs),
        ..Default::default()
    };
    run_server(rx, config).await
}
