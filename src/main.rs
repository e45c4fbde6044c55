use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use nearby::NearbyDb;
use nearby::api::{start_http_api, ApiState};
use nearby::gate::JobGate;
use nearby::manager::SystemProfile;
use nearby::select::Strategy;
use nearby::server::NearbyServer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Append-only position log
    #[clap(long, default_value = "positions.csv")]
    data: PathBuf,

    /// Binary protocol address
    #[clap(long, default_value = "127.0.0.1:9100")]
    addr: String,

    #[clap(long, default_value = "9180")]
    http_port: u16,

    /// Top-K selection: `bounded` or `full-sort`
    #[clap(long, default_value = "bounded")]
    strategy: Strategy,

    /// Days a user must wait before recording a new position (0 disables)
    #[clap(long, default_value = "0")]
    cooldown_days: u64,
}

fn main() {
    tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,nearby=info")))
    .with_target(false)
    .with_level(true)
    .init();

    let args = Args::parse();
    let profile = SystemProfile::detect();

    info!("--- [Nearby Resource Manager] ---");
    info!("Detected Cores: {}", profile.logical_cores);
    info!("Worker Threads: {}", profile.worker_threads);
    info!("Durability Mode: {}", if profile.strict_durability { "Strict (Fsync)" } else { "High Throughput (Async)" });

    let runtime = match tokio::runtime::Builder::new_multi_thread()
    .worker_threads(profile.worker_threads)
    .enable_all()
    .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };
    runtime.block_on(async_main(args, profile));
}

async fn async_main(args: Args, profile: SystemProfile) {
    info!("Opening position log at {}", args.data.display());
    let db = Arc::new(NearbyDb::new(&args.data, args.strategy, profile.strict_durability));
    info!("Selection strategy: {}", db.strategy());

    let cooldown = match args.cooldown_days {
        0 => None,
        days => Some(Duration::from_secs(days * 24 * 60 * 60)),
    };

    let state = ApiState { db: db.clone(), cooldown, export_gate: JobGate::new() };
    let http_port = args.http_port;
    tokio::spawn(async move {
        start_http_api(state, http_port).await;
    });

    let addr = args.addr.clone();
    tokio::spawn(async move {
        let server = NearbyServer::new(db, cooldown);
        if let Err(e) = server.run(&addr).await {
            error!("protocol server stopped: {}", e);
        }
    });

    info!("Node is Ready.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down.");
}
