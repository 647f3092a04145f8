use clap::Parser;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracker::Tracker;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    port: u16,

    /// Grid dimension N
    n: u32,

    /// Treasure target count K
    k: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    if args.n < 2 || args.k as u64 + 1 > (args.n as u64 * args.n as u64) {
        return Err(format!(
            "invalid configuration: need N >= 2 and K <= N*N - 1, got N={} K={}",
            args.n, args.k
        )
        .into());
    }

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(
        "tracker listening on port {} (N={}, K={})",
        args.port, args.n, args.k
    );

    Arc::new(Tracker::new(args.n, args.k)).serve(listener).await;

    Ok(())
}
