use clap::Parser;
use client::process::{GameProcess, ProcessConfig};
use log::{error, info};
use shared::Direction;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracker host
    tracker_host: String,

    /// Tracker port
    tracker_port: u16,

    /// Player identifier, unique within the game
    player_id: String,

    /// Address to listen on for peer calls
    #[arg(short, long, default_value = "127.0.0.1:0")]
    listen: String,

    /// Remote-call timeout in milliseconds
    #[arg(short, long, default_value = "1000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();
    let config = ProcessConfig {
        tracker_addr: format!("{}:{}", args.tracker_host, args.tracker_port).parse()?,
        listen_addr: args.listen.parse()?,
        player_id: args.player_id.clone(),
        rpc_timeout: Duration::from_millis(args.timeout_ms),
    };

    let process = GameProcess::launch(config).await?;
    info!(
        "{} joined; commands: 0 refresh, 1 west, 2 south, 3 east, 4 north, 9 quit",
        args.player_id
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let command = line.trim();
                if command.is_empty() {
                    continue;
                }
                if command == "9" {
                    break;
                }
                let Some(direction) = Direction::from_code(command) else {
                    info!("unknown command {command:?}");
                    continue;
                };
                match process.agent().submit_move(direction).await {
                    Ok(state) => {
                        for entry in state.scoreboard() {
                            info!("{entry}");
                        }
                    }
                    Err(err) => {
                        error!("no server reachable, leaving the game: {err}");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, quitting");
                break;
            }
        }
    }

    process.shutdown().await;
    Ok(())
}
