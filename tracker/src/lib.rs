//! Bootstrap coordinator. Admits players, hands the first connector the
//! primary role and the second the backup role, returns the configuration
//! and roster to every connector, and records role changes reported by the
//! servers. Gameplay itself never goes through here.

use log::{debug, error, info};
use shared::codec::{read_frame, write_frame};
use shared::error::GameError;
use shared::protocol::{Request, Response};
use shared::{Player, Role};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

struct Roster {
    players: Vec<Player>,
    /// Latched once the initial primary/backup pair has been handed out;
    /// later connectors start roleless even if the roster shrank.
    initialized: bool,
}

pub struct Tracker {
    n: u32,
    k: u32,
    roster: Mutex<Roster>,
}

impl Tracker {
    pub fn new(n: u32, k: u32) -> Self {
        Self {
            n,
            k,
            roster: Mutex::new(Roster {
                players: Vec::new(),
                initialized: false,
            }),
        }
    }

    /// Admits a player and returns the session configuration plus the full
    /// roster including the requester. Runs under the roster lock so role
    /// assignment stays unambiguous under concurrent connects.
    pub fn connect(&self, mut player: Player) -> (u32, u32, Vec<Player>) {
        let mut roster = self.roster.lock().unwrap();
        if !roster.initialized {
            if roster.players.is_empty() {
                player.role = Some(Role::Primary);
            } else if roster.players.len() == 1 {
                player.role = Some(Role::Backup);
                roster.initialized = true;
            }
        }
        info!("player connected: {}", player.id);
        roster.players.push(player);
        (self.n, self.k, roster.players.clone())
    }

    /// Removes the named player; unknown ids are quietly ignored.
    pub fn disconnect(&self, player_id: &str) {
        let mut roster = self.roster.lock().unwrap();
        let before = roster.players.len();
        roster.players.retain(|p| p.id != player_id);
        if roster.players.len() < before {
            info!("player disconnected: {player_id}");
        }
    }

    /// Re-points the bookkeeping for `role` at `holder_id`: any previous
    /// holder loses the marker, including the case where nobody held it.
    pub fn update_server(&self, holder_id: &str, role: Role) {
        let mut roster = self.roster.lock().unwrap();
        for player in roster.players.iter_mut() {
            if player.role == Some(role) {
                player.role = None;
            }
        }
        if let Some(player) = roster.players.iter_mut().find(|p| p.id == holder_id) {
            player.role = Some(role);
            info!("{holder_id} recorded as {role}");
        }
    }

    pub fn roster(&self) -> Vec<Player> {
        self.roster.lock().unwrap().players.clone()
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::Connect { player } => {
                let (n, k, roster) = self.connect(player);
                Response::Provision { n, k, roster }
            }
            Request::Disconnect { player_id } => {
                self.disconnect(&player_id);
                Response::Ack
            }
            Request::UpdateServer { holder_id, role } => {
                self.update_server(&holder_id, role);
                Response::Ack
            }
            other => Response::Failed(format!("not a tracker request: {other:?}")),
        }
    }

    /// Accept loop, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let tracker = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = tracker.serve_connection(stream).await {
                            debug!("connection from {peer} ended with error: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("accept failed: {err}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<(), GameError> {
        let request = read_frame(&mut stream).await?;
        let response = self.handle(request);
        write_frame(&mut stream, &response).await
    }
}
