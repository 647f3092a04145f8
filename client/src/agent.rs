//! The client agent running inside every player process.
//!
//! It caches the endpoints of the current primary and backup, submits
//! intents primary-first with a backup fallback, and answers the callback
//! contract: promotion into a server role, liveness pings and topology
//! change notices. When promoted it embeds a `GameServer` and dispatches
//! game-server requests to it.

use log::{debug, error, info, warn};
use server::notifier::Notifier;
use server::replica::{GameServer, ServerConfig};
use shared::error::GameError;
use shared::protocol::{Request, Response};
use shared::{codec, rpc, Direction, GameState, Player, Role, BACKUP_JOIN_DELAY};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time::sleep;

/// A role holder as cached by the agent: identity plus reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Default)]
struct Targets {
    primary: Option<Target>,
    backup: Option<Target>,
}

pub struct ClientAgent {
    player_id: String,
    listen_addr: SocketAddr,
    config: ServerConfig,
    notifier: Notifier,
    targets: RwLock<Targets>,
    state: RwLock<GameState>,
    game_server: RwLock<Option<Arc<GameServer>>>,
}

impl ClientAgent {
    pub fn new(
        player_id: impl Into<String>,
        listen_addr: SocketAddr,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            player_id: player_id.into(),
            listen_addr,
            config,
            notifier: Notifier::new(),
            targets: RwLock::new(Targets::default()),
            state: RwLock::new(GameState::new(0, 0)),
            game_server: RwLock::new(None),
        })
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub async fn snapshot(&self) -> GameState {
        self.state.read().await.clone()
    }

    pub async fn targets(&self) -> (Option<Target>, Option<Target>) {
        let targets = self.targets.read().await;
        (targets.primary.clone(), targets.backup.clone())
    }

    /// Registers with the tracker and seeds the local state and the cached
    /// targets from the provision.
    pub async fn bootstrap(&self) -> Result<(), GameError> {
        let me = Player::new(self.player_id.clone(), self.listen_addr);
        let request = Request::Connect { player: me };
        let response = rpc::call(self.config.tracker_addr, &request, self.config.rpc_timeout).await?;
        let Response::Provision { n, k, roster } = response else {
            return Err(GameError::UnexpectedResponse(format!("{response:?}")));
        };
        info!("bootstrapped: N={n} K={k}, {} player(s) known", roster.len());
        let mut state = GameState::new(n, k);
        for player in roster {
            state.insert_player(player);
        }
        self.adopt_state(state).await;
        Ok(())
    }

    /// Replaces the local state copy wholesale and re-derives the cached
    /// primary/backup targets from its role markers.
    pub async fn adopt_state(&self, state: GameState) {
        {
            let mut targets = self.targets.write().await;
            if let Some(primary) = state.holder_of(Role::Primary) {
                targets.primary = Some(Target {
                    id: primary.id.clone(),
                    addr: primary.addr,
                });
            }
            if let Some(backup) = state.holder_of(Role::Backup) {
                targets.backup = Some(Target {
                    id: backup.id.clone(),
                    addr: backup.addr,
                });
            }
        }
        *self.state.write().await = state;
    }

    /// Spins up the local replicated server in `role`, seeded with `state`,
    /// and re-announces the role to the tracker. Any previous server
    /// instance is torn down first.
    pub async fn start_server(&self, role: Role, state: GameState) -> Result<(), GameError> {
        if let Some(old) = self.game_server.write().await.take() {
            old.shutdown().await;
        }
        let server = GameServer::new(
            self.player_id.clone(),
            role,
            state,
            self.config.clone(),
            self.notifier.clone(),
        )?;
        server.start_heartbeat().await;
        self.report_role(role);
        self.adopt_state(server.snapshot().await).await;
        *self.game_server.write().await = Some(server);
        Ok(())
    }

    /// Registers this player with both role holders concurrently; whichever
    /// is actually authoritative accepts, the other defers. A player slated
    /// for a role by the bootstrap roster starts its own server before
    /// registering.
    pub async fn join_game(self: &Arc<Self>) -> Result<(), GameError> {
        let my_role = self
            .state
            .read()
            .await
            .player(&self.player_id)
            .and_then(|p| p.role);

        let primary_task = {
            let agent = Arc::clone(self);
            tokio::spawn(async move { agent.join_at(Role::Primary, my_role).await })
        };
        let backup_task = {
            let agent = Arc::clone(self);
            tokio::spawn(async move {
                sleep(BACKUP_JOIN_DELAY).await;
                agent.join_at(Role::Backup, my_role).await
            })
        };

        let mut accepted = false;
        let mut last_error = None;
        for task in [primary_task, backup_task] {
            match task.await {
                Ok(Ok(landed)) => accepted = accepted || landed,
                Ok(Err(err)) => {
                    debug!("join submission failed: {err}");
                    last_error = Some(err);
                }
                Err(err) => {
                    error!("join task panicked: {err}");
                }
            }
        }
        if accepted {
            Ok(())
        } else {
            Err(last_error.unwrap_or_else(|| GameError::NoServer("join".to_string())))
        }
    }

    /// One leg of the dual join. Returns true when this leg's server
    /// accepted the registration and handed back a state snapshot.
    async fn join_at(&self, role: Role, my_role: Option<Role>) -> Result<bool, GameError> {
        if my_role == Some(role) {
            let snapshot = self.state.read().await.clone();
            self.start_server(role, snapshot).await?;
        }
        let target = {
            let targets = self.targets.read().await;
            match role {
                Role::Primary => targets.primary.clone(),
                Role::Backup => targets.backup.clone(),
            }
        };
        let Some(target) = target else {
            return Err(GameError::NoServer(format!("no {role} to join")));
        };

        // Send our roster record so an existing role marker survives the
        // join; the server assigns the cell.
        let me = self
            .state
            .read()
            .await
            .player(&self.player_id)
            .cloned()
            .unwrap_or_else(|| Player::new(self.player_id.clone(), self.listen_addr));
        let request = Request::Join { player: me };
        match rpc::call(target.addr, &request, self.config.rpc_timeout).await? {
            Response::State(state) => {
                info!("join accepted by {} ({role})", target.id);
                self.adopt_state(state).await;
                Ok(true)
            }
            Response::Deferred => {
                debug!("join deferred by {} ({role})", target.id);
                Ok(false)
            }
            Response::Failed(message) => Err(GameError::UnexpectedResponse(message)),
            other => Err(GameError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Routes a move intent primary-first with a backup fallback. Both
    /// being unreachable is fatal for the session.
    pub async fn submit_move(&self, direction: Direction) -> Result<GameState, GameError> {
        let current_pos = self
            .state
            .read()
            .await
            .player(&self.player_id)
            .map(|p| p.pos)
            .ok_or_else(|| GameError::MissingPlayer(self.player_id.clone()))?;
        let request = Request::Move {
            player_id: self.player_id.clone(),
            direction,
            current_pos,
        };
        match self.call_with_fallback(&request).await? {
            Response::MoveResult(outcome) => {
                if !outcome.is_accepted() {
                    debug!("move not applied");
                }
                let state = outcome.into_state();
                self.adopt_state(state.clone()).await;
                Ok(state)
            }
            other => Err(GameError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Routes a quit intent primary-first with a backup fallback.
    pub async fn submit_quit(&self) -> Result<(), GameError> {
        let request = Request::Quit {
            player_id: self.player_id.clone(),
        };
        self.call_with_fallback(&request).await?;
        Ok(())
    }

    async fn call_with_fallback(&self, request: &Request) -> Result<Response, GameError> {
        let (primary, backup) = self.targets().await;
        if let Some(target) = primary {
            match rpc::call(target.addr, request, self.config.rpc_timeout).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!("primary {} failed ({err}), trying backup", target.id)
                }
            }
        }
        if let Some(target) = backup {
            match rpc::call(target.addr, request, self.config.rpc_timeout).await {
                Ok(response) => return Ok(response),
                Err(err) => warn!("backup {} failed too ({err})", target.id),
            }
        }
        Err(GameError::NoServer(self.player_id.clone()))
    }

    /// Serves one request arriving at this process's listener: callbacks
    /// are handled here, game-server operations go to the embedded server.
    pub async fn handle_request(&self, request: Request) -> Response {
        match request {
            Request::BecomeServer { role, state } => {
                info!("promoted to {role}");
                match self.start_server(role, state).await {
                    Ok(()) => Response::Ack,
                    Err(err) => {
                        error!("could not take the {role} role: {err}");
                        Response::Failed(err.to_string())
                    }
                }
            }
            Request::DoubleCheck => Response::Ack,
            Request::ServerChanged {
                role,
                holder_id,
                addr,
            } => {
                info!("{role} is now {holder_id}");
                let target = Target {
                    id: holder_id,
                    addr,
                };
                let mut targets = self.targets.write().await;
                match role {
                    Role::Primary => targets.primary = Some(target),
                    Role::Backup => targets.backup = Some(target),
                }
                Response::Ack
            }
            server_request @ (Request::Join { .. }
            | Request::Move { .. }
            | Request::Quit { .. }
            | Request::Sync
            | Request::GenerateTreasure { .. }) => {
                let server = self.game_server.read().await.clone();
                match server {
                    Some(server) => server.handle(server_request).await,
                    None => Response::Failed("no server role held by this process".to_string()),
                }
            }
            other => Response::Failed(format!("not a player-process request: {other:?}")),
        }
    }

    /// Accept loop for the process listener, one task per connection.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let agent = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = agent.serve_connection(stream).await {
                            debug!("connection from {peer} ended with error: {err}");
                        }
                    });
                }
                Err(err) => {
                    error!("accept failed: {err}");
                    sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    async fn serve_connection(&self, mut stream: TcpStream) -> Result<(), GameError> {
        let request = codec::read_frame(&mut stream).await?;
        let response = self.handle_request(request).await;
        codec::write_frame(&mut stream, &response).await
    }

    /// Graceful exit: quit the game, tear down any server role and tell the
    /// tracker we are gone.
    pub async fn quit(&self) {
        if let Err(err) = self.submit_quit().await {
            warn!("quit submission failed: {err}");
        }
        self.halt().await;
        let request = Request::Disconnect {
            player_id: self.player_id.clone(),
        };
        if let Err(err) = rpc::call(self.config.tracker_addr, &request, self.config.rpc_timeout).await
        {
            warn!("could not say goodbye to the tracker: {err}");
        }
    }

    /// Tears down any local server role without notifying anyone.
    pub async fn halt(&self) {
        if let Some(server) = self.game_server.write().await.take() {
            server.shutdown().await;
        }
    }

    fn report_role(&self, role: Role) {
        let tracker = self.config.tracker_addr;
        let deadline = self.config.rpc_timeout;
        let holder_id = self.player_id.clone();
        self.notifier.submit(async move {
            let request = Request::UpdateServer {
                holder_id: holder_id.clone(),
                role,
            };
            if let Err(err) = rpc::call(tracker, &request, deadline).await {
                warn!("could not report {holder_id} as {role} to tracker: {err}");
            }
        });
    }
}
