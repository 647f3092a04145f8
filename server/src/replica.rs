//! The primary/backup state machine.
//!
//! A process enters a role either at bootstrap (tracker assignment) or
//! through a `BecomeServer` callback. While primary it is the sole writer
//! of the game state; while backup it refreshes a local replica from the
//! primary and self-promotes the moment the primary stops answering.

use crate::game;
use crate::heartbeat::Heartbeat;
use crate::notifier::Notifier;
use log::{debug, info, warn};
use shared::error::GameError;
use shared::protocol::{MoveOutcome, Request, Response};
use shared::{rpc, Direction, GameState, GridPos, Player, Role};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Endpoints and timing shared by every remote call the server makes.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tracker_addr: SocketAddr,
    pub rpc_timeout: Duration,
}

pub struct GameServer {
    player_id: String,
    role: RwLock<Role>,
    state: RwLock<GameState>,
    config: ServerConfig,
    notifier: Notifier,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl GameServer {
    /// Takes ownership of a state snapshot in the given role. The owner is
    /// marked in the snapshot, and the initial treasure set is generated if
    /// the snapshot carries none.
    pub fn new(
        player_id: impl Into<String>,
        role: Role,
        mut state: GameState,
        config: ServerConfig,
        notifier: Notifier,
    ) -> Result<Arc<Self>, GameError> {
        let player_id = player_id.into();
        state.set_role(&player_id, role);
        if state.treasures.is_empty() {
            let k = state.k;
            game::generate_treasure(&mut state, k)?;
        }
        info!("{player_id} now serving as {role}");
        Ok(Arc::new(Self {
            player_id,
            role: RwLock::new(role),
            state: RwLock::new(state),
            config,
            notifier,
            heartbeat: Mutex::new(None),
        }))
    }

    pub async fn role(&self) -> Role {
        *self.role.read().await
    }

    pub async fn snapshot(&self) -> GameState {
        self.state.read().await.clone()
    }

    /// Starts the periodic liveness task for this role holder.
    pub async fn start_heartbeat(self: &Arc<Self>) {
        let server = Arc::clone(self);
        let heartbeat = Heartbeat::start(move || {
            let server = Arc::clone(&server);
            async move { server.heartbeat_tick().await }
        });
        *self.heartbeat.lock().await = Some(heartbeat);
    }

    /// Tears the role down. Returns only once the heartbeat task has
    /// exited, so no tick runs afterwards.
    pub async fn shutdown(&self) {
        if let Some(heartbeat) = self.heartbeat.lock().await.take() {
            heartbeat.stop().await;
        }
    }

    /// Answers the game-server side of the wire contract.
    pub async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Join { player } => self.join(player).await,
            Request::Move {
                player_id,
                direction,
                current_pos,
            } => self.do_move(&player_id, direction, current_pos).await,
            Request::Quit { player_id } => self.quit(&player_id).await,
            Request::Sync => Response::State(self.snapshot().await),
            Request::GenerateTreasure { count } => self.generate(count).await,
            other => Response::Failed(format!("not a game-server request: {other:?}")),
        }
    }

    async fn join(&self, player: Player) -> Response {
        if self.defer_to_primary().await {
            return Response::Deferred;
        }
        let mut state = self.state.write().await;
        match game::join_player(&mut state, player) {
            Ok(()) => Response::State(state.clone()),
            Err(err) => {
                warn!("join rejected: {err}");
                Response::Failed(err.to_string())
            }
        }
    }

    async fn do_move(&self, player_id: &str, direction: Direction, current_pos: GridPos) -> Response {
        if self.defer_to_primary().await {
            // The client is expected to retry at the primary; hand back the
            // freshly synced replica unchanged.
            return Response::MoveResult(MoveOutcome::Accepted(self.snapshot().await));
        }
        let mut state = self.state.write().await;
        Response::MoveResult(game::apply_move(&mut state, player_id, direction, current_pos))
    }

    async fn quit(&self, player_id: &str) -> Response {
        if self.defer_to_primary().await {
            return Response::Deferred;
        }
        let removed = self.state.write().await.remove_player(player_id);
        if removed.is_some() {
            info!("player {player_id} quit");
            self.notify_tracker_disconnect(player_id.to_string());
        }
        Response::Ack
    }

    async fn generate(&self, count: u32) -> Response {
        let mut state = self.state.write().await;
        match game::generate_treasure(&mut state, count) {
            Ok(()) => Response::Ack,
            Err(err) => Response::Failed(err.to_string()),
        }
    }

    /// Backup-side authority check, run before serving any mutation and on
    /// every backup heartbeat. A live primary keeps this replica passive:
    /// its snapshot is adopted wholesale and the caller defers. A dead
    /// primary triggers self-promotion, after which this server answers as
    /// the new authority. Returns true when the caller must defer.
    async fn defer_to_primary(&self) -> bool {
        if *self.role.read().await == Role::Primary {
            return false;
        }
        let primary = {
            let state = self.state.read().await;
            state
                .holder_of(Role::Primary)
                .filter(|p| p.id != self.player_id)
                .map(|p| (p.id.clone(), p.addr))
        };
        let Some((primary_id, primary_addr)) = primary else {
            // Nobody on record to defer to; serve with what we have.
            return false;
        };
        match rpc::call(primary_addr, &Request::Sync, self.config.rpc_timeout).await {
            Ok(Response::State(fresh)) => {
                *self.state.write().await = fresh;
                true
            }
            Ok(other) => {
                warn!("unexpected sync answer from primary {primary_id}: {other:?}");
                true
            }
            Err(err) => {
                warn!("primary {primary_id} unreachable ({err}), taking over");
                self.promote(&primary_id).await;
                false
            }
        }
    }

    /// Backup becomes primary: flip the role, mark it in the local
    /// snapshot, drop the dead primary's record and report both changes.
    async fn promote(&self, dead_primary_id: &str) {
        {
            let mut role = self.role.write().await;
            if *role == Role::Primary {
                return;
            }
            *role = Role::Primary;
        }
        {
            let mut state = self.state.write().await;
            state.remove_player(dead_primary_id);
            state.set_role(&self.player_id, Role::Primary);
        }
        info!("{} promoted to primary, {dead_primary_id} removed", self.player_id);
        self.notify_tracker_disconnect(dead_primary_id.to_string());
        self.report_role(Role::Primary);
    }

    pub async fn heartbeat_tick(&self) {
        match *self.role.read().await {
            Role::Primary => {
                self.ensure_backup().await;
                self.scan_liveness().await;
            }
            Role::Backup => {
                let _ = self.defer_to_primary().await;
            }
        }
    }

    /// Primary-side: hand the backup role to a roleless player when the
    /// slot is empty and someone is available to fill it.
    async fn ensure_backup(&self) {
        let candidate = {
            let state = self.state.read().await;
            if state.players.len() < 2 || state.holder_of(Role::Backup).is_some() {
                return;
            }
            state.roleless_player().map(|p| (p.id.clone(), p.addr))
        };
        let Some((candidate_id, candidate_addr)) = candidate else {
            return;
        };
        let snapshot = {
            let mut state = self.state.write().await;
            state.set_role(&candidate_id, Role::Backup);
            state.clone()
        };
        let request = Request::BecomeServer {
            role: Role::Backup,
            state: snapshot,
        };
        match rpc::call(candidate_addr, &request, self.config.rpc_timeout).await {
            Ok(Response::Ack) => {
                info!("{candidate_id} promoted to backup");
                self.broadcast_server_changed(Role::Backup, candidate_id, candidate_addr)
                    .await;
            }
            Ok(other) => {
                warn!("{candidate_id} declined the backup role: {other:?}");
                self.revert_role(&candidate_id).await;
            }
            Err(err) => {
                warn!("could not hand the backup role to {candidate_id}: {err}");
                self.revert_role(&candidate_id).await;
            }
        }
    }

    // Roll the marker back so the next tick can pick again.
    async fn revert_role(&self, id: &str) {
        if let Some(player) = self.state.write().await.player_mut(id) {
            player.role = None;
        }
    }

    /// Primary-side: ping every other player; whoever does not answer is
    /// removed from the game and reported to the tracker.
    async fn scan_liveness(&self) {
        let peers: Vec<(String, SocketAddr)> = {
            let state = self.state.read().await;
            state
                .players
                .values()
                .filter(|p| p.role != Some(Role::Primary))
                .map(|p| (p.id.clone(), p.addr))
                .collect()
        };
        for (peer_id, peer_addr) in peers {
            if rpc::call(peer_addr, &Request::DoubleCheck, self.config.rpc_timeout)
                .await
                .is_ok()
            {
                continue;
            }
            warn!("lost contact with {peer_id}, removing from the game");
            self.state.write().await.remove_player(&peer_id);
            self.notify_tracker_disconnect(peer_id);
        }
    }

    /// Tells every connected player who now holds `role`.
    async fn broadcast_server_changed(&self, role: Role, holder_id: String, holder_addr: SocketAddr) {
        let peers: Vec<(String, SocketAddr)> = {
            let state = self.state.read().await;
            state
                .players
                .values()
                .map(|p| (p.id.clone(), p.addr))
                .collect()
        };
        let deadline = self.config.rpc_timeout;
        for (peer_id, peer_addr) in peers {
            let request = Request::ServerChanged {
                role,
                holder_id: holder_id.clone(),
                addr: holder_addr,
            };
            self.notifier.submit(async move {
                if let Err(err) = rpc::call(peer_addr, &request, deadline).await {
                    debug!("server-change notice to {peer_id} failed: {err}");
                }
            });
        }
    }

    fn notify_tracker_disconnect(&self, player_id: String) {
        let tracker = self.config.tracker_addr;
        let deadline = self.config.rpc_timeout;
        self.notifier.submit(async move {
            let request = Request::Disconnect {
                player_id: player_id.clone(),
            };
            if let Err(err) = rpc::call(tracker, &request, deadline).await {
                warn!("could not report disconnect of {player_id} to tracker: {err}");
            }
        });
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

#[cfg(test)]
mod tests {
    use super::*;
    use shared::codec::{read_frame, write_frame};
    use shared::GridPos;
    use tokio::net::TcpListener;

    fn test_config(tracker_addr: SocketAddr) -> ServerConfig {
        ServerConfig {
            tracker_addr,
            rpc_timeout: Duration::from_millis(200),
        }
    }

    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr
    }

    fn seeded_state(n: u32, k: u32, ids: &[&str]) -> GameState {
        let mut state = GameState::new(n, k);
        for (i, id) in ids.iter().enumerate() {
            let mut player = Player::new(*id, "127.0.0.1:1".parse().unwrap());
            player.pos = GridPos::new(i as i32, 0);
            state.insert_player(player);
        }
        state
    }

    #[tokio::test]
    async fn test_construction_marks_role_and_seeds_treasures() {
        let tracker = dead_addr().await;
        let state = seeded_state(5, 3, &["a", "b"]);
        let server =
            GameServer::new("a", Role::Primary, state, test_config(tracker), Notifier::new())
                .unwrap();

        let snapshot = server.snapshot().await;
        assert_eq!(snapshot.player("a").unwrap().role, Some(Role::Primary));
        assert_eq!(snapshot.treasures.len(), 3);
        for treasure in &snapshot.treasures {
            assert!(!snapshot.occupied(*treasure));
        }
        assert_eq!(server.role().await, Role::Primary);
    }

    #[tokio::test]
    async fn test_primary_serves_join_and_move() {
        let tracker = dead_addr().await;
        let state = seeded_state(5, 2, &["a"]);
        let server =
            GameServer::new("a", Role::Primary, state, test_config(tracker), Notifier::new())
                .unwrap();

        let joined = server
            .handle(Request::Join {
                player: Player::new("b", "127.0.0.1:1".parse().unwrap()),
            })
            .await;
        let state = match joined {
            Response::State(state) => state,
            other => panic!("join not accepted: {other:?}"),
        };
        assert!(state.player("b").is_some());
        assert_eq!(state.treasures.len(), 2);

        let pos = state.player("b").unwrap().pos;
        let moved = server
            .handle(Request::Move {
                player_id: "b".to_string(),
                direction: Direction::Refresh,
                current_pos: pos,
            })
            .await;
        assert!(matches!(
            moved,
            Response::MoveResult(MoveOutcome::Accepted(_))
        ));
    }

    #[tokio::test]
    async fn test_primary_quit_removes_the_player() {
        let tracker = dead_addr().await;
        let state = seeded_state(5, 0, &["a", "b"]);
        let server =
            GameServer::new("a", Role::Primary, state, test_config(tracker), Notifier::new())
                .unwrap();

        let response = server
            .handle(Request::Quit {
                player_id: "b".to_string(),
            })
            .await;
        assert!(matches!(response, Response::Ack));
        assert!(server.snapshot().await.player("b").is_none());
    }

    #[tokio::test]
    async fn test_backup_defers_while_primary_answers() {
        let tracker = dead_addr().await;

        // Fake primary that answers sync with a recognizable snapshot.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary_addr = listener.local_addr().unwrap();
        let mut canned = seeded_state(5, 0, &["a", "b"]);
        canned.set_role("a", Role::Primary);
        canned.treasures.insert(GridPos::new(4, 4));
        let served = canned.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let _: Request = read_frame(&mut stream).await.unwrap();
                write_frame(&mut stream, &Response::State(served.clone()))
                    .await
                    .unwrap();
            }
        });

        let mut state = seeded_state(5, 0, &["a", "b"]);
        state.set_role("a", Role::Primary);
        state.player_mut("a").unwrap().addr = primary_addr;
        let server =
            GameServer::new("b", Role::Backup, state, test_config(tracker), Notifier::new())
                .unwrap();

        let response = server
            .handle(Request::Move {
                player_id: "b".to_string(),
                direction: Direction::East,
                current_pos: GridPos::new(1, 0),
            })
            .await;
        // The move is a no-op: the backup hands back the primary's snapshot.
        match response {
            Response::MoveResult(MoveOutcome::Accepted(state)) => {
                assert!(state.has_treasure(GridPos::new(4, 4)));
                assert_eq!(state.player("b").unwrap().pos, GridPos::new(1, 0));
            }
            other => panic!("expected deferred refresh, got {other:?}"),
        }
        assert_eq!(server.role().await, Role::Backup);

        let join = server
            .handle(Request::Join {
                player: Player::new("c", "127.0.0.1:1".parse().unwrap()),
            })
            .await;
        assert!(matches!(join, Response::Deferred));
    }

    #[tokio::test]
    async fn test_backup_promotes_when_primary_is_dead() {
        let tracker = dead_addr().await;
        let primary_addr = dead_addr().await;

        let mut state = seeded_state(5, 1, &["a", "b"]);
        state.set_role("a", Role::Primary);
        state.player_mut("a").unwrap().addr = primary_addr;
        let server =
            GameServer::new("b", Role::Backup, state, test_config(tracker), Notifier::new())
                .unwrap();

        let response = server
            .handle(Request::Move {
                player_id: "b".to_string(),
                direction: Direction::East,
                current_pos: GridPos::new(1, 0),
            })
            .await;

        // The dead primary was detected, the backup took over and served
        // the move itself.
        assert!(matches!(
            response,
            Response::MoveResult(MoveOutcome::Accepted(_))
        ));
        assert_eq!(server.role().await, Role::Primary);

        let snapshot = server.snapshot().await;
        assert!(snapshot.player("a").is_none());
        assert_eq!(snapshot.holder_of(Role::Primary).unwrap().id, "b");
    }

    #[tokio::test]
    async fn test_backup_heartbeat_adopts_the_primary_snapshot() {
        let tracker = dead_addr().await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let primary_addr = listener.local_addr().unwrap();
        let mut fresh = seeded_state(5, 0, &["a", "b"]);
        fresh.set_role("a", Role::Primary);
        fresh.player_mut("b").unwrap().score = 9;
        let served = fresh.clone();
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(_) => break,
                };
                let _: Request = read_frame(&mut stream).await.unwrap();
                write_frame(&mut stream, &Response::State(served.clone()))
                    .await
                    .unwrap();
            }
        });

        let mut state = seeded_state(5, 0, &["a", "b"]);
        state.set_role("a", Role::Primary);
        state.player_mut("a").unwrap().addr = primary_addr;
        let server =
            GameServer::new("b", Role::Backup, state, test_config(tracker), Notifier::new())
                .unwrap();

        server.heartbeat_tick().await;

        assert_eq!(server.snapshot().await.player("b").unwrap().score, 9);
        assert_eq!(server.role().await, Role::Backup);
    }

    #[tokio::test]
    async fn test_primary_tick_removes_unreachable_players() {
        let tracker = dead_addr().await;
        let gone = dead_addr().await;

        let mut state = seeded_state(5, 0, &["a", "b"]);
        state.set_role("a", Role::Primary);
        state.set_role("b", Role::Backup);
        state.player_mut("b").unwrap().addr = gone;
        let server =
            GameServer::new("a", Role::Primary, state, test_config(tracker), Notifier::new())
                .unwrap();

        server.heartbeat_tick().await;

        assert!(server.snapshot().await.player("b").is_none());
    }

    #[tokio::test]
    async fn test_failed_backup_handoff_reverts_the_marker() {
        let tracker = dead_addr().await;
        let unreachable = dead_addr().await;

        let mut state = seeded_state(5, 0, &["a", "c"]);
        state.set_role("a", Role::Primary);
        state.player_mut("c").unwrap().addr = unreachable;
        let server =
            GameServer::new("a", Role::Primary, state, test_config(tracker), Notifier::new())
                .unwrap();

        server.ensure_backup().await;

        // The handoff could not land, so nobody is marked backup.
        assert!(server.snapshot().await.holder_of(Role::Backup).is_none());
    }
}
