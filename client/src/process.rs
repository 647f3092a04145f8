//! Process-level wiring: one listener, one agent, one lifecycle. Used by
//! the binary and by the integration tests, which run several "processes"
//! inside one runtime.

use crate::agent::ClientAgent;
use log::info;
use server::replica::ServerConfig;
use shared::error::GameError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ProcessConfig {
    pub tracker_addr: SocketAddr,
    pub listen_addr: SocketAddr,
    pub player_id: String,
    pub rpc_timeout: Duration,
}

pub struct GameProcess {
    agent: Arc<ClientAgent>,
    listener_task: JoinHandle<()>,
}

impl GameProcess {
    /// Binds the listener, registers with the tracker and joins the game.
    pub async fn launch(config: ProcessConfig) -> Result<Self, GameError> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let listen_addr = listener.local_addr()?;
        info!("{} listening on {listen_addr}", config.player_id);

        let agent = ClientAgent::new(
            config.player_id,
            listen_addr,
            ServerConfig {
                tracker_addr: config.tracker_addr,
                rpc_timeout: config.rpc_timeout,
            },
        );
        let listener_task = tokio::spawn(Arc::clone(&agent).serve(listener));

        agent.bootstrap().await?;
        agent.join_game().await?;

        Ok(Self {
            agent,
            listener_task,
        })
    }

    pub fn agent(&self) -> &Arc<ClientAgent> {
        &self.agent
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.agent.listen_addr()
    }

    /// Graceful exit: quit the game, then stop serving.
    pub async fn shutdown(self) {
        self.agent.quit().await;
        self.listener_task.abort();
    }

    /// Hard kill for failure injection: stop answering and tear down any
    /// role without telling anyone, as if the process died.
    pub async fn kill(self) {
        self.listener_task.abort();
        self.agent.halt().await;
    }
}
