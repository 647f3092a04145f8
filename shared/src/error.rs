use std::net::SocketAddr;
use thiserror::Error;

/// Failures shared across the tracker, the game servers and the client
/// agent. Remote-call errors (`Io`, `Timeout`) are what the failure
/// detectors interpret as "that peer is down".
#[derive(Debug, Error)]
pub enum GameError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] bincode::Error),

    #[error("frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    #[error("remote call to {0} timed out")]
    Timeout(SocketAddr),

    #[error("no free cell left on the grid")]
    GridFull,

    #[error("player {0} is not in the game state")]
    MissingPlayer(String),

    #[error("no reachable server ({0})")]
    NoServer(String),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl GameError {
    /// True for errors that mean the peer could not be reached at all, as
    /// opposed to a peer answering something we did not expect.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, GameError::Io(_) | GameError::Timeout(_))
    }
}
