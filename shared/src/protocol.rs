//! Wire contract spoken by every process in the game. The tracker, the
//! replicated game servers and the client callback surface all answer the
//! same framed request/response protocol, so a single pair of enums covers
//! the three contracts.

use crate::{Direction, GameState, GridPos, Player, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // Tracker contract.
    Connect { player: Player },
    Disconnect { player_id: String },
    UpdateServer { holder_id: String, role: Role },

    // Game-server contract, answered by whichever process holds the
    // addressed role.
    Join { player: Player },
    Move {
        player_id: String,
        direction: Direction,
        current_pos: GridPos,
    },
    Quit { player_id: String },
    Sync,
    GenerateTreasure { count: u32 },

    // Client callback contract, answered by every player process.
    BecomeServer { role: Role, state: GameState },
    DoubleCheck,
    ServerChanged {
        role: Role,
        holder_id: String,
        addr: SocketAddr,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Tracker bootstrap payload: grid size, treasure target and the
    /// roster including the requester.
    Provision {
        n: u32,
        k: u32,
        roster: Vec<Player>,
    },
    /// A full authoritative snapshot (join, sync).
    State(GameState),
    /// Outcome of a move, accepted or not.
    MoveResult(MoveOutcome),
    /// A backup declining to serve while the primary is alive; the caller
    /// should retry against the primary.
    Deferred,
    Ack,
    Failed(String),
}

/// Explicit move result. A rejection still carries the unchanged state so
/// callers that only want a refresh can treat both variants alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MoveOutcome {
    Accepted(GameState),
    Rejected {
        reason: RejectReason,
        state: GameState,
    },
}

impl MoveOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted(_))
    }

    pub fn state(&self) -> &GameState {
        match self {
            MoveOutcome::Accepted(state) => state,
            MoveOutcome::Rejected { state, .. } => state,
        }
    }

    pub fn into_state(self) -> GameState {
        match self {
            MoveOutcome::Accepted(state) => state,
            MoveOutcome::Rejected { state, .. } => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    OutOfBounds,
    Occupied,
    UnknownPlayer,
    GridFull,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::OutOfBounds => write!(f, "target cell is outside the grid"),
            RejectReason::Occupied => write!(f, "target cell is occupied"),
            RejectReason::UnknownPlayer => write!(f, "mover is not in the game"),
            RejectReason::GridFull => write!(f, "no free cell left on the grid"),
        }
    }
}
