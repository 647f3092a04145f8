use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

pub mod codec;
pub mod error;
pub mod protocol;
pub mod rpc;

/// Interval between heartbeat ticks on a role holder.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);
/// Default deadline for a single remote call; overridable per process.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_millis(1000);
/// Random placement attempts before falling back to an exhaustive scan.
pub const PLACEMENT_RETRY_LIMIT: u32 = 1024;
/// Capacity of the fire-and-forget notification queue.
pub const NOTIFY_QUEUE_CAPACITY: usize = 50;
/// Head start given to the primary submission during a dual join.
pub const BACKUP_JOIN_DELAY: Duration = Duration::from_millis(10);

/// Server role a player process can hold. Idle players carry no role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Primary,
    Backup,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// A cell on the N x N grid. Signed so that a step off the low edge is
/// representable and can be rejected by bounds checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
}

impl GridPos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The cell one step in `direction`; `Refresh` stays in place.
    pub fn step(self, direction: Direction) -> Self {
        match direction {
            Direction::Refresh => self,
            Direction::West => Self::new(self.x - 1, self.y),
            Direction::South => Self::new(self.x, self.y + 1),
            Direction::East => Self::new(self.x + 1, self.y),
            Direction::North => Self::new(self.x, self.y - 1),
        }
    }
}

/// A move intent as entered by the player, wire codes "0" through "4".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Refresh,
    West,
    South,
    East,
    North,
}

impl Direction {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Direction::Refresh),
            "1" => Some(Direction::West),
            "2" => Some(Direction::South),
            "3" => Some(Direction::East),
            "4" => Some(Direction::North),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Direction::Refresh => "0",
            Direction::West => "1",
            Direction::South => "2",
            Direction::East => "3",
            Direction::North => "4",
        }
    }
}

/// One participant in the game. The `addr` field is the endpoint of the
/// player process's listener, so the roster doubles as the name-resolution
/// registry: knowing a player id is knowing where to call it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
    pub addr: SocketAddr,
    pub pos: GridPos,
    pub score: u32,
    pub role: Option<Role>,
}

impl Player {
    pub fn new(id: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            pos: GridPos::new(0, 0),
            score: 0,
            role: None,
        }
    }
}

/// The authoritative game model: grid dimension, treasure target and the
/// current player and treasure sets. Mutated only by whichever process is
/// currently primary; everyone else holds wholesale-replaced copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub n: u32,
    pub k: u32,
    pub players: HashMap<String, Player>,
    pub treasures: HashSet<GridPos>,
}

impl GameState {
    pub fn new(n: u32, k: u32) -> Self {
        Self {
            n,
            k,
            players: HashMap::new(),
            treasures: HashSet::new(),
        }
    }

    pub fn in_bounds(&self, pos: GridPos) -> bool {
        pos.x >= 0 && pos.y >= 0 && pos.x < self.n as i32 && pos.y < self.n as i32
    }

    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn player_mut(&mut self, id: &str) -> Option<&mut Player> {
        self.players.get_mut(id)
    }

    pub fn insert_player(&mut self, player: Player) {
        self.players.insert(player.id.clone(), player);
    }

    pub fn remove_player(&mut self, id: &str) -> Option<Player> {
        self.players.remove(id)
    }

    /// The current holder of `role`, if any.
    pub fn holder_of(&self, role: Role) -> Option<&Player> {
        self.players.values().find(|p| p.role == Some(role))
    }

    /// Any player currently holding no role.
    pub fn roleless_player(&self) -> Option<&Player> {
        self.players.values().find(|p| p.role.is_none())
    }

    /// Marks `id` as the holder of `role`, clearing any previous holder so
    /// the at-most-one-holder invariant is preserved.
    pub fn set_role(&mut self, id: &str, role: Role) {
        for player in self.players.values_mut() {
            if player.role == Some(role) {
                player.role = None;
            }
        }
        if let Some(player) = self.players.get_mut(id) {
            player.role = Some(role);
        }
    }

    pub fn endpoint_of(&self, id: &str) -> Option<SocketAddr> {
        self.players.get(id).map(|p| p.addr)
    }

    pub fn occupied(&self, pos: GridPos) -> bool {
        self.players.values().any(|p| p.pos == pos)
    }

    pub fn has_treasure(&self, pos: GridPos) -> bool {
        self.treasures.contains(&pos)
    }

    /// True when neither a player nor a treasure sits on `pos`.
    pub fn cell_free(&self, pos: GridPos) -> bool {
        !self.occupied(pos) && !self.has_treasure(pos)
    }

    /// Players never share cells with each other or with treasures, so the
    /// occupied counts are additive.
    pub fn free_cell_count(&self) -> usize {
        (self.n as usize * self.n as usize).saturating_sub(self.players.len() + self.treasures.len())
    }

    /// Derived view for the renderer: player id to cell.
    pub fn positions(&self) -> HashMap<String, GridPos> {
        self.players
            .values()
            .map(|p| (p.id.clone(), p.pos))
            .collect()
    }

    /// Derived view for the renderer: treasure cells in no particular order.
    pub fn treasure_cells(&self) -> Vec<GridPos> {
        self.treasures.iter().copied().collect()
    }

    /// Derived view for the scoreboard, one line per player, sorted by id.
    pub fn scoreboard(&self) -> Vec<String> {
        let mut entries: Vec<&Player> = self.players.values().collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
            .iter()
            .map(|p| {
                let role = p.role.map(|r| r.to_string()).unwrap_or_default();
                format!("{}  {}  {}", p.id, p.score, role)
            })
            .collect()
    }
}
