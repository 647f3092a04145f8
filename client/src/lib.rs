//! Player-process side of the game: the client agent that routes intents
//! to the current primary/backup pair and serves the callback surface, and
//! the process harness that wires the agent to a listener and the tracker.

pub mod agent;
pub mod process;
