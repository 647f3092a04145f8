//! Replicated game server.
//!
//! A `GameServer` runs inside whichever player process currently holds the
//! primary or backup role. The primary owns all state mutations; the backup
//! keeps a wholesale-refreshed copy and takes over when the primary stops
//! answering. Failure detection is driven by a periodic heartbeat task, and
//! fire-and-forget notifications (tracker bookkeeping, promotion
//! broadcasts) go through a bounded worker queue so role transitions never
//! block on notifying every peer.

pub mod game;
pub mod heartbeat;
pub mod notifier;
pub mod replica;
