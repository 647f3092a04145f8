//! Authoritative state mutations: placement, joins, moves and the treasure
//! economy. Everything here is synchronous and operates on a `GameState`
//! the caller already holds exclusively.

use log::{debug, info, warn};
use rand::Rng;
use shared::error::GameError;
use shared::protocol::{MoveOutcome, RejectReason};
use shared::{Direction, GameState, GridPos, Player, PLACEMENT_RETRY_LIMIT};

/// Picks a uniformly random cell holding neither a player nor a treasure.
/// Random probing is capped; after that an exhaustive scan either finds a
/// free cell or proves the grid is saturated.
pub fn random_free_cell(state: &GameState) -> Result<GridPos, GameError> {
    let n = state.n as i32;
    if n <= 0 {
        return Err(GameError::GridFull);
    }
    let mut rng = rand::thread_rng();
    for _ in 0..PLACEMENT_RETRY_LIMIT {
        let pos = GridPos::new(rng.gen_range(0..n), rng.gen_range(0..n));
        if state.cell_free(pos) {
            return Ok(pos);
        }
    }
    let free: Vec<GridPos> = (0..n)
        .flat_map(|x| (0..n).map(move |y| GridPos::new(x, y)))
        .filter(|pos| state.cell_free(*pos))
        .collect();
    if free.is_empty() {
        return Err(GameError::GridFull);
    }
    Ok(free[rng.gen_range(0..free.len())])
}

/// Appends `count` treasures on random free cells.
pub fn generate_treasure(state: &mut GameState, count: u32) -> Result<(), GameError> {
    for _ in 0..count {
        let pos = random_free_cell(state)?;
        state.treasures.insert(pos);
    }
    Ok(())
}

/// Inserts `player` on a random free cell. A re-join with an id already in
/// the game replaces the stale record instead of duplicating it; the old
/// record's role marker survives the replacement unless the new record
/// carries its own.
pub fn join_player(state: &mut GameState, mut player: Player) -> Result<(), GameError> {
    let previous = state.remove_player(&player.id);
    match random_free_cell(state) {
        Ok(pos) => {
            player.pos = pos;
            if player.role.is_none() {
                player.role = previous.and_then(|p| p.role);
            }
            info!("player {} joined at ({}, {})", player.id, pos.x, pos.y);
            state.insert_player(player);
            Ok(())
        }
        Err(err) => {
            if let Some(previous) = previous {
                state.insert_player(previous);
            }
            Err(err)
        }
    }
}

/// Applies a move intent. The caller-supplied position is trusted for the
/// origin; only the target cell is validated. A rejection leaves the state
/// untouched and reports why. Walking onto a treasure consumes it, scores
/// one point and regenerates exactly one replacement.
pub fn apply_move(
    state: &mut GameState,
    player_id: &str,
    direction: Direction,
    current_pos: GridPos,
) -> MoveOutcome {
    if state.player(player_id).is_none() {
        return MoveOutcome::Rejected {
            reason: RejectReason::UnknownPlayer,
            state: state.clone(),
        };
    }
    if direction == Direction::Refresh {
        return MoveOutcome::Accepted(state.clone());
    }

    let target = current_pos.step(direction);
    if !state.in_bounds(target) {
        debug!(
            "move by {player_id} rejected: ({}, {}) is out of bounds",
            target.x, target.y
        );
        return MoveOutcome::Rejected {
            reason: RejectReason::OutOfBounds,
            state: state.clone(),
        };
    }
    if state.occupied(target) {
        debug!(
            "move by {player_id} rejected: ({}, {}) is occupied",
            target.x, target.y
        );
        return MoveOutcome::Rejected {
            reason: RejectReason::Occupied,
            state: state.clone(),
        };
    }

    let scored = state.treasures.remove(&target);
    if let Some(player) = state.player_mut(player_id) {
        player.pos = target;
        if scored {
            player.score += 1;
        }
    }
    // Replenish only after the mover occupies the target, so the
    // replacement can never land on the cell being vacated.
    if scored {
        if let Err(err) = generate_treasure(state, 1) {
            warn!("could not replace the consumed treasure: {err}");
        }
    }
    MoveOutcome::Accepted(state.clone())
}
