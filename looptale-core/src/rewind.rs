//! The rewind transition.
//!
//! On death the live aggregate collapses into a copy of its checkpoint. The
//! loop counter climbs by one, the memory log carries a failure line across,
//! and the divergence report for everything being discarded is pinned to the
//! resulting state. The transition is total: with no checkpoint it falls back
//! to the canonical opening aggregate and tags the cause as a system error.

use tracing::info;

use crate::diff::{diff, DiffMode};
use crate::state::{GameState, RewindTrigger};

/// Cause recorded when the rewind had to fall back to the opening aggregate.
pub const SYSTEM_ERROR_CAUSE: &str = "system error";

/// Phase of the death/rewind cycle, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindPhase {
    /// Normal play.
    Active,
    /// An outcome has marked the player dead; the rewind has not run yet.
    DeathSignaled,
}

impl RewindPhase {
    pub fn of(state: &GameState) -> Self {
        if state.is_game_over {
            RewindPhase::DeathSignaled
        } else {
            RewindPhase::Active
        }
    }
}

/// Performs the rewind transition against a fixed opening aggregate.
///
/// The opening aggregate is supplied at construction (one per session); it is
/// the implicit rewind target for states that never set a checkpoint.
pub struct RewindEngine {
    opening: GameState,
}

impl RewindEngine {
    pub fn new(opening: GameState) -> Self {
        Self { opening }
    }

    /// The state a rewind of `state` would collapse into.
    pub fn rewind_target<'a>(&'a self, state: &'a GameState) -> &'a GameState {
        state
            .checkpoint
            .as_deref()
            .unwrap_or(&self.opening)
    }

    /// Collapse `current` into its checkpoint.
    ///
    /// Infallible from the caller's point of view: always yields a playable
    /// aggregate in the `Active` phase with the loop counter incremented.
    pub fn rewind(
        &self,
        current: &GameState,
        trigger: RewindTrigger,
        cause: Option<&str>,
    ) -> GameState {
        let fell_back = current.checkpoint.is_none();
        let reference = self.rewind_target(current);

        let losses = diff(current, reference, DiffMode::Final);

        let mut next = reference.checkpoint_copy();
        next.current_loop = current.current_loop + 1;
        next.is_game_over = false;

        let outcome = if current.last_outcome.is_empty() {
            cause.unwrap_or("an unrecorded end")
        } else {
            current.last_outcome.as_str()
        };
        next.append_memory(&format!(
            "[Loop #{} Failed: {}]",
            current.current_loop, outcome
        ));

        next.last_rbd_losses = Some(losses);
        next.rbd_trigger = Some(trigger);
        next.last_death_cause = if fell_back {
            Some(SYSTEM_ERROR_CAUSE.to_string())
        } else {
            Some(
                cause
                    .map(str::to_string)
                    .unwrap_or_else(|| outcome.to_string()),
            )
        };

        // Re-arm: an immediate second death rewinds to the same anchor
        // instead of collapsing all the way to the opening aggregate. The
        // anchor carries the post-rewind memory log forward so failure lines
        // accumulate across loops; memory is never rolled back.
        let mut rearmed = reference.checkpoint_copy();
        rearmed.memory = next.memory.clone();
        next.checkpoint = Some(Box::new(rearmed));

        info!(
            from_loop = current.current_loop,
            to_loop = next.current_loop,
            trigger = trigger.name(),
            fell_back,
            "rewind"
        );

        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::set_checkpoint;

    fn engine() -> RewindEngine {
        RewindEngine::new(GameState::opening())
    }

    fn dead_state_with_checkpoint() -> GameState {
        let mut state = GameState::opening();
        state.current_location = "Gatehouse".to_string();
        state.append_memory("The warden lies.");
        set_checkpoint(&mut state, Some("gatehouse rest".to_string()));

        state.adjust_item("stolen key", 1);
        state.current_location = "Undercroft".to_string();
        state.is_game_over = true;
        state.last_outcome = "Crushed by the portcullis".to_string();
        state
    }

    #[test]
    fn test_loop_counter_increments_by_one() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let next = engine.rewind(&state, RewindTrigger::Manual, None);
        assert_eq!(next.current_loop, state.current_loop + 1);

        let mut again = next.clone();
        again.is_game_over = true;
        let third = engine.rewind(&again, RewindTrigger::Manual, None);
        assert_eq!(third.current_loop, state.current_loop + 2);
    }

    #[test]
    fn test_rewind_restores_checkpoint_fields() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let reference = state.checkpoint.clone().expect("checkpoint");

        let next = engine.rewind(&state, RewindTrigger::AiAutomatic, None);

        assert_eq!(next.current_location, reference.current_location);
        assert_eq!(next.inventory, reference.inventory);
        assert_eq!(next.characters, reference.characters);
        assert_eq!(next.narrative, reference.narrative);
        assert!(!next.is_game_over);
    }

    #[test]
    fn test_memory_prefix_retention() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let reference_memory = state.checkpoint.as_ref().expect("checkpoint").memory.clone();

        let next = engine.rewind(&state, RewindTrigger::Manual, None);

        assert!(next.memory.starts_with(&reference_memory));
        assert!(next.memory.ends_with("[Loop #1 Failed: Crushed by the portcullis]"));
    }

    #[test]
    fn test_losses_pinned_to_result() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let next = engine.rewind(&state, RewindTrigger::AiNarrative, None);

        let losses = next.last_rbd_losses.as_ref().expect("loss report");
        assert!(!losses.is_empty());
        assert_eq!(next.rbd_trigger, Some(RewindTrigger::AiNarrative));
    }

    #[test]
    fn test_fallback_without_checkpoint() {
        let engine = engine();
        let mut state = GameState::opening();
        state.current_loop = 4;
        state.adjust_item("map", 1);
        state.is_game_over = true;
        state.last_outcome = "Lost in the fog".to_string();

        let next = engine.rewind(&state, RewindTrigger::AiAutomatic, None);

        assert_eq!(next.current_loop, 5);
        assert!(!next.is_game_over);
        assert_eq!(next.last_death_cause.as_deref(), Some(SYSTEM_ERROR_CAUSE));
        assert!(next.inventory.is_empty());
        assert!(next.memory.contains("[Loop #4 Failed: Lost in the fog]"));
    }

    #[test]
    fn test_rewound_state_keeps_depth_one_checkpoint() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let next = engine.rewind(&state, RewindTrigger::Manual, None);

        let rearmed = next.checkpoint.as_ref().expect("re-armed checkpoint");
        assert!(rearmed.checkpoint.is_none());
        assert_eq!(rearmed.current_location, "Gatehouse");
    }

    #[test]
    fn test_explicit_cause_wins_over_outcome() {
        let engine = engine();
        let state = dead_state_with_checkpoint();
        let next = engine.rewind(&state, RewindTrigger::AiNarrative, Some("A blade in the dark"));
        assert_eq!(next.last_death_cause.as_deref(), Some("A blade in the dark"));
    }

    #[test]
    fn test_phase_classification() {
        let mut state = GameState::opening();
        assert_eq!(RewindPhase::of(&state), RewindPhase::Active);
        state.is_game_over = true;
        assert_eq!(RewindPhase::of(&state), RewindPhase::DeathSignaled);
    }

    #[test]
    fn test_empty_outcome_uses_cause_in_memory_line() {
        let engine = engine();
        let mut state = GameState::opening();
        state.is_game_over = true;

        let next = engine.rewind(&state, RewindTrigger::Manual, Some("swallowed whole"));
        assert!(next.memory.contains("[Loop #1 Failed: swallowed whole]"));
    }
}
