//! Checkpoint creation.
//!
//! A checkpoint is a full copy of the state aggregate held inside the live
//! aggregate's own `checkpoint` field. The copy's nested checkpoint pointer
//! is forced empty, so checkpoints never nest past depth one.

use tracing::info;

use crate::state::GameState;

/// Snapshot the current aggregate into its own checkpoint field.
///
/// Triggered by an explicit player action or by a generation-service decision
/// flag; `reason` is the human-readable explanation recorded alongside it.
pub fn set_checkpoint(state: &mut GameState, reason: Option<String>) {
    let snapshot = state.checkpoint_copy();
    state.checkpoint = Some(Box::new(snapshot));
    state.checkpoint_reason = reason;

    info!(
        loop_number = state.current_loop,
        location = %state.current_location,
        "checkpoint set"
    );
}
