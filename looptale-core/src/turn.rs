//! One player turn, end to end.
//!
//! The pipeline is deliberately explicit about its edges: read the prior
//! state, invoke the engine (whose tool calls commit to the store
//! out-of-band), re-read to pick those commits up, overlay the engine's own
//! returned delta under the precedence rule, apply checkpoint/rewind
//! decisions, persist.
//!
//! Precedence rule: tool-mutated fields are the base; the returned delta wins
//! only for fields no tool touched this turn. Narrative and choices always
//! come from the delta because tools never write them.
//!
//! Overlapping turns for the same player are not serialized; they race under
//! last-write-wins with no lost-update detection.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::checkpoint::set_checkpoint;
use crate::engine::tools::{ToolExecutor, TouchedField, TouchedFields};
use crate::engine::{NarrativeEngine, StateProjection, ToolInvocation, TurnDelta};
use crate::rewind::{RewindEngine, RewindPhase};
use crate::state::{GameState, PlayerId, RewindTrigger};
use crate::store::{StateStore, StoreError};

/// Apology line appended to the narrative when generation fails.
const FAILURE_APOLOGY: &str =
    "(The narrator's voice falters and the scene holds still. Try again in a moment.)";

/// Fallback choice offered when no safe choice list is available.
const FALLBACK_CHOICE: &str = "Try again";

/// Errors a turn can surface to the caller. Generation and merge-base
/// failures are recovered internally; only a missing player or a store
/// failure at the pipeline edges comes back as an error.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("no state for player {0}")]
    UnknownPlayer(PlayerId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Provenance flags for the caller to surface after a turn.
#[derive(Debug, Clone, Default)]
pub struct TurnProvenance {
    /// The engine asked for a checkpoint this turn.
    pub ai_checkpoint_set: bool,
    pub checkpoint_reason: Option<String>,

    /// The engine forced a rewind this turn.
    pub ai_rbd_triggered: bool,
    pub rewind_reason: Option<String>,

    /// The post-generation re-read failed and the pre-generation state was
    /// used as the merge base instead.
    pub degraded_merge: bool,

    /// Generation failed or timed out; the returned state is the prior state
    /// with an apology line, and nothing was persisted.
    pub engine_failed: bool,
    pub failure_reason: Option<String>,
}

/// Log of tool invocations made by the engine during one turn.
pub type ToolLog = Vec<ToolInvocation>;

/// Result of one coordinated turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: GameState,
    pub provenance: TurnProvenance,
    pub tool_log: ToolLog,
}

/// Orchestrates one player turn against the store and the engine.
pub struct TurnCoordinator {
    store: Arc<dyn StateStore>,
    engine: Arc<dyn NarrativeEngine>,
    rewind: RewindEngine,
    turn_timeout: Duration,
}

impl TurnCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        engine: Arc<dyn NarrativeEngine>,
        opening: GameState,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            rewind: RewindEngine::new(opening),
            turn_timeout,
        }
    }

    pub fn rewind_engine(&self) -> &RewindEngine {
        &self.rewind
    }

    /// Run one turn for `player`.
    pub async fn run_turn(&self, player: PlayerId, action: &str) -> Result<TurnOutcome, TurnError> {
        let prior = self
            .store
            .get(player)
            .await?
            .ok_or(TurnError::UnknownPlayer(player))?;

        let mut provenance = TurnProvenance::default();

        // Generation; tool calls commit to the store while this runs.
        let projection = StateProjection::from_state(&prior);
        let executor = ToolExecutor::new(self.store.clone(), player);

        let engine_result = tokio::time::timeout(
            self.turn_timeout,
            self.engine.run_turn(&projection, action, &executor),
        )
        .await;

        let (delta, tool_log) = match engine_result {
            Ok(Ok(turn)) => (turn.delta, turn.tool_log),
            Ok(Err(e)) => {
                warn!(player = %player, error = %e, "generation failed");
                let mut outcome = failure_outcome(prior, provenance, e.to_string());
                outcome.tool_log = executor.take_log();
                return Ok(outcome);
            }
            Err(_) => {
                warn!(player = %player, "generation timed out");
                let mut outcome =
                    failure_outcome(prior, provenance, "generation timed out".to_string());
                outcome.tool_log = executor.take_log();
                return Ok(outcome);
            }
        };
        let touched = executor.touched();

        // Pick up tool commits; degrade to the pre-generation state if the
        // re-read fails, but never silently drop the fact.
        let mut merged = match self.store.get(player).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                warn!(player = %player, "state vanished between reads; using pre-generation state");
                provenance.degraded_merge = true;
                prior.clone()
            }
            Err(e) => {
                warn!(player = %player, error = %e, "post-generation re-read failed; using pre-generation state as merge base");
                provenance.degraded_merge = true;
                prior.clone()
            }
        };

        overlay_delta(&mut merged, &delta, &touched);

        if delta.should_set_checkpoint {
            set_checkpoint(&mut merged, delta.checkpoint_reason.clone());
            provenance.ai_checkpoint_set = true;
            provenance.checkpoint_reason = delta.checkpoint_reason.clone();
        }

        let final_state = if delta.should_trigger_rewind
            && RewindPhase::of(&prior) == RewindPhase::Active
        {
            let trigger = if delta.rewind_reason.is_some() {
                RewindTrigger::AiNarrative
            } else {
                RewindTrigger::AiAutomatic
            };
            provenance.ai_rbd_triggered = true;
            provenance.rewind_reason = delta.rewind_reason.clone();
            self.rewind
                .rewind(&merged, trigger, delta.rewind_reason.as_deref())
        } else {
            merged
        };

        self.store.put(player, &final_state).await?;

        Ok(TurnOutcome {
            state: final_state,
            provenance,
            tool_log,
        })
    }
}

/// Overlay the engine's returned delta onto the merge base.
///
/// Tool-mutated fields are authoritative: the delta's inventory and roster
/// replacements apply only when no tool touched those parts this turn.
pub fn overlay_delta(base: &mut GameState, delta: &TurnDelta, touched: &TouchedFields) {
    base.narrative = delta.narrative.clone();

    base.choices = delta.choices.clone();
    if base.choices.is_empty() && !delta.is_game_over {
        base.choices = vec!["Continue".to_string()];
    }

    base.is_game_over = delta.is_game_over;
    if !delta.last_outcome.is_empty() {
        base.last_outcome = delta.last_outcome.clone();
    }

    if let Some(ref inventory) = delta.inventory {
        if !touched.contains(TouchedField::Inventory) {
            base.inventory = inventory.clone();
        }
    }

    if let Some(ref characters) = delta.characters {
        if !touched.contains(TouchedField::Characters) {
            base.characters = characters.clone();
        }
    }
}

/// Build the recovered outcome for a failed generation: the prior state with
/// an apology line and a safe choice list. Nothing is persisted.
fn failure_outcome(
    prior: GameState,
    mut provenance: TurnProvenance,
    reason: String,
) -> TurnOutcome {
    provenance.engine_failed = true;
    provenance.failure_reason = Some(reason);

    let mut state = prior;
    if !state.narrative.is_empty() {
        state.narrative.push_str("\n\n");
    }
    state.narrative.push_str(FAILURE_APOLOGY);
    if state.choices.is_empty() {
        state.choices = vec![FALLBACK_CHOICE.to_string()];
    }

    TurnOutcome {
        state,
        provenance,
        tool_log: Vec::new(),
    }
}
