//! Generation-service side of the core.
//!
//! The narrative engine is an external collaborator: it receives a read-only
//! projection of the prior state plus the player's action, may durably mutate
//! the store through named tool calls while it thinks, and returns its own
//! delta for the turn. Everything behind the trait is opaque to the
//! coordinator.

mod narrator;
mod prompts;
pub mod tools;

pub use narrator::{Narrator, NarratorConfig};
pub use prompts::narrator_system_prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::state::{Character, GameState, ItemStack};
use tools::ToolExecutor;

/// Errors from the narrative engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Claude API error: {0}")]
    Api(#[from] claude::Error),

    #[error("Malformed turn delta: {0}")]
    MalformedDelta(String),

    #[error("Tool loop exceeded {0} iterations")]
    ToolLoopOverflow(usize),
}

/// The generation service's own returned delta for one turn.
///
/// Tool-applied mutations are committed to the store before this is returned;
/// the coordinator overlays these fields only where no tool touched the
/// corresponding part of the aggregate this turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnDelta {
    /// Story continuation for this turn.
    #[serde(default)]
    pub narrative: String,

    /// Choices to offer next.
    #[serde(default)]
    pub choices: Vec<String>,

    /// Full replacement inventory, when the service chose to rewrite it.
    #[serde(default)]
    pub inventory: Option<Vec<ItemStack>>,

    /// Full replacement roster, when the service chose to rewrite it.
    #[serde(default)]
    pub characters: Option<BTreeMap<String, Character>>,

    /// Whether this turn killed the player.
    #[serde(default)]
    pub is_game_over: bool,

    /// One-line outcome of the turn.
    #[serde(default)]
    pub last_outcome: String,

    /// The service decided this moment is worth anchoring.
    #[serde(default)]
    pub should_set_checkpoint: bool,

    /// Human-readable reason accompanying the checkpoint decision.
    #[serde(default)]
    pub checkpoint_reason: Option<String>,

    /// The service decided death should rewind immediately.
    #[serde(default)]
    pub should_trigger_rewind: bool,

    /// Narrative reason accompanying the rewind decision.
    #[serde(default)]
    pub rewind_reason: Option<String>,
}

/// One tool call made by the service during a turn, for the record.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
    pub output: String,
    pub is_error: bool,
}

/// What a full engine turn produced.
#[derive(Debug, Clone)]
pub struct EngineTurn {
    pub delta: TurnDelta,
    pub tool_log: Vec<ToolInvocation>,
}

/// Read-only projection of the prior state handed to the engine.
#[derive(Debug, Clone)]
pub struct StateProjection {
    pub current_loop: u32,
    pub location: String,
    pub narrative: String,
    pub memory: String,
    pub is_game_over: bool,
    pub characters: BTreeMap<String, Character>,
    pub inventory: Vec<ItemStack>,
    pub active_quests: Vec<String>,
    pub reputation: BTreeMap<String, i32>,
    pub skills: Vec<String>,
    pub has_checkpoint: bool,
}

impl StateProjection {
    pub fn from_state(state: &GameState) -> Self {
        Self {
            current_loop: state.current_loop,
            location: state.current_location.clone(),
            narrative: state.narrative.clone(),
            memory: state.memory.clone(),
            is_game_over: state.is_game_over,
            characters: state.characters.clone(),
            inventory: state.inventory.clone(),
            active_quests: state.active_quests.iter().map(|q| q.name.clone()).collect(),
            reputation: state.reputation.clone(),
            skills: state.skills.iter().cloned().collect(),
            has_checkpoint: state.has_checkpoint(),
        }
    }
}

/// The coordination contract with the generation service.
#[async_trait]
pub trait NarrativeEngine: Send + Sync {
    /// Run one turn. Tool calls made through `tools` commit to the store
    /// before this returns; the returned delta is overlaid afterwards by the
    /// coordinator.
    async fn run_turn(
        &self,
        projection: &StateProjection,
        action: &str,
        tools: &ToolExecutor,
    ) -> Result<EngineTurn, EngineError>;
}
