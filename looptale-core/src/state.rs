//! Game state types for the loop-bound narrative.
//!
//! Contains the complete per-player state aggregate: narrative text, choices,
//! character roster, inventory, quests, reputation, discovered lore, the loop
//! counter, the bounded memory log, and the nested checkpoint with its
//! rewind-provenance metadata.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::diff::LossReport;

/// Maximum trailing length of the memory log, in characters.
///
/// The log is append-only; once it grows past this bound the oldest
/// characters are dropped so only the trailing window survives.
pub const MEMORY_LOG_MAX: usize = 8_000;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Roster, inventory, quests
// ============================================================================

/// Narrative status of a roster character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CharacterStatus {
    #[default]
    Alive,
    Wounded,
    Missing,
    Dead,
}

impl CharacterStatus {
    pub fn name(&self) -> &'static str {
        match self {
            CharacterStatus::Alive => "alive",
            CharacterStatus::Wounded => "wounded",
            CharacterStatus::Missing => "missing",
            CharacterStatus::Dead => "dead",
        }
    }
}

/// A character in the story roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Affinity toward the player, positive is friendly.
    pub affinity: i32,
    pub status: CharacterStatus,
    pub location: String,
}

impl Character {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            affinity: 0,
            status: CharacterStatus::Alive,
            location: location.into(),
        }
    }

    pub fn with_affinity(mut self, affinity: i32) -> Self {
        self.affinity = affinity;
        self
    }
}

/// A stack of identical items in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub id: String,
    pub quantity: u32,
}

impl ItemStack {
    pub fn new(id: impl Into<String>, quantity: u32) -> Self {
        Self {
            id: id.into(),
            quantity,
        }
    }
}

/// A quest entry, active or completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quest {
    pub id: String,
    pub name: String,
    pub description: String,
}

impl Quest {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A recorded conflict between two roster characters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub first: String,
    pub second: String,
    pub reason: String,
}

/// Provenance of who requested a rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RewindTrigger {
    /// The player asked for it explicitly.
    Manual,
    /// The generation service forced it on a fatal outcome.
    AiAutomatic,
    /// The generation service wove it into the narrative with a reason.
    AiNarrative,
}

impl RewindTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            RewindTrigger::Manual => "manual",
            RewindTrigger::AiAutomatic => "ai_automatic",
            RewindTrigger::AiNarrative => "ai_narrative",
        }
    }
}

// ============================================================================
// The state aggregate
// ============================================================================

/// The complete mutable game state for one player.
///
/// Created once per new game from [`GameState::opening`], mutated every turn
/// by the coordinator, snapshotted into its own `checkpoint` field, and
/// replaced wholesale by the rewind engine on death.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Current story text shown to the player.
    pub narrative: String,

    /// Choices currently offered to the player.
    pub choices: Vec<String>,

    /// Character roster keyed by name.
    pub characters: BTreeMap<String, Character>,

    /// Carried items.
    pub inventory: Vec<ItemStack>,

    /// Learned skills.
    pub skills: BTreeSet<String>,

    /// Quests currently in progress.
    pub active_quests: Vec<Quest>,

    /// Quests already finished.
    pub completed_quests: Vec<Quest>,

    /// Faction reputation ledger.
    pub reputation: BTreeMap<String, i32>,

    /// Where the player currently is.
    pub current_location: String,

    /// Ids of lore entries the player has discovered.
    pub discovered_lore: BTreeSet<String>,

    /// Relationship conflicts recorded so far.
    pub conflicts: Vec<ConflictRecord>,

    /// Number of loops lived through. Strictly monotonic, +1 per rewind.
    pub current_loop: u32,

    /// Whether the player is in the terminal game-over display state.
    pub is_game_over: bool,

    /// Outcome line of the most recent turn.
    pub last_outcome: String,

    /// Append-only memory log, bounded to [`MEMORY_LOG_MAX`] trailing chars.
    /// The one field that survives rewind, plus an appended failure line.
    pub memory: String,

    /// Rewind target. Invariant: the nested state's own checkpoint is `None`.
    #[serde(default)]
    pub checkpoint: Option<Box<GameState>>,

    /// Loss report computed at the moment of the most recent rewind.
    #[serde(default)]
    pub last_rbd_losses: Option<LossReport>,

    /// Who requested the most recent rewind.
    #[serde(default)]
    pub rbd_trigger: Option<RewindTrigger>,

    /// Cause of the most recent death.
    #[serde(default)]
    pub last_death_cause: Option<String>,

    /// Reason the current checkpoint was set.
    #[serde(default)]
    pub checkpoint_reason: Option<String>,
}

impl GameState {
    /// The canonical opening aggregate for a new game.
    ///
    /// Passed explicitly into the session at creation; also the implicit
    /// rewind target when no checkpoint has ever been set.
    pub fn opening() -> Self {
        Self {
            narrative: "You come to on the cold stones of the Waymeet gate, lantern light \
                        guttering overhead. The city of Veldenmark does not know you yet."
                .to_string(),
            choices: vec![
                "Walk toward the market square".to_string(),
                "Ask the gate warden where you are".to_string(),
                "Check your pockets".to_string(),
            ],
            characters: BTreeMap::new(),
            inventory: Vec::new(),
            skills: BTreeSet::new(),
            active_quests: Vec::new(),
            completed_quests: Vec::new(),
            reputation: BTreeMap::new(),
            current_location: "Waymeet Gate".to_string(),
            discovered_lore: BTreeSet::new(),
            conflicts: Vec::new(),
            current_loop: 1,
            is_game_over: false,
            last_outcome: String::new(),
            memory: String::new(),
            checkpoint: None,
            last_rbd_losses: None,
            rbd_trigger: None,
            last_death_cause: None,
            checkpoint_reason: None,
        }
    }

    /// Structural copy for snapshotting: a clone with the nested checkpoint
    /// pointer forced empty, which is what keeps checkpoints depth-1.
    pub fn checkpoint_copy(&self) -> GameState {
        let mut copy = self.clone();
        copy.checkpoint = None;
        copy
    }

    /// Append one line to the memory log, keeping only the trailing
    /// [`MEMORY_LOG_MAX`] characters.
    pub fn append_memory(&mut self, line: &str) {
        if !self.memory.is_empty() {
            self.memory.push('\n');
        }
        self.memory.push_str(line);

        let char_count = self.memory.chars().count();
        if char_count > MEMORY_LOG_MAX {
            // Unicode-safe trim from the front
            self.memory = self
                .memory
                .chars()
                .skip(char_count - MEMORY_LOG_MAX)
                .collect();
        }
    }

    /// Adjust the quantity of an item; removes the stack at zero, creates it
    /// on a positive delta for an unknown id.
    pub fn adjust_item(&mut self, id: &str, delta: i64) {
        if let Some(stack) = self.inventory.iter_mut().find(|s| s.id == id) {
            let next = i64::from(stack.quantity) + delta;
            if next <= 0 {
                self.inventory.retain(|s| s.id != id);
            } else {
                stack.quantity = next as u32;
            }
        } else if delta > 0 {
            self.inventory.push(ItemStack::new(id, delta as u32));
        }
    }

    /// Item ids currently carried.
    pub fn inventory_ids(&self) -> BTreeSet<&str> {
        self.inventory.iter().map(|s| s.id.as_str()).collect()
    }

    /// Ids of quests currently active.
    pub fn active_quest_ids(&self) -> BTreeSet<&str> {
        self.active_quests.iter().map(|q| q.id.as_str()).collect()
    }

    /// Get or create a roster character by name.
    pub fn character_mut(&mut self, name: &str) -> &mut Character {
        self.characters
            .entry(name.to_string())
            .or_insert_with(|| Character::new(self.current_location.clone()))
    }

    /// Move a quest from active to completed by id. Returns whether a quest
    /// actually moved.
    pub fn complete_quest(&mut self, id: &str) -> bool {
        if let Some(pos) = self.active_quests.iter().position(|q| q.id == id) {
            let quest = self.active_quests.remove(pos);
            self.completed_quests.push(quest);
            true
        } else {
            false
        }
    }

    pub fn has_checkpoint(&self) -> bool {
        self.checkpoint.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opening_state() {
        let state = GameState::opening();
        assert_eq!(state.current_loop, 1);
        assert!(!state.is_game_over);
        assert!(!state.choices.is_empty());
        assert!(state.checkpoint.is_none());
        assert!(state.rbd_trigger.is_none());
    }

    #[test]
    fn test_checkpoint_copy_clears_nesting() {
        let mut state = GameState::opening();
        state.checkpoint = Some(Box::new(GameState::opening()));

        let copy = state.checkpoint_copy();
        assert!(copy.checkpoint.is_none());
        assert_eq!(copy.current_location, state.current_location);
    }

    #[test]
    fn test_append_memory() {
        let mut state = GameState::opening();
        state.append_memory("The warden cannot be trusted.");
        state.append_memory("The cellar door opens at midnight.");

        assert!(state.memory.starts_with("The warden cannot be trusted."));
        assert!(state.memory.ends_with("midnight."));
    }

    #[test]
    fn test_append_memory_bounded() {
        let mut state = GameState::opening();
        let long_line = "x".repeat(MEMORY_LOG_MAX);
        state.append_memory(&long_line);
        state.append_memory("tail marker");

        assert!(state.memory.chars().count() <= MEMORY_LOG_MAX);
        assert!(state.memory.ends_with("tail marker"));
    }

    #[test]
    fn test_adjust_item() {
        let mut state = GameState::opening();
        state.adjust_item("rope", 2);
        assert_eq!(state.inventory, vec![ItemStack::new("rope", 2)]);

        state.adjust_item("rope", -1);
        assert_eq!(state.inventory, vec![ItemStack::new("rope", 1)]);

        state.adjust_item("rope", -5);
        assert!(state.inventory.is_empty());

        // Negative delta on an unknown id is a no-op
        state.adjust_item("ghost", -1);
        assert!(state.inventory.is_empty());
    }

    #[test]
    fn test_complete_quest() {
        let mut state = GameState::opening();
        state
            .active_quests
            .push(Quest::new("q1", "Find the warden", "He holds the key."));

        assert!(state.complete_quest("q1"));
        assert!(state.active_quests.is_empty());
        assert_eq!(state.completed_quests.len(), 1);
        assert!(!state.complete_quest("q1"));
    }

    #[test]
    fn test_character_mut_creates_at_current_location() {
        let mut state = GameState::opening();
        state.current_location = "Market Square".to_string();

        let emilia = state.character_mut("Emilia");
        assert_eq!(emilia.location, "Market Square");
        assert_eq!(emilia.affinity, 0);

        emilia.affinity = 10;
        assert_eq!(state.characters["Emilia"].affinity, 10);
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = GameState::opening();
        state.adjust_item("lantern", 1);
        state.checkpoint = Some(Box::new(state.checkpoint_copy()));

        let json = serde_json::to_string(&state).expect("serialize");
        let back: GameState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }
}
