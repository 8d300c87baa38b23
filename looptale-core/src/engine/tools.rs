//! Named tools the narrative engine can call while generating.
//!
//! Each call is an independent read-merge-write cycle against the store for
//! one player: read the latest aggregate, apply one localized mutation, write
//! it back. Later calls in the same turn observe earlier ones. The executor
//! records which parts of the aggregate tools touched so the coordinator can
//! apply its precedence rule when overlaying the returned delta.

use claude::{Tool, ToolResult};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::ToolInvocation;
use crate::state::{CharacterStatus, ConflictRecord, PlayerId, Quest};
use crate::store::{StateStore, StoreError};

/// Collection of story tools offered to the engine.
pub struct StoryTools;

impl StoryTools {
    /// All tool definitions for the API call.
    pub fn all() -> Vec<Tool> {
        vec![
            Self::adjust_inventory(),
            Self::adjust_affinity(),
            Self::set_character_status(),
            Self::move_character(),
            Self::adjust_reputation(),
            Self::create_quest(),
            Self::complete_quest(),
            Self::record_lore(),
            Self::record_conflict(),
            Self::learn_skill(),
            Self::change_location(),
        ]
    }

    fn adjust_inventory() -> Tool {
        Tool {
            name: "adjust_inventory".to_string(),
            description: "Add or remove items from the player's inventory. Use a positive delta when the player gains items and a negative delta when items are spent, lost, or destroyed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "item": {
                        "type": "string",
                        "description": "Item id, e.g. 'silver_knife'"
                    },
                    "delta": {
                        "type": "integer",
                        "description": "Quantity change; negative removes"
                    }
                },
                "required": ["item", "delta"]
            }),
        }
    }

    fn adjust_affinity() -> Tool {
        Tool {
            name: "adjust_affinity".to_string(),
            description: "Shift a character's affinity toward the player. Use when a scene meaningfully changes how a character feels about the player.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "character": {
                        "type": "string",
                        "description": "Character name"
                    },
                    "delta": {
                        "type": "integer",
                        "description": "Affinity change, positive is warmer"
                    }
                },
                "required": ["character", "delta"]
            }),
        }
    }

    fn set_character_status() -> Tool {
        Tool {
            name: "set_character_status".to_string(),
            description: "Change a character's narrative status.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "character": {
                        "type": "string",
                        "description": "Character name"
                    },
                    "status": {
                        "type": "string",
                        "enum": ["alive", "wounded", "missing", "dead"],
                        "description": "New status"
                    }
                },
                "required": ["character", "status"]
            }),
        }
    }

    fn move_character() -> Tool {
        Tool {
            name: "move_character".to_string(),
            description: "Move a character to a different location.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "character": {
                        "type": "string",
                        "description": "Character name"
                    },
                    "location": {
                        "type": "string",
                        "description": "Where the character now is"
                    }
                },
                "required": ["character", "location"]
            }),
        }
    }

    fn adjust_reputation() -> Tool {
        Tool {
            name: "adjust_reputation".to_string(),
            description: "Shift the player's standing with a faction.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "faction": {
                        "type": "string",
                        "description": "Faction name, e.g. 'Gate Wardens'"
                    },
                    "delta": {
                        "type": "integer",
                        "description": "Reputation change"
                    }
                },
                "required": ["faction", "delta"]
            }),
        }
    }

    fn create_quest() -> Tool {
        Tool {
            name: "create_quest".to_string(),
            description: "Open a new quest when the story gives the player a concrete goal.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "Stable quest id, e.g. 'warden_key'"
                    },
                    "name": {
                        "type": "string",
                        "description": "Short quest name"
                    },
                    "description": {
                        "type": "string",
                        "description": "What the player must do"
                    }
                },
                "required": ["id", "name"]
            }),
        }
    }

    fn complete_quest() -> Tool {
        Tool {
            name: "complete_quest".to_string(),
            description: "Mark an active quest as completed.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "Id of the quest to complete"
                    }
                },
                "required": ["id"]
            }),
        }
    }

    fn record_lore() -> Tool {
        Tool {
            name: "record_lore".to_string(),
            description: "Record that the player discovered a piece of world lore. Discovered lore persists for display but is part of the world state that a rewind resets.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": {
                        "type": "string",
                        "description": "Stable lore id, e.g. 'founding_of_veldenmark'"
                    }
                },
                "required": ["id"]
            }),
        }
    }

    fn record_conflict() -> Tool {
        Tool {
            name: "record_conflict".to_string(),
            description: "Record a conflict between two characters.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "first": {
                        "type": "string",
                        "description": "First character"
                    },
                    "second": {
                        "type": "string",
                        "description": "Second character"
                    },
                    "reason": {
                        "type": "string",
                        "description": "What the conflict is about"
                    }
                },
                "required": ["first", "second"]
            }),
        }
    }

    fn learn_skill() -> Tool {
        Tool {
            name: "learn_skill".to_string(),
            description: "The player learns a new skill.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "skill": {
                        "type": "string",
                        "description": "Skill id, e.g. 'lockpicking'"
                    }
                },
                "required": ["skill"]
            }),
        }
    }

    fn change_location() -> Tool {
        Tool {
            name: "change_location".to_string(),
            description: "Change the player's current location whenever the player travels somewhere new.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "Name of the new location"
                    }
                },
                "required": ["location"]
            }),
        }
    }
}

// ============================================================================
// Mutations
// ============================================================================

/// Part of the aggregate a tool mutated this turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TouchedField {
    Inventory,
    Characters,
    Reputation,
    Quests,
    Skills,
    Lore,
    Conflicts,
    Location,
}

/// Set of aggregate parts mutated by tools within one turn.
#[derive(Debug, Clone, Default)]
pub struct TouchedFields(BTreeSet<TouchedField>);

impl TouchedFields {
    pub fn record(&mut self, field: TouchedField) {
        self.0.insert(field);
    }

    pub fn contains(&self, field: TouchedField) -> bool {
        self.0.contains(&field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One localized mutation parsed from a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolMutation {
    AdjustInventory { item: String, delta: i64 },
    AdjustAffinity { character: String, delta: i32 },
    SetCharacterStatus { character: String, status: CharacterStatus },
    MoveCharacter { character: String, location: String },
    AdjustReputation { faction: String, delta: i32 },
    CreateQuest { id: String, name: String, description: String },
    CompleteQuest { id: String },
    RecordLore { id: String },
    RecordConflict { first: String, second: String, reason: String },
    LearnSkill { skill: String },
    ChangeLocation { location: String },
}

impl ToolMutation {
    /// Which part of the aggregate this mutation touches.
    pub fn field(&self) -> TouchedField {
        match self {
            ToolMutation::AdjustInventory { .. } => TouchedField::Inventory,
            ToolMutation::AdjustAffinity { .. }
            | ToolMutation::SetCharacterStatus { .. }
            | ToolMutation::MoveCharacter { .. } => TouchedField::Characters,
            ToolMutation::AdjustReputation { .. } => TouchedField::Reputation,
            ToolMutation::CreateQuest { .. } | ToolMutation::CompleteQuest { .. } => {
                TouchedField::Quests
            }
            ToolMutation::RecordLore { .. } => TouchedField::Lore,
            ToolMutation::RecordConflict { .. } => TouchedField::Conflicts,
            ToolMutation::LearnSkill { .. } => TouchedField::Skills,
            ToolMutation::ChangeLocation { .. } => TouchedField::Location,
        }
    }

    /// Apply the mutation to an aggregate; returns a one-line summary fed
    /// back to the engine as the tool result.
    pub fn apply(&self, state: &mut crate::state::GameState) -> String {
        match self {
            ToolMutation::AdjustInventory { item, delta } => {
                state.adjust_item(item, *delta);
                let have = state
                    .inventory
                    .iter()
                    .find(|s| &s.id == item)
                    .map(|s| s.quantity)
                    .unwrap_or(0);
                format!("{item}: {delta:+}, now carrying {have}")
            }
            ToolMutation::AdjustAffinity { character, delta } => {
                let entry = state.character_mut(character);
                entry.affinity += delta;
                format!("{character} affinity {delta:+}, now {}", entry.affinity)
            }
            ToolMutation::SetCharacterStatus { character, status } => {
                state.character_mut(character).status = *status;
                format!("{character} is now {}", status.name())
            }
            ToolMutation::MoveCharacter { character, location } => {
                state.character_mut(character).location = location.clone();
                format!("{character} moved to {location}")
            }
            ToolMutation::AdjustReputation { faction, delta } => {
                let entry = state.reputation.entry(faction.clone()).or_insert(0);
                *entry += delta;
                format!("{faction} reputation {delta:+}, now {entry}")
            }
            ToolMutation::CreateQuest {
                id,
                name,
                description,
            } => {
                if state.active_quests.iter().any(|q| &q.id == id) {
                    format!("Quest '{name}' already active")
                } else {
                    state
                        .active_quests
                        .push(Quest::new(id, name, description));
                    format!("Quest opened: {name}")
                }
            }
            ToolMutation::CompleteQuest { id } => {
                if state.complete_quest(id) {
                    format!("Quest {id} completed")
                } else {
                    format!("No active quest with id {id}")
                }
            }
            ToolMutation::RecordLore { id } => {
                state.discovered_lore.insert(id.clone());
                format!("Lore recorded: {id}")
            }
            ToolMutation::RecordConflict {
                first,
                second,
                reason,
            } => {
                state.conflicts.push(ConflictRecord {
                    first: first.clone(),
                    second: second.clone(),
                    reason: reason.clone(),
                });
                format!("Conflict recorded between {first} and {second}")
            }
            ToolMutation::LearnSkill { skill } => {
                state.skills.insert(skill.clone());
                format!("Skill learned: {skill}")
            }
            ToolMutation::ChangeLocation { location } => {
                state.current_location = location.clone();
                format!("Player now at {location}")
            }
        }
    }
}

/// Parse a tool call into a mutation. Returns `None` for unknown tools or
/// missing required parameters.
pub fn parse_tool_call(name: &str, input: &Value) -> Option<ToolMutation> {
    match name {
        "adjust_inventory" => Some(ToolMutation::AdjustInventory {
            item: input["item"].as_str()?.to_string(),
            delta: input["delta"].as_i64()?,
        }),
        "adjust_affinity" => Some(ToolMutation::AdjustAffinity {
            character: input["character"].as_str()?.to_string(),
            delta: input["delta"].as_i64()? as i32,
        }),
        "set_character_status" => {
            let status = match input["status"].as_str()? {
                "alive" => CharacterStatus::Alive,
                "wounded" => CharacterStatus::Wounded,
                "missing" => CharacterStatus::Missing,
                "dead" => CharacterStatus::Dead,
                _ => return None,
            };
            Some(ToolMutation::SetCharacterStatus {
                character: input["character"].as_str()?.to_string(),
                status,
            })
        }
        "move_character" => Some(ToolMutation::MoveCharacter {
            character: input["character"].as_str()?.to_string(),
            location: input["location"].as_str()?.to_string(),
        }),
        "adjust_reputation" => Some(ToolMutation::AdjustReputation {
            faction: input["faction"].as_str()?.to_string(),
            delta: input["delta"].as_i64()? as i32,
        }),
        "create_quest" => Some(ToolMutation::CreateQuest {
            id: input["id"].as_str()?.to_string(),
            name: input["name"].as_str()?.to_string(),
            description: input["description"].as_str().unwrap_or("").to_string(),
        }),
        "complete_quest" => Some(ToolMutation::CompleteQuest {
            id: input["id"].as_str()?.to_string(),
        }),
        "record_lore" => Some(ToolMutation::RecordLore {
            id: input["id"].as_str()?.to_string(),
        }),
        "record_conflict" => Some(ToolMutation::RecordConflict {
            first: input["first"].as_str()?.to_string(),
            second: input["second"].as_str()?.to_string(),
            reason: input["reason"].as_str().unwrap_or("").to_string(),
        }),
        "learn_skill" => Some(ToolMutation::LearnSkill {
            skill: input["skill"].as_str()?.to_string(),
        }),
        "change_location" => Some(ToolMutation::ChangeLocation {
            location: input["location"].as_str()?.to_string(),
        }),
        _ => None,
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Applies tool calls as independent read-merge-write cycles for one player.
///
/// Effects are durably visible on re-read after the engine call returns; the
/// executor also tracks which aggregate parts were touched and keeps a log of
/// every invocation for provenance.
pub struct ToolExecutor {
    store: Arc<dyn StateStore>,
    player: PlayerId,
    touched: Mutex<TouchedFields>,
    log: Mutex<Vec<ToolInvocation>>,
}

impl ToolExecutor {
    pub fn new(store: Arc<dyn StateStore>, player: PlayerId) -> Self {
        Self {
            store,
            player,
            touched: Mutex::new(TouchedFields::default()),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Execute one named tool call and return the result to feed back to the
    /// engine. Unknown tools and store failures come back as error results
    /// rather than terminating the turn.
    pub async fn execute(&self, name: &str, input: &Value) -> ToolResult {
        let result = match parse_tool_call(name, input) {
            Some(mutation) => match self.commit(&mutation).await {
                Ok(summary) => ToolResult::success(summary),
                Err(e) => ToolResult::error(format!("Tool {name} failed: {e}")),
            },
            None => ToolResult::error(format!("Unknown tool or bad parameters: {name}")),
        };

        self.log
            .lock()
            .expect("tool log lock")
            .push(ToolInvocation {
                name: name.to_string(),
                input: input.clone(),
                output: result.content.clone(),
                is_error: result.is_error,
            });

        result
    }

    /// One read-merge-write cycle.
    async fn commit(&self, mutation: &ToolMutation) -> Result<String, StoreError> {
        let mut state = self
            .store
            .get(self.player)
            .await?
            .ok_or_else(|| StoreError::Unavailable(format!("no state for {}", self.player)))?;

        let summary = mutation.apply(&mut state);
        self.store.put(self.player, &state).await?;

        self.touched
            .lock()
            .expect("touched lock")
            .record(mutation.field());

        debug!(player = %self.player, mutation = ?mutation.field(), "tool mutation committed");
        Ok(summary)
    }

    /// Aggregate parts tools touched so far this turn.
    pub fn touched(&self) -> TouchedFields {
        self.touched.lock().expect("touched lock").clone()
    }

    /// Drain the invocation log.
    pub fn take_log(&self) -> Vec<ToolInvocation> {
        std::mem::take(&mut *self.log.lock().expect("tool log lock"))
    }
}
