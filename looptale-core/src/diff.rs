//! Divergence analysis between a live state and its rewind target.
//!
//! [`diff`] is a pure function producing a categorized, severity-graded
//! [`LossReport`]. It runs in two modes: `Preview` compares the live state to
//! its still-active checkpoint for display, `Final` is computed at the moment
//! of rewind and stored permanently on the resulting state.

use serde::{Deserialize, Serialize};

use crate::state::GameState;

/// Which comparison is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Non-destructive comparison against the live checkpoint.
    Preview,
    /// Computed at rewind time; what the report describes is about to be
    /// discarded.
    Final,
}

/// Category of a loss entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossCategory {
    Inventory,
    Relationship,
    Quest,
    Skill,
    Location,
    Knowledge,
}

/// How much the player stands to lose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

/// One categorized difference between the two states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossEntry {
    pub category: LossCategory,
    pub description: String,
    pub details: Vec<String>,
    pub severity: Severity,
}

/// The full divergence report. Categories with no qualifying differences are
/// omitted entirely.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LossReport {
    pub entries: Vec<LossEntry>,
}

impl LossReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry for a category, if any.
    pub fn entry(&self, category: LossCategory) -> Option<&LossEntry> {
        self.entries.iter().find(|e| e.category == category)
    }

    /// All entries for a category.
    pub fn entries_for(&self, category: LossCategory) -> Vec<&LossEntry> {
        self.entries
            .iter()
            .filter(|e| e.category == category)
            .collect()
    }
}

/// Minimum affinity delta that registers as a relationship change.
const AFFINITY_NOISE_FLOOR: i32 = 5;
/// Affinity delta above which a relationship change is major.
const AFFINITY_MAJOR: i32 = 20;
/// Lost item count above which the inventory entry is major.
const ITEMS_MAJOR: usize = 3;
/// Lost item count above which the inventory entry is moderate.
const ITEMS_MODERATE: usize = 1;
/// Lost skill count above which the skill entry is major.
const SKILLS_MAJOR: usize = 2;
/// Lost lore count above which the knowledge entry is major.
const LORE_MAJOR: usize = 3;

/// Compute the divergence between `current` and `reference`.
///
/// Entries appear in fixed category order: inventory, relationship, quest,
/// skill, location, knowledge.
pub fn diff(current: &GameState, reference: &GameState, mode: DiffMode) -> LossReport {
    let mut entries = Vec::new();

    diff_inventory(current, reference, mode, &mut entries);
    diff_relationships(current, reference, &mut entries);
    diff_quests(current, reference, &mut entries);
    diff_skills(current, reference, &mut entries);
    diff_location(current, reference, &mut entries);
    diff_knowledge(current, reference, &mut entries);

    LossReport { entries }
}

fn diff_inventory(
    current: &GameState,
    reference: &GameState,
    mode: DiffMode,
    entries: &mut Vec<LossEntry>,
) {
    let reference_ids = reference.inventory_ids();
    let new_ids: Vec<String> = current
        .inventory_ids()
        .into_iter()
        .filter(|id| !reference_ids.contains(id))
        .map(str::to_string)
        .collect();

    if new_ids.is_empty() {
        return;
    }

    let severity = if new_ids.len() > ITEMS_MAJOR {
        Severity::Major
    } else if new_ids.len() > ITEMS_MODERATE {
        Severity::Moderate
    } else {
        Severity::Minor
    };

    let description = match mode {
        DiffMode::Preview => format!("{} item(s) gained since the checkpoint", new_ids.len()),
        DiffMode::Final => format!("{} item(s) lost to the rewind", new_ids.len()),
    };

    entries.push(LossEntry {
        category: LossCategory::Inventory,
        description,
        details: new_ids,
        severity,
    });
}

fn diff_relationships(current: &GameState, reference: &GameState, entries: &mut Vec<LossEntry>) {
    for (name, character) in &current.characters {
        let Some(reference_character) = reference.characters.get(name) else {
            continue;
        };

        let delta = (character.affinity - reference_character.affinity).abs();
        if delta < AFFINITY_NOISE_FLOOR {
            continue;
        }

        let severity = if delta > AFFINITY_MAJOR {
            Severity::Major
        } else {
            Severity::Moderate
        };

        entries.push(LossEntry {
            category: LossCategory::Relationship,
            description: format!("Bond with {name} shifts by {delta}"),
            details: vec![format!(
                "{name}: {} -> {}",
                character.affinity, reference_character.affinity
            )],
            severity,
        });
    }
}

fn diff_quests(current: &GameState, reference: &GameState, entries: &mut Vec<LossEntry>) {
    let reference_ids = reference.active_quest_ids();
    let new_quests: Vec<String> = current
        .active_quests
        .iter()
        .filter(|q| !reference_ids.contains(q.id.as_str()))
        .map(|q| q.name.clone())
        .collect();

    if new_quests.is_empty() {
        return;
    }

    entries.push(LossEntry {
        category: LossCategory::Quest,
        description: format!("{} quest(s) in progress fall away", new_quests.len()),
        details: new_quests,
        severity: Severity::Moderate,
    });
}

fn diff_skills(current: &GameState, reference: &GameState, entries: &mut Vec<LossEntry>) {
    let new_skills: Vec<String> = current
        .skills
        .difference(&reference.skills)
        .cloned()
        .collect();

    if new_skills.is_empty() {
        return;
    }

    let severity = if new_skills.len() > SKILLS_MAJOR {
        Severity::Major
    } else {
        Severity::Moderate
    };

    entries.push(LossEntry {
        category: LossCategory::Skill,
        description: format!("{} learned skill(s) unravel", new_skills.len()),
        details: new_skills,
        severity,
    });
}

fn diff_location(current: &GameState, reference: &GameState, entries: &mut Vec<LossEntry>) {
    if current.current_location == reference.current_location {
        return;
    }

    entries.push(LossEntry {
        category: LossCategory::Location,
        description: format!("Position returns to {}", reference.current_location),
        details: vec![current.current_location.clone()],
        severity: Severity::Minor,
    });
}

fn diff_knowledge(current: &GameState, reference: &GameState, entries: &mut Vec<LossEntry>) {
    let new_lore: Vec<String> = current
        .discovered_lore
        .difference(&reference.discovered_lore)
        .cloned()
        .collect();

    if new_lore.is_empty() {
        return;
    }

    let severity = if new_lore.len() > LORE_MAJOR {
        Severity::Major
    } else {
        Severity::Moderate
    };

    entries.push(LossEntry {
        category: LossCategory::Knowledge,
        description: format!("{} piece(s) of lore fade from the world", new_lore.len()),
        details: new_lore,
        severity,
    });
}
