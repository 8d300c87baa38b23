//! System prompt assembly for the narrator.

use super::StateProjection;

/// Build the narrator system prompt for one turn.
pub fn narrator_system_prompt(projection: &StateProjection) -> String {
    let mut prompt = String::new();

    prompt.push_str(include_str!("prompts/narrator_base.txt"));

    prompt.push_str("\n\n");
    prompt.push_str(include_str!("prompts/loop_rules.txt"));

    prompt.push_str("\n\n");
    prompt.push_str(include_str!("prompts/turn_report.txt"));

    prompt.push_str("\n\n## Current Situation\n");
    prompt.push_str(&format!("Loop: #{}\n", projection.current_loop));
    prompt.push_str(&format!("Location: {}\n", projection.location));
    prompt.push_str(&format!(
        "Checkpoint: {}\n",
        if projection.has_checkpoint {
            "set"
        } else {
            "none yet (death falls back to the opening)"
        }
    ));
    if projection.is_game_over {
        prompt.push_str("The player is currently dead and viewing the game-over screen.\n");
    }

    if !projection.narrative.is_empty() {
        prompt.push_str("\n## Last Scene\n");
        prompt.push_str(&projection.narrative);
        prompt.push('\n');
    }

    if !projection.characters.is_empty() {
        prompt.push_str("\n## Characters\n");
        for (name, character) in &projection.characters {
            prompt.push_str(&format!(
                "- {name}: affinity {}, {}, at {}\n",
                character.affinity,
                character.status.name(),
                character.location
            ));
        }
    }

    if !projection.inventory.is_empty() {
        prompt.push_str("\n## Inventory\n");
        for stack in &projection.inventory {
            prompt.push_str(&format!("- {} x{}\n", stack.id, stack.quantity));
        }
    }

    if !projection.active_quests.is_empty() {
        prompt.push_str("\n## Active Quests\n");
        for quest in &projection.active_quests {
            prompt.push_str(&format!("- {quest}\n"));
        }
    }

    if !projection.reputation.is_empty() {
        prompt.push_str("\n## Faction Standing\n");
        for (faction, value) in &projection.reputation {
            prompt.push_str(&format!("- {faction}: {value}\n"));
        }
    }

    if !projection.skills.is_empty() {
        prompt.push_str(&format!("\n## Skills\n{}\n", projection.skills.join(", ")));
    }

    if !projection.memory.is_empty() {
        prompt.push_str("\n## What the Player Remembers Across Loops\n");
        prompt.push_str(&projection.memory);
        prompt.push('\n');
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GameState;

    #[test]
    fn test_prompt_includes_projection_sections() {
        let mut state = GameState::opening();
        state.adjust_item("rope", 1);
        state.reputation.insert("Gate Wardens".to_string(), -2);
        state.append_memory("The cellar floods at dawn.");

        let prompt = narrator_system_prompt(&StateProjection::from_state(&state));

        assert!(prompt.contains("Loop: #1"));
        assert!(prompt.contains("rope x1"));
        assert!(prompt.contains("Gate Wardens: -2"));
        assert!(prompt.contains("The cellar floods at dawn."));
        assert!(prompt.contains("```json"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let prompt = narrator_system_prompt(&StateProjection::from_state(&GameState::opening()));
        assert!(!prompt.contains("## Inventory"));
        assert!(!prompt.contains("## Faction Standing"));
        assert!(!prompt.contains("## What the Player Remembers"));
    }
}
