//! QA tests for the checkpoint/rewind contract.
//!
//! Each test pins one of the properties the loop mechanic depends on:
//! depth-1 checkpoints, monotonic loop counters, memory retention, and the
//! divergence report thresholds.

use serde_json::json;

use looptale_core::state::{Character, ItemStack};
use looptale_core::testing::{assert_checkpoint_depth_one, assert_loop, ScriptedTurn, TestHarness};
use looptale_core::{
    diff, DiffMode, GameState, LossCategory, RewindEngine, RewindTrigger, Severity,
};

// =============================================================================
// Checkpoint invariants
// =============================================================================

#[tokio::test]
async fn test_no_recursive_nesting_across_repeated_checkpoints() {
    let harness = TestHarness::new().await;

    for i in 0..4 {
        harness
            .session
            .set_checkpoint(harness.player, Some(format!("anchor {i}")))
            .await
            .expect("checkpoint");
        assert_checkpoint_depth_one(&harness.state().await);
    }
}

#[tokio::test]
async fn test_no_recursive_nesting_survives_rewind() {
    let harness = TestHarness::new().await;
    harness
        .session
        .set_checkpoint(harness.player, None)
        .await
        .expect("checkpoint");

    let rewound = harness
        .session
        .trigger_rewind(harness.player)
        .await
        .expect("rewind");
    assert_checkpoint_depth_one(&rewound);
}

#[tokio::test]
async fn test_checkpoint_idempotence_via_session() {
    let harness = TestHarness::new().await;

    let first = harness
        .session
        .set_checkpoint(harness.player, Some("first".to_string()))
        .await
        .expect("checkpoint");
    let second = harness
        .session
        .set_checkpoint(harness.player, Some("second".to_string()))
        .await
        .expect("checkpoint");

    let first_payload = first.checkpoint.expect("payload");
    let second_payload = second.checkpoint.expect("payload");

    // Same payload up to the recorded reason
    assert_eq!(first_payload.narrative, second_payload.narrative);
    assert_eq!(first_payload.inventory, second_payload.inventory);
    assert_eq!(first_payload.current_loop, second_payload.current_loop);
    assert_eq!(first_payload.memory, second_payload.memory);
}

// =============================================================================
// Rewind field equivalence
// =============================================================================

#[test]
fn test_rewind_field_equivalence() {
    let mut state = GameState::opening();
    state.adjust_item("lantern", 1);
    state.current_location = "Gatehouse".to_string();
    state
        .characters
        .insert("Emilia".to_string(), Character::new("Gatehouse").with_affinity(30));
    state.append_memory("The portcullis sticks halfway.");

    let mut live = state.clone();
    looptale_core::checkpoint::set_checkpoint(&mut live, Some("gatehouse".to_string()));
    let reference = live.checkpoint.clone().expect("reference");

    live.adjust_item("stolen_key", 1);
    live.current_location = "Undercroft".to_string();
    live.is_game_over = true;
    live.last_outcome = "Drowned in the cistern".to_string();

    let engine = RewindEngine::new(GameState::opening());
    let next = engine.rewind(&live, RewindTrigger::AiAutomatic, None);

    // Every field matches the reference except the enumerated ones
    assert_eq!(next.narrative, reference.narrative);
    assert_eq!(next.choices, reference.choices);
    assert_eq!(next.characters, reference.characters);
    assert_eq!(next.inventory, reference.inventory);
    assert_eq!(next.skills, reference.skills);
    assert_eq!(next.active_quests, reference.active_quests);
    assert_eq!(next.completed_quests, reference.completed_quests);
    assert_eq!(next.reputation, reference.reputation);
    assert_eq!(next.current_location, reference.current_location);
    assert_eq!(next.discovered_lore, reference.discovered_lore);
    assert_eq!(next.conflicts, reference.conflicts);
    assert_eq!(next.checkpoint_reason, reference.checkpoint_reason);

    // The fields that must differ
    assert_eq!(next.current_loop, live.current_loop + 1);
    assert!(!next.is_game_over);
    assert!(next.memory.starts_with(&reference.memory));
    assert!(next.memory.len() > reference.memory.len());
    assert!(next.last_rbd_losses.is_some());
    assert_eq!(next.rbd_trigger, Some(RewindTrigger::AiAutomatic));
    assert_eq!(next.last_death_cause.as_deref(), Some("Drowned in the cistern"));
}

// =============================================================================
// Loop monotonicity and memory retention
// =============================================================================

#[tokio::test]
async fn test_loop_counter_across_many_deaths() {
    let harness = TestHarness::new().await;
    harness
        .session
        .set_checkpoint(harness.player, Some("anchor".to_string()))
        .await
        .expect("checkpoint");

    for expected_loop in 2..=5 {
        harness.expect_turn(
            ScriptedTurn::narrative("It ends badly.")
                .with_game_over(format!("Death #{}", expected_loop - 1))
                .with_rewind(None),
        );
        let outcome = harness.input("try something reckless").await;
        assert_loop(&outcome.state, expected_loop);
        assert_eq!(outcome.state.rbd_trigger, Some(RewindTrigger::AiAutomatic));
    }
}

#[tokio::test]
async fn test_memory_accumulates_across_loops() {
    let harness = TestHarness::new().await;
    harness
        .session
        .set_checkpoint(harness.player, None)
        .await
        .expect("checkpoint");

    harness.expect_turn(
        ScriptedTurn::narrative("The merchant smiles, then strikes.")
            .with_game_over("Stabbed by the smiling merchant")
            .with_rewind(None),
    );
    harness.input("trust the merchant").await;

    harness.expect_turn(
        ScriptedTurn::narrative("The dog was a bad idea.")
            .with_game_over("Mauled by the gate hound")
            .with_rewind(None),
    );
    let outcome = harness.input("pet the hound").await;

    // Failure lines stack; the old one is a strict prefix of the new log
    let memory = &outcome.state.memory;
    let first = memory
        .find("[Loop #1 Failed: Stabbed by the smiling merchant]")
        .expect("first failure line");
    let second = memory
        .find("[Loop #2 Failed: Mauled by the gate hound]")
        .expect("second failure line");
    assert!(first < second);
}

// =============================================================================
// Divergence scenarios
// =============================================================================

#[test]
fn test_scenario_a_inventory_severity_steps() {
    let mut reference = GameState::opening();
    reference.inventory = vec![ItemStack::new("A", 1)];

    let mut current = reference.clone();
    current.inventory = vec![
        ItemStack::new("A", 1),
        ItemStack::new("B", 1),
        ItemStack::new("C", 1),
    ];

    let report = diff(&current, &reference, DiffMode::Final);
    let entry = report.entry(LossCategory::Inventory).expect("entry");
    assert_eq!(entry.details.len(), 2);
    assert_eq!(entry.severity, Severity::Moderate);

    // A fourth lost item tips it to major
    current.inventory.push(ItemStack::new("D", 1));
    current.inventory.push(ItemStack::new("E", 1));
    let report = diff(&current, &reference, DiffMode::Final);
    let entry = report.entry(LossCategory::Inventory).expect("entry");
    assert_eq!(entry.details.len(), 4);
    assert_eq!(entry.severity, Severity::Major);
}

#[test]
fn test_scenario_b_emilia_affinity_delta() {
    let mut reference = GameState::opening();
    reference
        .characters
        .insert("Emilia".to_string(), Character::new("Chapel").with_affinity(55));

    let mut current = reference.clone();
    current
        .characters
        .insert("Emilia".to_string(), Character::new("Chapel").with_affinity(80));

    let report = diff(&current, &reference, DiffMode::Final);
    let entry = report.entry(LossCategory::Relationship).expect("entry");
    assert_eq!(entry.severity, Severity::Major);
    assert!(entry.description.contains("Emilia"));
    assert!(entry.description.contains("25"));
}

#[tokio::test]
async fn test_scenario_c_rewind_without_checkpoint_falls_back() {
    let harness = TestHarness::new().await;

    // Play forward without ever setting a checkpoint
    harness.expect_turn(
        ScriptedTurn::narrative("You wander deep into the fog.")
            .with_tool_call("change_location", json!({"location": "Fogbank"})),
    );
    harness.input("wander").await;

    let rewound = harness
        .session
        .trigger_rewind(harness.player)
        .await
        .expect("rewind");

    assert_loop(&rewound, 2);
    assert!(!rewound.is_game_over);
    assert_eq!(rewound.last_death_cause.as_deref(), Some("system error"));
    assert_eq!(
        rewound.current_location,
        GameState::opening().current_location
    );
}

#[test]
fn test_loss_report_empty_for_identical_inventories() {
    let mut reference = GameState::opening();
    reference.inventory = vec![ItemStack::new("A", 1), ItemStack::new("B", 2)];
    let current = reference.clone();

    let report = diff(&current, &reference, DiffMode::Final);
    assert!(report.entry(LossCategory::Inventory).is_none());
}

// =============================================================================
// Losses pinned at rewind time
// =============================================================================

#[tokio::test]
async fn test_final_losses_stored_on_rewound_state() {
    let harness = TestHarness::new().await;
    harness
        .session
        .set_checkpoint(harness.player, None)
        .await
        .expect("checkpoint");

    harness.expect_turn(
        ScriptedTurn::narrative("You learn much, then die for it.")
            .with_tool_call("adjust_inventory", json!({"item": "cipher_wheel", "delta": 1}))
            .with_tool_call("record_lore", json!({"id": "undercroft_rites"}))
            .with_game_over("Caught by the rite-keepers")
            .with_rewind(None),
    );

    let outcome = harness.input("spy on the rite").await;
    let losses = outcome.state.last_rbd_losses.as_ref().expect("losses");

    assert!(losses.entry(LossCategory::Inventory).is_some());
    assert!(losses.entry(LossCategory::Knowledge).is_some());
    // The rewound aggregate itself no longer carries what was lost
    assert!(outcome.state.inventory.is_empty());
    assert!(outcome.state.discovered_lore.is_empty());
}
