//! QA smoke tests against the live narrator.
//!
//! These hit the real API and are ignored by default. Run with:
//! `cargo test -p looptale-core --test qa_live_narrator -- --ignored --nocapture`
//!
//! Requires ANTHROPIC_API_KEY to be set.

use std::sync::Arc;
use std::time::Duration;

use looptale_core::{GameSession, MemoryStore, PlayerId, SessionConfig};

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

/// Check if API key is available
fn has_api_key() -> bool {
    std::env::var("ANTHROPIC_API_KEY").is_ok()
}

#[tokio::test]
#[ignore]
async fn test_live_turn_produces_playable_state() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let config = SessionConfig::new().with_turn_timeout(Duration::from_secs(120));
    let session = GameSession::from_env(config, store).expect("session");

    let player = PlayerId::new();
    session.new_game(player).await.expect("new game");

    let outcome = session
        .start_turn(player, "I check my pockets and look around the gate.")
        .await
        .expect("turn");

    println!(
        "Narrative: {}...",
        outcome.state.narrative.chars().take(200).collect::<String>()
    );
    println!("Choices: {:?}", outcome.state.choices);
    println!("Tool calls: {}", outcome.tool_log.len());

    assert!(!outcome.state.narrative.is_empty());
    assert!(!outcome.state.choices.is_empty());
    assert!(!outcome.state.is_game_over);
}

#[tokio::test]
#[ignore]
async fn test_live_state_carries_across_turns() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: ANTHROPIC_API_KEY not set");
        return;
    }

    let store = Arc::new(MemoryStore::new());
    let config = SessionConfig::new().with_turn_timeout(Duration::from_secs(120));
    let session = GameSession::from_env(config, store).expect("session");

    let player = PlayerId::new();
    session.new_game(player).await.expect("new game");

    let first = session
        .start_turn(player, "I walk toward the market square.")
        .await
        .expect("turn");
    let second = session
        .start_turn(player, "I pick the first choice.")
        .await
        .expect("turn");

    println!("First loop: {}", first.state.current_loop);
    println!("Second narrative: {}...",
        second.state.narrative.chars().take(200).collect::<String>()
    );

    assert_eq!(first.state.current_loop, second.state.current_loop);
    assert!(!second.state.narrative.is_empty());
}
