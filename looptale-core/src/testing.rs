//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `MockEngine` for deterministic turns without API calls
//! - `FailingStore` for exercising store-failure paths
//! - `TestHarness` for scripted game scenarios
//! - Assertion helpers for verifying state invariants

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::tools::ToolExecutor;
use crate::engine::{EngineError, EngineTurn, NarrativeEngine, StateProjection, TurnDelta};
use crate::session::{GameSession, SessionConfig};
use crate::state::{GameState, PlayerId};
use crate::store::{MemoryStore, StateStore, StoreError};
use crate::turn::TurnOutcome;

// ============================================================================
// Scripted engine
// ============================================================================

/// One scripted engine turn: tool calls to commit, then a delta to return.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    /// Tool calls executed through the real executor, in order.
    pub tool_calls: Vec<(String, Value)>,

    /// The delta returned after the tool calls commit.
    pub delta: TurnDelta,
}

impl ScriptedTurn {
    /// A simple narrative turn with a safe choice list.
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            tool_calls: Vec::new(),
            delta: TurnDelta {
                narrative: text.into(),
                choices: vec!["Continue".to_string()],
                ..TurnDelta::default()
            },
        }
    }

    /// A turn built from a raw delta.
    pub fn from_delta(delta: TurnDelta) -> Self {
        Self {
            tool_calls: Vec::new(),
            delta,
        }
    }

    pub fn with_choices(mut self, choices: &[&str]) -> Self {
        self.delta.choices = choices.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Queue a tool call to run through the executor before the delta lands.
    pub fn with_tool_call(mut self, name: &str, input: Value) -> Self {
        self.tool_calls.push((name.to_string(), input));
        self
    }

    /// Mark this turn as killing the player.
    pub fn with_game_over(mut self, outcome: impl Into<String>) -> Self {
        self.delta.is_game_over = true;
        self.delta.last_outcome = outcome.into();
        self.delta.choices.clear();
        self
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.delta.last_outcome = outcome.into();
        self
    }

    pub fn with_checkpoint(mut self, reason: impl Into<String>) -> Self {
        self.delta.should_set_checkpoint = true;
        self.delta.checkpoint_reason = Some(reason.into());
        self
    }

    /// Force an immediate rewind, optionally with a narrative reason.
    pub fn with_rewind(mut self, reason: Option<&str>) -> Self {
        self.delta.should_trigger_rewind = true;
        self.delta.rewind_reason = reason.map(str::to_string);
        self
    }
}

#[derive(Debug)]
enum Script {
    Turn(Box<ScriptedTurn>),
    Failure(String),
    Hang,
}

/// A mock engine that plays back scripted turns in order.
///
/// Scripted tool calls run through the real executor, so the out-of-band
/// commit path behaves exactly as it does with the live narrator.
#[derive(Default)]
pub struct MockEngine {
    script: Mutex<VecDeque<Script>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a scripted turn.
    pub fn queue_turn(&self, turn: ScriptedTurn) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Script::Turn(Box::new(turn)));
    }

    /// Queue a generation failure.
    pub fn queue_failure(&self, reason: impl Into<String>) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Script::Failure(reason.into()));
    }

    /// Queue a turn that never returns, for timeout tests.
    pub fn queue_hang(&self) {
        self.script
            .lock()
            .expect("script lock")
            .push_back(Script::Hang);
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().expect("script lock").len()
    }
}

#[async_trait]
impl NarrativeEngine for MockEngine {
    async fn run_turn(
        &self,
        _projection: &StateProjection,
        _action: &str,
        tools: &ToolExecutor,
    ) -> Result<EngineTurn, EngineError> {
        let script = self.script.lock().expect("script lock").pop_front();

        match script {
            Some(Script::Turn(turn)) => {
                for (name, input) in &turn.tool_calls {
                    tools.execute(name, input).await;
                }
                Ok(EngineTurn {
                    delta: turn.delta,
                    tool_log: tools.take_log(),
                })
            }
            Some(Script::Failure(reason)) => Err(EngineError::MalformedDelta(reason)),
            Some(Script::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(EngineError::MalformedDelta("hang elapsed".to_string()))
            }
            None => Ok(EngineTurn {
                delta: TurnDelta {
                    narrative: "The narrator has no more scripted turns.".to_string(),
                    choices: vec!["Wait".to_string()],
                    ..TurnDelta::default()
                },
                tool_log: Vec::new(),
            }),
        }
    }
}

// ============================================================================
// Failing store
// ============================================================================

/// A store wrapper that fails the nth `get`, counting from 1.
///
/// A turn with no tool calls performs two gets (prior read, post-generation
/// re-read), so `fail_get_on(2)` exercises the degraded-merge path. Tool
/// calls add one get each between the two.
pub struct FailingStore {
    inner: MemoryStore,
    gets: AtomicUsize,
    fail_get_on: usize,
}

impl FailingStore {
    pub fn fail_get_on(n: usize) -> Self {
        Self {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
            fail_get_on: n,
        }
    }
}

#[async_trait]
impl StateStore for FailingStore {
    async fn get(&self, player: PlayerId) -> Result<Option<GameState>, StoreError> {
        let count = self.gets.fetch_add(1, Ordering::SeqCst) + 1;
        if count == self.fail_get_on {
            return Err(StoreError::Unavailable("scripted get failure".to_string()));
        }
        self.inner.get(player).await
    }

    async fn put(&self, player: PlayerId, state: &GameState) -> Result<(), StoreError> {
        self.inner.put(player, state).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness wiring a memory store, a mock engine, and a session.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<MockEngine>,
    pub session: GameSession,
    pub player: PlayerId,
}

impl TestHarness {
    /// Harness with default config and a seeded new game.
    pub async fn new() -> Self {
        Self::with_config(SessionConfig::new()).await
    }

    pub async fn with_config(config: SessionConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(MockEngine::new());
        let session = GameSession::new(config, store.clone(), engine.clone());
        let player = PlayerId::new();
        session.new_game(player).await.expect("new game");

        Self {
            store,
            engine,
            session,
            player,
        }
    }

    /// Queue a scripted turn.
    pub fn expect_turn(&self, turn: ScriptedTurn) -> &Self {
        self.engine.queue_turn(turn);
        self
    }

    /// Send player input and get the turn outcome.
    pub async fn input(&self, action: &str) -> TurnOutcome {
        self.session
            .start_turn(self.player, action)
            .await
            .expect("turn")
    }

    /// Current persisted state.
    pub async fn state(&self) -> GameState {
        self.session
            .state(self.player)
            .await
            .expect("state read")
            .expect("state present")
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the loop counter value.
#[track_caller]
pub fn assert_loop(state: &GameState, expected: u32) {
    assert_eq!(
        state.current_loop, expected,
        "Expected loop #{expected}, got #{}",
        state.current_loop
    );
}

/// Assert the checkpoint exists and respects the depth-1 invariant.
#[track_caller]
pub fn assert_checkpoint_depth_one(state: &GameState) {
    let checkpoint = state
        .checkpoint
        .as_ref()
        .expect("Expected a checkpoint to be set");
    assert!(
        checkpoint.checkpoint.is_none(),
        "Checkpoint must not nest another checkpoint"
    );
}

/// Assert the state is playable: alive states always offer choices.
#[track_caller]
pub fn assert_playable(state: &GameState) {
    assert!(!state.narrative.is_empty(), "Narrative must not be blank");
    if !state.is_game_over {
        assert!(
            !state.choices.is_empty(),
            "A live state must offer at least one choice"
        );
    }
}

/// Assert a specific choice is on offer.
#[track_caller]
pub fn assert_choice_present(state: &GameState, choice: &str) {
    assert!(
        state.choices.iter().any(|c| c == choice),
        "Expected choice '{choice}' among {:?}",
        state.choices
    );
}
