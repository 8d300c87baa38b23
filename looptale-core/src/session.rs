//! GameSession - the primary public API.
//!
//! Wraps the store, the narrative engine, and the turn coordinator into a
//! single interface: start a game, take turns, set checkpoints, rewind, and
//! preview what a rewind would cost.

use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::set_checkpoint;
use crate::diff::{diff, DiffMode, LossReport};
use crate::engine::{EngineError, Narrator, NarratorConfig, NarrativeEngine};
use crate::state::{GameState, PlayerId, RewindTrigger};
use crate::store::StateStore;
use crate::turn::{TurnCoordinator, TurnError, TurnOutcome};

/// Default ceiling for one generation call.
const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration for creating a game session.
///
/// Carries the canonical initial aggregate explicitly; the session never
/// reaches for a hidden global default.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// The canonical new-game aggregate, also the implicit rewind target.
    pub initial_state: GameState,

    /// Opening scene override applied to the initial aggregate.
    pub opening_scene: Option<String>,

    /// Starting location override applied to the initial aggregate.
    pub starting_location: Option<String>,

    /// Ceiling for one generation call; on expiry the turn takes the
    /// recovered failure path.
    pub turn_timeout: Duration,

    /// Knobs passed through to the narrator when the session builds one.
    pub narrator: NarratorConfig,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            initial_state: GameState::opening(),
            opening_scene: None,
            starting_location: None,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            narrator: NarratorConfig::default(),
        }
    }

    /// Replace the canonical initial aggregate wholesale.
    pub fn with_initial_state(mut self, state: GameState) -> Self {
        self.initial_state = state;
        self
    }

    /// Set the opening scene text.
    pub fn with_opening_scene(mut self, scene: impl Into<String>) -> Self {
        self.opening_scene = Some(scene.into());
        self
    }

    /// Set the starting location.
    pub fn with_starting_location(mut self, location: impl Into<String>) -> Self {
        self.starting_location = Some(location.into());
        self
    }

    /// Set the generation timeout.
    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    /// Set narrator knobs (model, max tokens, temperature).
    pub fn with_narrator_config(mut self, narrator: NarratorConfig) -> Self {
        self.narrator = narrator;
        self
    }

    fn build_initial(&self) -> GameState {
        let mut initial = self.initial_state.clone();
        if let Some(ref scene) = self.opening_scene {
            initial.narrative = scene.clone();
        }
        if let Some(ref location) = self.starting_location {
            initial.current_location = location.clone();
        }
        initial
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A running game session over one store and one engine.
///
/// Distinct players are independent; all per-player state lives in the store.
pub struct GameSession {
    store: Arc<dyn StateStore>,
    coordinator: TurnCoordinator,
    initial: GameState,
}

impl GameSession {
    /// Create a session with an explicit engine (any [`NarrativeEngine`]).
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn StateStore>,
        engine: Arc<dyn NarrativeEngine>,
    ) -> Self {
        let initial = config.build_initial();
        let coordinator = TurnCoordinator::new(
            store.clone(),
            engine,
            initial.clone(),
            config.turn_timeout,
        );

        Self {
            store,
            coordinator,
            initial,
        }
    }

    /// Create a session backed by the Claude narrator.
    ///
    /// Requires `ANTHROPIC_API_KEY` to be set.
    pub fn from_env(config: SessionConfig, store: Arc<dyn StateStore>) -> Result<Self, EngineError> {
        let narrator = Narrator::from_env()?.with_config(config.narrator.clone());
        Ok(Self::new(config, store, Arc::new(narrator)))
    }

    /// Seed the store with the canonical initial aggregate for a new player.
    pub async fn new_game(&self, player: PlayerId) -> Result<GameState, TurnError> {
        let state = self.initial.clone();
        self.store.put(player, &state).await?;
        Ok(state)
    }

    /// Run one player turn through the coordinator.
    pub async fn start_turn(
        &self,
        player: PlayerId,
        action: &str,
    ) -> Result<TurnOutcome, TurnError> {
        self.coordinator.run_turn(player, action).await
    }

    /// Manually set a checkpoint at the current state.
    pub async fn set_checkpoint(
        &self,
        player: PlayerId,
        reason: Option<String>,
    ) -> Result<GameState, TurnError> {
        let mut state = self
            .store
            .get(player)
            .await?
            .ok_or(TurnError::UnknownPlayer(player))?;

        set_checkpoint(&mut state, reason);
        self.store.put(player, &state).await?;
        Ok(state)
    }

    /// Manually rewind to the checkpoint (or the opening aggregate when none
    /// was ever set).
    pub async fn trigger_rewind(&self, player: PlayerId) -> Result<GameState, TurnError> {
        let state = self
            .store
            .get(player)
            .await?
            .ok_or(TurnError::UnknownPlayer(player))?;

        let next = self
            .coordinator
            .rewind_engine()
            .rewind(&state, RewindTrigger::Manual, None);
        self.store.put(player, &next).await?;
        Ok(next)
    }

    /// Non-destructive preview of what a rewind would cost right now.
    pub async fn preview_potential_losses(
        &self,
        player: PlayerId,
    ) -> Result<LossReport, TurnError> {
        let state = self
            .store
            .get(player)
            .await?
            .ok_or(TurnError::UnknownPlayer(player))?;

        let target = self.coordinator.rewind_engine().rewind_target(&state);
        Ok(diff(&state, target, DiffMode::Preview))
    }

    /// Current persisted state for a player, if any.
    pub async fn state(&self, player: PlayerId) -> Result<Option<GameState>, TurnError> {
        Ok(self.store.get(player).await?)
    }

    /// The canonical initial aggregate this session was created with.
    pub fn initial_state(&self) -> &GameState {
        &self.initial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_builder() {
        let config = SessionConfig::new()
            .with_opening_scene("Rain on the gate.")
            .with_starting_location("Outer Wall")
            .with_turn_timeout(Duration::from_secs(5));

        let initial = config.build_initial();
        assert_eq!(initial.narrative, "Rain on the gate.");
        assert_eq!(initial.current_location, "Outer Wall");
        assert_eq!(config.turn_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_session_config_defaults_to_opening() {
        let config = SessionConfig::default();
        assert_eq!(config.build_initial(), GameState::opening());
    }
}
