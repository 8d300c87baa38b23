//! Loop-bound interactive fiction engine with an AI narrator.
//!
//! This crate provides:
//! - The per-player state aggregate with a depth-1 checkpoint
//! - The rewind ("die and retry with retained memory") transition
//! - Divergence analysis between a live state and its checkpoint
//! - A turn coordinator reconciling tool-driven store mutations with the
//!   narrator's returned delta
//! - Keyed persistence backends
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use looptale_core::{GameSession, MemoryStore, PlayerId, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     let session = GameSession::from_env(SessionConfig::new(), store)?;
//!
//!     let player = PlayerId::new();
//!     session.new_game(player).await?;
//!
//!     let outcome = session.start_turn(player, "I walk toward the market").await?;
//!     println!("{}", outcome.state.narrative);
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod diff;
pub mod engine;
pub mod rewind;
pub mod session;
pub mod state;
pub mod store;
pub mod testing;
pub mod turn;

// Primary public API
pub use diff::{diff, DiffMode, LossCategory, LossEntry, LossReport, Severity};
pub use engine::{NarrativeEngine, Narrator, NarratorConfig, StateProjection, TurnDelta};
pub use rewind::{RewindEngine, RewindPhase};
pub use session::{GameSession, SessionConfig};
pub use state::{GameState, PlayerId, RewindTrigger};
pub use store::{JsonFileStore, MemoryStore, StateStore, StoreError};
pub use testing::{MockEngine, ScriptedTurn, TestHarness};
pub use turn::{TurnCoordinator, TurnError, TurnOutcome, TurnProvenance};
