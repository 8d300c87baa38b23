//! Keyed persistence for player state aggregates.
//!
//! One aggregate per player, get/put semantics only: the latest put wins and
//! no schema validation happens at this layer. Backends: an in-memory store
//! for tests and single-process play, and a versioned JSON-file store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

use crate::state::{GameState, PlayerId};

/// Errors from store operations. Never swallowed; the coordinator decides how
/// to degrade.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// Keyed store contract: reads return the latest put.
///
/// No locking and no versioning token; overlapping writers for the same
/// player race under last-write-wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, player: PlayerId) -> Result<Option<GameState>, StoreError>;
    async fn put(&self, player: PlayerId, state: &GameState) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory backend.
#[derive(Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<PlayerId, GameState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, player: PlayerId) -> Result<Option<GameState>, StoreError> {
        Ok(self.states.read().await.get(&player).cloned())
    }

    async fn put(&self, player: PlayerId, state: &GameState) -> Result<(), StoreError> {
        self.states.write().await.insert(player, state.clone());
        Ok(())
    }
}

// ============================================================================
// JSON file store
// ============================================================================

/// A saved aggregate with its envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedState {
    /// Save format version for compatibility checking.
    pub version: u32,

    /// When the save was written (epoch seconds).
    pub saved_at: String,

    /// The complete aggregate.
    pub state: GameState,

    /// Metadata about the save.
    pub metadata: SaveMetadata,
}

/// Quick-access metadata, readable without deserializing the aggregate (and
/// the checkpoint nested inside it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMetadata {
    pub player: PlayerId,
    pub loop_number: u32,
    pub location: String,
    pub game_over: bool,
}

/// One versioned JSON file per player under a base directory.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn save_path(&self, player: PlayerId) -> PathBuf {
        self.dir.join(format!("{player}.json"))
    }

    /// Read only the metadata of a player's save, if one exists.
    pub async fn peek(&self, player: PlayerId) -> Result<Option<SaveMetadata>, StoreError> {
        let path = self.save_path(player);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).await?;

        // Parse just enough to get metadata
        #[derive(Deserialize)]
        struct Partial {
            version: u32,
            metadata: SaveMetadata,
        }

        let partial: Partial = serde_json::from_str(&content)?;
        if partial.version != SAVE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SAVE_VERSION,
                found: partial.version,
            });
        }

        Ok(Some(partial.metadata))
    }

    /// List metadata for every save under the base directory.
    pub async fn list(&self) -> Result<Vec<SaveMetadata>, StoreError> {
        let mut saves = Vec::new();
        if !self.dir.exists() {
            return Ok(saves);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                if let Ok(metadata) = read_metadata(&path).await {
                    saves.push(metadata);
                }
            }
        }

        saves.sort_by_key(|m| m.player);
        Ok(saves)
    }
}

async fn read_metadata(path: &Path) -> Result<SaveMetadata, StoreError> {
    let content = fs::read_to_string(path).await?;

    #[derive(Deserialize)]
    struct Partial {
        version: u32,
        metadata: SaveMetadata,
    }

    let partial: Partial = serde_json::from_str(&content)?;
    if partial.version != SAVE_VERSION {
        return Err(StoreError::VersionMismatch {
            expected: SAVE_VERSION,
            found: partial.version,
        });
    }
    Ok(partial.metadata)
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn get(&self, player: PlayerId) -> Result<Option<GameState>, StoreError> {
        let path = self.save_path(player);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let saved: SavedState = serde_json::from_str(&content)?;

        if saved.version != SAVE_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        Ok(Some(saved.state))
    }

    async fn put(&self, player: PlayerId, state: &GameState) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).await?;

        let saved = SavedState {
            version: SAVE_VERSION,
            saved_at: epoch_now(),
            state: state.clone(),
            metadata: SaveMetadata {
                player,
                loop_number: state.current_loop,
                location: state.current_location.clone(),
                game_over: state.is_game_over,
            },
        };

        let content = serde_json::to_string_pretty(&saved)?;
        fs::write(self.save_path(player), content).await?;
        Ok(())
    }
}

/// Current timestamp as epoch seconds.
fn epoch_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}", now.as_secs())
}
