//! Picks synchronization
//!
//! Reconciles a player's in-memory picks with the remote picks document.
//! Saves read the current version before writing and retry once on a
//! version conflict. When no store is configured, or the store cannot be
//! reached, picks go to the local fallback instead.

use crate::api::{read_typed, DocumentStore, StoreError, WriteResult};
use crate::models::{picks_path, Game, Pick, PickError, PickSelection, PicksDocument, VersionToken};
use crate::utils::data::LocalPicksStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Where a save landed
#[derive(Debug, Clone, PartialEq)]
pub enum Persistence {
    Remote { version: VersionToken },
    Local { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved(Persistence),
    /// Another write landed between our version read and our write, twice in a row
    Conflict,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(PicksDocument),
    /// No document for this player, or the stored one is for another week
    NoPicks,
    Failed(String),
}

/// One player session's picks plus the stores they sync with
pub struct PicksEngine {
    remote: Option<Arc<dyn DocumentStore>>,
    local: LocalPicksStore,
    picks: Mutex<PickSelection>,
}

impl PicksEngine {
    pub fn new(remote: Option<Arc<dyn DocumentStore>>, local: LocalPicksStore) -> Self {
        Self {
            remote,
            local,
            picks: Mutex::new(PickSelection::new()),
        }
    }

    /// Whether saves and loads go to the remote store first
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    fn lock_picks(&self) -> MutexGuard<'_, PickSelection> {
        self.picks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of the unsaved in-memory picks
    pub fn picks(&self) -> PickSelection {
        self.lock_picks().clone()
    }

    /// Record a pick in memory, replacing the previous choice for that game and category
    pub fn select(&self, game: &Game, pick: Pick) -> Result<(), PickError> {
        self.lock_picks().select(game, pick)
    }

    /// Load a player's picks for `week`.
    ///
    /// On success the in-memory picks are replaced wholesale; on any other
    /// outcome they are left untouched.
    pub async fn load(&self, player: &str, week: u32) -> LoadOutcome {
        let result = match &self.remote {
            Some(store) => match load_remote(store.as_ref(), player, week).await {
                Err(e) if e.is_unreachable() => {
                    warn!(player, week, "Store unreachable, loading local picks: {}", e);
                    self.load_local(player, week)
                }
                other => other.map_err(|e| e.to_string()),
            },
            None => self.load_local(player, week),
        };

        match result {
            Ok(Some(doc)) => {
                info!(player, week, games = doc.picks.picked_games(), "Loaded picks");
                *self.lock_picks() = doc.picks.clone();
                LoadOutcome::Loaded(doc)
            }
            Ok(None) => LoadOutcome::NoPicks,
            Err(message) => LoadOutcome::Failed(message),
        }
    }

    /// Persist `selection` as the player's picks for `week`
    pub async fn save(&self, player: &str, week: u32, selection: &PickSelection) -> SaveOutcome {
        let doc = PicksDocument::new(player, week, selection.clone());

        if let Some(store) = &self.remote {
            match save_remote(store.as_ref(), &doc).await {
                Ok(written) => {
                    info!(player, week, version = %written.version, "Saved picks to store");
                    return SaveOutcome::Saved(Persistence::Remote {
                        version: written.version,
                    });
                }
                Err(e) if e.is_conflict() => {
                    warn!(player, week, "Save conflict after retry: {}", e);
                    return SaveOutcome::Conflict;
                }
                Err(e) if e.is_unreachable() => {
                    warn!(player, week, "Store unreachable, saving picks locally: {}", e);
                }
                Err(e) => return SaveOutcome::Failed(e.to_string()),
            }
        }

        match self.local.save(&doc) {
            Ok(path) => {
                info!(player, week, path = ?path, "Saved picks locally");
                SaveOutcome::Saved(Persistence::Local { path })
            }
            Err(e) => SaveOutcome::Failed(format!("{:#}", e)),
        }
    }

    fn load_local(&self, player: &str, week: u32) -> Result<Option<PicksDocument>, String> {
        match self.local.load(player, week) {
            Ok(Some(doc)) if doc.week == week => Ok(Some(doc)),
            Ok(_) => Ok(None),
            Err(e) => Err(format!("{:#}", e)),
        }
    }
}

/// Read the player's remote document, discarding it if it belongs to another week
async fn load_remote(
    store: &dyn DocumentStore,
    player: &str,
    week: u32,
) -> Result<Option<PicksDocument>, StoreError> {
    match read_typed::<PicksDocument>(store, &picks_path(player)).await? {
        Some((doc, _)) if doc.week == week => Ok(Some(doc)),
        Some((doc, _)) => {
            debug!(player, week, stored_week = doc.week, "Ignoring picks saved for another week");
            Ok(None)
        }
        None => Ok(None),
    }
}

async fn save_remote(store: &dyn DocumentStore, doc: &PicksDocument) -> Result<WriteResult, StoreError> {
    let path = picks_path(&doc.player);
    let content = serde_json::to_value(doc).map_err(|e| StoreError::CorruptDocument {
        path: path.clone(),
        details: e.to_string(),
    })?;
    let message = format!("Update {}'s picks for Week {}", doc.player, doc.week);

    match write_at_current_version(store, &path, &content, &message).await {
        Err(e) if e.is_conflict() => {
            warn!(path = %path, "Version conflict, retrying once with a fresh version");
            write_at_current_version(store, &path, &content, &message).await
        }
        other => other,
    }
}

/// Read the current version, then write against it; never concurrently
async fn write_at_current_version(
    store: &dyn DocumentStore,
    path: &str,
    content: &Value,
    message: &str,
) -> Result<WriteResult, StoreError> {
    let version = store.read_version(path).await?;
    store
        .write_document(path, content, message, version.as_ref())
        .await
}

/// Load every player's picks for `week`. Players whose picks fail to load are skipped.
pub async fn load_all_picks(
    store: &dyn DocumentStore,
    players: &[String],
    week: u32,
) -> BTreeMap<String, PicksDocument> {
    let mut all = BTreeMap::new();
    for player in players {
        match load_remote(store, player, week).await {
            Ok(Some(doc)) => {
                all.insert(player.clone(), doc);
            }
            Ok(None) => debug!(player = %player, week, "No picks for player"),
            Err(e) => warn!(player = %player, "Could not load picks: {}", e),
        }
    }
    all
}
