use crate::models::{GamesDocument, PicksDocument};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Storage key for a player's picks in the local fallback: `picks_<player>_week_<week>`
pub fn local_picks_key(player: &str, week: u32) -> String {
    format!("picks_{}_week_{}", player, week)
}

/// Local-only picks persistence, one JSON file per (player, week).
///
/// No versioning and no conflict detection; a single local writer is assumed.
#[derive(Debug, Clone)]
pub struct LocalPicksStore {
    dir: PathBuf,
}

impl LocalPicksStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, player: &str, week: u32) -> PathBuf {
        self.dir
            .join(format!("{}.json", local_picks_key(player, week)))
    }

    /// Save a picks document, replacing any earlier one for the same player and week
    pub fn save(&self, doc: &PicksDocument) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create picks directory: {:?}", self.dir))?;
        let path = self.path_for(&doc.player, doc.week);
        let json = serde_json::to_string_pretty(doc).context("Failed to serialize picks")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write picks file: {:?}", path))?;
        Ok(path)
    }

    /// Load the picks saved for a player and week, if any
    pub fn load(&self, player: &str, week: u32) -> Result<Option<PicksDocument>> {
        let path = self.path_for(player, week);
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read picks file: {:?}", path))?;
        let doc = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse picks file: {:?}", path))?;
        Ok(Some(doc))
    }
}

/// Save the weekly games document to a JSON file
pub fn save_games_file(games: &GamesDocument, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(games).context("Failed to serialize games data")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write games file: {:?}", path))?;
    Ok(())
}

/// Load the weekly games document from a JSON file
pub fn load_games_file(path: &Path) -> Result<GamesDocument> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read games file: {:?}", path))?;
    let games = serde_json::from_str(&json).context("Failed to deserialize games data")?;
    Ok(games)
}
