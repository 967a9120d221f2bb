use crate::models::{GamesDocument, Pick};
use crate::sync::{LoadOutcome, Persistence, PicksEngine, SaveOutcome};
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// Non-error status messages disappear after this long
pub const STATUS_DISMISS_AFTER: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

impl StatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusKind::Info => "info",
            StatusKind::Success => "success",
            StatusKind::Error => "error",
        }
    }
}

/// Transient status line shown to the player
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMessage {
    pub text: String,
    pub kind: StatusKind,
}

impl StatusMessage {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: StatusKind::Info,
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: StatusKind::Success,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: StatusKind::Error,
        }
    }

    /// Errors stay until replaced
    pub fn auto_dismiss(&self) -> Option<Duration> {
        (self.kind != StatusKind::Error).then_some(STATUS_DISMISS_AFTER)
    }
}

/// A player's picks page: turns user actions into engine calls and
/// engine outcomes into status messages.
pub struct PicksSession {
    engine: PicksEngine,
    week: u32,
    slate: RwLock<Arc<GamesDocument>>,
    player: RwLock<Option<String>>,
    status: Mutex<Option<StatusMessage>>,
}

impl PicksSession {
    pub fn new(engine: PicksEngine, slate: Arc<GamesDocument>) -> Self {
        Self {
            engine,
            week: slate.week,
            slate: RwLock::new(slate),
            player: RwLock::new(None),
            status: Mutex::new(None),
        }
    }

    pub fn slate(&self) -> Arc<GamesDocument> {
        self.slate
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a newer games list. Slates for another week are refused;
    /// a session belongs to one week.
    pub fn update_slate(&self, slate: Arc<GamesDocument>) -> bool {
        if slate.week != self.week {
            return false;
        }
        *self
            .slate
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = slate;
        true
    }

    pub fn engine(&self) -> &PicksEngine {
        &self.engine
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    pub fn player(&self) -> Option<String> {
        self.player
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Latest status message, if any
    pub fn status(&self) -> Option<StatusMessage> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Latest status for display. Errors stay until replaced; other
    /// messages are shown once.
    pub fn take_status(&self) -> Option<StatusMessage> {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match status.as_ref() {
            Some(message) if message.kind == StatusKind::Error => Some(message.clone()),
            _ => status.take(),
        }
    }

    fn report(&self, message: StatusMessage) -> StatusMessage {
        *self
            .status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(message.clone());
        message
    }

    /// Switch player; choosing a player loads their picks for the week
    pub async fn choose_player(&self, player: &str) -> Option<StatusMessage> {
        let player = player.trim();
        *self
            .player
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) =
            (!player.is_empty()).then(|| player.to_string());
        self.load().await
    }

    /// Record a pick for a game on the slate
    pub fn pick(&self, game_id: &str, category: &str, value: &str) -> StatusMessage {
        if self.player().is_none() {
            return self.report(StatusMessage::error("Please select your name first!"));
        }
        let slate = self.slate();
        let Some(game) = slate.find_game(game_id) else {
            return self.report(StatusMessage::error(format!("Unknown game: {}", game_id)));
        };

        let result = Pick::parse(category, value).and_then(|pick| self.engine.select(game, pick));
        match result {
            Ok(()) => self.report(StatusMessage::info("Pick updated! Don't forget to save.")),
            Err(e) => self.report(StatusMessage::error(e.to_string())),
        }
    }

    /// Save the in-memory picks. No-op without a player.
    pub async fn save(&self) -> Option<StatusMessage> {
        let player = self.player()?;
        let outcome = self
            .engine
            .save(&player, self.week(), &self.engine.picks())
            .await;

        let message = match outcome {
            SaveOutcome::Saved(Persistence::Remote { .. }) => {
                StatusMessage::success("Picks saved to GitHub! ✅")
            }
            SaveOutcome::Saved(Persistence::Local { .. }) if self.engine.has_remote() => {
                StatusMessage::success("Picks saved locally! ✅ (GitHub unreachable)")
            }
            SaveOutcome::Saved(Persistence::Local { .. }) => {
                StatusMessage::success("Picks saved locally! ✅ (GitHub not configured)")
            }
            SaveOutcome::Conflict => StatusMessage::error(
                "Save conflict: your picks were changed elsewhere. Please retry.",
            ),
            SaveOutcome::Failed(e) => StatusMessage::error(format!("Error saving picks: {}", e)),
        };
        Some(self.report(message))
    }

    /// Load the player's saved picks for the week. No-op without a player.
    pub async fn load(&self) -> Option<StatusMessage> {
        let player = self.player()?;
        let message = match self.engine.load(&player, self.week()).await {
            LoadOutcome::Loaded(_) => StatusMessage::success("Previous picks loaded! ✅"),
            LoadOutcome::NoPicks => StatusMessage::info("No previous picks found for this week."),
            LoadOutcome::Failed(e) => StatusMessage::error(format!("Error loading picks: {}", e)),
        };
        Some(self.report(message))
    }
}
