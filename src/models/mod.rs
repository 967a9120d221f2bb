use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Path of the shared weekly games document in the store
pub const GAMES_PATH: &str = "games.json";

/// Store path of a player's picks document
pub fn picks_path(player: &str) -> String {
    format!("picks/{}.json", player)
}

/// Kickoff timestamps in the games feed look like "2025-09-05 20:20"
mod kickoff_format {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M";

    pub fn serialize<S: Serializer>(value: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

pub use kickoff_format::FORMAT as KICKOFF_FORMAT;

/// Odds as shown to players: "+120", "-110", or the feed's text as-is
pub fn display_odds(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(x) if x > 0.0 => format!("+{}", n),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn display_total(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The feed writes lines as raw numbers; games keep them as display text
mod line_format {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn odds<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(super::display_odds(&Value::deserialize(d)?))
    }

    pub fn total<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(super::display_total(&Value::deserialize(d)?))
    }
}

/// An NFL game on the weekly slate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Game {
    pub id: String,
    pub week: u32,
    #[serde(with = "kickoff_format")]
    pub game_date: NaiveDateTime,
    pub away_team: String,
    pub home_team: String,
    #[serde(deserialize_with = "line_format::odds")]
    pub away_odds: String, // display string, e.g. "-110" or "+120"
    #[serde(deserialize_with = "line_format::odds")]
    pub home_odds: String,
    #[serde(deserialize_with = "line_format::total")]
    pub over_under: String, // total points line, e.g. "47.5"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matchup_link: Option<String>,
}

impl Game {
    /// Composite id used by the games feed: `<away>_<home>_<kickoff>`
    pub fn make_id(away_team: &str, home_team: &str, game_date: &NaiveDateTime) -> String {
        format!(
            "{}_{}_{}",
            away_team,
            home_team,
            game_date.format(KICKOFF_FORMAT)
        )
    }

    /// Whether `pick` is a legal choice on this game
    pub fn accepts(&self, pick: &Pick) -> bool {
        match pick {
            Pick::Spread(team) => team == &self.away_team || team == &self.home_team,
            Pick::Total(_) => true,
        }
    }
}

/// The shared `games.json` document written by the games feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GamesDocument {
    pub week: u32,
    pub week_start: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    pub players: Vec<String>,
    pub games: Vec<Game>,
}

impl GamesDocument {
    pub fn find_game(&self, game_id: &str) -> Option<&Game> {
        self.games.iter().find(|g| g.id == game_id)
    }

    /// Whether `player` is in the league for this week
    pub fn has_player(&self, player: &str) -> bool {
        self.players.iter().any(|p| p == player)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PickCategory {
    Spread,
    Total,
}

impl PickCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickCategory::Spread => "spread",
            PickCategory::Total => "total",
        }
    }
}

impl fmt::Display for PickCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickCategory {
    type Err = PickError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spread" => Ok(PickCategory::Spread),
            "total" => Ok(PickCategory::Total),
            other => Err(PickError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalPick {
    Over,
    Under,
}

impl fmt::Display for TotalPick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TotalPick::Over => write!(f, "over"),
            TotalPick::Under => write!(f, "under"),
        }
    }
}

/// A single choice for one category on one game
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pick {
    Spread(String), // team name
    Total(TotalPick),
}

impl Pick {
    /// Build a pick from the raw category/value pair used by forms and the CLI
    pub fn parse(category: &str, value: &str) -> Result<Self, PickError> {
        match category.parse::<PickCategory>()? {
            PickCategory::Spread => Ok(Pick::Spread(value.to_string())),
            PickCategory::Total => match value {
                "over" => Ok(Pick::Total(TotalPick::Over)),
                "under" => Ok(Pick::Total(TotalPick::Under)),
                other => Err(PickError::InvalidValue {
                    category: PickCategory::Total,
                    value: other.to_string(),
                }),
            },
        }
    }

    pub fn category(&self) -> PickCategory {
        match self {
            Pick::Spread(_) => PickCategory::Spread,
            Pick::Total(_) => PickCategory::Total,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PickError {
    #[error("Unknown pick category: {0}")]
    UnknownCategory(String),

    #[error("'{value}' is not a valid {category} pick")]
    InvalidValue {
        category: PickCategory,
        value: String,
    },

    #[error("'{team}' is not playing in game {game_id}")]
    UnknownTeam { team: String, game_id: String },

    #[error("Unknown game: {0}")]
    UnknownGame(String),
}

/// A player's picks for one game; at most one value per category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GamePicks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<TotalPick>,
}

impl GamePicks {
    pub fn is_empty(&self) -> bool {
        self.spread.is_none() && self.total.is_none()
    }
}

/// game id -> category -> chosen value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PickSelection(BTreeMap<String, GamePicks>);

impl PickSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pick, replacing any earlier choice for the same game and category
    pub fn set(&mut self, game_id: &str, pick: Pick) {
        let entry = self.0.entry(game_id.to_string()).or_default();
        match pick {
            Pick::Spread(team) => entry.spread = Some(team),
            Pick::Total(total) => entry.total = Some(total),
        }
    }

    /// Like [`PickSelection::set`], but rejects a spread pick for a team not in the game
    pub fn select(&mut self, game: &Game, pick: Pick) -> Result<(), PickError> {
        if let Pick::Spread(team) = &pick {
            if !game.accepts(&pick) {
                return Err(PickError::UnknownTeam {
                    team: team.clone(),
                    game_id: game.id.clone(),
                });
            }
        }
        self.set(&game.id, pick);
        Ok(())
    }

    pub fn get(&self, game_id: &str) -> Option<&GamePicks> {
        self.0.get(game_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &GamePicks)> {
        self.0.iter()
    }

    /// Number of games with at least one pick
    pub fn picked_games(&self) -> usize {
        self.0.values().filter(|p| !p.is_empty()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.picked_games() == 0
    }
}

/// The persisted unit: one per player, overwritten on every save
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PicksDocument {
    pub player: String,
    pub week: u32,
    pub picks: PickSelection,
    pub saved_at: DateTime<Utc>,
}

impl PicksDocument {
    pub fn new(player: &str, week: u32, picks: PickSelection) -> Self {
        Self {
            player: player.to_string(),
            week,
            picks,
            saved_at: Utc::now(),
        }
    }
}

/// Opaque optimistic-concurrency marker returned by the store on every read
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn kc_bal() -> Game {
        let kickoff = NaiveDate::from_ymd_opt(2025, 9, 5)
            .unwrap()
            .and_hms_opt(20, 20, 0)
            .unwrap();
        Game {
            id: "KC_BAL_2025-09-05 20:20".to_string(),
            week: 1,
            game_date: kickoff,
            away_team: "Kansas City".to_string(),
            home_team: "Baltimore".to_string(),
            away_odds: "-110".to_string(),
            home_odds: "-110".to_string(),
            over_under: "47.5".to_string(),
            matchup_link: None,
        }
    }

    #[test]
    fn test_second_pick_replaces_first() {
        let game = kc_bal();
        let mut picks = PickSelection::new();
        picks
            .select(&game, Pick::Spread("Kansas City".to_string()))
            .unwrap();
        picks
            .select(&game, Pick::Spread("Baltimore".to_string()))
            .unwrap();
        picks.select(&game, Pick::Total(TotalPick::Under)).unwrap();

        let game_picks = picks.get(&game.id).unwrap();
        assert_eq!(game_picks.spread.as_deref(), Some("Baltimore"));
        assert_eq!(game_picks.total, Some(TotalPick::Under));
        assert_eq!(picks.picked_games(), 1);
    }

    #[test]
    fn test_spread_pick_must_name_a_team_in_the_game() {
        let game = kc_bal();
        let mut picks = PickSelection::new();
        let err = picks
            .select(&game, Pick::Spread("Buffalo".to_string()))
            .unwrap_err();
        assert!(matches!(err, PickError::UnknownTeam { .. }));
        assert!(picks.is_empty());
    }

    #[test]
    fn test_parse_pick() {
        assert_eq!(
            Pick::parse("total", "over").unwrap(),
            Pick::Total(TotalPick::Over)
        );
        assert!(Pick::parse("total", "push").is_err());
        assert!(Pick::parse("moneyline", "Baltimore").is_err());
    }

    #[test]
    fn test_picks_document_shape() {
        let mut picks = PickSelection::new();
        picks.set(
            "KC_BAL_2025-09-05 20:20",
            Pick::Spread("Kansas City".to_string()),
        );
        picks.set("KC_BAL_2025-09-05 20:20", Pick::Total(TotalPick::Over));
        let doc = PicksDocument::new("jeff", 1, picks);

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["player"], "jeff");
        assert_eq!(value["week"], 1);
        assert_eq!(
            value["picks"]["KC_BAL_2025-09-05 20:20"],
            serde_json::json!({"spread": "Kansas City", "total": "over"})
        );
        assert!(value["saved_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_picks_document_rejects_unknown_fields() {
        let raw = r#"{"player":"jeff","week":1,"picks":{},"saved_at":"2025-09-05T12:00:00.000Z","extra":true}"#;
        assert!(serde_json::from_str::<PicksDocument>(raw).is_err());

        let missing_week = r#"{"player":"jeff","picks":{},"saved_at":"2025-09-05T12:00:00.000Z"}"#;
        assert!(serde_json::from_str::<PicksDocument>(missing_week).is_err());
    }

    #[test]
    fn test_game_kickoff_format() {
        let game = kc_bal();
        let value = serde_json::to_value(&game).unwrap();
        assert_eq!(value["game_date"], "2025-09-05 20:20");
        assert!(value.get("matchup_link").is_none());

        let back: Game = serde_json::from_value(value).unwrap();
        assert_eq!(back, game);
        assert_eq!(
            Game::make_id("KC", "BAL", &game.game_date),
            "KC_BAL_2025-09-05 20:20"
        );
    }

    #[test]
    fn test_games_document_accepts_numeric_lines() {
        let raw = r#"{
          "week": 1,
          "week_start": "2025-09-04",
          "generated_at": "2025-09-02T08:15:30.123456",
          "players": ["jeff", "teddy", "will"],
          "games": [
            {
              "id": "Dallas_Philadelphia_2025-09-04 20:20",
              "week": 1,
              "game_date": "2025-09-04 20:20",
              "away_team": "Dallas",
              "home_team": "Philadelphia",
              "away_odds": 280,
              "home_odds": -350,
              "over_under": 47.5,
              "matchup_link": "https://www.oddsshark.com/nfl/dallas-philadelphia-odds-september-4-2025"
            },
            {
              "id": "Buffalo_Miami_2025-09-07 13:00",
              "week": 1,
              "game_date": "2025-09-07 13:00",
              "away_team": "Buffalo",
              "home_team": "Miami",
              "away_odds": "-110",
              "home_odds": "-110",
              "over_under": "44.0"
            }
          ]
        }"#;
        let doc: GamesDocument = serde_json::from_str(raw).unwrap();
        let opener = &doc.games[0];
        assert_eq!(opener.away_odds, "+280");
        assert_eq!(opener.home_odds, "-350");
        assert_eq!(opener.over_under, "47.5");
        assert_eq!(doc.games[1].over_under, "44.0");

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["games"][0]["away_odds"], "+280");
        assert!(doc.has_player("teddy"));
        assert!(!doc.has_player("../teddy"));
    }
}
