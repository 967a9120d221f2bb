use crate::config::LeagueConfig;
use crate::models::{display_odds, display_total, Game, GamesDocument, KICKOFF_FORMAT};
use crate::utils::week::WeekWindow;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const ODDSSHARK_TICKER_URL: &str = "https://io.oddsshark.com/ticker/nfl";
const ODDSSHARK_BASE_URL: &str = "https://www.oddsshark.com";

#[derive(Debug, Deserialize)]
struct TickerResponse {
    matchups: Vec<Matchup>,
}

/// One entry of the OddsShark ticker. Only `type == "matchup"` entries are games.
#[derive(Debug, Clone, Deserialize)]
pub struct Matchup {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub event_date: Option<String>,
    #[serde(default)]
    pub away_name: Option<String>,
    #[serde(default)]
    pub home_name: Option<String>,
    #[serde(default)]
    pub away_odds: Value,
    #[serde(default)]
    pub home_odds: Value,
    #[serde(default)]
    pub total: Value,
    #[serde(default)]
    pub matchup_link: Option<String>,
}

pub struct OddsSharkClient {
    client: reqwest::Client,
}

impl OddsSharkClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build OddsShark client")?;
        Ok(Self { client })
    }

    /// Fetch every matchup currently on the NFL ticker
    pub async fn fetch_matchups(&self) -> Result<Vec<Matchup>> {
        let response = self
            .client
            .get(ODDSSHARK_TICKER_URL)
            .header("referer", "https://www.oddsshark.com/nfl/scores")
            .send()
            .await
            .context("Failed to fetch OddsShark ticker")?;

        if !response.status().is_success() {
            anyhow::bail!("OddsShark returned error: {}", response.status());
        }

        let ticker: TickerResponse = response
            .json()
            .await
            .context("Failed to parse OddsShark ticker")?;
        Ok(ticker.matchups)
    }
}

fn parse_event_date(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, KICKOFF_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Keep the matchups kicking off inside `window` and turn them into games
pub fn filter_games_by_week(matchups: &[Matchup], window: &WeekWindow) -> Vec<Game> {
    matchups
        .iter()
        .filter(|m| m.kind == "matchup")
        .filter_map(|m| {
            let raw_date = m.event_date.as_deref()?;
            let Some(game_date) = parse_event_date(raw_date) else {
                debug!(event_date = raw_date, "Skipping matchup with unreadable date");
                return None;
            };
            if !window.contains(&game_date) {
                return None;
            }
            let away_team = m.away_name.clone()?;
            let home_team = m.home_name.clone()?;

            Some(Game {
                id: Game::make_id(&away_team, &home_team, &game_date),
                week: window.week,
                game_date,
                away_odds: display_odds(&m.away_odds),
                home_odds: display_odds(&m.home_odds),
                over_under: display_total(&m.total),
                matchup_link: m
                    .matchup_link
                    .as_ref()
                    .map(|link| format!("{}{}", ODDSSHARK_BASE_URL, link)),
                away_team,
                home_team,
            })
        })
        .collect()
}

/// The `games.json` document for a week
pub fn build_games_document(games: Vec<Game>, league: &LeagueConfig, window: &WeekWindow) -> GamesDocument {
    GamesDocument {
        week: window.week,
        week_start: window.start.date(),
        generated_at: Some(Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S").to_string()),
        players: league.players.clone(),
        games,
    }
}
