use askama::Template;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use nfl_picks::utils::data::LocalPicksStore;
use nfl_picks::utils::jobs::{TriggerJob, TriggerOutcome};
use nfl_picks::{
    load_week_slate, ConfigResolver, DocumentStore, GamesDocument, GitHubStore, PicksEngine,
    PicksSession, ServerConfig, StatusMessage, StoreConfig, TotalPick,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::services::ServeDir;
use tracing::{info, warn};

// Custom filters for formatting
mod filters {
    use chrono::NaiveDateTime;

    pub fn kickoff(date: &NaiveDateTime) -> ::askama::Result<String> {
        Ok(date.format("%a, %b %-d, %-I:%M %p").to_string())
    }
}

struct GameView {
    id: String,
    game_date: chrono::NaiveDateTime,
    away_team: String,
    home_team: String,
    away_odds: String,
    home_odds: String,
    over_under: String,
    matchup_link: Option<String>,
    away_picked: bool,
    home_picked: bool,
    over_picked: bool,
    under_picked: bool,
}

struct PlayerOption {
    name: String,
    selected: bool,
}

struct StatusView {
    text: String,
    kind: &'static str,
    /// 0 keeps the message on screen
    dismiss_ms: u64,
}

impl From<StatusMessage> for StatusView {
    fn from(status: StatusMessage) -> Self {
        Self {
            kind: status.kind.as_str(),
            dismiss_ms: status
                .auto_dismiss()
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            text: status.text,
        }
    }
}

#[derive(Template)]
#[template(path = "picks.html")]
struct PicksTemplate {
    week: u32,
    players: Vec<PlayerOption>,
    player: String,
    games: Vec<GameView>,
    status: Option<StatusView>,
}

struct HtmlTemplate<T>(T);

impl<T> IntoResponse for HtmlTemplate<T>
where
    T: Template,
{
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

struct AppState {
    /// Games list as of the last page load or scraper run
    slate: RwLock<Arc<GamesDocument>>,
    store: Option<Arc<dyn DocumentStore>>,
    server: ServerConfig,
    /// One picks session per player and week, created on first visit
    sessions: RwLock<HashMap<(String, u32), Arc<PicksSession>>>,
}

type SharedState = Arc<AppState>;

impl AppState {
    fn new(slate: GamesDocument, store: Option<Arc<dyn DocumentStore>>, server: ServerConfig) -> Self {
        Self {
            slate: RwLock::new(Arc::new(slate)),
            store,
            server,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    async fn slate(&self) -> Arc<GamesDocument> {
        self.slate.read().await.clone()
    }

    /// Reload the games document; a new week may have been published
    async fn refresh_slate(&self) -> Arc<GamesDocument> {
        let slate = Arc::new(load_week_slate(self.store.as_deref(), &self.server.games_file).await);
        *self.slate.write().await = slate.clone();
        slate
    }

    async fn session(&self, player: &str, slate: &Arc<GamesDocument>) -> Arc<PicksSession> {
        let key = (player.to_string(), slate.week);
        let existing = self.sessions.read().await.get(&key).cloned();
        if let Some(session) = existing {
            session.update_slate(slate.clone());
            return session;
        }

        // Loaded outside the lock; when two first visits race, the first insert wins
        let engine = PicksEngine::new(self.store.clone(), LocalPicksStore::new(&self.server.data_dir));
        let session = Arc::new(PicksSession::new(engine, slate.clone()));
        session.choose_player(player).await;
        self.sessions
            .write()
            .await
            .entry(key)
            .or_insert(session)
            .clone()
    }
}

#[derive(Deserialize)]
struct PageQuery {
    player: Option<String>,
}

#[derive(Deserialize)]
struct PickForm {
    game_id: String,
    category: String,
    value: String,
}

fn game_views(slate: &GamesDocument, session: Option<&PicksSession>) -> Vec<GameView> {
    let picks = session.map(|s| s.engine().picks()).unwrap_or_default();
    slate
        .games
        .iter()
        .map(|game| {
            let picked = picks.get(&game.id).cloned().unwrap_or_default();
            let spread = picked.spread.as_deref();
            GameView {
                id: game.id.clone(),
                game_date: game.game_date,
                away_team: game.away_team.clone(),
                home_team: game.home_team.clone(),
                away_odds: game.away_odds.clone(),
                home_odds: game.home_odds.clone(),
                over_under: game.over_under.clone(),
                matchup_link: game.matchup_link.clone(),
                away_picked: spread == Some(game.away_team.as_str()),
                home_picked: spread == Some(game.home_team.as_str()),
                over_picked: picked.total == Some(TotalPick::Over),
                under_picked: picked.total == Some(TotalPick::Under),
            }
        })
        .collect()
}

async fn picks_page(
    State(state): State<SharedState>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let slate = state.refresh_slate().await;
    let player = query
        .player
        .map(|p| p.trim().to_string())
        .filter(|p| slate.has_player(p));

    let session = match &player {
        Some(player) => Some(state.session(player, &slate).await),
        None => None,
    };

    let template = PicksTemplate {
        week: slate.week,
        players: slate
            .players
            .iter()
            .map(|name| PlayerOption {
                name: name.clone(),
                selected: player.as_deref() == Some(name.as_str()),
            })
            .collect(),
        player: player.clone().unwrap_or_default(),
        games: game_views(&slate, session.as_deref()),
        status: session.and_then(|s| s.take_status()).map(StatusView::from),
    };

    HtmlTemplate(template).into_response()
}

fn back_to_page(player: &str) -> Redirect {
    Redirect::to(&format!("/?player={}", player))
}

/// Session for a form post against the current slate; `None` for players outside the league
async fn form_session(state: &AppState, player: &str) -> Option<Arc<PicksSession>> {
    let slate = state.slate().await;
    if !slate.has_player(player) {
        return None;
    }
    Some(state.session(player, &slate).await)
}

async fn select_pick(
    State(state): State<SharedState>,
    Path(player): Path<String>,
    Form(form): Form<PickForm>,
) -> Response {
    let Some(session) = form_session(&state, &player).await else {
        return (StatusCode::NOT_FOUND, "Unknown player").into_response();
    };
    session.pick(&form.game_id, &form.category, &form.value);
    back_to_page(&player).into_response()
}

async fn save_picks(State(state): State<SharedState>, Path(player): Path<String>) -> Response {
    let Some(session) = form_session(&state, &player).await else {
        return (StatusCode::NOT_FOUND, "Unknown player").into_response();
    };
    session.save().await;
    back_to_page(&player).into_response()
}

async fn load_picks(State(state): State<SharedState>, Path(player): Path<String>) -> Response {
    let Some(session) = form_session(&state, &player).await else {
        return (StatusCode::NOT_FOUND, "Unknown player").into_response();
    };
    session.load().await;
    back_to_page(&player).into_response()
}

/// Store identity for browser clients, straight from this server's environment
async fn github_config() -> Response {
    let config = StoreConfig::from_env();
    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
        Json(config),
    )
        .into_response()
}

async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method not allowed" })),
    )
        .into_response()
}

fn trigger_response(outcome: TriggerOutcome) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(outcome)).into_response()
}

async fn run_scraper(State(state): State<SharedState>) -> Response {
    let job = TriggerJob::scraper(&state.server.scraper_command, state.server.scripts_dir.clone());
    let outcome = job.run().await;
    if outcome.success {
        let slate = state.refresh_slate().await;
        info!(week = slate.week, games = slate.games.len(), "Reloaded games after scraper run");
    }
    trigger_response(outcome)
}

async fn sync_sheets(State(state): State<SharedState>) -> Response {
    let job = TriggerJob::sheets_sync(&state.server.sheets_command, state.server.scripts_dir.clone());
    trigger_response(job.run().await)
}

fn router(state: SharedState) -> Router {
    Router::new()
        // This will serve files from the "static" directory at the "/static" URL path
        .nest_service("/static", ServeDir::new("static"))
        .route("/", get(picks_page))
        .route("/picks/:player/select", post(select_pick))
        .route("/picks/:player/save", post(save_picks))
        .route("/picks/:player/load", post(load_picks))
        .route("/api/github-config", get(github_config).fallback(method_not_allowed))
        .route("/api/run-scraper", post(run_scraper).fallback(method_not_allowed))
        .route("/api/sync-sheets", post(sync_sheets).fallback(method_not_allowed))
        .with_state(state)
}

async fn connect_store() -> Option<Arc<dyn DocumentStore>> {
    let config = ConfigResolver::from_env().resolve().await;
    if !config.is_ready() {
        return None;
    }
    match GitHubStore::from_config(&config) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!("GitHub store unavailable: {:#}", e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let server = ServerConfig::from_env();

    println!("Loading this week's games...");
    let store = connect_store().await;
    if store.is_none() {
        println!("GitHub not configured, picks will be saved locally");
    }
    let slate = load_week_slate(store.as_deref(), &server.games_file).await;
    println!("Week {}: {} games, {} players", slate.week, slate.games.len(), slate.players.len());

    let bind_addr = server.bind_addr.clone();
    let state = Arc::new(AppState::new(slate, store, server));

    println!("\nStarting web server at http://{}", bind_addr);
    println!("Press Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Listening on {}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use nfl_picks::{
        mock_slate, publish_games, read_typed, MemoryStore, PicksDocument, StoreError,
        StoredDocument, VersionToken, WriteResult,
    };
    use std::time::Duration;
    use tokio::time::Instant;
    use tower::ServiceExt;

    fn test_state_with(dir: &std::path::Path, store: Arc<dyn DocumentStore>) -> SharedState {
        let server = ServerConfig {
            data_dir: dir.to_path_buf(),
            games_file: dir.join("games.json"),
            scraper_command: "echo scraped".to_string(),
            sheets_command: "exit 1".to_string(),
            scripts_dir: dir.to_path_buf(),
            ..Default::default()
        };
        Arc::new(AppState::new(mock_slate(), Some(store), server))
    }

    fn test_state(dir: &std::path::Path) -> SharedState {
        test_state_with(dir, Arc::new(MemoryStore::new()))
    }

    fn page(player: &str) -> Request<Body> {
        Request::get(format!("/?player={}", player))
            .body(Body::empty())
            .unwrap()
    }

    fn form(uri: &str, body: &'static str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    /// Picks reads for one path take two seconds
    struct SlowPicksStore {
        inner: MemoryStore,
        slow_path: &'static str,
    }

    #[async_trait::async_trait]
    impl DocumentStore for SlowPicksStore {
        async fn read_document(&self, path: &str) -> Result<Option<StoredDocument>, StoreError> {
            if path == self.slow_path {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            self.inner.read_document(path).await
        }

        async fn write_document(
            &self,
            path: &str,
            content: &serde_json::Value,
            message: &str,
            version: Option<&VersionToken>,
        ) -> Result<WriteResult, StoreError> {
            self.inner.write_document(path, content, message, version).await
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_api_routes_reject_other_methods() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .clone()
            .oneshot(Request::post("/api/github-config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(body_text(response).await.contains("Method not allowed"));

        let response = app
            .oneshot(Request::get("/api/run-scraper").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_config_endpoint_allows_any_origin() {
        let dir = tempfile::tempdir().unwrap();
        let response = router(test_state(dir.path()))
            .oneshot(Request::get("/api/github-config").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let config: StoreConfig = serde_json::from_str(&body_text(response).await).unwrap();
        assert!(config.owner.is_some());
        assert!(config.repo.is_some());
    }

    #[tokio::test]
    async fn test_triggers_report_outcome_in_status() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .clone()
            .oneshot(Request::post("/api/run-scraper").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["success"], true);

        let response = app
            .oneshot(Request::post("/api/sync-sheets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_pick_and_save_through_forms() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(form(
                "/picks/jeff/select",
                "game_id=KC_BAL_2025-09-05+20%3A20&category=spread&value=Baltimore",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let response = app
            .clone()
            .oneshot(Request::post("/picks/jeff/save").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let session = state.session("jeff", &state.slate().await).await;
        assert_eq!(
            session.status(),
            Some(StatusMessage::success("Picks saved to GitHub! ✅"))
        );

        let response = app.clone().oneshot(page("jeff")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Kansas City"));
        assert!(html.contains("Picks saved to GitHub!"));

        // shown once, the browser dismisses it
        let html = body_text(app.clone().oneshot(page("jeff")).await.unwrap()).await;
        assert!(!html.contains("Picks saved to GitHub!"));

        let response = app
            .oneshot(Request::post("/picks/nobody/save").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_newly_published_week_reaches_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let app = router(test_state_with(dir.path(), store.clone()));

        let html = body_text(app.clone().oneshot(page("jeff")).await.unwrap()).await;
        assert!(html.contains("Week 1"));

        let mut next_week = mock_slate();
        next_week.week = 2;
        next_week.games.truncate(1);
        next_week.games[0].id = "KC_PHI_2025-09-12 20:20".to_string();
        next_week.games[0].home_team = "Philadelphia".to_string();
        publish_games(store.as_ref(), &next_week).await.unwrap();

        let html = body_text(app.clone().oneshot(page("jeff")).await.unwrap()).await;
        assert!(html.contains("Week 2"));
        assert!(html.contains("Philadelphia"));

        app.clone()
            .oneshot(form(
                "/picks/jeff/select",
                "game_id=KC_PHI_2025-09-12+20%3A20&category=spread&value=Philadelphia",
            ))
            .await
            .unwrap();
        app.clone()
            .oneshot(Request::post("/picks/jeff/save").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let (saved, _) = read_typed::<PicksDocument>(store.as_ref(), "picks/jeff.json")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saved.week, 2);
        assert!(saved.picks.get("KC_PHI_2025-09-12 20:20").is_some());
    }

    #[tokio::test]
    async fn test_slow_first_visit_does_not_block_other_players() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SlowPicksStore {
            inner: MemoryStore::new(),
            slow_path: "picks/jeff.json",
        });
        let app = router(test_state_with(dir.path(), store));

        let response = app.clone().oneshot(page("teddy")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let slow = tokio::spawn(app.clone().oneshot(page("jeff")));
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        let response = app.clone().oneshot(page("teddy")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_millis(500), "waited {:?}", started.elapsed());

        assert_eq!(slow.await.unwrap().unwrap().status(), StatusCode::OK);
    }
}
