use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use nfl_picks::scrapers::oddsshark::{build_games_document, filter_games_by_week, OddsSharkClient};
use nfl_picks::utils::data::{save_games_file, LocalPicksStore};
use nfl_picks::utils::week::resolve_week;
use nfl_picks::{
    load_all_picks, load_week_slate, publish_games, ConfigResolver, DocumentStore, GamesDocument,
    GitHubStore, LeagueConfig, LoadOutcome, Pick, PicksEngine, SaveOutcome, ServerConfig, StoreConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cli")]
#[command(about = "NFL weekly picks - games feed and picks sync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch this week's games from OddsShark and write games.json
    Scrape {
        /// Week to fetch instead of the current one
        #[arg(long)]
        week: Option<u32>,

        /// League config with players and season start
        #[arg(long, default_value = "config.json")]
        config: PathBuf,

        #[arg(long, default_value = "games.json")]
        out: PathBuf,

        /// Also write the games document to the picks repository
        #[arg(long)]
        publish: bool,
    },
    /// Show a player's saved picks
    Load {
        #[arg(long)]
        player: String,

        /// Defaults to the week of the current slate
        #[arg(long)]
        week: Option<u32>,
    },
    /// Save picks for a player, e.g. --pick "KC_BAL_2025-09-05 20:20=spread:Kansas City"
    Save {
        #[arg(long)]
        player: String,

        #[arg(long)]
        week: Option<u32>,

        /// GAME_ID=CATEGORY:VALUE, repeatable
        #[arg(long = "pick", required = true)]
        picks: Vec<String>,
    },
    /// Show every player's picks for a week
    AllPicks {
        #[arg(long)]
        week: Option<u32>,

        #[arg(long, default_value = "config.json")]
        config: PathBuf,
    },
    /// Show the resolved store configuration
    Config,
}

/// Split `GAME_ID=CATEGORY:VALUE`
fn parse_pick_arg(raw: &str) -> Result<(String, Pick)> {
    let Some((game_id, rest)) = raw.split_once('=') else {
        bail!("Pick '{}' must look like GAME_ID=CATEGORY:VALUE", raw);
    };
    let Some((category, value)) = rest.split_once(':') else {
        bail!("Pick '{}' must look like GAME_ID=CATEGORY:VALUE", raw);
    };
    let pick = Pick::parse(category.trim(), value.trim())?;
    Ok((game_id.trim().to_string(), pick))
}

/// Player names become store paths and file names, so only league players are accepted
fn ensure_player(slate: &GamesDocument, player: &str) -> Result<()> {
    if !slate.has_player(player) {
        bail!("Unknown player '{}' (players: {})", player, slate.players.join(", "));
    }
    Ok(())
}

async fn connect_store() -> Result<Option<Arc<dyn DocumentStore>>> {
    let config = ConfigResolver::from_env().resolve().await;
    if !config.is_ready() {
        println!("GitHub not configured, using local picks only\n");
        return Ok(None);
    }
    let store = GitHubStore::from_config(&config)?;
    Ok(Some(Arc::new(store)))
}

fn mask_token(config: &StoreConfig) -> String {
    match config.token.as_deref() {
        Some(token) if token.chars().count() > 4 => format!("{}...", token.chars().take(4).collect::<String>()),
        Some(_) => "****".to_string(),
        None => "(not set)".to_string(),
    }
}

async fn scrape(week: Option<u32>, config: PathBuf, out: PathBuf, publish: bool) -> Result<()> {
    let league = LeagueConfig::load(&config)?;
    let window = resolve_week(league.season_start_date, Local::now().date_naive(), week);
    println!(
        "Fetching games for Week {} ({} to {})\n",
        window.week,
        window.start.format("%Y-%m-%d"),
        window.end.format("%Y-%m-%d")
    );

    let client = OddsSharkClient::new()?;
    let matchups = client
        .fetch_matchups()
        .await
        .context("Failed to fetch games")?;
    let games = filter_games_by_week(&matchups, &window);
    let slate = build_games_document(games, &league, &window);

    for game in &slate.games {
        println!(
            "  {} @ {} ({} / {}, O/U {})",
            game.away_team, game.home_team, game.away_odds, game.home_odds, game.over_under
        );
    }

    save_games_file(&slate, &out)?;
    println!("\nSaved {} games to {:?}", slate.games.len(), out);

    if publish {
        let Some(store) = connect_store().await? else {
            bail!("Cannot publish games: GitHub not configured");
        };
        let written = publish_games(store.as_ref(), &slate).await?;
        println!("Published games.json (version {})", written.version);
    }
    Ok(())
}

async fn load(player: String, week: Option<u32>) -> Result<()> {
    let server = ServerConfig::from_env();
    let store = connect_store().await?;
    let slate = load_week_slate(store.as_deref(), &server.games_file).await;
    ensure_player(&slate, &player)?;
    let week = week.unwrap_or(slate.week);

    let engine = PicksEngine::new(store, LocalPicksStore::new(&server.data_dir));
    match engine.load(&player, week).await {
        LoadOutcome::Loaded(doc) => {
            println!("{}'s picks for Week {} (saved {})\n", doc.player, doc.week, doc.saved_at);
            for (game_id, picks) in doc.picks.iter() {
                let spread = picks.spread.as_deref().unwrap_or("-");
                let total = picks.total.map(|t| t.to_string()).unwrap_or_else(|| "-".to_string());
                println!("  {}: spread {}, total {}", game_id, spread, total);
            }
        }
        LoadOutcome::NoPicks => println!("No previous picks found for {} in Week {}.", player, week),
        LoadOutcome::Failed(e) => bail!("Error loading picks: {}", e),
    }
    Ok(())
}

async fn save(player: String, week: Option<u32>, raw_picks: Vec<String>) -> Result<()> {
    let server = ServerConfig::from_env();
    let store = connect_store().await?;
    let slate = load_week_slate(store.as_deref(), &server.games_file).await;
    ensure_player(&slate, &player)?;
    let week = week.unwrap_or(slate.week);

    let engine = PicksEngine::new(store, LocalPicksStore::new(&server.data_dir));
    for raw in &raw_picks {
        let (game_id, pick) = parse_pick_arg(raw)?;
        let Some(game) = slate.find_game(&game_id) else {
            bail!("Unknown game: {}", game_id);
        };
        engine.select(game, pick)?;
    }

    match engine.save(&player, week, &engine.picks()).await {
        SaveOutcome::Saved(persistence) => println!("Picks saved for {} in Week {}: {:?}", player, week, persistence),
        SaveOutcome::Conflict => bail!("Save conflict: picks were changed elsewhere. Please retry."),
        SaveOutcome::Failed(e) => bail!("Error saving picks: {}", e),
    }
    Ok(())
}

async fn all_picks(week: Option<u32>, config: PathBuf) -> Result<()> {
    let league = LeagueConfig::load(&config)?;
    let week = week.unwrap_or_else(|| resolve_week(league.season_start_date, Local::now().date_naive(), None).week);
    let Some(store) = connect_store().await? else {
        bail!("Cannot read picks: GitHub not configured");
    };

    let all = load_all_picks(store.as_ref(), &league.players, week).await;
    println!("Week {}: {} of {} players have picks\n", week, all.len(), league.players.len());
    for (player, doc) in &all {
        println!("{} ({} games picked)", player, doc.picks.picked_games());
    }
    Ok(())
}

async fn show_config() -> Result<()> {
    let config = ConfigResolver::from_env().resolve().await;
    println!("Owner: {}", config.owner.as_deref().unwrap_or("(not set)"));
    println!("Repo:  {}", config.repo.as_deref().unwrap_or("(not set)"));
    println!("Token: {}", mask_token(&config));
    println!("Ready: {}", config.is_ready());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt::init();

    match Cli::parse().command {
        Commands::Scrape { week, config, out, publish } => scrape(week, config, out, publish).await,
        Commands::Load { player, week } => load(player, week).await,
        Commands::Save { player, week, picks } => save(player, week, picks).await,
        Commands::AllPicks { week, config } => all_picks(week, config).await,
        Commands::Config => show_config().await,
    }
}
