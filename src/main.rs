use std::path::PathBuf;
use std::time::Instant;

use animap::bridge::ANIME_LIST_URL;
use animap::cache::CacheStore;
use animap::cancel::{self, CancelToken};
use animap::config::{Config, Overrides};
use animap::dedupe::ANIME_TITLES_URL;
use animap::fetch_mode::FetchMode;
use animap::http::{HttpClient, RemoteDocument};
use animap::mapping::MappingFiles;
use animap::moviedb::TmdbClient;
use animap::notify;
use animap::pipeline::{self, PipelineOptions, Sources};
use animap::progress::{format_duration, Progress, ProgressMode};
use animap::ranking::MalRankingClient;
use animap::repository::Repository;
use animap::scrape::MalDetailClient;
use anyhow::{bail, Context, Result};
use chrono::Datelike;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "animap", version)]
#[command(about = "Build a MAL to AniDB/TVDB/TMDB id mapping database")]
struct Cli {
    /// Config file (default: ~/.config/animap/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory receiving the artifacts and mapping files
    #[arg(long, global = true, env = "ANIMAP_ROOT_PATH")]
    root_path: Option<PathBuf>,

    /// Directory holding the cache database and the anime-list copy
    #[arg(long, global = true, env = "ANIMAP_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Periodic log lines instead of progress bars
    #[arg(long, global = true)]
    log_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline
    Run(RunArgs),
    /// Publish tmdb-mal.yaml and tvdb-mal.yaml from the master files
    Genmap,
    /// Rewrite the hand-edited master files in canonical layout
    Format,
    /// Inspect or invalidate the id cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args)]
struct RunArgs {
    /// AniDB scrape mode
    #[arg(long, value_enum, env = "ANIMAP_ANIDB_MODE")]
    anidb: Option<FetchMode>,

    /// TMDB search mode
    #[arg(long, value_enum, env = "ANIMAP_TMDB_MODE")]
    tmdb: Option<FetchMode>,

    #[arg(long, env = "ANIMAP_MAL_CLIENT_ID", hide_env_values = true)]
    mal_client_id: Option<String>,

    #[arg(long, env = "ANIMAP_TMDB_API_KEY", hide_env_values = true)]
    tmdb_api_key: Option<String>,

    #[arg(long, env = "ANIMAP_DISCORD_WEBHOOK_URL", hide_env_values = true)]
    discord_webhook_url: Option<String>,
}

#[derive(Subcommand)]
enum CacheCommand {
    /// Forget entries from one release year that still have no AniDB id
    Prune {
        /// Release year (default: current year)
        #[arg(long)]
        year: Option<i32>,
    },
    /// Print one cache entry as JSON
    Show { mal_id: u32 },
}

fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}

fn current_year() -> i32 {
    chrono::Local::now().year()
}

fn load_config(cli: &Cli, run: Option<&RunArgs>) -> Result<Config> {
    let mut overrides = Overrides {
        root_path: cli.root_path.clone(),
        cache_dir: cli.cache_dir.clone(),
        ..Overrides::default()
    };
    if let Some(args) = run {
        overrides.anidb_mode = args.anidb;
        overrides.tmdb_mode = args.tmdb;
        overrides.mal_client_id = args.mal_client_id.clone();
        overrides.tmdb_api_key = args.tmdb_api_key.clone();
        overrides.discord_webhook_url = args.discord_webhook_url.clone();
    }
    Config::load(cli.config.as_deref(), overrides)
}

fn run_pipeline(config: &Config, progress: &Progress) -> Result<()> {
    config.validate()?;
    let start = Instant::now();

    // Notifications get their own token so a failure can still be reported.
    let notifier = notify::from_webhook(
        HttpClient::new(config.request_timeout(), CancelToken::new()),
        config.discord_webhook_url.as_deref(),
    );

    let cancel = CancelToken::new();
    cancel::cancel_on_ctrl_c(&cancel)?;

    let result = (|| -> Result<pipeline::RunReport> {
        let cache = CacheStore::open(&config.cache_db_path())?;
        let http = HttpClient::new(config.request_timeout(), cancel.clone());

        let ranking = MalRankingClient::new(http.clone(), config.mal_client_id.clone());
        let detail_pages = MalDetailClient::new(http.clone(), config.scrape_delay());
        let anime_list = RemoteDocument::new(http.clone(), ANIME_LIST_URL);
        let movie_search = TmdbClient::new(http.clone(), config.tmdb_api_key.clone());
        let anime_titles = RemoteDocument::new(http, ANIME_TITLES_URL);
        let sources = Sources {
            ranking: &ranking,
            detail_pages: &detail_pages,
            anime_list: &anime_list,
            movie_search: &movie_search,
            anime_titles: &anime_titles,
        };

        let options = PipelineOptions::from_config(config, current_year());
        pipeline::run(&cache, &sources, &options, &cancel, progress)
    })();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            notifier.failure(&format!("{:#}", e));
            return Err(e);
        }
    };
    notifier.success(&report.stats);

    let stats = &report.stats;
    println!("\n{:=<60}", "");
    println!("Run complete!");
    println!("  MAL ids: {}", stats.total);
    println!("  AniDB: {} ({:.1}%)", stats.with_anidb, stats.anidb_coverage());
    println!(
        "  Movies: {} total, {} with TMDB ({:.1}%)",
        stats.movies,
        stats.movies_with_tmdb,
        stats.tmdb_coverage()
    );
    println!(
        "  TV: {} total, {} with TVDB ({:.1}%)",
        stats.tv,
        stats.tv_with_tvdb,
        stats.tvdb_coverage()
    );
    println!(
        "  Duplicates: {} groups, {} removed",
        stats.duplicate_groups, stats.duplicates_removed
    );
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");
    Ok(())
}

fn genmap(config: &Config) -> Result<()> {
    let (tmdb, tvdb) = MappingFiles::new(&config.root_path, &Repository)
        .generate()
        .context("Failed to generate mapping files")?;
    println!("Wrote {} TMDB and {} TVDB mappings", tmdb, tvdb);
    Ok(())
}

fn format_masters(config: &Config) -> Result<()> {
    let (tmdb, tvdb) = MappingFiles::new(&config.root_path, &Repository)
        .format()
        .context("Failed to format mapping files")?;
    for (name, count) in [("TMDB", tmdb), ("TVDB", tvdb)] {
        match count {
            Some(n) => println!("Formatted {} master ({} entries)", name, n),
            None => println!("No {} master to format", name),
        }
    }
    Ok(())
}

fn cache_command(config: &Config, command: &CacheCommand) -> Result<()> {
    let path = config.cache_db_path();
    if !path.exists() {
        bail!("No cache database at {}", path.display());
    }
    let cache = CacheStore::open(&path)?;

    match command {
        CacheCommand::Prune { year } => {
            let year = year.unwrap_or_else(current_year);
            let entries = cache.entries_by_release_year(year)?;
            let mut removed = 0usize;
            for entry in &entries {
                if cache.delete(entry.mal_id)? {
                    removed += 1;
                }
            }
            info!(year, removed, "cache pruned");
            println!("Removed {} unresolved {} entries", removed, year);
        }
        CacheCommand::Show { mal_id } => match cache.get(*mal_id)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => bail!("MAL id {} is not cached", mal_id),
        },
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing("info")?;
    let cli = Cli::parse();

    let progress = Progress::new(if cli.log_only {
        ProgressMode::LogOnly
    } else {
        ProgressMode::Bars
    });

    match &cli.command {
        Command::Run(args) => {
            let config = load_config(&cli, Some(args))?;
            run_pipeline(&config, &progress)
        }
        Command::Genmap => genmap(&load_config(&cli, None)?),
        Command::Format => format_masters(&load_config(&cli, None)?),
        Command::Cache { command } => cache_command(&load_config(&cli, None)?, command),
    }
}
