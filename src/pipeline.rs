//! End-to-end run: ingest, scrape, bridge, search, dedupe.
//!
//! Stages hand the entity list to each other in memory so the matching-only
//! fields (Japanese title, synonyms) stay available to the movie resolver.
//! Every stage's output is still written to disk as it completes.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::bridge::{self, BridgeTable};
use crate::cache::CacheStore;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dedupe::{self, DedupeReport, LazyAuthority};
use crate::fetch_mode::FetchMode;
use crate::http::DocumentSource;
use crate::mapping::MappingFiles;
use crate::models::Entity;
use crate::moviedb::{self, MovieOptions, MovieSearch, MovieSummary};
use crate::progress::Progress;
use crate::ranking::{self, RankingSource, RANKING_URL};
use crate::repository::{Paths, Repository};
use crate::scrape::{self, DetailPageSource, ScrapeOptions, ScrapeSummary};
use crate::stats::RunStatistics;

/// Every external collaborator of a run.
pub struct Sources<'a> {
    pub ranking: &'a dyn RankingSource,
    pub detail_pages: &'a dyn DetailPageSource,
    pub anime_list: &'a dyn DocumentSource,
    pub movie_search: &'a dyn MovieSearch,
    pub anime_titles: &'a dyn DocumentSource,
}

#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub root_path: PathBuf,
    /// Where the anime-list XML copy lives. `None` always fetches.
    pub bridge_cache_dir: Option<PathBuf>,
    pub ranking_url: String,
    pub anidb_mode: FetchMode,
    pub tmdb_mode: FetchMode,
    pub scrape_workers: usize,
    pub legacy_exact_match: bool,
    pub current_year: i32,
}

impl PipelineOptions {
    pub fn from_config(config: &Config, current_year: i32) -> Self {
        Self {
            root_path: config.root_path.clone(),
            bridge_cache_dir: Some(config.cache_dir.clone()),
            ranking_url: RANKING_URL.to_string(),
            anidb_mode: config.anidb_mode,
            tmdb_mode: config.tmdb_mode,
            scrape_workers: config.scrape_workers,
            legacy_exact_match: config.legacy_exact_match,
            current_year,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunReport {
    pub scrape: ScrapeSummary,
    pub tvdb_assigned: usize,
    pub movies: MovieSummary,
    pub dedupe: DedupeReport,
    pub stats: RunStatistics,
}

fn ensure_not_cancelled(cancel: &CancelToken, next_stage: &str) -> Result<()> {
    if cancel.is_cancelled() {
        bail!("Run cancelled before {}", next_stage);
    }
    Ok(())
}

/// Bridge table for this run. A load failure leaves it empty.
fn load_bridge(source: &dyn DocumentSource, options: &PipelineOptions) -> BridgeTable {
    match BridgeTable::load(source, options.bridge_cache_dir.as_deref()) {
        Ok(table) => table,
        Err(e) => {
            warn!(error = %format!("{:#}", e), "bridge table unavailable, continuing without it");
            BridgeTable::default()
        }
    }
}

pub fn run(
    cache: &CacheStore,
    sources: &Sources<'_>,
    options: &PipelineOptions,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<RunReport> {
    let paths = Paths::new(&options.root_path);
    let repo = Repository;
    let mappings = MappingFiles::new(&options.root_path, &repo);
    let mut report = RunReport::default();

    // Ranking
    let mut entities: Vec<Entity> = ranking::ingest(sources.ranking, &options.ranking_url, cache, progress)?;
    repo.store(&paths.malid, &entities)?;

    // AniDB
    ensure_not_cancelled(cancel, "AniDB scrape")?;
    report.scrape = scrape::resolve_anidb_ids(
        &mut entities,
        cache,
        sources.detail_pages,
        &ScrapeOptions {
            mode: options.anidb_mode,
            workers: options.scrape_workers,
            current_year: options.current_year,
        },
        cancel,
        progress,
    )?;
    repo.store(&paths.anidb, &entities)?;

    // TVDB
    ensure_not_cancelled(cancel, "bridge lookup")?;
    let bridge_table = load_bridge(sources.anime_list, options);
    report.tvdb_assigned = bridge::assign_tvdb_ids(&mut entities, &bridge_table);
    repo.store(&paths.tvdb, &entities)?;
    mappings.update_tvdb(&entities)?;

    // TMDB
    ensure_not_cancelled(cancel, "TMDB resolution")?;
    report.movies = moviedb::resolve_tmdb_ids(
        &mut entities,
        cache,
        sources.movie_search,
        &bridge_table,
        &MovieOptions {
            mode: options.tmdb_mode,
            current_year: options.current_year,
            legacy_exact_match: options.legacy_exact_match,
        },
        cancel,
        progress,
    )?;
    repo.store(&paths.tmdb, &entities)?;
    mappings.update_tmdb(&entities)?;

    // Dedupe
    ensure_not_cancelled(cancel, "duplicate resolution")?;
    let authority = LazyAuthority::new(sources.anime_titles);
    let (entities, dedupe_report) = dedupe::resolve_duplicates(entities, &authority);
    report.dedupe = dedupe_report;
    repo.store(&paths.final_output, &entities)?;

    report.stats = RunStatistics::collect(&entities, dedupe_report.groups, dedupe_report.removed);
    report.stats.log();
    info!(path = %paths.final_output.display(), "run complete");
    Ok(report)
}
