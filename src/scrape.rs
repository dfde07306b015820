//! AniDB id resolution from MAL detail pages.
//!
//! Each MAL detail page links to AniDB through an anchor tagged with a fixed
//! `data-ga-click-type`. Pages are fetched by a small worker pool that shares
//! one request pacer. Outcomes flow back to the calling thread, which updates
//! the entity and the cache as each one arrives.

use std::time::Duration;

use anyhow::{bail, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, CacheUpdate, IdField};
use crate::cancel::CancelToken;
use crate::fetch_mode::{self, FetchMode, StagePolicy};
use crate::http::{FetchError, HttpClient, RequestPacer};
use crate::models::Entity;
use crate::progress::Progress;

/// Opening tag of the AniDB external link.
static ANIDB_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<a\s[^>]*data-ga-click-type\s*=\s*"external-links-anime-pc-anidb"[^>]*>"#).unwrap()
});

static HREF_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"href\s*=\s*"([^"]*)""#).unwrap());

static AID_PARAM: Lazy<Regex> = Lazy::new(|| Regex::new(r"aid=(\d+)").unwrap());

/// AniDB id linked from a MAL detail page, if the page has one.
pub fn extract_anidb_id(html: &str) -> Option<u32> {
    ANIDB_ANCHOR.find_iter(html).find_map(|tag| {
        let href = HREF_ATTR.captures(tag.as_str())?.get(1)?.as_str();
        AID_PARAM.captures(href)?.get(1)?.as_str().parse().ok()
    })
}

// ============================================================================
// Source
// ============================================================================

pub trait DetailPageSource: Sync {
    fn fetch_detail(&self, mal_id: u32) -> Result<String, FetchError>;
}

/// Live MAL pages, paced to one request per `delay` across all workers.
pub struct MalDetailClient {
    http: HttpClient,
    pacer: RequestPacer,
}

impl MalDetailClient {
    pub fn new(http: HttpClient, delay: Duration) -> Self {
        Self {
            http,
            pacer: RequestPacer::new(delay),
        }
    }
}

impl DetailPageSource for MalDetailClient {
    fn fetch_detail(&self, mal_id: u32) -> Result<String, FetchError> {
        self.pacer.wait(self.http.cancel_token())?;
        let url = format!("https://myanimelist.net/anime/{}", mal_id);
        self.http.get_text(&url, &[])
    }
}

// ============================================================================
// Stage
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct ScrapeOptions {
    pub mode: FetchMode,
    pub workers: usize,
    pub current_year: i32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub backfilled: usize,
    pub candidates: usize,
    pub resolved: usize,
    pub not_found: usize,
    pub failed: usize,
}

struct Job {
    index: usize,
    mal_id: u32,
}

struct Outcome {
    index: usize,
    mal_id: u32,
    result: Result<Option<u32>, FetchError>,
}

/// Fill in `anidb_id` from the cache, then scrape the policy-selected rest.
pub fn resolve_anidb_ids(
    entities: &mut [Entity],
    cache: &CacheStore,
    source: &dyn DetailPageSource,
    options: &ScrapeOptions,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<ScrapeSummary> {
    let mut summary = ScrapeSummary::default();

    let cached = cache.id_map(IdField::AniDb)?;
    for entity in entities.iter_mut() {
        if entity.anidb_id == 0 {
            if let Some(&id) = cached.get(&entity.mal_id) {
                entity.anidb_id = id;
                summary.backfilled += 1;
            }
        }
    }

    let selected = fetch_mode::select(
        entities,
        options.mode,
        &StagePolicy::anidb(),
        &cached,
        options.current_year,
    );
    summary.candidates = selected.len();
    info!(
        mode = %options.mode,
        backfilled = summary.backfilled,
        candidates = summary.candidates,
        "AniDB scrape starting"
    );
    if selected.is_empty() {
        return Ok(summary);
    }

    let workers = options.workers.clamp(1, selected.len());
    let pb = progress.bar(selected.len() as u64, "Scraping AniDB ids");
    let jobs: Vec<Job> = selected
        .iter()
        .map(|&index| Job {
            index,
            mal_id: entities[index].mal_id,
        })
        .collect();

    let (job_tx, job_rx) = bounded::<Job>(workers * 2);
    let (out_tx, out_rx) = bounded::<Outcome>(workers * 2);

    std::thread::scope(|scope| {
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = out_tx.clone();
            scope.spawn(move || worker_loop(source, rx, tx, cancel));
        }
        drop(out_tx);
        drop(job_rx);

        scope.spawn(move || {
            for job in jobs {
                if cancel.is_cancelled() || job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let mut done = 0u64;
        for outcome in out_rx.iter() {
            apply_outcome(entities, cache, outcome, &mut summary);
            done += 1;
            pb.inc(1);
            progress.log("anidb", done, summary.candidates as u64, 100);
        }
    });
    pb.finish_and_clear();

    info!(
        resolved = summary.resolved,
        not_found = summary.not_found,
        failed = summary.failed,
        "AniDB scrape finished"
    );

    if cancel.is_cancelled() {
        bail!(
            "AniDB scrape cancelled after {} of {} pages",
            summary.resolved + summary.not_found + summary.failed,
            summary.candidates
        );
    }
    Ok(summary)
}

fn worker_loop(
    source: &dyn DetailPageSource,
    rx: Receiver<Job>,
    tx: Sender<Outcome>,
    cancel: &CancelToken,
) {
    while let Ok(job) = rx.recv() {
        if cancel.is_cancelled() {
            break;
        }
        let result = source
            .fetch_detail(job.mal_id)
            .map(|html| extract_anidb_id(&html));
        let stop = matches!(result, Err(FetchError::Cancelled));
        let outcome = Outcome {
            index: job.index,
            mal_id: job.mal_id,
            result,
        };
        if tx.send(outcome).is_err() || stop {
            break;
        }
    }
}

fn apply_outcome(
    entities: &mut [Entity],
    cache: &CacheStore,
    outcome: Outcome,
    summary: &mut ScrapeSummary,
) {
    let update = match outcome.result {
        Ok(Some(anidb_id)) => {
            entities[outcome.index].anidb_id = anidb_id;
            summary.resolved += 1;
            debug!(mal_id = outcome.mal_id, anidb_id, "AniDB id found");
            CacheUpdate::anidb(Some(anidb_id))
        }
        Ok(None) => {
            summary.not_found += 1;
            CacheUpdate::anidb(None)
        }
        Err(e) => {
            summary.failed += 1;
            if !e.is_cancelled() {
                warn!(mal_id = outcome.mal_id, error = %e, "detail page fetch failed");
            }
            return;
        }
    };

    if let Err(e) = cache.upsert(outcome.mal_id, &update) {
        warn!(mal_id = outcome.mal_id, error = %e, "cache upsert failed");
    }
}

// ============================================================================
// TESTS
// ============================================================================
