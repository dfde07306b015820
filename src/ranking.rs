//! Catalog ingestion from the MAL ranking API.
//!
//! The ranking endpoint lists every title. Its pages are followed until the
//! cursor runs out, and the result is the authoritative entity set for the
//! run. A failed page aborts the stage: later stages assume a complete catalog.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use crate::cache::{CacheStore, CacheUpdate};
use crate::http::{FetchError, HttpClient};
use crate::models::Entity;
use crate::progress::Progress;

pub const RANKING_URL: &str = "https://api.myanimelist.net/v2/anime/ranking?ranking_type=all&limit=500&fields={media_type,start_date,alternative_titles}";

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RankingPage {
    #[serde(default)]
    pub data: Vec<RankingItem>,
    #[serde(default)]
    pub paging: Paging,
}

#[derive(Debug, Default, Deserialize)]
pub struct Paging {
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RankingItem {
    pub node: RankingNode,
}

#[derive(Debug, Deserialize)]
pub struct RankingNode {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub alternative_titles: AlternativeTitles,
}

#[derive(Debug, Default, Deserialize)]
pub struct AlternativeTitles {
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default)]
    pub en: String,
    #[serde(default)]
    pub ja: String,
}

impl From<RankingNode> for Entity {
    fn from(node: RankingNode) -> Self {
        Entity {
            title: node.title,
            english_title: node.alternative_titles.en,
            japanese_title: node.alternative_titles.ja,
            synonyms: node.alternative_titles.synonyms,
            mal_id: node.id,
            media_type: node.media_type,
            release_date: node.start_date,
            ..Entity::default()
        }
    }
}

// ============================================================================
// Source
// ============================================================================

pub trait RankingSource {
    fn fetch_page(&self, url: &str) -> Result<RankingPage, FetchError>;
}

pub struct MalRankingClient {
    http: HttpClient,
    client_id: String,
}

impl MalRankingClient {
    pub fn new(http: HttpClient, client_id: impl Into<String>) -> Self {
        Self {
            http,
            client_id: client_id.into(),
        }
    }
}

impl RankingSource for MalRankingClient {
    fn fetch_page(&self, url: &str) -> Result<RankingPage, FetchError> {
        self.http
            .get_json(url, &[("X-MAL-CLIENT-ID", self.client_id.as_str())])
    }
}

// ============================================================================
// Stage
// ============================================================================

/// Fetch every ranking page starting at `first_url`.
///
/// Entities come back stable-sorted by MAL id. Each one's URL, release date
/// and type are written to the cache; a failed cache write is logged only.
pub fn ingest(
    source: &dyn RankingSource,
    first_url: &str,
    cache: &CacheStore,
    progress: &Progress,
) -> Result<Vec<Entity>> {
    let spinner = progress.spinner("Fetching MAL ranking");
    let mut entities: Vec<Entity> = Vec::new();
    let mut next = Some(first_url.to_string());
    let mut pages = 0usize;

    while let Some(url) = next.take() {
        let page = source
            .fetch_page(&url)
            .with_context(|| format!("Failed to fetch ranking page {}", pages + 1))?;
        pages += 1;
        entities.extend(page.data.into_iter().map(|item| Entity::from(item.node)));
        spinner.set_message(format!("Fetching MAL ranking ({} titles)", entities.len()));

        next = page.paging.next.filter(|n| !n.is_empty());
    }
    spinner.finish_and_clear();

    entities.sort_by_key(|e| e.mal_id);

    let mut cache_failures = 0usize;
    for entity in &entities {
        if let Err(e) = cache.upsert(entity.mal_id, &CacheUpdate::from_ranking(entity)) {
            cache_failures += 1;
            warn!(mal_id = entity.mal_id, error = %e, "cache upsert failed");
        }
    }

    info!(
        pages,
        titles = entities.len(),
        cache_failures,
        "MAL ranking ingested"
    );
    Ok(entities)
}

// ============================================================================
// TESTS
// ============================================================================
