//! TMDB id resolution for movies.
//!
//! The bridge table is tried first because it is exact and needs no network.
//! Otherwise TMDB is searched by title and year, and the results are scored.
//! Movies that stay unresolved keep `tmdb_id = 0`, so they end up on the
//! unmapped list for manual curation and are retried next run.

use anyhow::{bail, Result};
use rustc_hash::FxHashSet;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bridge::BridgeTable;
use crate::cache::{CacheStore, CacheUpdate, IdField};
use crate::cancel::CancelToken;
use crate::fetch_mode::{self, FetchMode, StagePolicy};
use crate::http::{FetchError, HttpClient};
use crate::models::{Entity, ScoredCandidate, SearchCandidate};
use crate::normalize::{ascii_search_title, title_variants, year_str};
use crate::progress::Progress;
use crate::scoring::{best_match, exact_match, is_accepted, LOW_CONFIDENCE_THRESHOLD};

pub const SEARCH_URL: &str = "https://api.themoviedb.org/3/search/movie";

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub total_results: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SearchResult {
    pub id: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub original_title: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_count: u32,
    #[serde(default)]
    pub genre_ids: Vec<u32>,
    #[serde(default)]
    pub video: bool,
}

impl From<SearchResult> for SearchCandidate {
    fn from(r: SearchResult) -> Self {
        SearchCandidate {
            tmdb_id: r.id,
            title: r.title,
            original_title: r.original_title,
            release_date: r.release_date,
            popularity: r.popularity,
            vote_count: r.vote_count,
            genre_ids: r.genre_ids,
            video: r.video,
        }
    }
}

// ============================================================================
// Source
// ============================================================================

pub trait MovieSearch {
    fn search(&self, query: &str, year: &str) -> Result<SearchResponse, FetchError>;
}

pub struct TmdbClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(http: HttpClient, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: SEARCH_URL.to_string(),
        }
    }

    pub fn search_url(&self, query: &str, year: &str) -> String {
        format!(
            "{}?api_key={}&language=en-US&page=1&include_adult=true&query={}&year={}",
            self.base_url,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(query),
            urlencoding::encode(year),
        )
    }
}

impl MovieSearch for TmdbClient {
    fn search(&self, query: &str, year: &str) -> Result<SearchResponse, FetchError> {
        self.http.get_json(&self.search_url(query, year), &[])
    }
}

// ============================================================================
// Matching
// ============================================================================

fn candidates_of(response: SearchResponse) -> (Vec<SearchCandidate>, u32) {
    let total = response.total_results;
    (response.results.into_iter().map(Into::into).collect(), total)
}

/// Alternate queries tried when the primary search is inconclusive, in order:
/// Japanese title, synonyms, mechanical variants, then an ASCII-folded title.
pub fn fallback_queries(entity: &Entity) -> Vec<String> {
    let main = entity.title.as_str();
    let english = entity.english_title.as_str();
    let mut raw: Vec<String> = Vec::new();

    if !entity.japanese_title.is_empty() && entity.japanese_title != main {
        raw.push(entity.japanese_title.clone());
    }
    raw.extend(
        entity
            .synonyms
            .iter()
            .filter(|s| !s.is_empty() && *s != main && *s != english)
            .cloned(),
    );

    let mut variants = title_variants(main);
    if !english.is_empty() {
        variants.extend(title_variants(english));
    }
    raw.extend(variants.into_iter().filter(|v| v != main && v != english));

    if let Some(folded) = ascii_search_title(main) {
        raw.push(folded);
    }

    let mut seen: FxHashSet<String> = FxHashSet::default();
    seen.insert(entity.search_title().to_lowercase());
    raw.into_iter()
        .filter(|q| seen.insert(q.to_lowercase()))
        .collect()
}

/// Best scored result over all fallback queries. Failed queries are skipped,
/// except cancellation which ends the search.
fn best_fallback(
    entity: &Entity,
    year: &str,
    search: &dyn MovieSearch,
) -> Result<Option<ScoredCandidate>, FetchError> {
    let mut best: Option<ScoredCandidate> = None;
    for query in fallback_queries(entity) {
        let response = match search.search(&query, year) {
            Ok(r) => r,
            Err(FetchError::Cancelled) => return Err(FetchError::Cancelled),
            Err(e) => {
                debug!(mal_id = entity.mal_id, query = %query, error = %e, "fallback search failed");
                continue;
            }
        };
        let (candidates, _) = candidates_of(response);
        if let Some(found) = best_match(entity, &candidates) {
            if best.map_or(true, |b| found.score > b.score) {
                debug!(mal_id = entity.mal_id, query = %query, score = found.score, "fallback candidate");
                best = Some(found);
            }
        }
    }
    Ok(best)
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Resolution {
    ExactMatch(u32),
    Scored(ScoredCandidate),
    Fallback(ScoredCandidate),
}

impl Resolution {
    pub fn tmdb_id(&self) -> u32 {
        match self {
            Resolution::ExactMatch(id) => *id,
            Resolution::Scored(c) | Resolution::Fallback(c) => c.tmdb_id,
        }
    }
}

/// Search TMDB for one entity. `Ok(None)` means nothing cleared the threshold.
pub fn resolve_by_search(
    entity: &Entity,
    year: &str,
    search: &dyn MovieSearch,
    legacy_exact_match: bool,
) -> Result<Option<Resolution>, FetchError> {
    let (candidates, total) = candidates_of(search.search(entity.search_title(), year)?);

    if legacy_exact_match {
        if let Some(id) = exact_match(entity, &candidates, total) {
            return Ok(Some(Resolution::ExactMatch(id)));
        }
    }

    let best = best_match(entity, &candidates);
    if let Some(scored) = best.filter(is_accepted) {
        return Ok(Some(Resolution::Scored(scored)));
    }

    let floor = best.map_or(0.0, |b| b.score);
    let fallback = best_fallback(entity, year, search)?
        .filter(|f| f.score > floor && is_accepted(f));
    Ok(fallback.map(Resolution::Fallback))
}

// ============================================================================
// Stage
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct MovieOptions {
    pub mode: FetchMode,
    pub current_year: i32,
    pub legacy_exact_match: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MovieSummary {
    pub backfilled: usize,
    pub candidates: usize,
    pub bridged: usize,
    pub searched: usize,
    pub resolved: usize,
    pub unresolved: usize,
    pub failed: usize,
}

/// Fill in `tmdb_id` from the cache, the bridge table, then TMDB search.
pub fn resolve_tmdb_ids(
    entities: &mut [Entity],
    cache: &CacheStore,
    search: &dyn MovieSearch,
    bridge: &BridgeTable,
    options: &MovieOptions,
    cancel: &CancelToken,
    progress: &Progress,
) -> Result<MovieSummary> {
    let mut summary = MovieSummary::default();

    let cached = cache.id_map(IdField::Tmdb)?;
    for entity in entities.iter_mut() {
        if entity.tmdb_id == 0 {
            if let Some(&id) = cached.get(&entity.mal_id) {
                entity.tmdb_id = id;
                summary.backfilled += 1;
            }
        }
    }

    let selected = fetch_mode::select(
        entities,
        options.mode,
        &StagePolicy::tmdb(),
        &cached,
        options.current_year,
    );
    summary.candidates = selected.len();
    info!(
        mode = %options.mode,
        backfilled = summary.backfilled,
        candidates = summary.candidates,
        "TMDB resolution starting"
    );

    let pb = progress.bar(selected.len() as u64, "Resolving TMDB ids");
    for (done, &idx) in selected.iter().enumerate() {
        if cancel.is_cancelled() {
            pb.abandon();
            bail!("TMDB resolution cancelled after {} of {} movies", done, summary.candidates);
        }
        pb.inc(1);
        progress.log("tmdb", done as u64 + 1, summary.candidates as u64, 50);

        let entity = &entities[idx];
        let mal_id = entity.mal_id;

        let bridged = (entity.anidb_id > 0)
            .then(|| bridge.tmdb_id(entity.anidb_id))
            .flatten();
        let tmdb_id = if let Some(id) = bridged {
            summary.bridged += 1;
            id
        } else {
            let Some(year) = year_str(&entity.release_date) else {
                debug!(mal_id, title = %entity.title, "no release date, skipping search");
                summary.unresolved += 1;
                continue;
            };
            summary.searched += 1;
            match resolve_by_search(entity, year, search, options.legacy_exact_match) {
                Ok(Some(resolution)) => {
                    if let Resolution::Scored(c) | Resolution::Fallback(c) = resolution {
                        if c.score < LOW_CONFIDENCE_THRESHOLD {
                            info!(mal_id, title = %entity.title, tmdb_id = c.tmdb_id, score = c.score, "low-confidence match");
                        }
                    }
                    resolution.tmdb_id()
                }
                Ok(None) => {
                    debug!(mal_id, title = %entity.title, "no confident TMDB match");
                    summary.unresolved += 1;
                    continue;
                }
                Err(FetchError::Cancelled) => {
                    pb.abandon();
                    bail!("TMDB resolution cancelled after {} of {} movies", done, summary.candidates);
                }
                Err(e) => {
                    warn!(mal_id, title = %entity.title, error = %e, "TMDB search failed");
                    summary.failed += 1;
                    continue;
                }
            }
        };

        entities[idx].tmdb_id = tmdb_id;
        summary.resolved += 1;
        if let Err(e) = cache.upsert(mal_id, &CacheUpdate::tmdb(tmdb_id)) {
            warn!(mal_id, error = %e, "cache upsert failed");
        }
    }
    pb.finish_and_clear();

    info!(
        bridged = summary.bridged,
        searched = summary.searched,
        resolved = summary.resolved,
        unresolved = summary.unresolved,
        failed = summary.failed,
        "TMDB resolution finished"
    );
    Ok(summary)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MovieMappings;
    use crate::models::GENRE_ANIMATION;
    use std::cell::RefCell;

    /// Canned responses keyed by (query, year); records every query issued.
    #[derive(Default)]
    struct FakeSearch {
        responses: Vec<((String, String), Vec<SearchResult>)>,
        failing: Vec<String>,
        queries: RefCell<Vec<String>>,
    }

    impl FakeSearch {
        fn with(mut self, query: &str, year: &str, results: Vec<SearchResult>) -> Self {
            self.responses.push(((query.to_string(), year.to_string()), results));
            self
        }

        fn failing_on(mut self, query: &str) -> Self {
            self.failing.push(query.to_string());
            self
        }
    }

    impl MovieSearch for FakeSearch {
        fn search(&self, query: &str, year: &str) -> Result<SearchResponse, FetchError> {
            self.queries.borrow_mut().push(query.to_string());
            if self.failing.iter().any(|q| q == query) {
                return Err(FetchError::Status {
                    status: 500,
                    url: format!("search?query={}", query),
                });
            }
            let results = self
                .responses
                .iter()
                .find(|((q, y), _)| q == query && y == year)
                .map(|(_, r)| r.clone())
                .unwrap_or_default();
            Ok(SearchResponse {
                total_results: results.len() as u32,
                results,
            })
        }
    }

    fn result(id: u32, title: &str, date: &str) -> SearchResult {
        SearchResult {
            id,
            title: title.to_string(),
            original_title: title.to_string(),
            release_date: date.to_string(),
            popularity: 20.0,
            vote_count: 500,
            genre_ids: vec![GENRE_ANIMATION],
            video: false,
        }
    }

    fn movie(mal_id: u32, title: &str, date: &str) -> Entity {
        Entity {
            title: title.to_string(),
            mal_id,
            media_type: "movie".to_string(),
            release_date: date.to_string(),
            ..Entity::default()
        }
    }

    fn options(mode: FetchMode) -> MovieOptions {
        MovieOptions {
            mode,
            current_year: 2026,
            legacy_exact_match: true,
        }
    }

    fn bridge_with(anidb: u32, tmdb: u32) -> BridgeTable {
        BridgeTable::parse(&format!(
            r#"<anime-list><anime anidbid="{}" tvdbid="movie" tmdbid="{}"/></anime-list>"#,
            anidb, tmdb
        ))
        .unwrap()
    }

    #[test]
    fn test_search_url_encodes_query() {
        let client = TmdbClient::new(
            HttpClient::new(std::time::Duration::from_secs(1), CancelToken::new()),
            "KEY",
        );
        assert_eq!(
            client.search_url("Godzilla vs. Kong & co", "2021"),
            "https://api.themoviedb.org/3/search/movie?api_key=KEY&language=en-US&page=1&include_adult=true&query=Godzilla%20vs.%20Kong%20%26%20co&year=2021"
        );
    }

    #[test]
    fn test_fallback_queries_order_and_dedupe() {
        let mut e = movie(1, "Foo vs. Bar the Movie", "2020-01-01");
        e.english_title = "Foo Versus Bar".to_string();
        e.japanese_title = "フー対バー".to_string();
        e.synonyms = vec![
            "FvB".to_string(),
            "Foo Versus Bar".to_string(),
            "fvb".to_string(),
        ];

        let q = fallback_queries(&e);
        assert_eq!(q[0], "フー対バー");
        assert_eq!(q[1], "FvB");
        assert!(q.contains(&"Foo vs. Bar".to_string()));
        assert!(q.contains(&"Foo vs Bar the Movie".to_string()));
        assert!(q.contains(&"Foo versus Bar the Movie".to_string()));
        assert!(!q.iter().any(|s| s == "fvb"));
        assert!(!q.iter().any(|s| s == "Foo Versus Bar"));
    }

    #[test]
    fn test_exact_date_shortcut() {
        let e = movie(1, "Foo", "2020-05-01");
        let search = FakeSearch::default().with(
            "Foo",
            "2020",
            vec![result(1, "Unrelated", "2020-05-01"), result(2, "Foo", "2020-06-01")],
        );
        let r = resolve_by_search(&e, "2020", &search, true).unwrap();
        assert_eq!(r, Some(Resolution::ExactMatch(1)));

        let r = resolve_by_search(&e, "2020", &search, false).unwrap().unwrap();
        assert_eq!(r.tmdb_id(), 2);
    }

    #[test]
    fn test_fallback_used_when_primary_inconclusive() {
        let mut e = movie(1, "Gekijouban Foo", "2020-05-01");
        e.synonyms = vec!["Foo Movie".to_string()];
        let search = FakeSearch::default()
            .with("Gekijouban Foo", "2020", vec![])
            .with(
                "Foo Movie",
                "2020",
                vec![result(77, "Gekijouban Foo: The Movie", "2020-05-01")],
            );

        let r = resolve_by_search(&e, "2020", &search, true).unwrap().unwrap();
        assert!(matches!(r, Resolution::Fallback(_)));
        assert_eq!(r.tmdb_id(), 77);
    }

    #[test]
    fn test_bridge_hit_never_searches_even_in_all_mode() {
        let cache = CacheStore::open_in_memory().unwrap();
        let search = FakeSearch::default();
        let mut entities = vec![Entity {
            anidb_id: 500,
            ..movie(1, "Foo", "2020-05-01")
        }];

        let summary = resolve_tmdb_ids(
            &mut entities,
            &cache,
            &search,
            &bridge_with(500, 9000),
            &options(FetchMode::All),
            &CancelToken::new(),
            &Progress::hidden(),
        )
        .unwrap();

        assert_eq!(summary.bridged, 1);
        assert_eq!(summary.searched, 0);
        assert!(search.queries.borrow().is_empty());
        assert_eq!(entities[0].tmdb_id, 9000);
        assert_eq!(cache.get(1).unwrap().unwrap().tmdb_id, 9000);
    }

    #[test]
    fn test_stage_resolves_and_reports_unmapped() {
        let cache = CacheStore::open_in_memory().unwrap();
        let search = FakeSearch::default().with("Foo", "2020", vec![result(10, "Foo", "2020-05-01")]);
        let mut entities = vec![
            movie(1, "Foo", "2020-05-01"),
            movie(2, "Nothing Matches", "2021-01-01"),
            movie(3, "No Date", ""),
            Entity {
                media_type: "tv".to_string(),
                ..movie(4, "Foo", "2020-05-01")
            },
        ];

        let summary = resolve_tmdb_ids(
            &mut entities,
            &cache,
            &search,
            &BridgeTable::default(),
            &options(FetchMode::Default),
            &CancelToken::new(),
            &Progress::hidden(),
        )
        .unwrap();

        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.resolved, 1);
        assert_eq!(summary.unresolved, 2);
        assert_eq!(entities[0].tmdb_id, 10);
        assert_eq!(entities[1].tmdb_id, 0);
        assert_eq!(entities[3].tmdb_id, 0);
        assert_eq!(cache.get(1).unwrap().unwrap().tmdb_id, 10);
    }

    #[test]
    fn test_cached_ids_skip_search() {
        let cache = CacheStore::open_in_memory().unwrap();
        cache.upsert(1, &CacheUpdate::tmdb(42)).unwrap();
        let search = FakeSearch::default();
        let mut entities = vec![movie(1, "Foo", "2020-05-01")];

        let summary = resolve_tmdb_ids(
            &mut entities,
            &cache,
            &search,
            &BridgeTable::default(),
            &options(FetchMode::Default),
            &CancelToken::new(),
            &Progress::hidden(),
        )
        .unwrap();

        assert_eq!(summary.backfilled, 1);
        assert_eq!(summary.candidates, 0);
        assert_eq!(entities[0].tmdb_id, 42);
        assert!(search.queries.borrow().is_empty());
    }

    #[test]
    fn test_fallback_below_primary_best_is_rejected() {
        let mut e = movie(1, "Foo", "2020-05-01");
        e.synonyms = vec!["Foo Again".to_string()];
        // 25 title + 10 date + 5 genre + popularity / 10
        let primary = SearchResult {
            popularity: 80.0,
            vote_count: 0,
            ..result(10, "Foo Returns", "2020-12-31")
        };
        let weaker = SearchResult {
            popularity: 70.0,
            vote_count: 0,
            ..result(11, "Foo Returns Again", "2020-12-31")
        };
        let search = FakeSearch::default()
            .with("Foo", "2020", vec![primary])
            .with("Foo Again", "2020", vec![weaker]);

        let r = resolve_by_search(&e, "2020", &search, false).unwrap();
        assert_eq!(r, None);
        assert_eq!(*search.queries.borrow(), vec!["Foo".to_string(), "Foo Again".to_string()]);

        let candidates: Vec<SearchCandidate> = vec![SearchResult {
            popularity: 80.0,
            vote_count: 0,
            ..result(10, "Foo Returns", "2020-12-31")
        }
        .into()];
        assert_eq!(best_match(&e, &candidates).unwrap().score, 48.0);
    }

    #[test]
    fn test_search_failure_is_counted_and_next_movie_proceeds() {
        let cache = CacheStore::open_in_memory().unwrap();
        let search = FakeSearch::default()
            .failing_on("Broken")
            .with("Foo", "2020", vec![result(10, "Foo", "2020-05-01")]);
        let mut entities = vec![movie(1, "Broken", "2019-03-01"), movie(2, "Foo", "2020-05-01")];

        let summary = resolve_tmdb_ids(
            &mut entities,
            &cache,
            &search,
            &BridgeTable::default(),
            &options(FetchMode::Default),
            &CancelToken::new(),
            &Progress::hidden(),
        )
        .unwrap();

        assert_eq!(summary.searched, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.resolved, 1);
        assert_eq!(entities[0].tmdb_id, 0);
        assert_eq!(entities[1].tmdb_id, 10);
        assert!(cache.get(1).unwrap().is_none());

        let unmapped = MovieMappings::unmapped(&entities);
        assert_eq!(unmapped.movies.len(), 1);
        assert_eq!(unmapped.movies[0].mal_id, 1);
    }
}
