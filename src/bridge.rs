//! Anime-Lists cross-reference table: AniDB id -> TMDB / TVDB ids.
//!
//! The XML is fetched at most once a day. A local copy is reused while its
//! mtime is inside the freshness window.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::http::DocumentSource;
use crate::models::{Entity, IdMap};

pub const ANIME_LIST_URL: &str =
    "https://raw.githubusercontent.com/Anime-Lists/anime-lists/master/anime-list.xml";
pub const ANIME_LIST_FILE: &str = "anime-list.xml";
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

// ============================================================================
// File-cached document
// ============================================================================

fn is_fresh(path: &Path, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age < max_age)
}

/// Read `path` when it is fresh, otherwise fetch from `source` and write the
/// copy back. Without a path the document is always fetched.
///
/// Local read and write failures are logged and never fatal. A failed fetch is.
pub fn load_cached_document(
    source: &dyn DocumentSource,
    path: Option<&Path>,
    max_age: Duration,
) -> Result<String> {
    if let Some(path) = path {
        if is_fresh(path, max_age) {
            match fs::read_to_string(path) {
                Ok(body) => {
                    debug!(path = %path.display(), "using cached document");
                    return Ok(body);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "cached document unreadable, refetching"),
            }
        }
    }

    let body = source.fetch_document().context("Failed to fetch document")?;

    if let Some(path) = path {
        if let Err(e) = fs::write(path, &body) {
            warn!(path = %path.display(), error = %e, "could not write document cache");
        }
    }
    Ok(body)
}

// ============================================================================
// Bridge table
// ============================================================================

#[derive(Debug, Default)]
pub struct BridgeTable {
    tmdb: IdMap,
    tvdb: IdMap,
}

/// Positive integer attribute; "movie", "unknown", "" and 0 count as absent.
fn id_attribute(node: &roxmltree::Node<'_, '_>, name: &str) -> Option<u32> {
    node.attribute(name)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|&id| id > 0)
}

impl BridgeTable {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml).context("Failed parsing anime-list XML")?;
        let mut table = BridgeTable::default();

        for node in doc.descendants().filter(|n| n.has_tag_name("anime")) {
            let Some(anidb_id) = id_attribute(&node, "anidbid") else {
                continue;
            };
            if let Some(tmdb_id) = id_attribute(&node, "tmdbid") {
                table.tmdb.insert(anidb_id, tmdb_id);
            }
            if let Some(tvdb_id) = id_attribute(&node, "tvdbid") {
                table.tvdb.insert(anidb_id, tvdb_id);
            }
        }
        Ok(table)
    }

    /// Load through the local file cache in `cache_dir`, if one is configured.
    pub fn load(source: &dyn DocumentSource, cache_dir: Option<&Path>) -> Result<Self> {
        let path = cache_dir.map(|dir| dir.join(ANIME_LIST_FILE));
        let xml = load_cached_document(source, path.as_deref(), FRESHNESS_WINDOW)
            .context("Failed to load anime-list bridge table")?;
        let table = Self::parse(&xml)?;
        info!(tmdb = table.tmdb.len(), tvdb = table.tvdb.len(), "bridge table loaded");
        Ok(table)
    }

    pub fn tmdb_id(&self, anidb_id: u32) -> Option<u32> {
        self.tmdb.get(&anidb_id).copied()
    }

    pub fn tvdb_id(&self, anidb_id: u32) -> Option<u32> {
        self.tvdb.get(&anidb_id).copied()
    }
}

/// Set `tvdb_id` on TV entities whose AniDB id is in the table.
/// Returns how many entities were updated.
pub fn assign_tvdb_ids(entities: &mut [Entity], table: &BridgeTable) -> usize {
    let mut updated = 0;
    for entity in entities.iter_mut().filter(|e| e.is_tv() && e.anidb_id > 0) {
        if let Some(tvdb_id) = table.tvdb_id(entity.anidb_id) {
            entity.tvdb_id = tvdb_id;
            updated += 1;
        }
    }
    info!(updated, "TVDB ids assigned");
    updated
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetchError;
    use std::cell::Cell;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<anime-list>
  <anime anidbid="1" tvdbid="76885" defaulttvdbseason="1" episodeoffset="" tmdbid="" imdbid="">
    <name>Seikai no Monshou</name>
  </anime>
  <anime anidbid="5" tvdbid="movie" defaulttvdbseason="1" tmdbid="12345" imdbid="tt0000001">
    <name>Some Movie</name>
  </anime>
  <anime anidbid="9" tvdbid="unknown" defaulttvdbseason="1" tmdbid="0">
    <name>Unknown</name>
  </anime>
</anime-list>"#;

    struct CountingSource {
        body: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl DocumentSource for CountingSource {
        fn fetch_document(&self) -> Result<String, FetchError> {
            self.calls.set(self.calls.get() + 1);
            self.body.map(str::to_string).ok_or(FetchError::Status {
                status: 404,
                url: "anime-list".to_string(),
            })
        }
    }

    #[test]
    fn test_parse_keeps_positive_ids_only() {
        let table = BridgeTable::parse(SAMPLE).unwrap();
        assert_eq!(table.tvdb_id(1), Some(76885));
        assert_eq!(table.tmdb_id(1), None);
        assert_eq!(table.tmdb_id(5), Some(12345));
        assert_eq!(table.tvdb_id(5), None);
        assert_eq!(table.tmdb_id(9), None);
        assert_eq!(table.tvdb_id(9), None);
    }

    #[test]
    fn test_parse_rejects_malformed_xml() {
        assert!(BridgeTable::parse("<anime-list><anime").is_err());
    }

    #[test]
    fn test_fresh_file_skips_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let source = CountingSource {
            body: Some(SAMPLE),
            calls: Cell::new(0),
        };

        BridgeTable::load(&source, Some(dir.path())).unwrap();
        assert!(dir.path().join(ANIME_LIST_FILE).exists());
        let table = BridgeTable::load(&source, Some(dir.path())).unwrap();

        assert_eq!(source.calls.get(), 1);
        assert_eq!(table.tmdb_id(5), Some(12345));
    }

    #[test]
    fn test_stale_file_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ANIME_LIST_FILE);
        fs::write(&path, "<anime-list/>").unwrap();
        let source = CountingSource {
            body: Some(SAMPLE),
            calls: Cell::new(0),
        };

        let body = load_cached_document(&source, Some(&path), Duration::ZERO).unwrap();
        assert_eq!(source.calls.get(), 1);
        assert_eq!(body, SAMPLE);
        assert_eq!(fs::read_to_string(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_no_cache_dir_fetches_directly() {
        let source = CountingSource {
            body: Some(SAMPLE),
            calls: Cell::new(0),
        };
        BridgeTable::load(&source, None).unwrap();
        BridgeTable::load(&source, None).unwrap();
        assert_eq!(source.calls.get(), 2);
    }

    #[test]
    fn test_fetch_failure_without_cache_is_error() {
        let source = CountingSource {
            body: None,
            calls: Cell::new(0),
        };
        assert!(BridgeTable::load(&source, None).is_err());
    }

    #[test]
    fn test_assign_tvdb_ids_only_for_tv() {
        let table = BridgeTable::parse(SAMPLE).unwrap();
        let mut entities = vec![
            Entity {
                mal_id: 1,
                anidb_id: 1,
                media_type: "tv".to_string(),
                ..Entity::default()
            },
            Entity {
                mal_id: 2,
                anidb_id: 1,
                media_type: "ova".to_string(),
                ..Entity::default()
            },
            Entity {
                mal_id: 3,
                anidb_id: 0,
                media_type: "tv".to_string(),
                ..Entity::default()
            },
        ];

        assert_eq!(assign_tvdb_ids(&mut entities, &table), 1);
        assert_eq!(entities[0].tvdb_id, 76885);
        assert_eq!(entities[1].tvdb_id, 0);
        assert_eq!(entities[2].tvdb_id, 0);
    }
}
