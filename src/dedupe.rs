//! Duplicate resolution for TV entries sharing an AniDB id.
//!
//! MAL sometimes lists two entries (a season split, a recap) that both scrape
//! to the same AniDB id. AniDB's own main title decides which one is kept.
//! Without that evidence the whole group stays.

use anyhow::{Context, Result};
use once_cell::unsync::OnceCell;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info, warn};

use crate::http::DocumentSource;
use crate::models::{Entity, TYPE_TV};
use crate::normalize::titles_equal;

pub const ANIME_TITLES_URL: &str =
    "https://github.com/Anime-Lists/anime-lists/raw/master/animetitles.xml";

/// AniDB id -> main title.
#[derive(Debug, Default)]
pub struct TitleAuthority {
    main_titles: FxHashMap<u32, String>,
}

impl TitleAuthority {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml).context("Failed parsing animetitles XML")?;
        let mut main_titles = FxHashMap::default();

        for anime in doc.descendants().filter(|n| n.has_tag_name("anime")) {
            let Some(aid) = anime.attribute("aid").and_then(|v| v.trim().parse::<u32>().ok()) else {
                continue;
            };
            let main = anime
                .children()
                .filter(|n| n.has_tag_name("title"))
                .find(|n| n.attribute("type") == Some("main"))
                .and_then(|n| n.text())
                .map(str::trim)
                .filter(|t| !t.is_empty());
            if let Some(title) = main {
                main_titles.entry(aid).or_insert_with(|| title.to_string());
            }
        }
        Ok(Self { main_titles })
    }

    pub fn main_title(&self, anidb_id: u32) -> Option<&str> {
        self.main_titles.get(&anidb_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.main_titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main_titles.is_empty()
    }
}

/// Fetches and parses the authority on first use, at most once.
/// A failed fetch or parse is remembered as "no authority".
pub struct LazyAuthority<'a> {
    source: &'a dyn DocumentSource,
    cell: OnceCell<Option<TitleAuthority>>,
}

impl<'a> LazyAuthority<'a> {
    pub fn new(source: &'a dyn DocumentSource) -> Self {
        Self {
            source,
            cell: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Option<&TitleAuthority> {
        self.cell
            .get_or_init(|| {
                let loaded = self
                    .source
                    .fetch_document()
                    .context("Failed to fetch animetitles")
                    .and_then(|xml| TitleAuthority::parse(&xml));
                match loaded {
                    Ok(authority) => {
                        info!(titles = authority.len(), "title authority loaded");
                        Some(authority)
                    }
                    Err(e) => {
                        warn!(error = %format!("{:#}", e), "title authority unavailable, keeping all duplicates");
                        None
                    }
                }
            })
            .as_ref()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupeReport {
    /// Distinct (anidb_id, type) groups with more than one member
    pub groups: usize,
    /// Entities belonging to those groups
    pub members: usize,
    pub removed: usize,
}

/// AniDB ids shared by more than one TV entity.
pub fn duplicate_groups(entities: &[Entity]) -> FxHashMap<u32, usize> {
    let mut counts: FxHashMap<u32, usize> = FxHashMap::default();
    for e in entities.iter().filter(|e| e.anidb_id > 0 && e.media_type == TYPE_TV) {
        *counts.entry(e.anidb_id).or_default() += 1;
    }
    counts.retain(|_, n| *n > 1);
    counts
}

/// Drop group members whose title disagrees with the authority's main title.
/// Single pass; survivors keep their input order.
pub fn resolve_duplicates(
    entities: Vec<Entity>,
    authority: &LazyAuthority<'_>,
) -> (Vec<Entity>, DedupeReport) {
    let groups = duplicate_groups(&entities);
    let mut report = DedupeReport {
        groups: groups.len(),
        members: groups.values().sum(),
        removed: 0,
    };
    if groups.is_empty() {
        return (entities, report);
    }
    info!(groups = report.groups, members = report.members, "duplicates found");

    let Some(authority) = authority.get() else {
        return (entities, report);
    };

    let mut mismatched: FxHashSet<u32> = FxHashSet::default();
    for e in entities
        .iter()
        .filter(|e| e.media_type == TYPE_TV && groups.contains_key(&e.anidb_id))
    {
        let Some(main) = authority.main_title(e.anidb_id) else {
            continue;
        };
        if !titles_equal(&e.title, main) {
            debug!(mal_id = e.mal_id, title = %e.title, anidb_title = main, "removing mismatched duplicate");
            mismatched.insert(e.mal_id);
        }
    }

    report.removed = mismatched.len();
    let kept = entities
        .into_iter()
        .filter(|e| !mismatched.contains(&e.mal_id))
        .collect();
    (kept, report)
}
