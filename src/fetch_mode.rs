//! Which entities a resolution stage should hit the network for.
//!
//! The same four modes drive the AniDB scrape and the TMDB search. A
//! `StagePolicy` says which id the stage fills in and which extra filters its
//! `default` mode applies.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::cache::IdField;
use crate::models::{Entity, IdMap, TYPE_MOVIE, TYPE_TV};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Unresolved and uncached, plus the stage's recency/type filter
    #[default]
    Default,
    /// Every entity without the id, no other filter
    Missing,
    /// Everything the stage applies to, cached or not
    All,
    /// Nothing
    Skip,
}

impl FromStr for FetchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(FetchMode::Default),
            "missing" => Ok(FetchMode::Missing),
            "all" => Ok(FetchMode::All),
            "skip" => Ok(FetchMode::Skip),
            other => bail!(
                "invalid fetch mode '{}' (expected default, missing, all or skip)",
                other
            ),
        }
    }
}

impl fmt::Display for FetchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FetchMode::Default => "default",
            FetchMode::Missing => "missing",
            FetchMode::All => "all",
            FetchMode::Skip => "skip",
        };
        f.write_str(s)
    }
}

/// Stage-specific parameters for `select`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StagePolicy {
    pub field: IdField,
    /// Applies to every mode.
    pub type_filter: Option<&'static str>,
    /// Extra type requirement under `default`.
    pub default_type: Option<&'static str>,
    /// Under `default`, only years >= current_year - window.
    pub default_window_years: Option<i32>,
}

impl StagePolicy {
    /// Detail page scrape: `default` is limited to recent TV.
    pub fn anidb() -> Self {
        Self {
            field: IdField::AniDb,
            type_filter: None,
            default_type: Some(TYPE_TV),
            default_window_years: Some(1),
        }
    }

    /// Movie search: only movies, `default` behaves like `missing`.
    pub fn tmdb() -> Self {
        Self {
            field: IdField::Tmdb,
            type_filter: Some(TYPE_MOVIE),
            default_type: None,
            default_window_years: None,
        }
    }

    fn id_of(&self, entity: &Entity) -> u32 {
        match self.field {
            IdField::AniDb => entity.anidb_id,
            IdField::Tmdb => entity.tmdb_id,
        }
    }
}

/// Indices of the entities to resolve this run, in input order.
pub fn select(
    entities: &[Entity],
    mode: FetchMode,
    policy: &StagePolicy,
    cached: &IdMap,
    current_year: i32,
) -> Vec<usize> {
    if mode == FetchMode::Skip {
        return Vec::new();
    }

    entities
        .iter()
        .enumerate()
        .filter(|(_, e)| policy.type_filter.map_or(true, |t| e.media_type == t))
        .filter(|(_, e)| {
            let unresolved = policy.id_of(e) == 0 && !cached.contains_key(&e.mal_id);
            match mode {
                FetchMode::All => true,
                FetchMode::Missing => unresolved,
                FetchMode::Default => unresolved && within_default_scope(e, policy, current_year),
                FetchMode::Skip => false,
            }
        })
        .map(|(idx, _)| idx)
        .collect()
}

fn within_default_scope(entity: &Entity, policy: &StagePolicy, current_year: i32) -> bool {
    if let Some(required) = policy.default_type {
        if entity.media_type != required {
            return false;
        }
    }
    match policy.default_window_years {
        Some(window) => entity
            .release_year()
            .map_or(false, |year| year >= current_year - window),
        None => true,
    }
}

// ============================================================================
// TESTS
// ============================================================================
