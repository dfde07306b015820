//! Hand-curated mapping files.
//!
//! Each run rewrites an `*-unmapped.yaml` list of what the pipeline could not
//! resolve and merges it into the `*-master.yaml` a maintainer edits. Ids a
//! maintainer filled into the master survive every rewrite. `genmap` turns the
//! masters into the published `tmdb-mal.yaml` and `tvdb-mal.yaml`, and
//! `format` rewrites hand-edited masters in canonical layout.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::Entity;
use crate::repository::{read_yaml, read_yaml_if_exists, Repository};

pub const TMDB_UNMAPPED_FILE: &str = "tmdb-mal-unmapped.yaml";
pub const TMDB_MASTER_FILE: &str = "tmdb-mal-master.yaml";
pub const TMDB_MAPPING_FILE: &str = "tmdb-mal.yaml";
pub const TVDB_UNMAPPED_FILE: &str = "tvdb-mal-unmapped.yaml";
pub const TVDB_MASTER_FILE: &str = "tvdb-mal-master.yaml";
pub const TVDB_MAPPING_FILE: &str = "tvdb-mal.yaml";

// ============================================================================
// TMDB
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieMapping {
    #[serde(rename = "mainTitle")]
    pub title: String,
    #[serde(rename = "tmdbid", default)]
    pub tmdb_id: u32,
    #[serde(rename = "malid")]
    pub mal_id: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieMappings {
    #[serde(rename = "animeMovies", default)]
    pub movies: Vec<MovieMapping>,
}

impl MovieMappings {
    /// Every movie still lacking a TMDB id, in input order.
    pub fn unmapped(entities: &[Entity]) -> Self {
        let movies = entities
            .iter()
            .filter(|e| e.is_movie() && e.tmdb_id == 0)
            .map(|e| MovieMapping {
                title: e.title.clone(),
                tmdb_id: 0,
                mal_id: e.mal_id,
            })
            .collect();
        Self { movies }
    }

    /// Carry curated ids from `master` onto this list.
    pub fn merged_with(mut self, master: &MovieMappings) -> Self {
        let curated: FxHashMap<u32, u32> = master
            .movies
            .iter()
            .filter(|m| m.tmdb_id != 0)
            .map(|m| (m.mal_id, m.tmdb_id))
            .collect();
        for movie in &mut self.movies {
            if let Some(&id) = curated.get(&movie.mal_id) {
                movie.tmdb_id = id;
            }
        }
        self
    }

    pub fn mapped_only(&self) -> Self {
        Self {
            movies: self.movies.iter().filter(|m| m.tmdb_id != 0).cloned().collect(),
        }
    }
}

// ============================================================================
// TVDB
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMapping {
    #[serde(rename = "tvdbseason", default)]
    pub tvdb_season: u32,
    #[serde(default)]
    pub start: u32,
    #[serde(rename = "mappingType", default, skip_serializing_if = "String::is_empty")]
    pub mapping_type: String,
    #[serde(rename = "explicitEpisodes", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub explicit_episodes: BTreeMap<u32, u32>,
    #[serde(rename = "skipMalEpisodes", default, skip_serializing_if = "Vec::is_empty")]
    pub skip_mal_episodes: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowMapping {
    #[serde(rename = "malid")]
    pub mal_id: u32,
    pub title: String,
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(rename = "tvdbid", default)]
    pub tvdb_id: u32,
    #[serde(rename = "tvdbseason", default)]
    pub tvdb_season: u32,
    #[serde(default)]
    pub start: u32,
    #[serde(rename = "useMapping", default)]
    pub use_mapping: bool,
    #[serde(rename = "animeMapping", default)]
    pub episode_mappings: Vec<EpisodeMapping>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowMappings {
    #[serde(rename = "AnimeMap", default)]
    pub anime: Vec<ShowMapping>,
}

impl ShowMappings {
    /// One blank entry per entity.
    pub fn unmapped(entities: &[Entity]) -> Self {
        let anime = entities
            .iter()
            .map(|e| ShowMapping {
                mal_id: e.mal_id,
                title: e.title.clone(),
                media_type: e.media_type.clone(),
                ..ShowMapping::default()
            })
            .collect();
        Self { anime }
    }

    /// Carry every curated field from master entries that have a TVDB id.
    pub fn merged_with(mut self, master: &ShowMappings) -> Self {
        let curated: FxHashMap<u32, &ShowMapping> = master
            .anime
            .iter()
            .filter(|m| m.tvdb_id != 0)
            .map(|m| (m.mal_id, m))
            .collect();
        for show in &mut self.anime {
            if let Some(m) = curated.get(&show.mal_id) {
                show.tvdb_id = m.tvdb_id;
                show.tvdb_season = m.tvdb_season;
                show.start = m.start;
                show.use_mapping = m.use_mapping;
                show.episode_mappings = m.episode_mappings.clone();
            }
        }
        self
    }

    pub fn mapped_only(&self) -> Self {
        Self {
            anime: self.anime.iter().filter(|m| m.tvdb_id != 0).cloned().collect(),
        }
    }
}

// ============================================================================
// Files
// ============================================================================

pub struct MappingFiles<'a> {
    root: PathBuf,
    repo: &'a Repository,
}

impl<'a> MappingFiles<'a> {
    pub fn new(root: &Path, repo: &'a Repository) -> Self {
        Self {
            root: root.to_path_buf(),
            repo,
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Rewrite the TMDB unmapped list and merge it into the master.
    /// A missing master is created from the unmapped list.
    pub fn update_tmdb(&self, entities: &[Entity]) -> Result<MovieMappings> {
        let unmapped = MovieMappings::unmapped(entities);
        self.repo.write_yaml(&self.path(TMDB_UNMAPPED_FILE), &unmapped)?;

        let master_path = self.path(TMDB_MASTER_FILE);
        let master = match read_yaml_if_exists::<MovieMappings>(&master_path)? {
            Some(existing) => unmapped.clone().merged_with(&existing),
            None => unmapped.clone(),
        };
        self.repo.write_yaml(&master_path, &master)?;
        info!(unmapped = unmapped.movies.len(), "TMDB mapping master updated");
        Ok(master)
    }

    pub fn update_tvdb(&self, entities: &[Entity]) -> Result<ShowMappings> {
        let unmapped = ShowMappings::unmapped(entities);
        self.repo.write_yaml(&self.path(TVDB_UNMAPPED_FILE), &unmapped)?;

        let master_path = self.path(TVDB_MASTER_FILE);
        let master = match read_yaml_if_exists::<ShowMappings>(&master_path)? {
            Some(existing) => unmapped.merged_with(&existing),
            None => unmapped,
        };
        self.repo.write_yaml(&master_path, &master)?;
        info!(entries = master.anime.len(), "TVDB mapping master updated");
        Ok(master)
    }

    /// Publish the curated subset of both masters. Missing masters are fatal.
    pub fn generate(&self) -> Result<(usize, usize)> {
        let tmdb: MovieMappings = read_yaml(&self.path(TMDB_MASTER_FILE))?;
        let tmdb = tmdb.mapped_only();
        self.repo.write_yaml(&self.path(TMDB_MAPPING_FILE), &tmdb)?;

        let tvdb: ShowMappings = read_yaml(&self.path(TVDB_MASTER_FILE))?;
        let tvdb = tvdb.mapped_only();
        self.repo.write_yaml(&self.path(TVDB_MAPPING_FILE), &tvdb)?;

        info!(tmdb = tmdb.movies.len(), tvdb = tvdb.anime.len(), "mapping files generated");
        Ok((tmdb.movies.len(), tvdb.anime.len()))
    }

    /// Rewrite both masters in canonical layout, keeping their content.
    /// Returns the entry count of each master; a missing one is skipped.
    pub fn format(&self) -> Result<(Option<usize>, Option<usize>)> {
        let tmdb_path = self.path(TMDB_MASTER_FILE);
        let tmdb = read_yaml_if_exists::<MovieMappings>(&tmdb_path)?;
        if let Some(master) = &tmdb {
            self.repo.write_yaml(&tmdb_path, master)?;
        }

        let tvdb_path = self.path(TVDB_MASTER_FILE);
        let tvdb = read_yaml_if_exists::<ShowMappings>(&tvdb_path)?;
        if let Some(master) = &tvdb {
            self.repo.write_yaml(&tvdb_path, master)?;
        }

        let counts = (tmdb.map(|m| m.movies.len()), tvdb.map(|m| m.anime.len()));
        info!(tmdb = ?counts.0, tvdb = ?counts.1, "mapping masters formatted");
        Ok(counts)
    }
}
