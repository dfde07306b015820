//! Core data models for the identifier pipeline.
//!
//! This module contains the entity record that flows through every stage,
//! the value types the movie scorer works on, and shared type aliases.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::normalize::release_year;

// ============================================================================
// Type Aliases
// ============================================================================

/// MAL id -> external id, as seeded from the cache at stage start.
pub type IdMap = FxHashMap<u32, u32>;

pub const TYPE_TV: &str = "tv";
pub const TYPE_MOVIE: &str = "movie";

/// TMDB genre ids the resolver cares about.
pub const GENRE_ANIMATION: u32 = 16;
pub const GENRE_DOCUMENTARY: u32 = 99;

// ============================================================================
// Entity
// ============================================================================

/// One catalog title. Field order here is the key order of the JSON artifacts.
///
/// `japanese_title` and `synonyms` are only used for matching and are not
/// written to disk.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "title")]
    pub title: String,
    #[serde(rename = "enTitle", default, skip_serializing_if = "String::is_empty")]
    pub english_title: String,
    #[serde(rename = "malid")]
    pub mal_id: u32,
    #[serde(rename = "anidbid", default, skip_serializing_if = "is_zero")]
    pub anidb_id: u32,
    #[serde(rename = "tvdbid", default, skip_serializing_if = "is_zero")]
    pub tvdb_id: u32,
    #[serde(rename = "tmdbid", default, skip_serializing_if = "is_zero")]
    pub tmdb_id: u32,
    #[serde(rename = "type", default)]
    pub media_type: String,
    #[serde(rename = "releaseDate", default)]
    pub release_date: String,
    #[serde(skip)]
    pub japanese_title: String,
    #[serde(skip)]
    pub synonyms: Vec<String>,
}

fn is_zero(v: &u32) -> bool {
    *v == 0
}

impl Entity {
    pub fn is_tv(&self) -> bool {
        self.media_type == TYPE_TV
    }

    pub fn is_movie(&self) -> bool {
        self.media_type == TYPE_MOVIE
    }

    pub fn release_year(&self) -> Option<i32> {
        release_year(&self.release_date)
    }

    /// Title sent to the movie search: English when present, else the main title.
    pub fn search_title(&self) -> &str {
        if self.english_title.is_empty() {
            &self.title
        } else {
            &self.english_title
        }
    }

    pub fn mal_url(&self) -> String {
        format!("https://myanimelist.net/anime/{}", self.mal_id)
    }
}

// ============================================================================
// Movie Matching
// ============================================================================

/// Candidate movie as seen by the scorer.
/// Decoupled from the search API's wire format.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchCandidate {
    pub tmdb_id: u32,
    pub title: String,
    pub original_title: String,
    pub release_date: String,
    pub popularity: f64,
    pub vote_count: u32,
    pub genre_ids: Vec<u32>,
    pub video: bool,
}

impl SearchCandidate {
    pub fn has_genre(&self, genre: u32) -> bool {
        self.genre_ids.contains(&genre)
    }
}

/// Winning TMDB id with its confidence score
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoredCandidate {
    pub tmdb_id: u32,
    pub score: f64,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entity {
        Entity {
            title: "Kimi no Na wa.".to_string(),
            english_title: "Your Name.".to_string(),
            mal_id: 32281,
            anidb_id: 11829,
            tvdb_id: 0,
            tmdb_id: 372058,
            media_type: TYPE_MOVIE.to_string(),
            release_date: "2016-08-26".to_string(),
            japanese_title: "君の名は。".to_string(),
            synonyms: vec!["Your Name".to_string()],
        }
    }

    #[test]
    fn test_json_keys_and_omitted_fields() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(
            json,
            r#"{"title":"Kimi no Na wa.","enTitle":"Your Name.","malid":32281,"anidbid":11829,"tmdbid":372058,"type":"movie","releaseDate":"2016-08-26"}"#
        );
    }

    #[test]
    fn test_round_trip_drops_only_matching_titles() {
        let original = sample();
        let json = serde_json::to_string(&original).unwrap();
        let back: Entity = serde_json::from_str(&json).unwrap();

        let expected = Entity {
            japanese_title: String::new(),
            synonyms: Vec::new(),
            ..original
        };
        assert_eq!(back, expected);
    }

    #[test]
    fn test_search_title_prefers_english() {
        let mut e = sample();
        assert_eq!(e.search_title(), "Your Name.");
        e.english_title.clear();
        assert_eq!(e.search_title(), "Kimi no Na wa.");
    }
}
