//! Confidence scoring for TMDB search results.
//!
//! A result is scored on four components:
//! - Title agreement (0-40, and a hard gate: no overlap means rejection)
//! - Release date proximity (10-30)
//! - Popularity and vote count (0-20)
//! - Animation genre bonus (0-5)

use crate::models::{Entity, ScoredCandidate, SearchCandidate, GENRE_ANIMATION, GENRE_DOCUMENTARY};
use crate::normalize::{parse_release_date, titles_equal, titles_overlap, year_str};

// ============================================================================
// Score Thresholds
// ============================================================================

/// Minimum score to accept a scored match
pub const ACCEPT_THRESHOLD: f64 = 50.0;

/// Scores below this are logged as low-confidence accepts
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 65.0;

// ============================================================================
// Components
// ============================================================================

/// Title agreement between the entity and a result. Rules are checked in order.
pub fn title_score(entity: &Entity, candidate: &SearchCandidate) -> f64 {
    let main = entity.title.as_str();
    let english = entity.english_title.as_str();
    let japanese = entity.japanese_title.as_str();
    let title = candidate.title.as_str();
    let original = candidate.original_title.as_str();

    if titles_equal(main, title) || titles_equal(english, title) {
        40.0
    } else if titles_equal(main, original) || titles_equal(english, original) {
        35.0
    } else if titles_equal(japanese, original) || titles_equal(japanese, title) {
        35.0
    } else if titles_overlap(title, main) {
        25.0
    } else if titles_overlap(original, main) {
        20.0
    } else if titles_overlap(english, title) {
        25.0
    } else if titles_overlap(japanese, original) {
        20.0
    } else {
        0.0
    }
}

/// Graduated release-date agreement.
pub fn date_score(entity_date: &str, candidate_date: &str) -> f64 {
    if !entity_date.is_empty() && entity_date == candidate_date {
        return 30.0;
    }
    match (parse_release_date(entity_date), parse_release_date(candidate_date)) {
        (Some(a), Some(b)) => match (a - b).num_days().abs() {
            0..=7 => 25.0,
            8..=30 => 20.0,
            31..=90 => 15.0,
            _ => 10.0,
        },
        _ => 10.0,
    }
}

pub fn popularity_score(candidate: &SearchCandidate) -> f64 {
    let popularity = (candidate.popularity / 10.0).clamp(0.0, 10.0);
    let votes = (candidate.vote_count as f64 / 500.0).min(10.0);
    popularity + votes
}

// ============================================================================
// Combined Scoring
// ============================================================================

/// Total confidence for one result. Zero when the titles share nothing,
/// regardless of the other components.
pub fn score_candidate(entity: &Entity, candidate: &SearchCandidate) -> f64 {
    let title = title_score(entity, candidate);
    if title == 0.0 {
        return 0.0;
    }

    let mut score = title;
    score += date_score(&entity.release_date, &candidate.release_date);
    score += popularity_score(candidate);
    if candidate.has_genre(GENRE_ANIMATION) {
        score += 5.0;
    }
    score
}

/// Drop trailers, documentaries and results from another year.
/// Only meaningful when there is more than one result to choose from.
pub fn prefilter<'a>(entity: &Entity, candidates: &'a [SearchCandidate]) -> Vec<&'a SearchCandidate> {
    let entity_year = year_str(&entity.release_date);
    candidates
        .iter()
        .filter(|c| !c.video)
        .filter(|c| !c.has_genre(GENRE_DOCUMENTARY))
        .filter(|c| year_str(&c.release_date) == entity_year)
        .collect()
}

/// Highest-scoring result, before the acceptance threshold is applied.
///
/// A lone result is scored as-is. Otherwise the candidate set is prefiltered
/// first. Ties keep the earlier result.
pub fn best_match(entity: &Entity, candidates: &[SearchCandidate]) -> Option<ScoredCandidate> {
    let pool: Vec<&SearchCandidate> = if candidates.len() == 1 {
        candidates.iter().collect()
    } else {
        prefilter(entity, candidates)
    };

    let mut best: Option<ScoredCandidate> = None;
    for candidate in pool {
        let score = score_candidate(entity, candidate);
        if score <= 0.0 {
            continue;
        }
        if best.map_or(true, |b| score > b.score) {
            best = Some(ScoredCandidate {
                tmdb_id: candidate.tmdb_id,
                score,
            });
        }
    }
    best
}

/// Older matching rule kept ahead of scoring: a result with the exact same
/// release date, or the only result of the search.
pub fn exact_match(entity: &Entity, candidates: &[SearchCandidate], total_results: u32) -> Option<u32> {
    let unique = total_results == 1;
    candidates
        .iter()
        .find(|c| unique || (!entity.release_date.is_empty() && c.release_date == entity.release_date))
        .map(|c| c.tmdb_id)
}

pub fn is_accepted(scored: &ScoredCandidate) -> bool {
    scored.score >= ACCEPT_THRESHOLD
}

// ============================================================================
// TESTS
// ============================================================================
