//! Coverage statistics for a finished run.

use serde::Serialize;
use tracing::info;

use crate::models::Entity;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total: usize,
    pub with_anidb: usize,
    pub movies: usize,
    pub movies_with_tmdb: usize,
    pub tv: usize,
    pub tv_with_tvdb: usize,
    pub duplicate_groups: usize,
    pub duplicates_removed: usize,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl RunStatistics {
    pub fn collect(entities: &[Entity], duplicate_groups: usize, duplicates_removed: usize) -> Self {
        let mut stats = RunStatistics {
            total: entities.len(),
            duplicate_groups,
            duplicates_removed,
            ..Self::default()
        };
        for e in entities {
            if e.anidb_id > 0 {
                stats.with_anidb += 1;
            }
            if e.is_movie() {
                stats.movies += 1;
                if e.tmdb_id > 0 {
                    stats.movies_with_tmdb += 1;
                }
            } else if e.is_tv() {
                stats.tv += 1;
                if e.tvdb_id > 0 {
                    stats.tv_with_tvdb += 1;
                }
            }
        }
        stats
    }

    pub fn anidb_coverage(&self) -> f64 {
        percent(self.with_anidb, self.total)
    }

    pub fn tmdb_coverage(&self) -> f64 {
        percent(self.movies_with_tmdb, self.movies)
    }

    pub fn tvdb_coverage(&self) -> f64 {
        percent(self.tv_with_tvdb, self.tv)
    }

    pub fn log(&self) {
        info!(
            total = self.total,
            anidb = self.with_anidb,
            anidb_pct = %format!("{:.1}", self.anidb_coverage()),
            movies = self.movies,
            tmdb = self.movies_with_tmdb,
            tmdb_pct = %format!("{:.1}", self.tmdb_coverage()),
            tv = self.tv,
            tvdb = self.tv_with_tvdb,
            tvdb_pct = %format!("{:.1}", self.tvdb_coverage()),
            duplicate_groups = self.duplicate_groups,
            duplicates_removed = self.duplicates_removed,
            "run statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(media_type: &str, anidb_id: u32, tvdb_id: u32, tmdb_id: u32) -> Entity {
        Entity {
            media_type: media_type.to_string(),
            anidb_id,
            tvdb_id,
            tmdb_id,
            ..Entity::default()
        }
    }

    #[test]
    fn test_collect_counts_and_percentages() {
        let entities = vec![
            entity("tv", 1, 10, 0),
            entity("tv", 2, 0, 0),
            entity("movie", 3, 0, 30),
            entity("movie", 0, 0, 0),
            entity("ova", 0, 0, 0),
        ];
        let stats = RunStatistics::collect(&entities, 1, 1);

        assert_eq!(stats.total, 5);
        assert_eq!(stats.with_anidb, 3);
        assert_eq!(stats.movies, 2);
        assert_eq!(stats.movies_with_tmdb, 1);
        assert_eq!(stats.tv, 2);
        assert_eq!(stats.tv_with_tvdb, 1);
        assert_eq!(stats.anidb_coverage(), 60.0);
        assert_eq!(stats.tmdb_coverage(), 50.0);
        assert_eq!(stats.tvdb_coverage(), 50.0);
    }

    #[test]
    fn test_empty_set_reports_zero_percent() {
        let stats = RunStatistics::collect(&[], 0, 0);
        assert_eq!(stats.anidb_coverage(), 0.0);
        assert_eq!(stats.tmdb_coverage(), 0.0);
        assert_eq!(stats.tvdb_coverage(), 0.0);
    }
}
