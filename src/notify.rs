//! Run notifications. Discord webhooks are the only channel.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::http::{FetchError, HttpClient};
use crate::stats::RunStatistics;

const COLOR_SUCCESS: u32 = 0x00ff00;
const COLOR_FAILURE: u32 = 0xff0000;

pub trait Notifier {
    fn success(&self, stats: &RunStatistics);
    fn failure(&self, error: &str);
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn success(&self, _stats: &RunStatistics) {}
    fn failure(&self, _error: &str) {}
}

#[derive(Debug, Serialize)]
struct Webhook {
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    color: u32,
    timestamp: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

impl EmbedField {
    fn new(name: &'static str, value: String, inline: bool) -> Self {
        Self { name, value, inline }
    }
}

fn success_embed(stats: &RunStatistics) -> Embed {
    Embed {
        title: "animap run completed".to_string(),
        description: "Mapping database updated".to_string(),
        color: COLOR_SUCCESS,
        timestamp: Utc::now().to_rfc3339(),
        fields: vec![
            EmbedField::new("Total MAL IDs", stats.total.to_string(), true),
            EmbedField::new(
                "AniDB Coverage",
                format!("{} ({:.1}%)", stats.with_anidb, stats.anidb_coverage()),
                true,
            ),
            EmbedField::new(
                "Movies",
                format!(
                    "{} total, {} with TMDB ({:.1}%)",
                    stats.movies,
                    stats.movies_with_tmdb,
                    stats.tmdb_coverage()
                ),
                false,
            ),
            EmbedField::new(
                "TV Shows",
                format!(
                    "{} total, {} with TVDB ({:.1}%)",
                    stats.tv,
                    stats.tv_with_tvdb,
                    stats.tvdb_coverage()
                ),
                false,
            ),
            EmbedField::new(
                "Duplicates",
                format!("{} groups, {} removed", stats.duplicate_groups, stats.duplicates_removed),
                true,
            ),
        ],
    }
}

fn failure_embed(error: &str) -> Embed {
    Embed {
        title: "animap run failed".to_string(),
        description: format!("Update failed with error:\n```{}```", error),
        color: COLOR_FAILURE,
        timestamp: Utc::now().to_rfc3339(),
        fields: Vec::new(),
    }
}

pub struct DiscordNotifier {
    http: HttpClient,
    webhook_url: String,
}

impl DiscordNotifier {
    /// The client should carry its own cancel token so a failure can still
    /// be reported after the run was aborted.
    pub fn new(http: HttpClient, webhook_url: impl Into<String>) -> Self {
        Self {
            http,
            webhook_url: webhook_url.into(),
        }
    }

    fn send(&self, embed: Embed) -> Result<(), FetchError> {
        let payload = Webhook { embeds: vec![embed] };
        self.http.post_json(&self.webhook_url, &payload)?;
        debug!("discord notification sent");
        Ok(())
    }
}

impl Notifier for DiscordNotifier {
    fn success(&self, stats: &RunStatistics) {
        if let Err(e) = self.send(success_embed(stats)) {
            warn!(error = %e, "failed to send success notification");
        }
    }

    fn failure(&self, error: &str) {
        if let Err(e) = self.send(failure_embed(error)) {
            warn!(error = %e, "failed to send failure notification");
        }
    }
}

/// Discord when a webhook is set, otherwise a no-op.
pub fn from_webhook(http: HttpClient, webhook_url: Option<&str>) -> Box<dyn Notifier> {
    match webhook_url.map(str::trim).filter(|u| !u.is_empty()) {
        Some(url) => Box::new(DiscordNotifier::new(http, url)),
        None => Box::new(NoopNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_payload_shape() {
        let stats = RunStatistics {
            total: 10,
            with_anidb: 5,
            movies: 4,
            movies_with_tmdb: 1,
            ..RunStatistics::default()
        };
        let json = serde_json::to_value(Webhook {
            embeds: vec![success_embed(&stats)],
        })
        .unwrap();

        let embed = &json["embeds"][0];
        assert_eq!(embed["color"], 0x00ff00);
        assert_eq!(embed["fields"][0]["value"], "10");
        assert_eq!(embed["fields"][1]["value"], "5 (50.0%)");
        assert_eq!(embed["fields"][2]["value"], "4 total, 1 with TMDB (25.0%)");
        assert_eq!(embed["fields"][3]["value"], "0 total, 0 with TVDB (0.0%)");
    }

    #[test]
    fn test_failure_payload_omits_fields() {
        let json = serde_json::to_value(failure_embed("boom")).unwrap();
        assert_eq!(json["color"], 0xff0000);
        assert!(json.get("fields").is_none());
        assert!(json["description"].as_str().unwrap().contains("boom"));
    }
}
