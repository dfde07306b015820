//! animap - anime identifier aggregation shared by the `animap` binary.
//!
//! Builds a MAL -> AniDB / TVDB / TMDB mapping from the MAL ranking API,
//! MAL detail pages, the Anime-Lists XML and TMDB search, with a SQLite
//! cache so repeated runs only touch the network for new titles.

pub mod bridge;
pub mod cache;
pub mod cancel;
pub mod config;
pub mod dedupe;
pub mod fetch_mode;
pub mod http;
pub mod mapping;
pub mod models;
pub mod moviedb;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod progress;
pub mod ranking;
pub mod repository;
pub mod safety;
pub mod scoring;
pub mod scrape;
pub mod stats;
