//! On-disk artifacts: the per-stage entity lists (JSON) and the mapping files (YAML).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::models::Entity;
use crate::safety::validate_output_path;

pub const ARTIFACT_DIR: &str = "animap";

/// Stage artifact locations under `<root>/animap/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Paths {
    pub root_dir: PathBuf,
    pub malid: PathBuf,
    pub anidb: PathBuf,
    pub tvdb: PathBuf,
    pub tmdb: PathBuf,
    pub final_output: PathBuf,
}

impl Paths {
    pub fn new(root: &Path) -> Self {
        let root_dir = root.join(ARTIFACT_DIR);
        Self {
            malid: root_dir.join("malid.json"),
            anidb: root_dir.join("malid-anidbid.json"),
            tvdb: root_dir.join("malid-anidbid-tvdbid.json"),
            tmdb: root_dir.join("malid-anidbid-tvdbid-tmdbid.json"),
            final_output: root_dir.join("for-animap.json"),
            root_dir,
        }
    }
}

/// Reads and writes the on-disk artifacts. JSON for entity lists, YAML for
/// the mapping files a maintainer edits by hand.
#[derive(Clone, Copy, Debug, Default)]
pub struct Repository;

fn create_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }
    Ok(())
}

/// One blank line between top-level list entries, so hand edits diff cleanly.
fn space_entries(yaml: &str) -> String {
    let mut out = String::with_capacity(yaml.len() + yaml.len() / 16);
    let mut seen_entry = false;
    for line in yaml.lines() {
        if line.starts_with("- ") {
            if seen_entry {
                out.push('\n');
            }
            seen_entry = true;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

impl Repository {
    pub fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        validate_output_path(path, ".json")?;
        create_parent(path)?;
        let mut body = serde_json::to_string_pretty(value).context("Failed to serialize artifact")?;
        body.push('\n');
        fs::write(path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "artifact written");
        Ok(())
    }

    pub fn write_yaml<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<()> {
        validate_output_path(path, ".yaml")?;
        create_parent(path)?;
        let body = serde_yaml::to_string(value).context("Failed to serialize mapping")?;
        fs::write(path, space_entries(&body)).with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), "mapping written");
        Ok(())
    }

    pub fn store(&self, path: &Path, entities: &[Entity]) -> Result<()> {
        self.write_json(path, entities)?;
        debug!(path = %path.display(), count = entities.len(), "stored entities");
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<Vec<Entity>> {
        read_json(path)
    }
}

/// `Ok(None)` when the file does not exist.
fn read_if_exists(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(body) => Ok(Some(body)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("Failed to parse JSON from {}", path.display()))
}

/// Like `read_json`, but a missing file is `Ok(None)`.
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    read_if_exists(path)?
        .map(|body| serde_json::from_str(&body))
        .transpose()
        .with_context(|| format!("Failed to parse JSON from {}", path.display()))
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let body = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_yaml::from_str(&body).with_context(|| format!("Failed to parse YAML from {}", path.display()))
}

pub fn read_yaml_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    read_if_exists(path)?
        .map(|body| serde_yaml::from_str(&body))
        .transpose()
        .with_context(|| format!("Failed to parse YAML from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_layout() {
        let paths = Paths::new(Path::new("/srv/data"));
        assert_eq!(paths.root_dir, PathBuf::from("/srv/data/animap"));
        assert_eq!(paths.tmdb, PathBuf::from("/srv/data/animap/malid-anidbid-tvdbid-tmdbid.json"));
        assert_eq!(paths.final_output, PathBuf::from("/srv/data/animap/for-animap.json"));
    }

    #[test]
    fn test_store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::new(dir.path());
        let repo = Repository;
        let entities = vec![
            Entity {
                title: "Foo".to_string(),
                english_title: "Foo EN".to_string(),
                japanese_title: "フー".to_string(),
                synonyms: vec!["F".to_string()],
                mal_id: 1,
                anidb_id: 2,
                tvdb_id: 3,
                tmdb_id: 0,
                media_type: "tv".to_string(),
                release_date: "2020-01-01".to_string(),
            },
            Entity {
                title: "Bar".to_string(),
                mal_id: 5,
                media_type: "movie".to_string(),
                ..Entity::default()
            },
        ];

        repo.store(&paths.final_output, &entities).unwrap();
        let loaded = repo.load(&paths.final_output).unwrap();

        let expected: Vec<Entity> = entities
            .into_iter()
            .map(|e| Entity {
                japanese_title: String::new(),
                synonyms: Vec::new(),
                ..e
            })
            .collect();
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository;
        assert!(repo.load(&dir.path().join("nope.json")).is_err());
        let missing: Option<Vec<Entity>> = read_json_if_exists(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_refuses_mismatched_extension() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("state.yaml");
        assert!(Repository.store(&target, &[]).is_err());
        assert!(Repository.write_yaml(&dir.path().join("map.json"), &[1]).is_err());
        assert!(!target.exists());
    }

    #[test]
    fn test_yaml_entries_are_spaced() {
        let yaml = "items:\n- a: 1\n  nested:\n  - x\n  - y\n- a: 2\n";
        assert_eq!(space_entries(yaml), "items:\n- a: 1\n  nested:\n  - x\n  - y\n\n- a: 2\n");
    }

    #[test]
    fn test_yaml_round_trip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/values.yaml");
        Repository.write_yaml(&path, &vec![vec![1u32, 2], vec![3]]).unwrap();
        let back: Vec<Vec<u32>> = read_yaml(&path).unwrap();
        assert_eq!(back, vec![vec![1, 2], vec![3]]);

        let missing: Option<Vec<u32>> = read_yaml_if_exists(&dir.path().join("nope.yaml")).unwrap();
        assert!(missing.is_none());
    }
}
