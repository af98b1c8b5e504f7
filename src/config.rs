use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::ctrl_proto::{imp::StripBank8, Buildable};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Couldn't read configuration {}", .0.display())]
    Read(PathBuf, #[source] io::Error),

    #[error("Invalid configuration {}", .0.display())]
    Parse(PathBuf, #[source] serde_json::Error),
}

/// Host settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Name of the Control Surface to use.
    pub surface: String,
    pub refresh_interval_ms: u64,
    /// Where the protocol state is saved between runs.
    pub state_file: Option<PathBuf>,
    /// Tracks of the demo session, in session order.
    pub tracks: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            surface: StripBank8::NAME.to_string(),
            refresh_interval_ms: 100,
            state_file: None,
            tracks: ["Kick", "Snare", "Hi-Hat", "Bass", "Guitar", "Vocals"]
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Loads the configuration, falling back to defaults if the file is missing.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::info!("No configuration at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(err) => return Err(Error::Read(path.to_owned(), err)),
        };

        serde_json::from_str(&content).map_err(|err| Error::Parse(path.to_owned(), err))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("none.json")).unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.refresh_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, r#"{ "surface": "Focus Strip", "refresh_interval_ms": 0 }"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.surface, "Focus Strip");
        assert_eq!(config.refresh_interval(), Duration::from_millis(1));
        assert_eq!(config.tracks, Config::default().tracks);
    }

    #[test]
    fn invalid_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host.json");
        fs::write(&path, "surface = 'Strip Bank'").unwrap();

        assert!(matches!(Config::load(&path), Err(Error::Parse(..))));
    }
}
