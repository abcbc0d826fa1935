use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::PlaybackError;
use crate::input::{LoaderFormat, SourceSpec};
use crate::playback::{PlaybackConfig, PlaybackMode};

/// Persistent playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: PlaybackMode,
    pub rate: f64,
    pub interval_secs: f64,
    pub start_paused: bool,
    /// Where history files and the source list live
    pub sessions_dir: PathBuf,
    /// File name prefix for saved sessions
    pub save_prefix: String,
}

impl Default for Settings {
    fn default() -> Self {
        let playback = PlaybackConfig::default();
        Self {
            mode: playback.mode,
            rate: playback.rate,
            interval_secs: playback.interval.as_secs_f64(),
            start_paused: playback.paused,
            sessions_dir: PathBuf::from("sessions"),
            save_prefix: "SavedPlayback".to_string(),
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("hsp").join("settings.json"))
    }

    /// Load the user's settings, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring settings: {:#}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path().context("No config directory on this platform")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Engine configuration from these settings
    pub fn playback_config(&self) -> crate::error::Result<PlaybackConfig> {
        let interval = Duration::try_from_secs_f64(self.interval_secs).map_err(|_| {
            PlaybackError::InvalidArgument(format!("interval of {}s", self.interval_secs))
        })?;
        let config = PlaybackConfig {
            mode: self.mode,
            rate: self.rate,
            interval,
            paused: self.start_paused,
        };
        config.validate()?;
        Ok(config)
    }

    /// Path of a saved session prefix inside the sessions directory
    pub fn save_path_prefix(&self) -> PathBuf {
        self.sessions_dir.join(&self.save_prefix)
    }
}

/// Parse a source list
///
/// One `path:format` per line. `#` starts a comment, blank lines are
/// ignored and an empty format means detect from the contents. Relative
/// paths are taken from `base_dir`.
pub fn parse_source_list(text: &str, base_dir: &Path) -> Vec<SourceSpec> {
    let mut sources = Vec::new();

    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((path, hint)) = line.rsplit_once(':') else {
            warn!("Source list line {}: expected path:format, got {:?}", lineno + 1, line);
            continue;
        };
        let (path, hint) = (path.trim(), hint.trim());
        if path.is_empty() {
            warn!("Source list line {}: missing path", lineno + 1);
            continue;
        }

        let format = if hint.is_empty() {
            None
        } else {
            match LoaderFormat::from_hint(hint) {
                Some(format) => Some(format),
                None => {
                    warn!("Source list line {}: unknown format {:?}", lineno + 1, hint);
                    continue;
                }
            }
        };

        sources.push(SourceSpec::new(path, format).resolved(base_dir));
    }

    sources
}

/// Read and parse a source list file
pub async fn load_source_list(path: &Path, base_dir: &Path) -> Result<Vec<SourceSpec>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read source list {}", path.display()))?;
    Ok(parse_source_list(&text, base_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        let config = settings.playback_config().unwrap();
        assert_eq!(config, PlaybackConfig::default());
        assert_eq!(settings.save_path_prefix(), PathBuf::from("sessions/SavedPlayback"));
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"mode": "REALTIME", "rate": 2.5}"#).unwrap();
        assert_eq!(settings.mode, PlaybackMode::Realtime);
        assert_eq!(settings.rate, 2.5);
        assert_eq!(settings.interval_secs, 10.0);
        assert!(settings.start_paused);
    }

    #[test]
    fn test_bad_timing_is_rejected() {
        let settings = Settings { rate: -1.0, ..Settings::default() };
        assert_eq!(settings.playback_config(), Err(PlaybackError::InvalidRate(-1.0)));

        let settings = Settings { interval_secs: -3.0, ..Settings::default() };
        assert!(matches!(settings.playback_config(), Err(PlaybackError::InvalidArgument(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            mode: PlaybackMode::EventInterval,
            interval_secs: 0.5,
            save_prefix: "Review".to_string(),
            ..Settings::default()
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);

        fs::write(&path, "not json").unwrap();
        assert!(Settings::load_from(&path).is_err());
    }

    #[test]
    fn test_parse_source_list() {
        let text = "\
# captured on the range
box1.log:msf_prompt   # first host
box2.csv:csv

saved.json:
/abs/path.json:pickle
no-format-here
weird.txt:bash
";
        let sources = parse_source_list(text, Path::new("sessions"));
        assert_eq!(
            sources,
            vec![
                SourceSpec::new("sessions/box1.log", Some(LoaderFormat::MsfPrompt)),
                SourceSpec::new("sessions/box2.csv", Some(LoaderFormat::Csv)),
                SourceSpec::new("sessions/saved.json", None),
                SourceSpec::new("/abs/path.json", Some(LoaderFormat::Session)),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_missing_source_list() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_source_list(&dir.path().join("histfile_list"), dir.path()).await.is_err());
    }
}
