use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{HistoryLoader, LoadHints};
use crate::core::{Command, History};

/// Load a JSON session snapshot
///
/// The file is an array of commands. Elements that are not commands are
/// dropped, so a partly edited snapshot still replays.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionLoader;

impl HistoryLoader for SessionLoader {
    fn name(&self) -> &'static str {
        "session"
    }

    fn parse(&self, data: &[u8], hints: &LoadHints) -> Result<Vec<Command>> {
        let values: Vec<serde_json::Value> =
            serde_json::from_slice(data).context("Session is not a JSON array")?;

        let mut commands = Vec::with_capacity(values.len());
        for (idx, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<Command>(value) {
                Ok(mut command) => {
                    hints.apply(&mut command);
                    commands.push(command);
                }
                Err(e) => warn!("Dropping session entry {}: {}", idx, e),
            }
        }
        Ok(commands)
    }
}

/// Write `history` as `<prefix>_<YYYYmmddHHMM>.json`
///
/// Flags and comments are included. Returns the path written.
pub async fn save_session(history: &History, prefix: impl AsRef<Path>) -> Result<PathBuf> {
    let stamp = chrono::Local::now().format("%Y%m%d%H%M");
    let prefix = prefix.as_ref();
    let name = format!(
        "{}_{}.json",
        prefix.file_name().and_then(|n| n.to_str()).unwrap_or("SavedPlayback"),
        stamp
    );
    let path = prefix.with_file_name(name);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(history).context("Failed to serialize session")?;
    tokio::fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Saved {} commands to {}", history.len(), path.display());
    Ok(path)
}
