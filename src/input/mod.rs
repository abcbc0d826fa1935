pub mod csv;
pub mod msf_prompt;
pub mod session;

pub use self::csv::CsvLoader;
pub use msf_prompt::MsfPromptLoader;
pub use session::{save_session, SessionLoader};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::core::{command::parse_timestamp, Command, History};
use crate::playback::merge_history;

/// Fallbacks for fields a history file does not record
#[derive(Debug, Clone, Default)]
pub struct LoadHints {
    pub user: Option<String>,
    pub host: Option<String>,
    pub date: Option<NaiveDate>,
}

impl LoadHints {
    /// Fill empty user/host fields from the hints
    pub fn apply(&self, command: &mut Command) {
        if command.user.is_empty() {
            if let Some(user) = &self.user {
                command.user = user.clone();
            }
        }
        if command.host_id.is_empty() {
            if let Some(host) = &self.host {
                command.host_id = host.clone();
            }
        }
    }
}

/// Supported history formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderFormat {
    /// JSON session snapshot, as written by `save_session`
    Session,
    /// OffPromptSession console log
    MsfPrompt,
    /// Column-detected CSV
    Csv,
}

impl LoaderFormat {
    /// Map a format hint from a source list or the command line
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "session" | "json" | "pickle" => Some(LoaderFormat::Session),
            "msf_prompt" | "msf-prompt" | "offprompt" => Some(LoaderFormat::MsfPrompt),
            "csv" => Some(LoaderFormat::Csv),
            _ => None,
        }
    }

    pub fn loader(&self) -> &'static dyn HistoryLoader {
        match self {
            LoaderFormat::Session => &SessionLoader,
            LoaderFormat::MsfPrompt => &MsfPromptLoader,
            LoaderFormat::Csv => &CsvLoader,
        }
    }
}

impl fmt::Display for LoaderFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.loader().name())
    }
}

/// A history format reader
///
/// Implementations skip records they cannot parse instead of failing the
/// whole file; only an unreadable or wholly malformed source is an error.
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Parse raw file contents into commands, in file order
    fn parse(&self, data: &[u8], hints: &LoadHints) -> Result<Vec<Command>>;

    /// Read and parse a file
    async fn load(&self, path: &Path, hints: &LoadHints) -> Result<Vec<Command>> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.parse(&data, hints)
            .with_context(|| format!("Failed to parse {} as {}", path.display(), self.name()))
    }
}

/// Detect the format of a history file from its contents
pub fn detect_format(data: &[u8]) -> Option<LoaderFormat> {
    let head = String::from_utf8_lossy(&data[..data.len().min(4096)]);
    let trimmed = head.trim_start();

    if trimmed.starts_with('[') && !trimmed.starts_with("[COMMAND]") {
        return Some(LoaderFormat::Session);
    }
    if head.contains("[COMMAND][USER:") {
        return Some(LoaderFormat::MsfPrompt);
    }
    if is_csv(&head) {
        return Some(LoaderFormat::Csv);
    }
    None
}

fn is_csv(text: &str) -> bool {
    // a header line with at least two commas
    text.lines().take(5).any(|line| line.chars().filter(|&c| c == ',').count() >= 2)
}

/// One history source: a file and an optional format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// `None` means detect from the contents
    pub format: Option<LoaderFormat>,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>, format: Option<LoaderFormat>) -> Self {
        Self { path: path.into(), format }
    }

    /// Parse `path[:format]`
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        match spec.rsplit_once(':') {
            Some((path, "")) => Self::new(path, None),
            Some((path, hint)) => match LoaderFormat::from_hint(hint) {
                Some(format) => Self::new(path, Some(format)),
                None => Self::new(spec, None),
            },
            None => Self::new(spec, None),
        }
    }

    /// Resolve a relative path against `base`
    pub fn resolved(mut self, base: &Path) -> Self {
        if self.path.is_relative() {
            self.path = base.join(&self.path);
        }
        self
    }
}

/// Load one source into a sorted history
pub async fn load_source(source: &SourceSpec, hints: &LoadHints) -> Result<History> {
    let commands = match source.format {
        Some(format) => format.loader().load(&source.path, hints).await?,
        None => {
            let data = tokio::fs::read(&source.path)
                .await
                .with_context(|| format!("Failed to read {}", source.path.display()))?;
            let format = detect_format(&data)
                .with_context(|| format!("Unknown input format: {}", source.path.display()))?;
            format
                .loader()
                .parse(&data, hints)
                .with_context(|| format!("Failed to parse {} as {}", source.path.display(), format))?
        }
    };

    info!("Loaded {} commands from {}", commands.len(), source.path.display());
    Ok(History::from_commands(commands))
}

/// Load every source and merge them; failed sources are skipped
pub async fn load_all(sources: &[SourceSpec], hints: &LoadHints) -> History {
    let mut results = Vec::with_capacity(sources.len());
    for source in sources {
        results.push(load_source(source, hints).await);
    }

    let merged = merge_history(results);
    if merged.is_empty() && !sources.is_empty() {
        warn!("No commands loaded from {} sources", sources.len());
    }
    merged
}

/// Parse a record time, falling back to a bare time-of-day on the hinted date
pub fn parse_time_with_hint(value: &str, date_hint: Option<NaiveDate>) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = parse_timestamp(value) {
        return Some(time);
    }
    if let Ok(secs) = value.parse::<f64>() {
        let millis = (secs * 1000.0) as i64;
        return DateTime::from_timestamp_millis(millis);
    }
    let date = date_hint?;
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
        .map(|time| date.and_time(time).and_utc())
}
