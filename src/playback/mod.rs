pub mod clock;
pub mod engine;
pub mod gate;
pub mod merge;

pub use engine::PlaybackEngine;
pub use gate::ManualGate;
pub use merge::merge_history;

use crate::error::{PlaybackError, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How the engine decides when the next command is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum PlaybackMode {
    /// One command per manual gate release
    #[default]
    Manual,
    /// Commands follow their recorded timestamps, scaled by the rate
    Realtime,
    /// One command per fixed interval, ignoring timestamps
    EventInterval,
}

impl PlaybackMode {
    /// All modes, in cycling order
    pub const ALL: [PlaybackMode; 3] = [
        PlaybackMode::Manual,
        PlaybackMode::Realtime,
        PlaybackMode::EventInterval,
    ];

    /// The mode after this one, wrapping around
    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|m| *m == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackMode::Manual => "MANUAL",
            PlaybackMode::Realtime => "REALTIME",
            PlaybackMode::EventInterval => "EVENTINTERVAL",
        }
    }

    /// Parse a mode name; anything unrecognized falls back to `Manual`
    pub fn parse_or_manual(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "realtime" => PlaybackMode::Realtime,
            "eventinterval" | "eveninterval" | "interval" => PlaybackMode::EventInterval,
            _ => PlaybackMode::Manual,
        }
    }
}

impl From<&str> for PlaybackMode {
    fn from(value: &str) -> Self {
        Self::parse_or_manual(value)
    }
}

impl From<String> for PlaybackMode {
    fn from(value: String) -> Self {
        Self::parse_or_manual(&value)
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Playback configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackConfig {
    pub mode: PlaybackMode,
    pub rate: f64, // 1.0 = real-time, 2.0 = 2x speed
    pub interval: Duration,
    pub paused: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            mode: PlaybackMode::Manual,
            rate: 5.0,
            interval: Duration::from_secs(10),
            paused: true,
        }
    }
}

impl PlaybackConfig {
    pub fn validate(&self) -> Result<()> {
        validate_timing(self.rate, self.interval)
    }
}

/// Check a rate/interval pair before it is applied
pub fn validate_timing(rate: f64, interval: Duration) -> Result<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PlaybackError::InvalidRate(rate));
    }
    if interval.is_zero() {
        return Err(PlaybackError::InvalidInterval(interval));
    }
    Ok(())
}

/// Read-only view of the engine, taken at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub current_time: Option<DateTime<Utc>>,
    pub mode: PlaybackMode,
    pub paused: bool,
    pub rate: f64,
    pub interval: Duration,
    /// Number of commands released so far
    pub position: usize,
    pub len: usize,
    /// Virtual time elapsed since the first command
    pub elapsed: TimeDelta,
}

impl PlaybackStatus {
    pub fn is_finished(&self) -> bool {
        self.position >= self.len
    }
}

impl fmt::Display for PlaybackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self
            .current_time
            .map(|t| t.format("%b %d %Y %H:%M:%S").to_string())
            .unwrap_or_else(|| "--".to_string());
        write!(
            f,
            "PLAYBACK TIME: {}  MODE: {}  PAUSED: {}  ",
            time, self.mode, self.paused
        )?;
        if self.mode == PlaybackMode::EventInterval {
            write!(f, "INTERVAL: {:.3}s", self.interval.as_secs_f64())?;
        } else {
            write!(f, "RATE: {}x", self.rate)?;
        }
        write!(f, "  [{}/{}]", self.position, self.len)
    }
}
