//! High-speed playback of captured terminal command sessions
//!
//! Histories are loaded from one or more capture files, merged into a single
//! time-ordered [`History`] and replayed by a [`PlaybackEngine`] in one of
//! three modes: manual stepping, scaled real time, or a fixed event interval.

pub mod config;
pub mod control;
pub mod core;
pub mod error;
pub mod input;
pub mod playback;

pub use crate::core::{Command, CommandTime, History};
pub use crate::error::{PlaybackError, Result};
pub use crate::playback::{PlaybackConfig, PlaybackEngine, PlaybackMode, PlaybackStatus};
