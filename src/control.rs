use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::parse_timestamp;
use crate::input::save_session;
use crate::playback::{PlaybackEngine, PlaybackMode};

/// Something the reviewer asked the playback to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    Next,
    TogglePause,
    SpeedUp,
    SlowDown,
    ChangeMode,
    Flag,
    Comment(String),
    Goto(String),
    Save,
    Help,
    Quit,
}

/// One entry in the key map
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub keys: &'static [&'static str],
    /// Name of the argument shown in help, for actions that take one
    pub argument: Option<&'static str>,
    pub action: ControlAction,
    pub description: String,
}

/// Line oriented key map
pub struct KeyMap {
    bindings: Vec<KeyBinding>,
}

impl Default for KeyMap {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyMap {
    pub fn new() -> Self {
        let mut keymap = Self { bindings: Vec::new() };
        keymap.register_defaults();
        keymap
    }

    fn register_defaults(&mut self) {
        // Playback
        self.bind(&["n", ""], None, ControlAction::Next, "Release the next command (MANUAL)");
        self.bind(&["p"], None, ControlAction::TogglePause, "Pause/Resume");
        self.bind(&["f"], None, ControlAction::SpeedUp, "Speed up");
        self.bind(&["s"], None, ControlAction::SlowDown, "Slow down");
        self.bind(&["m"], None, ControlAction::ChangeMode, "Change mode");
        self.bind(&["g"], Some("<time>"), ControlAction::Goto(String::new()), "Go to time");

        // Review
        self.bind(&["x"], None, ControlAction::Flag, "Flag/unflag the last command");
        self.bind(
            &["c"],
            Some("<text>"),
            ControlAction::Comment(String::new()),
            "Comment on the last command",
        );
        self.bind(&["w"], None, ControlAction::Save, "Save session");

        // General
        self.bind(&["h", "?"], None, ControlAction::Help, "Show this help");
        self.bind(&["q"], None, ControlAction::Quit, "Quit");
    }

    fn bind(
        &mut self,
        keys: &'static [&'static str],
        argument: Option<&'static str>,
        action: ControlAction,
        description: &str,
    ) {
        self.bindings.push(KeyBinding {
            keys,
            argument,
            action,
            description: description.to_string(),
        });
    }

    pub fn bindings(&self) -> &[KeyBinding] {
        &self.bindings
    }

    /// Match an input line against the key map
    ///
    /// The first word selects the binding; the rest of the line is the
    /// argument of `c` and `g`.
    pub fn parse(&self, line: &str) -> Option<ControlAction> {
        let line = line.trim();
        let (key, arg) = match line.split_once(char::is_whitespace) {
            Some((key, arg)) => (key, arg.trim()),
            None => (line, ""),
        };

        let binding = self.bindings.iter().find(|b| b.keys.contains(&key))?;
        Some(match &binding.action {
            ControlAction::Comment(_) => ControlAction::Comment(arg.to_string()),
            ControlAction::Goto(_) => ControlAction::Goto(arg.to_string()),
            action => action.clone(),
        })
    }

    pub fn help_text(&self) -> String {
        let mut text = String::from("Keys:\n");
        for binding in &self.bindings {
            let keys: Vec<&str> = binding
                .keys
                .iter()
                .map(|k| if k.is_empty() { "<enter>" } else { k })
                .collect();
            let mut usage = keys.join(", ");
            if let Some(arg) = binding.argument {
                usage.push(' ');
                usage.push_str(arg);
            }
            let _ = writeln!(text, "  {:<14} {}", usage, binding.description);
        }
        text
    }
}

/// Outcome of a control action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(String),
    /// The action was refused; playback carries on unchanged
    Rejected(String),
    Quit,
}

/// Applies reviewer input to a running playback
pub struct Controller {
    engine: Arc<PlaybackEngine>,
    keymap: KeyMap,
    save_prefix: PathBuf,
}

impl Controller {
    pub fn new(engine: Arc<PlaybackEngine>, save_prefix: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            keymap: KeyMap::new(),
            save_prefix: save_prefix.into(),
        }
    }

    pub fn keymap(&self) -> &KeyMap {
        &self.keymap
    }

    pub async fn handle_line(&self, line: &str) -> Reply {
        match self.keymap.parse(line) {
            Some(action) => self.apply(action).await,
            None => Reply::Rejected(format!("Unknown command {:?}, h for help", line.trim())),
        }
    }

    pub async fn apply(&self, action: ControlAction) -> Reply {
        debug!("Control action {:?}", action);
        let engine = &self.engine;

        match action {
            ControlAction::Next => {
                if engine.mode() != PlaybackMode::Manual {
                    return Reply::Rejected(format!("Next only applies in MANUAL mode (now {})", engine.mode()));
                }
                engine.release_manual_gate();
                Reply::Message("Next".to_string())
            }
            ControlAction::TogglePause => {
                let paused = engine.toggle_pause();
                Reply::Message((if paused { "Paused" } else { "Playing" }).to_string())
            }
            ControlAction::SpeedUp => self.timing_reply(engine.speedup()),
            ControlAction::SlowDown => self.timing_reply(engine.slowdown()),
            ControlAction::ChangeMode => Reply::Message(format!("Mode {}", engine.change_mode())),
            ControlAction::Flag => match engine.flag_current() {
                Ok(true) => Reply::Message("Flagged".to_string()),
                Ok(false) => Reply::Message("Unflagged".to_string()),
                Err(e) => Reply::Rejected(e.to_string()),
            },
            ControlAction::Comment(text) => {
                if text.is_empty() {
                    return Reply::Rejected("Usage: c <text>".to_string());
                }
                match engine.set_comment(text) {
                    Ok(()) => Reply::Message("Comment saved".to_string()),
                    Err(e) => Reply::Rejected(e.to_string()),
                }
            }
            ControlAction::Goto(text) => {
                let result = parse_timestamp(&text).and_then(|time| engine.goto_time(time));
                match result {
                    Ok(()) => Reply::Message(format!("Moved to {}", text.trim())),
                    Err(e) => Reply::Rejected(e.to_string()),
                }
            }
            ControlAction::Save => match save_session(&engine.history(), &self.save_prefix).await {
                Ok(path) => Reply::Message(format!("Saved to {}", path.display())),
                Err(e) => {
                    warn!("Save failed: {:#}", e);
                    Reply::Rejected(format!("Save failed: {:#}", e))
                }
            },
            ControlAction::Help => Reply::Message(self.keymap.help_text()),
            ControlAction::Quit => {
                info!("Quit requested");
                engine.cancel();
                Reply::Quit
            }
        }
    }

    fn timing_reply(&self, result: crate::error::Result<()>) -> Reply {
        match result {
            Ok(()) => Reply::Message(format!(
                "Rate {}x, interval {:.3}s",
                self.engine.rate(),
                self.engine.interval().as_secs_f64()
            )),
            Err(e) => Reply::Rejected(e.to_string()),
        }
    }
}
