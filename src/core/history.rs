use crate::core::Command;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Time-ordered list of commands
///
/// Commands are kept sorted by `time` on every insertion. Commands sharing a
/// timestamp keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct History {
    commands: Vec<Command>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a history from commands in any order
    pub fn from_commands(mut commands: Vec<Command>) -> Self {
        commands.sort_by(|a, b| a.time.cmp(&b.time));
        Self { commands }
    }

    /// Insert a command at its place in time, after any equal timestamps
    pub fn push(&mut self, command: Command) {
        let idx = self.commands.partition_point(|c| c.time <= command.time);
        self.commands.insert(idx, command);
    }

    /// Append every command of `other`, keeping the sort invariant
    pub fn extend(&mut self, other: History) {
        self.commands.extend(other.commands);
        // stable, so earlier sources win ties
        self.commands.sort_by(|a, b| a.time.cmp(&b.time));
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }

    /// Mutable access for annotations only; `time` must not be changed
    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut Command> {
        self.commands.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    pub fn as_slice(&self) -> &[Command] {
        &self.commands
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.commands.first().map(|c| c.time)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.commands.last().map(|c| c.time)
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl From<Vec<Command>> for History {
    fn from(commands: Vec<Command>) -> Self {
        Self::from_commands(commands)
    }
}

impl FromIterator<Command> for History {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self::from_commands(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a History {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

impl IntoIterator for History {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}

impl<'de> Deserialize<'de> for History {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Command>::deserialize(deserializer).map(History::from_commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn cmd_at(secs: i64, text: &str) -> Command {
        let base = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        Command::new(base + Duration::seconds(secs), "u", "h", text, "").unwrap()
    }

    fn is_sorted(history: &History) -> bool {
        history.as_slice().windows(2).all(|w| w[0].time <= w[1].time)
    }

    #[test]
    fn test_from_commands_sorts() {
        let history = History::from_commands(vec![cmd_at(30, "c"), cmd_at(10, "a"), cmd_at(20, "b")]);
        let texts: Vec<_> = history.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_push_keeps_order_and_ties() {
        let mut history = History::new();
        for (secs, text) in [(5, "late"), (1, "first"), (5, "later-tie"), (3, "mid")] {
            history.push(cmd_at(secs, text));
            assert!(is_sorted(&history));
        }
        let texts: Vec<_> = history.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "mid", "late", "later-tie"]);
    }

    #[test]
    fn test_extend_interleaves() {
        let mut a = History::from_commands(vec![cmd_at(0, "a0"), cmd_at(10, "a10")]);
        let b = History::from_commands(vec![cmd_at(5, "b5"), cmd_at(10, "b10")]);
        a.extend(b);

        assert_eq!(a.len(), 4);
        assert!(is_sorted(&a));
        let texts: Vec<_> = a.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a0", "b5", "a10", "b10"]);
    }

    #[test]
    fn test_deserialize_sorts() {
        let json = r#"[
            {"time": "2020-01-01T00:00:09Z", "command": "second"},
            {"time": "2020-01-01T00:00:01Z", "command": "first"}
        ]"#;
        let history: History = serde_json::from_str(json).unwrap();
        assert_eq!(history.get(0).unwrap().text, "first");
        assert_eq!(history.start_time(), Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 1).unwrap()));
        assert_eq!(history.end_time(), Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 9).unwrap()));
    }
}
