use crate::error::{PlaybackError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Anything a loader may hand over as the time of a command
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CommandTime {
    /// A fully qualified instant
    At(DateTime<Utc>),
    /// A wall-clock time with no zone, taken as UTC
    Naive(NaiveDateTime),
    /// Proleptic Gregorian day number, day 1 being 0001-01-01
    Ordinal(i64),
}

impl From<DateTime<Utc>> for CommandTime {
    fn from(value: DateTime<Utc>) -> Self {
        CommandTime::At(value)
    }
}

impl From<NaiveDateTime> for CommandTime {
    fn from(value: NaiveDateTime) -> Self {
        CommandTime::Naive(value)
    }
}

impl From<i64> for CommandTime {
    fn from(value: i64) -> Self {
        CommandTime::Ordinal(value)
    }
}

impl TryFrom<CommandTime> for DateTime<Utc> {
    type Error = PlaybackError;

    fn try_from(value: CommandTime) -> Result<Self> {
        match value {
            CommandTime::At(time) => Ok(time),
            CommandTime::Naive(time) => Ok(time.and_utc()),
            CommandTime::Ordinal(days) => i32::try_from(days)
                .ok()
                .filter(|days| *days >= 1)
                .and_then(NaiveDate::from_num_days_from_ce_opt)
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|time| time.and_utc())
                .ok_or_else(|| {
                    PlaybackError::InvalidTimestamp(format!("ordinal {} is out of range", days))
                }),
        }
    }
}

/// A single replayed terminal command and its output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// When the command was run
    #[serde(deserialize_with = "deserialize_time")]
    pub time: DateTime<Utc>,

    /// User who ran the command
    #[serde(default)]
    pub user: String,

    /// Host the command ran on
    #[serde(default, alias = "hostUUID")]
    pub host_id: String,

    /// The command line as typed
    #[serde(rename = "command", alias = "text", default)]
    pub text: String,

    /// Output captured for the command
    #[serde(default)]
    pub result: String,

    /// Marked by the reviewer during replay
    #[serde(default)]
    pub flagged: bool,

    /// Reviewer note attached during replay
    #[serde(default, alias = "comments")]
    pub comment: String,
}

impl Command {
    /// Create a new command, validating its time
    pub fn new(
        time: impl Into<CommandTime>,
        user: impl Into<String>,
        host_id: impl Into<String>,
        text: impl Into<String>,
        result: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            time: DateTime::try_from(time.into())?,
            user: user.into(),
            host_id: host_id.into(),
            text: text.into(),
            result: result.into(),
            flagged: false,
            comment: String::new(),
        })
    }

    /// The `host:user > command` prompt line
    pub fn prompt_line(&self) -> String {
        format!("{}:{} > {}", self.host_id, self.user, self.text)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==========================")?;
        writeln!(f, "{}", self.time.format("%a %b %e %H:%M:%S %Y"))?;
        writeln!(f, "{}", self.prompt_line())?;
        if !self.result.is_empty() {
            writeln!(f, "{}", self.result.trim_end())?;
        }
        if self.flagged {
            writeln!(f, "[FLAGGED]")?;
        }
        if !self.comment.is_empty() {
            writeln!(f, "# {}", self.comment)?;
        }
        Ok(())
    }
}

/// Parse a timestamp typed by a user or found in a history file
///
/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM[:SS[.fff]]` (taken as UTC).
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Ok(time.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|time| time.and_utc())
        .ok_or_else(|| PlaybackError::InvalidTimestamp(value.to_string()))
}

fn deserialize_time<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = CommandTime::deserialize(deserializer)?;
    DateTime::try_from(raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_from_datetime() {
        let time = Utc.with_ymd_and_hms(2019, 5, 4, 12, 30, 0).unwrap();
        let cmd = Command::new(time, "root", "host-1", "whoami", "root\n").unwrap();
        assert_eq!(cmd.time, time);
        assert!(!cmd.flagged);
        assert!(cmd.comment.is_empty());
    }

    #[test]
    fn test_new_from_ordinal() {
        let cmd = Command::new(737_000i64, "u", "h", "ls", "").unwrap();
        let expected = NaiveDate::from_num_days_from_ce_opt(737_000)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        assert_eq!(cmd.time, expected);

        let first_day = Command::new(1i64, "u", "h", "ls", "").unwrap();
        assert_eq!(first_day.time, Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_new_rejects_bad_ordinal() {
        assert!(matches!(
            Command::new(0i64, "u", "h", "ls", ""),
            Err(PlaybackError::InvalidTimestamp(_))
        ));
        assert!(matches!(
            Command::new(i64::MAX, "u", "h", "ls", ""),
            Err(PlaybackError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_parse_timestamp() {
        let expected = Utc.with_ymd_and_hms(2019, 5, 4, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2019-05-04T12:30:00Z"), Ok(expected));
        assert_eq!(parse_timestamp("2019-05-04T14:30:00+02:00"), Ok(expected));
        assert_eq!(parse_timestamp(" 2019-05-04 12:30:00 "), Ok(expected));
        assert_eq!(parse_timestamp("2019-05-04 12:30"), Ok(expected));
        assert_eq!(
            parse_timestamp("2019-05-04 12:30:00.250"),
            Ok(expected + chrono::Duration::milliseconds(250))
        );
        assert!(matches!(parse_timestamp("noon"), Err(PlaybackError::InvalidTimestamp(_))));
    }

    #[test]
    fn test_deserialize_accepts_legacy_fields() {
        let json = r#"{
            "time": "2019-05-04T12:30:00Z",
            "user": "msf",
            "hostUUID": "abc",
            "command": "sessions -l",
            "result": "none",
            "comments": "look here"
        }"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.host_id, "abc");
        assert_eq!(cmd.text, "sessions -l");
        assert_eq!(cmd.comment, "look here");
        assert!(!cmd.flagged);
    }

    #[test]
    fn test_deserialize_rejects_non_timestamp() {
        let json = r#"{ "time": "yesterday", "command": "ls" }"#;
        assert!(serde_json::from_str::<Command>(json).is_err());

        let json = r#"{ "time": -4, "command": "ls" }"#;
        assert!(serde_json::from_str::<Command>(json).is_err());
    }

    #[test]
    fn test_display_marks_flag_and_comment() {
        let time = Utc.with_ymd_and_hms(2019, 5, 4, 12, 30, 0).unwrap();
        let mut cmd = Command::new(time, "root", "box", "id", "uid=0").unwrap();
        cmd.flagged = true;
        cmd.comment = "privesc".to_string();

        let text = cmd.to_string();
        assert!(text.contains("box:root > id"));
        assert!(text.contains("uid=0"));
        assert!(text.contains("[FLAGGED]"));
        assert!(text.contains("# privesc"));
    }
}
