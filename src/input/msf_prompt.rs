use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::{HistoryLoader, LoadHints};
use crate::core::Command;

static SEPARATOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^={4,}\s*$").expect("separator regex"));
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{4})-(\d{2})-(\d{2})[ T](\d{2}):(\d{2}):(\d{2})").expect("time regex")
});
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(COMMAND|RESULT)\](?:\[USER: ([^\]]*)\])?(.*)$").expect("header regex")
});

/// Load an OffPromptSession console log
///
/// The log is a run of blocks, each opened by a `====` line and a
/// timestamp line:
///
/// ```text
/// =================
/// 2019-05-04 12:30:00
/// [COMMAND][USER: msf]
/// sessions -l
/// =================
/// 2019-05-04 12:30:01
/// [RESULT]
/// No active sessions.
/// =================
/// ```
///
/// A `[COMMAND]` block is paired with the `[RESULT]` block after it. A
/// `====` line only opens a block when a timestamp follows, so underlines
/// inside a result are kept.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsfPromptLoader;

impl HistoryLoader for MsfPromptLoader {
    fn name(&self) -> &'static str {
        "msf_prompt"
    }

    fn parse(&self, data: &[u8], hints: &LoadHints) -> Result<Vec<Command>> {
        let text = std::str::from_utf8(data).context("Log is not valid UTF-8")?;
        let lines: Vec<&str> = text.lines().collect();
        let host = hints.host.clone().unwrap_or_else(|| "unknown".to_string());

        let mut commands = Vec::new();
        let mut pending: Option<Command> = None;

        for raw in split_blocks(&lines) {
            let Some(block) = parse_block(raw) else {
                warn!("Skipping malformed block at {:?}", raw.first());
                continue;
            };

            match block.kind {
                BlockKind::Command => {
                    if let Some(previous) = pending.take() {
                        debug!("Command {:?} has no result", previous.text);
                        commands.push(previous);
                    }
                    let text = block.body.trim().trim_matches('+').trim().to_string();
                    let mut command = Command::new(block.time, block.user, host.as_str(), text, "")?;
                    hints.apply(&mut command);
                    pending = Some(command);
                }
                BlockKind::Result => match pending.take() {
                    Some(mut command) => {
                        // the new session banner is not the output of exit
                        if command.text != "exit" {
                            command.result = block.body;
                        }
                        commands.push(command);
                    }
                    None => warn!("Skipping result at {} with no command", block.time),
                },
            }
        }
        commands.extend(pending);

        Ok(commands)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Command,
    Result,
}

#[derive(Debug)]
struct Block {
    kind: BlockKind,
    time: NaiveDateTime,
    user: String,
    body: String,
}

fn opens_block(lines: &[&str], idx: usize) -> bool {
    SEPARATOR_RE.is_match(lines[idx])
        && lines.get(idx + 1).is_some_and(|next| TIME_RE.is_match(next))
}

/// Split the log into blocks, each starting at its timestamp line
fn split_blocks<'a>(lines: &'a [&'a str]) -> Vec<&'a [&'a str]> {
    let starts: Vec<usize> = (0..lines.len()).filter(|&idx| opens_block(lines, idx)).collect();

    starts
        .iter()
        .enumerate()
        .map(|(n, &start)| {
            let end = starts.get(n + 1).copied().unwrap_or(lines.len());
            let mut block = &lines[start + 1..end];
            // closing separator of the last block
            while let Some((last, rest)) = block.split_last() {
                if last.trim().is_empty() || (end == lines.len() && SEPARATOR_RE.is_match(last)) {
                    block = rest;
                } else {
                    break;
                }
            }
            block
        })
        .collect()
}

fn parse_block(lines: &[&str]) -> Option<Block> {
    let (time_line, rest) = lines.split_first()?;
    let (header_line, body_lines) = rest.split_first()?;

    let time = parse_time(&TIME_RE.captures(time_line)?)?;
    let header = HEADER_RE.captures(header_line.trim_end())?;
    let kind = match &header[1] {
        "COMMAND" => BlockKind::Command,
        _ => BlockKind::Result,
    };
    let user = header.get(2).map_or("", |m| m.as_str()).to_string();

    let mut body: Vec<&str> = Vec::with_capacity(body_lines.len() + 1);
    let inline = header.get(3).map_or("", |m| m.as_str()).trim();
    if !inline.is_empty() {
        body.push(inline);
    }
    body.extend_from_slice(body_lines);

    Some(Block {
        kind,
        time,
        user,
        body: body.join("\n").trim_end().to_string(),
    })
}

fn parse_time(caps: &Captures<'_>) -> Option<NaiveDateTime> {
    let num = |idx: usize| caps[idx].parse::<u32>().ok();
    let year = caps[1].parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, num(2)?, num(3)?)?.and_hms_opt(num(4)?, num(5)?, num(6)?)
}
