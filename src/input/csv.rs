use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{parse_time_with_hint, HistoryLoader, LoadHints};
use crate::core::Command;

/// Load commands from a CSV export
///
/// Columns are matched by header name, case-insensitively:
/// - time,user,host,command,result
/// - timestamp,username,hostUUID,cmd,output
/// - ts,command
///
/// `time` and `command` are required. Rows whose time cannot be parsed
/// are skipped.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvLoader;

impl HistoryLoader for CsvLoader {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn parse(&self, data: &[u8], hints: &LoadHints) -> Result<Vec<Command>> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(data);

        let headers = rdr.headers().context("Failed to read CSV header")?.clone();
        let columns = detect_columns(&headers)?;
        debug!("CSV columns: {:?}", columns);

        let mut commands = Vec::new();
        for (row, record) in rdr.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping unreadable CSV row {}: {}", row + 1, e);
                    continue;
                }
            };

            let field = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

            let raw_time = field(Some(columns.time));
            let Some(time) = parse_time_with_hint(raw_time, hints.date) else {
                warn!("Skipping CSV row {}: bad time {:?}", row + 1, raw_time);
                continue;
            };

            let mut command = Command::new(
                time,
                field(columns.user),
                field(columns.host),
                field(Some(columns.command)),
                field(columns.result),
            )?;
            command.flagged = is_truthy(field(columns.flagged));
            command.comment = field(columns.comment).to_string();
            hints.apply(&mut command);
            commands.push(command);
        }

        Ok(commands)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Columns {
    time: usize,
    command: usize,
    user: Option<usize>,
    host: Option<usize>,
    result: Option<usize>,
    flagged: Option<usize>,
    comment: Option<usize>,
}

/// Detect column indices from CSV headers
fn detect_columns(headers: &csv::StringRecord) -> Result<Columns> {
    let time = find_column(headers, &["time", "timestamp", "ts", "date"])
        .with_context(|| format!("No time column in {:?}", headers))?;
    let command = find_column(headers, &["command", "cmd", "text", "input"])
        .with_context(|| format!("No command column in {:?}", headers))?;

    Ok(Columns {
        time,
        command,
        user: find_column(headers, &["user", "username", "login"]),
        host: find_column(headers, &["host", "hostname", "hostuuid", "host_id"]),
        result: find_column(headers, &["result", "output", "response"]),
        flagged: find_column(headers, &["flagged", "flag"]),
        comment: find_column(headers, &["comment", "comments", "note"]),
    })
}

/// Find a column by checking possible names
fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header = header.to_lowercase();
        names.iter().any(|&name| header == name)
    })
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "x")
}
