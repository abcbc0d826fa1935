use crate::core::History;
use std::fmt::Display;
use tracing::{debug, warn};

/// Merge per-source histories into one time-ordered history
///
/// Each source is taken independently; a failed source is logged and
/// skipped. Duplicate timestamps are kept. If every source failed the
/// result is simply empty.
pub fn merge_history<I, E>(sources: I) -> History
where
    I: IntoIterator<Item = Result<History, E>>,
    E: Display,
{
    let mut merged = History::new();

    for (idx, source) in sources.into_iter().enumerate() {
        match source {
            Ok(history) => {
                debug!("Merging source {} ({} commands)", idx, history.len());
                merged.extend(history);
            }
            Err(e) => {
                warn!("Skipping source {}: {:#}", idx, e);
            }
        }
    }

    merged
}
