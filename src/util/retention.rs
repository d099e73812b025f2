use chrono::{DateTime, NaiveDateTime, ParseError, Utc};

pub const DEFAULT_SNAPSHOTS_TO_RETAIN: usize = 30;
pub const DEFAULT_BACKUPS_TO_RETAIN: usize = 4;

/// Configure how many snapshots and backups of a volume are kept.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Defines how many of the most recent snapshots to keep.
    pub snapshots: usize,

    /// Defines how many of the most recent completed backups to keep.
    ///
    /// Backups still in progress are neither counted nor deleted.
    pub backups: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            snapshots: DEFAULT_SNAPSHOTS_TO_RETAIN,
            backups: DEFAULT_BACKUPS_TO_RETAIN,
        }
    }
}

/// Returns the items exceeding `keep`, oldest first.
///
/// Items are ordered by their timestamp; items sharing a timestamp keep the
/// order they were passed in. Exactly `items.len() - keep` items are returned
/// if there are more than `keep`, none otherwise.
pub fn expired<T>(mut items: Vec<(DateTime<Utc>, T)>, keep: usize) -> Vec<T> {
    if items.len() <= keep {
        return Vec::new();
    }

    // stable: ties stay in listing order
    items.sort_by_key(|(created, _)| *created);

    let excess = items.len() - keep;
    items.into_iter().take(excess).map(|(_, item)| item).collect()
}

/// Parses a timestamp as reported by the storage system.
///
/// RFC 3339 is expected, `%Y-%m-%d %H:%M:%S` is accepted as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let value = value.trim();
    match DateTime::parse_from_rfc3339(value) {
        Ok(timestamp) => Ok(timestamp.with_timezone(&Utc)),
        Err(rfc3339_err) => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc3339_err),
    }
}
