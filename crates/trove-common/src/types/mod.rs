//! Common types used across trove

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One run of an ingestion, appended to the `changelog` fact of the URL entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub start_time: DateTime<Utc>,
    pub finish_time: DateTime<Utc>,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: i64,
    pub num_downloads: usize,
}

impl ChangelogEntry {
    pub fn new(start_time: DateTime<Utc>, finish_time: DateTime<Utc>, num_downloads: usize) -> Self {
        Self {
            start_time,
            finish_time,
            elapsed_ms: (finish_time - start_time).num_milliseconds(),
            num_downloads,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_changelog_elapsed() {
        let start = Utc::now();
        let finish = start + Duration::milliseconds(1500);
        let entry = ChangelogEntry::new(start, finish, 3);
        assert_eq!(entry.elapsed_ms, 1500);

        let json = serde_json::to_string(&entry).unwrap();
        let back: ChangelogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
