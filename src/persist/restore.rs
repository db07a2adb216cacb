//! One-shot restore of a history snapshot at start-up.

use crate::history::{HistoryError, HistoryStore, Interval};

use std::path::Path;

/// Load the history stored at `path` into `store`.
///
/// On any error the store is left as it was. Returns the number of intervals
/// restored.
pub fn restore(store: &HistoryStore, path: impl AsRef<Path>) -> Result<usize, HistoryError> {
    let raw = std::fs::read_to_string(path.as_ref())?;
    let intervals = parse_history(&raw)?;
    let count = intervals.len();

    store.replace(intervals)?;
    tracing::info!(
        "Restored {} intervals from {}",
        count,
        path.as_ref().display()
    );

    Ok(count)
}

/// Parse a snapshot file, most recent interval first.
///
/// The head must be open and nothing else may be.
pub fn parse_history(raw: &str) -> Result<Vec<Interval>, HistoryError> {
    let intervals: Vec<Interval> = serde_json::from_str(raw)?;

    match intervals.first() {
        None => return Err(HistoryError::EmptyHistory),
        Some(head) if !head.is_active() => return Err(HistoryError::ClosedHead),
        Some(_) => {}
    }

    if let Some(pos) = intervals.iter().skip(1).position(Interval::is_active) {
        return Err(HistoryError::OpenTail(pos + 1));
    }

    Ok(intervals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::State;
    use crate::persist::write_snapshot;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use tempfile::NamedTempFile;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn store_with_prior() -> HistoryStore {
        let store = HistoryStore::new();
        store.seed_if_empty(t0());
        store
    }

    #[tokio::test]
    async fn test_export_then_restore() {
        let source = HistoryStore::new();
        source.seed_if_empty(t0() + ChronoDuration::milliseconds(123));
        source.append_and_rotate(State::Up, t0() + ChronoDuration::seconds(11));
        source.append_and_rotate(State::Down, t0() + ChronoDuration::seconds(95));

        let tmp = NamedTempFile::new().unwrap();
        write_snapshot(&source, tmp.path()).await.unwrap();

        let target = store_with_prior();
        assert_eq!(restore(&target, tmp.path()).unwrap(), 3);
        assert_eq!(target.snapshot(), source.snapshot());
        assert_eq!(target.head_state(), Some(State::Down));
    }

    #[test]
    fn test_empty_array_leaves_history_untouched() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[]").unwrap();

        let store = store_with_prior();
        let before = store.snapshot();

        let err = restore(&store, tmp.path()).unwrap_err();
        assert!(matches!(err, HistoryError::EmptyHistory));
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_malformed_input() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), r#"{"state":"UP"}"#).unwrap();

        let store = store_with_prior();
        let err = restore(&store, tmp.path()).unwrap_err();
        assert!(matches!(err, HistoryError::Malformed(_)));
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn test_open_interval_below_head() {
        let raw = r#"[
            {"start":"2024-03-01T12:01:00Z","state":"DOWN"},
            {"start":"2024-03-01T12:00:00Z","state":"UP"}
        ]"#;
        assert!(matches!(parse_history(raw), Err(HistoryError::OpenTail(1))));
    }

    #[test]
    fn test_closed_head_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            r#"[
                {"start":"2024-03-01T12:00:11Z","end":"2024-03-01T12:05:00Z","state":"UP"},
                {"start":"2024-03-01T12:00:00Z","end":"2024-03-01T12:00:10Z","state":"START"}
            ]"#,
        )
        .unwrap();

        let store = store_with_prior();
        let before = store.snapshot();

        let err = restore(&store, tmp.path()).unwrap_err();
        assert!(matches!(err, HistoryError::ClosedHead));
        assert_eq!(store.snapshot(), before);
        assert_eq!(before.iter().filter(|i| i.is_active()).count(), 1);
    }

    #[test]
    fn test_missing_file() {
        let store = store_with_prior();
        let err = restore(&store, "/nonexistent/pingtrail/history.json").unwrap_err();
        assert!(matches!(err, HistoryError::Io(_)));
    }

    #[test]
    fn test_restore_legacy_file() {
        let raw = r#"[{"Start":"2024-03-01T12:00:11Z","End":"0001-01-01T00:00:00Z","State":"UP"},{"Start":"2024-03-01T12:00:00Z","End":"2024-03-01T12:00:10Z","State":"START"}]"#;
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), raw).unwrap();

        let store = HistoryStore::new();
        assert_eq!(restore(&store, tmp.path()).unwrap(), 2);
        assert_eq!(store.head_state(), Some(State::Up));
        assert!(store.snapshot()[0].is_active());
    }
}
