//! Periodic export of the history snapshot.

use crate::history::{HistoryError, HistoryStore};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Writes the history to a file on a fixed cadence.
pub struct Exporter {
    store: Arc<HistoryStore>,
    path: PathBuf,
    cadence: Duration,
}

impl Exporter {
    pub fn new(store: Arc<HistoryStore>, path: impl Into<PathBuf>, cadence: Duration) -> Self {
        Self {
            store,
            path: path.into(),
            cadence,
        }
    }

    /// Start the export background task.
    ///
    /// The file is created up front so an unwritable path fails here rather
    /// than one cadence later. The task ends on `stop` without a final write.
    pub fn start(self, mut stop: broadcast::Receiver<()>) -> Result<JoinHandle<()>, HistoryError> {
        std::fs::File::create(&self.path)?;

        tracing::info!(
            "Exporting history to {} every {:?}",
            self.path.display(),
            self.cadence
        );

        Ok(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + self.cadence, self.cadence);

            loop {
                tokio::select! {
                    _ = stop.recv() => break,
                    _ = interval.tick() => {
                        if let Err(e) = write_snapshot(&self.store, &self.path).await {
                            tracing::error!(
                                "Couldn't write history to {}: {}",
                                self.path.display(),
                                e
                            );
                        }
                    }
                }
            }

            tracing::debug!("Exporter for {} stopped", self.path.display());
        }))
    }
}

/// Serialize the current history and overwrite `path` with it.
///
/// Returns the number of intervals written.
pub async fn write_snapshot(store: &HistoryStore, path: &Path) -> std::io::Result<usize> {
    let snapshot = store.snapshot();
    let out = serde_json::to_vec(&snapshot)?;
    tokio::fs::write(path, out).await?;
    Ok(snapshot.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Interval, State};
    use chrono::Utc;
    use tempfile::tempdir;

    fn seeded_store() -> Arc<HistoryStore> {
        let store = Arc::new(HistoryStore::new());
        store.seed_if_empty(Utc::now());
        store
    }

    #[tokio::test]
    async fn test_start_creates_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let (_stop_tx, stop_rx) = broadcast::channel(1);

        Exporter::new(seeded_store(), &path, Duration::from_secs(30))
            .start(stop_rx)
            .unwrap();

        assert!(path.exists());
        assert_eq!(std::fs::read(&path).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_on_unwritable_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("history.json");
        let (_stop_tx, stop_rx) = broadcast::channel(1);

        let err = Exporter::new(seeded_store(), &path, Duration::from_secs(30))
            .start(stop_rx)
            .unwrap_err();
        assert!(matches!(err, HistoryError::Io(_)));
    }

    #[tokio::test]
    async fn test_periodic_export_until_stopped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        let store = seeded_store();
        let (stop_tx, stop_rx) = broadcast::channel(1);

        let handle = Exporter::new(store.clone(), &path, Duration::from_millis(50))
            .start(stop_rx)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(175)).await;
        let written: Vec<Interval> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, store.snapshot());

        stop_tx.send(()).unwrap();
        tokio_test::assert_ok!(handle.await);

        // No final write after stopping
        store.append_and_rotate(State::Up, Utc::now());
        tokio::time::sleep(Duration::from_millis(150)).await;
        let written: Vec<Interval> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 1);
    }

    #[tokio::test]
    async fn test_write_snapshot_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "x".repeat(4096)).unwrap();

        let store = seeded_store();
        assert_eq!(write_snapshot(&store, &path).await.unwrap(), 1);

        let written: Vec<Interval> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written, store.snapshot());
    }
}
