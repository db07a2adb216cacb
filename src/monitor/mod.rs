//! Reachability monitor.
//!
//! Consumes round-trip-time samples from the prober, synthesizes timeouts
//! when no sample arrives in time and feeds both into the debouncer.

mod debounce;

pub use debounce::*;

use crate::history::HistoryStore;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Replies slower than this are treated as stale and ignored.
pub const STALE_RTT: Duration = Duration::from_secs(1);

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long the contrary signal must be absent before the state flips.
    pub debounce_window: Duration,
    /// How long to wait for a sample before counting a timeout.
    pub deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_secs(10),
            deadline: Duration::from_millis(1100),
        }
    }
}

/// Wall clock anchored to the monotonic clock at creation, so debounce
/// arithmetic is immune to wall clock jumps.
#[derive(Debug, Clone, Copy)]
struct MonotonicClock {
    wall: DateTime<Utc>,
    instant: Instant,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            wall: Utc::now(),
            instant: Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = ChronoDuration::from_std(self.instant.elapsed()).unwrap_or(ChronoDuration::MAX);
        self.wall + elapsed
    }
}

/// Reachability monitor for a single host.
pub struct Monitor {
    store: Arc<HistoryStore>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(store: Arc<HistoryStore>, config: MonitorConfig) -> Self {
        Self { store, config }
    }

    /// Start consuming samples in a background task.
    ///
    /// The task ends when the sample channel closes or `stop` fires.
    pub fn start(
        self,
        samples: mpsc::Receiver<Duration>,
        stop: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let clock = MonotonicClock::new();
        let now = clock.now();

        if self.store.seed_if_empty(now) {
            tracing::info!("Starting with a fresh history");
        }

        let debouncer = Debouncer::new(self.config.debounce_window, now);

        tokio::spawn(run_consumer_loop(
            self.store,
            debouncer,
            clock,
            self.config.deadline,
            samples,
            stop,
        ))
    }
}

/// Run the consumer loop until the samples stop or a stop is signalled.
async fn run_consumer_loop(
    store: Arc<HistoryStore>,
    mut debouncer: Debouncer,
    clock: MonotonicClock,
    deadline: Duration,
    mut samples: mpsc::Receiver<Duration>,
    mut stop: broadcast::Receiver<()>,
) {
    let timer = tokio::time::sleep(deadline);
    tokio::pin!(timer);

    loop {
        tokio::select! {
            _ = stop.recv() => {
                tracing::debug!("Monitor stopped");
                break;
            }
            sample = samples.recv() => {
                match sample {
                    Some(rtt) if rtt < STALE_RTT => {
                        debouncer.observe_success(&store, clock.now());
                        timer.as_mut().reset(Instant::now() + deadline);
                    }
                    Some(rtt) => {
                        tracing::debug!("Ignoring late response (rtt {:?})", rtt);
                    }
                    None => {
                        tracing::debug!("Sample stream closed, ending monitor");
                        break;
                    }
                }
            }
            _ = &mut timer => {
                debouncer.observe_timeout(&store, clock.now());
                timer.as_mut().reset(Instant::now() + deadline);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{Interval, State};
    use tokio_test::assert_ok;

    fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
        (b - a).num_milliseconds() as f64 / 1000.0
    }

    fn start_monitor() -> (
        Arc<HistoryStore>,
        mpsc::Sender<Duration>,
        broadcast::Sender<()>,
        JoinHandle<()>,
    ) {
        let store = Arc::new(HistoryStore::new());
        let (tx, rx) = mpsc::channel(64);
        let (stop_tx, stop_rx) = broadcast::channel(1);
        let handle = Monitor::new(store.clone(), MonitorConfig::default()).start(rx, stop_rx);
        (store, tx, stop_tx, handle)
    }

    fn origin(history: &[Interval]) -> DateTime<Utc> {
        history.last().map(|i| i.start).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_replies_then_silence() {
        let (store, tx, _stop_tx, handle) = start_monitor();

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(Duration::from_millis(20)).await.unwrap();
        }

        let snap = store.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].state, State::Up);
        assert_eq!(snap[1].end, Some(origin(&snap)));

        tokio::time::sleep(Duration::from_secs(15)).await;

        let snap = store.snapshot();
        let states: Vec<_> = snap.iter().map(|i| i.state).collect();
        assert_eq!(states, vec![State::Down, State::Up, State::Start]);
        let up_end = snap[1].end.unwrap();
        assert!((seconds_between(origin(&snap), up_end) - 20.0).abs() < 0.1);

        drop(tx);
        assert_ok!(handle.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_replies_are_ignored() {
        let (store, tx, _stop_tx, handle) = start_monitor();

        for _ in 0..30 {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(Duration::from_millis(1500)).await.unwrap();
        }

        let snap = store.snapshot();
        let states: Vec<_> = snap.iter().map(|i| i.state).collect();
        assert_eq!(states, vec![State::Down, State::Start]);

        drop(tx);
        assert_ok!(handle.await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_ends_loop() {
        let (store, _tx, stop_tx, handle) = start_monitor();

        stop_tx.send(()).unwrap();
        assert_ok!(handle.await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let snap = store.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].state, State::Start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_freezes_history() {
        let (store, tx, _stop_tx, handle) = start_monitor();

        drop(tx);
        assert_ok!(handle.await);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restored_history_is_kept() {
        let store = Arc::new(HistoryStore::new());
        let restored = vec![Interval::open(State::Down, Utc::now())];
        store.replace(restored.clone()).unwrap();

        let (_tx, rx) = mpsc::channel(64);
        let (_stop_tx, stop_rx) = broadcast::channel::<()>(1);
        let _handle = Monitor::new(store.clone(), MonitorConfig::default()).start(rx, stop_rx);

        assert_eq!(store.snapshot(), restored);
    }
}
