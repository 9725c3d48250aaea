//! Drift-corrected periodic polling.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::metering::FetchError;

/// The tick on which the poller wakes to check elapsed time and the
/// shutdown flag.
const TICK: Duration = Duration::from_secs(1);

/// One fetch-and-persist cycle, supplied by the caller.
#[async_trait]
pub trait PollCycle: Send {
    type Sample: Send;

    /// Fetches one sample from the upstream source.
    async fn fetch(&mut self) -> Result<Self::Sample, FetchError>;

    /// Alert-evaluation hook, invoked before persistence on every
    /// successful fetch.
    async fn inspect(&mut self, _sample: &Self::Sample) {}

    /// Persists a successfully fetched sample.
    async fn persist(&mut self, sample: &Self::Sample);
}

/// Runs a [`PollCycle`] every `period` until cancelled.
///
/// The loop wakes on a short fixed tick and fires once the elapsed time
/// since the last fire reaches the period. The accumulator resets at the
/// fire instant, before the fetch, so execution jitter from slow fetches
/// does not accumulate: cumulative drift stays within a single tick per
/// period as long as fetch latency stays below the period.
///
/// Cancellation is cooperative, checked once per tick; a fetch already in
/// flight completes before the loop exits.
pub struct Poller<C> {
    name: &'static str,
    period: Duration,
    cycle: C,
}

impl<C: PollCycle> Poller<C> {
    pub fn new(name: &'static str, period: Duration, cycle: C) -> Self {
        Self {
            name,
            period,
            cycle,
        }
    }

    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> anyhow::Result<()> {
        debug!(poller = self.name, period = ?self.period, "poller started");
        let mut last_fire = Instant::now();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = tokio::time::sleep(TICK) => {}
            }
            if last_fire.elapsed() >= self.period {
                last_fire = Instant::now();
                match self.cycle.fetch().await {
                    Ok(sample) => {
                        self.cycle.inspect(&sample).await;
                        self.cycle.persist(&sample).await;
                    }
                    Err(e) => {
                        debug!(poller = self.name, error = %e, "fetch failed, skipping cycle");
                    }
                }
            }
        }
        debug!(poller = self.name, "poller stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::timeout;

    struct TimedCycle {
        fetch_latency: Duration,
        fires: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl PollCycle for TimedCycle {
        type Sample = ();

        async fn fetch(&mut self) -> Result<(), FetchError> {
            self.fires.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.fetch_latency).await;
            Ok(())
        }

        async fn persist(&mut self, _sample: &()) {}
    }

    struct CountingCycle {
        fetches: Arc<AtomicUsize>,
        persists: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl PollCycle for CountingCycle {
        type Sample = ();

        async fn fetch(&mut self) -> Result<(), FetchError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(FetchError::Status(
                    reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                ))
            } else {
                Ok(())
            }
        }

        async fn persist(&mut self, _sample: &()) {
            self.persists.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn drift_stays_within_one_tick_despite_slow_fetches() {
        let fires = Arc::new(Mutex::new(Vec::new()));
        let cycle = TimedCycle {
            fetch_latency: Duration::from_secs(3),
            fires: fires.clone(),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let start = Instant::now();
        let handle = tokio::spawn(Poller::new("test", Duration::from_secs(5), cycle).run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(26)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        // Five periods in 26s; each fire lands exactly on a period
        // boundary even though every fetch eats 3 of the 5 seconds.
        let fires = fires.lock().unwrap();
        assert_eq!(fires.len(), 5);
        for (i, fired_at) in fires.iter().enumerate() {
            let expected = (i as u64 + 1) * 5;
            assert_eq!(fired_at.duration_since(start).as_secs(), expected);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_skips_the_cycle() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let persists = Arc::new(AtomicUsize::new(0));
        let cycle = CountingCycle {
            fetches: fetches.clone(),
            persists: persists.clone(),
            fail: true,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Poller::new("test", Duration::from_secs(2), cycle).run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(persists.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_cycle_persists() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let persists = Arc::new(AtomicUsize::new(0));
        let cycle = CountingCycle {
            fetches: fetches.clone(),
            persists: persists.clone(),
            fail: false,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Poller::new("test", Duration::from_secs(2), cycle).run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(5)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 2);
        assert_eq!(persists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_exits_before_the_next_fetch() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let persists = Arc::new(AtomicUsize::new(0));
        let cycle = CountingCycle {
            fetches: fetches.clone(),
            persists: persists.clone(),
            fail: false,
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Poller::new("test", Duration::from_secs(3600), cycle).run(shutdown_rx));

        tokio::task::yield_now().await;
        shutdown_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .expect("poller did not observe cancellation")
            .unwrap()
            .unwrap();

        assert_eq!(fetches.load(Ordering::SeqCst), 0);
    }
}
