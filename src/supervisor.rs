//! Lifecycle management for the daemon's units of concurrency.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// How a unit reacts to the shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Interruptible at its suspension point; stops without waiting for
    /// more work to arrive.
    Cancel,
    /// Observes the signal cooperatively at its next tick and drains.
    Drain,
}

/// Liveness of a supervised unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Running,
    Stopped,
    Failed,
}

struct Unit {
    name: &'static str,
    mode: StopMode,
    state: Arc<Mutex<UnitState>>,
    handle: Option<JoinHandle<()>>,
}

/// Owns the lifecycle of the daemon's long-running units: starts them,
/// observes abnormal termination and drives an ordered shutdown.
///
/// Units are never restarted; an operator-visible log entry is the only
/// recovery action when one fails.
pub struct Supervisor {
    units: Mutex<Vec<Unit>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            units: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Receiver for the shutdown broadcast, handed to unit bodies.
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawns a named unit, unless one with the same name is still running.
    ///
    /// The body is wrapped in a completion observer: returning `Ok` before
    /// shutdown was requested, or returning `Err`, marks the unit Failed
    /// and logs it. A panicking body surfaces as a join error at
    /// [`stop`](Self::stop) time.
    pub fn spawn<F>(&self, name: &'static str, mode: StopMode, body: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let mut units = self.units.lock().unwrap();
        if units
            .iter()
            .any(|u| u.name == name && *u.state.lock().unwrap() == UnitState::Running)
        {
            debug!(unit = name, "unit already running, not starting a second instance");
            return;
        }

        debug!(unit = name, ?mode, "spawning unit");
        let state = Arc::new(Mutex::new(UnitState::Running));
        let observer_state = state.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let outcome = body.await;
            let mut state = observer_state.lock().unwrap();
            match outcome {
                Ok(()) if *shutdown_rx.borrow() => {
                    debug!(unit = name, "unit stopped");
                    *state = UnitState::Stopped;
                }
                Ok(()) => {
                    error!(unit = name, "unit terminated unexpectedly");
                    *state = UnitState::Failed;
                }
                Err(e) => {
                    error!(unit = name, error = %e, "unit failed");
                    *state = UnitState::Failed;
                }
            }
        });
        units.push(Unit {
            name,
            mode,
            state,
            handle: Some(handle),
        });
    }

    /// Current liveness of a named unit, if it was ever spawned.
    pub fn unit_state(&self, name: &str) -> Option<UnitState> {
        let units = self.units.lock().unwrap();
        units
            .iter()
            .rev()
            .find(|u| u.name == name)
            .map(|u| *u.state.lock().unwrap())
    }

    /// Signals shutdown and waits for every unit to reach a terminal state.
    ///
    /// Cancellable units are interrupted at their suspension point and
    /// joined first; draining units follow at their next tick. A unit
    /// panicking during shutdown does not abort the shutdown of the
    /// remaining units. Safe to call twice, and safe if nothing was ever
    /// spawned.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let mut pending: Vec<(&'static str, StopMode, Arc<Mutex<UnitState>>, JoinHandle<()>)> = {
            let mut units = self.units.lock().unwrap();
            units
                .iter_mut()
                .filter_map(|u| {
                    u.handle
                        .take()
                        .map(|handle| (u.name, u.mode, u.state.clone(), handle))
                })
                .collect()
        };
        if pending.is_empty() {
            debug!("no units to stop");
            return;
        }
        pending.sort_by_key(|(_, mode, _, _)| *mode != StopMode::Cancel);

        info!(count = pending.len(), "waiting for units to stop");
        for (name, _, state, handle) in pending {
            if let Err(e) = handle.await {
                error!(unit = name, error = %e, "unit panicked during shutdown");
                *state.lock().unwrap() = UnitState::Failed;
            }
        }
        info!("all units stopped");
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_state(supervisor: &Supervisor, name: &str, expected: UnitState) {
        for _ in 0..100 {
            if supervisor.unit_state(name) == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("unit {name} never reached {expected:?}");
    }

    #[tokio::test]
    async fn stop_before_start_is_safe() {
        let supervisor = Supervisor::new();
        timeout(Duration::from_secs(1), supervisor.stop())
            .await
            .expect("stop hung with no units");
    }

    #[tokio::test]
    async fn stop_twice_is_safe() {
        let supervisor = Supervisor::new();
        let mut shutdown_rx = supervisor.shutdown_rx();
        supervisor.spawn("unit", StopMode::Cancel, async move {
            shutdown_rx.changed().await.ok();
            Ok(())
        });

        timeout(Duration::from_secs(1), supervisor.stop())
            .await
            .expect("first stop hung");
        timeout(Duration::from_secs(1), supervisor.stop())
            .await
            .expect("second stop hung");
        assert_eq!(supervisor.unit_state("unit"), Some(UnitState::Stopped));
    }

    #[tokio::test]
    async fn clean_exit_during_shutdown_is_stopped() {
        let supervisor = Supervisor::new();
        let mut shutdown_rx = supervisor.shutdown_rx();
        supervisor.spawn("unit", StopMode::Drain, async move {
            shutdown_rx.changed().await.ok();
            Ok(())
        });

        supervisor.stop().await;
        assert_eq!(supervisor.unit_state("unit"), Some(UnitState::Stopped));
    }

    #[tokio::test]
    async fn early_return_is_a_failure() {
        let supervisor = Supervisor::new();
        supervisor.spawn("unit", StopMode::Cancel, async { Ok(()) });

        wait_for_state(&supervisor, "unit", UnitState::Failed).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn body_error_is_a_failure() {
        let supervisor = Supervisor::new();
        supervisor.spawn("unit", StopMode::Cancel, async {
            anyhow::bail!("connection refused")
        });

        wait_for_state(&supervisor, "unit", UnitState::Failed).await;
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn running_unit_is_not_started_twice() {
        let supervisor = Supervisor::new();
        let starts = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let starts = starts.clone();
            let mut shutdown_rx = supervisor.shutdown_rx();
            supervisor.spawn("unit", StopMode::Cancel, async move {
                starts.fetch_add(1, Ordering::SeqCst);
                shutdown_rx.changed().await.ok();
                Ok(())
            });
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn panic_in_one_unit_does_not_abort_shutdown() {
        let supervisor = Supervisor::new();
        let mut panicky_rx = supervisor.shutdown_rx();
        supervisor.spawn("panicky", StopMode::Cancel, async move {
            panicky_rx.changed().await.ok();
            panic!("boom");
        });
        let mut good_rx = supervisor.shutdown_rx();
        supervisor.spawn("good", StopMode::Drain, async move {
            good_rx.changed().await.ok();
            Ok(())
        });

        timeout(Duration::from_secs(1), supervisor.stop())
            .await
            .expect("panic aborted shutdown");
        assert_eq!(supervisor.unit_state("panicky"), Some(UnitState::Failed));
        assert_eq!(supervisor.unit_state("good"), Some(UnitState::Stopped));
    }
}
