//! Cycle scheduler
//!
//! One named periodic task per cycle. Each tick checks the maintenance log
//! for the last run, takes the cycle's named lock in the store (so a second
//! worker against the same database stays idle), runs the cycle on a
//! blocking thread, and releases the lock. Shutdown is a watch signal; the
//! running cycle stops at its next page boundary.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use super::{Consolidator, CycleKind};

/// Check cadence: how often each task wakes to see whether its cycle is due
const TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Spawns and owns the periodic consolidation tasks
pub struct Scheduler {
    consolidator: Arc<Consolidator>,
    holder: String,
    shutdown: watch::Receiver<bool>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(consolidator: Arc<Consolidator>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            consolidator,
            holder: Uuid::new_v4().to_string(),
            shutdown,
            handles: vec![],
        }
    }

    /// Spawn the periodic tasks. Forgetting is spawned only when enabled.
    pub fn spawn(&mut self) {
        let config = self.consolidator.config().clone();

        self.spawn_cycle(CycleKind::Decay, config.decay_interval);
        self.spawn_cycle(CycleKind::Associate, config.association_interval);
        if config.forgetting_enabled {
            self.spawn_cycle(CycleKind::Forget, config.forgetting_interval);
        }

        // Propagate shutdown to the page-boundary stop flag
        let consolidator = Arc::clone(&self.consolidator);
        let mut shutdown = self.shutdown.clone();
        self.handles.push(tokio::spawn(async move {
            if shutdown.changed().await.is_ok() {
                consolidator.request_stop();
            }
        }));
    }

    fn spawn_cycle(&mut self, kind: CycleKind, interval: Duration) {
        let consolidator = Arc::clone(&self.consolidator);
        let holder = self.holder.clone();
        let mut shutdown = self.shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(TICK_INTERVAL.min(interval));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = shutdown.changed() => break,
                }

                let due = match consolidator.store().last_cycle(kind.as_str()) {
                    Ok(Some(last)) => {
                        let elapsed = chrono::Utc::now() - last;
                        elapsed.num_seconds() >= interval.as_secs() as i64
                    }
                    Ok(None) => true,
                    Err(e) => {
                        tracing::warn!(cycle = kind.as_str(), "cannot read maintenance log: {e}");
                        false
                    }
                };
                if !due {
                    continue;
                }

                // Named lock: at most one instance of each cycle at a time,
                // even with several workers on the same database
                let acquired = match consolidator.store().try_acquire_cycle_lock(
                    kind.as_str(),
                    &holder,
                    interval.max(Duration::from_secs(3600)),
                ) {
                    Ok(acquired) => acquired,
                    Err(e) => {
                        tracing::warn!(cycle = kind.as_str(), "lock acquisition failed: {e}");
                        false
                    }
                };
                if !acquired {
                    tracing::debug!(cycle = kind.as_str(), "cycle lock held elsewhere, skipping");
                    continue;
                }

                let runner = Arc::clone(&consolidator);
                let result =
                    tokio::task::spawn_blocking(move || runner.run_cycle(kind)).await;
                match result {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => tracing::warn!(cycle = kind.as_str(), "cycle failed: {e}"),
                    Err(e) => tracing::warn!(cycle = kind.as_str(), "cycle task panicked: {e}"),
                }

                if let Err(e) = consolidator
                    .store()
                    .release_cycle_lock(kind.as_str(), &holder)
                {
                    tracing::warn!(cycle = kind.as_str(), "lock release failed: {e}");
                }
            }
        });
        self.handles.push(handle);
    }

    /// Wait for every task to finish after shutdown was signalled.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
