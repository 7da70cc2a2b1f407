//! Per-measurement periodic timers.
//!
//! Every active measurement owns one tokio task that ticks at the
//! measurement's frequency and runs a cycle per tick. Timers are not
//! cancelled on stop: the cycle re-reads the status and skips. A timer only
//! ends when its measurement is gone or the scheduler shuts down.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::store::{MeasurementStore, StoreError};
use crate::measurement::cycle::CycleRunner;

pub fn frequency_period(frequency_minutes: i32) -> Duration {
    Duration::from_secs(u64::from(frequency_minutes.max(1).unsigned_abs()) * 60)
}

pub struct Scheduler {
    store: Arc<dyn MeasurementStore>,
    runner: Arc<CycleRunner>,
    timers: Arc<DashMap<Uuid, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn MeasurementStore>, runner: Arc<CycleRunner>) -> Self {
        Self {
            store,
            runner,
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Registers a timer for the measurement. Returns `false` when one is
    /// already running for it, in which case nothing changes.
    pub fn schedule(&self, measurement_id: Uuid, frequency_minutes: i32) -> bool {
        self.schedule_every(measurement_id, frequency_period(frequency_minutes))
    }

    pub fn schedule_every(&self, measurement_id: Uuid, period: Duration) -> bool {
        match self.timers.entry(measurement_id) {
            Entry::Occupied(entry) if !entry.get().is_finished() => return false,
            Entry::Occupied(mut entry) => {
                entry.insert(self.spawn_timer(measurement_id, period));
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_timer(measurement_id, period));
            }
        }
        debug!(measurement_id = %measurement_id, ?period, "Timer registered.");
        true
    }

    fn spawn_timer(&self, measurement_id: Uuid, period: Duration) -> JoinHandle<()> {
        let runner = self.runner.clone();
        let timers = self.timers.clone();
        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let outcome = runner.run_tick(measurement_id).await;
                debug!(measurement_id = %measurement_id, ?outcome, "Tick finished.");
                if !outcome.keeps_timer() {
                    break;
                }
            }
            timers.remove(&measurement_id);
            info!(measurement_id = %measurement_id, "Timer stopped.");
        })
    }

    /// Startup recovery: registers a timer for every measurement stored in
    /// an active state. Returns how many timers were newly registered.
    pub async fn house_keeping(&self) -> Result<usize, StoreError> {
        let active = self.store.list_active_measurements().await?;
        let registered = active
            .iter()
            .filter(|measurement| self.schedule(measurement.id, measurement.frequency_minutes))
            .count();
        if registered > 0 {
            info!(registered, active = active.len(), "House keeping registered timers.");
        }
        Ok(registered)
    }

    /// Repeats house keeping until `shutdown` fires, picking up measurements
    /// created by other processes sharing the database.
    pub async fn run_reconcile_loop(&self, period: Duration, mut shutdown: watch::Receiver<()>) {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, stopping reconcile loop.");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.house_keeping().await {
                        error!(error = %e, "Reconcile pass failed.");
                    }
                }
            }
        }
    }

    /// Aborts every timer. In-flight cycles are dropped at their next await point.
    pub fn shutdown(&self) {
        let ids: Vec<Uuid> = self.timers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, handle)) = self.timers.remove(&id) {
                handle.abort();
            }
        }
        info!("All measurement timers aborted.");
    }

    pub fn timer_count(&self) -> usize {
        self.timers.iter().filter(|entry| !entry.value().is_finished()).count()
    }

    pub fn is_scheduled(&self, measurement_id: Uuid) -> bool {
        self.timers
            .get(&measurement_id)
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for entry in self.timers.iter() {
            entry.value().abort();
        }
    }
}
