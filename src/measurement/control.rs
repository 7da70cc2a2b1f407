//! Lifecycle requests against measurements: create, stop, restart, delete.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::db::entities::measurement;
use crate::db::enums::MeasurementStatus;
use crate::db::store::{MeasurementStore, NewMeasurement, StoreError};
use crate::measurement::prober::{MAX_PACKET_COUNT, MIN_PACKET_COUNT};
use crate::measurement::scheduler::Scheduler;
use crate::measurement::target::{self, TargetError};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    InvalidTarget(#[from] TargetError),
    #[error("Packet count must be between {MIN_PACKET_COUNT} and {MAX_PACKET_COUNT}, got {0}")]
    InvalidCount(i32),
    #[error("Frequency must be at least one minute, got {0}")]
    InvalidFrequency(i32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MeasurementControl {
    store: Arc<dyn MeasurementStore>,
    scheduler: Option<Arc<Scheduler>>,
}

impl MeasurementControl {
    pub fn new(store: Arc<dyn MeasurementStore>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            store,
            scheduler: Some(scheduler),
        }
    }

    /// Control without local timers. A running engine sharing the database
    /// picks up the changes on its next reconcile pass.
    pub fn detached(store: Arc<dyn MeasurementStore>) -> Self {
        Self {
            store,
            scheduler: None,
        }
    }

    pub async fn create(
        &self,
        raw_target: &str,
        packet_count: i32,
        frequency_minutes: i32,
    ) -> Result<measurement::Model, ControlError> {
        let target = target::validate_target(raw_target)?;
        if !(MIN_PACKET_COUNT..=MAX_PACKET_COUNT).contains(&packet_count) {
            return Err(ControlError::InvalidCount(packet_count));
        }
        if frequency_minutes < 1 {
            return Err(ControlError::InvalidFrequency(frequency_minutes));
        }

        let is_hostname = target::is_hostname(&target);
        let created = self
            .store
            .create_measurement(NewMeasurement {
                target,
                packet_count,
                frequency_minutes,
                is_hostname,
            })
            .await?;

        info!(measurement_id = %created.id, host = %created.target, "Measurement created.");
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule(created.id, created.frequency_minutes);
        }
        Ok(created)
    }

    /// The timer stays registered; the next tick sees the status and skips.
    pub async fn stop(&self, measurement_id: Uuid) -> Result<measurement::Model, ControlError> {
        let stopped = self
            .store
            .set_status(measurement_id, MeasurementStatus::Stopped)
            .await?;
        info!(measurement_id = %measurement_id, "Measurement stopped.");
        Ok(stopped)
    }

    pub async fn restart(&self, measurement_id: Uuid) -> Result<measurement::Model, ControlError> {
        let restarted = self
            .store
            .set_status(measurement_id, MeasurementStatus::Restarting)
            .await?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule(restarted.id, restarted.frequency_minutes);
        }
        info!(measurement_id = %measurement_id, "Measurement restarting.");
        Ok(restarted)
    }

    /// Removes the measurement with its history. An in-flight cycle is left
    /// alone; its write becomes a no-op and the timer ends on its next tick.
    pub async fn delete(&self, measurement_id: Uuid) -> Result<(), ControlError> {
        self.store.delete(measurement_id).await?;
        info!(measurement_id = %measurement_id, "Measurement deleted.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::cycle::tests::harness;

    async fn control() -> (MeasurementControl, Arc<Scheduler>, crate::measurement::cycle::tests::Harness) {
        let h = harness().await;
        let scheduler = Arc::new(Scheduler::new(h.store.clone(), h.runner.clone()));
        (MeasurementControl::new(h.store.clone(), scheduler.clone()), scheduler, h)
    }

    #[tokio::test]
    async fn create_validates_before_storing() {
        let (control, scheduler, h) = control().await;

        assert!(matches!(
            control.create("  ", 5, 1).await,
            Err(ControlError::InvalidTarget(TargetError::Empty))
        ));
        assert!(matches!(
            control.create("not a host", 5, 1).await,
            Err(ControlError::InvalidTarget(TargetError::Malformed(_)))
        ));
        assert!(matches!(control.create("192.0.2.1", 0, 1).await, Err(ControlError::InvalidCount(0))));
        assert!(matches!(control.create("192.0.2.1", 101, 1).await, Err(ControlError::InvalidCount(101))));
        assert!(matches!(control.create("192.0.2.1", 5, 0).await, Err(ControlError::InvalidFrequency(0))));

        assert!(h.store.list_measurements().await.unwrap().is_empty());
        assert_eq!(scheduler.timer_count(), 0);
    }

    #[tokio::test]
    async fn create_stores_and_schedules() {
        let (control, scheduler, _h) = control().await;

        let m = control.create(" example.net ", 10, 5).await.unwrap();
        assert_eq!(m.target, "example.net");
        assert!(m.is_hostname);
        assert_eq!(m.status, MeasurementStatus::Scheduled);
        assert!(m.last_poll_at.is_none());
        assert!(scheduler.is_scheduled(m.id));

        let literal = control.create("192.0.2.1", 10, 5).await.unwrap();
        assert!(!literal.is_hostname);
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn duplicate_target_is_rejected_even_when_stopped() {
        let (control, scheduler, _h) = control().await;
        let m = control.create("192.0.2.1", 5, 1).await.unwrap();
        control.stop(m.id).await.unwrap();

        let err = control.create("192.0.2.1", 5, 1).await.unwrap_err();
        assert!(matches!(err, ControlError::Store(StoreError::AlreadyExists { id, .. }) if id == m.id));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn stop_restart_and_delete() {
        let (control, scheduler, h) = control().await;
        let m = control.create("192.0.2.1", 5, 1).await.unwrap();

        let stopped = control.stop(m.id).await.unwrap();
        assert_eq!(stopped.status, MeasurementStatus::Stopped);
        assert!(stopped.stopped_at.is_some());
        assert!(scheduler.is_scheduled(m.id));

        // A timer that already ended is brought back by restart.
        scheduler.shutdown();
        let restarted = control.restart(m.id).await.unwrap();
        assert_eq!(restarted.status, MeasurementStatus::Restarting);
        assert!(restarted.stopped_at.is_none());
        assert!(scheduler.is_scheduled(m.id));

        control.delete(m.id).await.unwrap();
        assert!(h.store.get_measurement(m.id).await.unwrap().is_none());
        assert!(matches!(
            control.delete(m.id).await,
            Err(ControlError::Store(StoreError::NotFound(id))) if id == m.id
        ));
        assert!(matches!(control.stop(m.id).await, Err(ControlError::Store(StoreError::NotFound(_)))));
        scheduler.shutdown();
    }

    #[tokio::test]
    async fn detached_control_leaves_scheduling_to_the_engine() {
        let h = harness().await;
        let control = MeasurementControl::detached(h.store.clone());
        let m = control.create("192.0.2.3", 3, 2).await.unwrap();

        let scheduler = Scheduler::new(h.store.clone(), h.runner.clone());
        assert_eq!(scheduler.house_keeping().await.unwrap(), 1);
        assert!(scheduler.is_scheduled(m.id));
        scheduler.shutdown();
    }
}
