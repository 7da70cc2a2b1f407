use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::alerting::evaluation_service::RaisedAlert;
use crate::db::entities::{measurement, measurement_alert, measurement_result};
use crate::db::enums::MeasurementStatus;
use crate::db::{schema, services};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Measurement {0} not found")]
    NotFound(Uuid),
    #[error("Measurement with target {target} already exists with ID {id}")]
    AlreadyExists { target: String, id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMeasurement {
    pub target: String,
    pub packet_count: i32,
    pub frequency_minutes: i32,
    pub is_hostname: bool,
}

/// The columns of one cycle's result row, before it gets an id and timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewResult {
    pub packets_sent: i32,
    pub packets_received: i32,
    pub packet_loss: f64,
    pub min_rtt_ms: i64,
    pub avg_rtt_ms: i64,
    pub max_rtt_ms: i64,
    pub jitter_ms: i64,
    pub ip_hop_count: i32,
    pub as_hop_count: i32,
    pub ip_path: String,
    pub as_path: String,
    pub combined_path: String,
    pub alerting: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { result_id: i32, alert_count: usize },
    /// The measurement was deleted before the cycle finished.
    MeasurementGone,
}

/// Durable record of measurements and their time series, as the engine sees it.
#[async_trait]
pub trait MeasurementStore: Send + Sync {
    async fn get_measurement(&self, id: Uuid) -> Result<Option<measurement::Model>, StoreError>;

    async fn get_last_result(&self, id: Uuid)
    -> Result<Option<measurement_result::Model>, StoreError>;

    async fn save_cycle(
        &self,
        id: Uuid,
        result: NewResult,
        alerts: &[RaisedAlert],
        status: MeasurementStatus,
        polled_at: DateTime<Utc>,
    ) -> Result<SaveOutcome, StoreError>;

    async fn list_active_measurements(&self) -> Result<Vec<measurement::Model>, StoreError>;

    async fn create_measurement(
        &self,
        new_measurement: NewMeasurement,
    ) -> Result<measurement::Model, StoreError>;

    async fn set_status(
        &self,
        id: Uuid,
        status: MeasurementStatus,
    ) -> Result<measurement::Model, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Connects and makes sure the tables exist.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let mut options = ConnectOptions::new(database_url.to_owned());
        options
            .max_connections(10)
            .connect_timeout(Duration::from_secs(10))
            .sqlx_logging(false);
        if database_url.starts_with("sqlite::memory:") {
            // Every pooled connection would otherwise see its own empty database.
            options.max_connections(1).min_connections(1);
        }
        let db = Database::connect(options).await?;
        schema::create_tables(&db).await?;
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn list_measurements(&self) -> Result<Vec<measurement::Model>, StoreError> {
        Ok(services::list_measurements(&self.db).await?)
    }

    pub async fn list_results(
        &self,
        id: Uuid,
    ) -> Result<Vec<measurement_result::Model>, StoreError> {
        Ok(services::list_results(&self.db, id).await?)
    }

    pub async fn list_alerts(&self, id: Uuid) -> Result<Vec<measurement_alert::Model>, StoreError> {
        Ok(services::list_alerts(&self.db, id).await?)
    }
}

#[async_trait]
impl MeasurementStore for SeaOrmStore {
    async fn get_measurement(&self, id: Uuid) -> Result<Option<measurement::Model>, StoreError> {
        Ok(services::get_measurement(&self.db, id).await?)
    }

    async fn get_last_result(
        &self,
        id: Uuid,
    ) -> Result<Option<measurement_result::Model>, StoreError> {
        Ok(services::get_last_result(&self.db, id).await?)
    }

    async fn save_cycle(
        &self,
        id: Uuid,
        result: NewResult,
        alerts: &[RaisedAlert],
        status: MeasurementStatus,
        polled_at: DateTime<Utc>,
    ) -> Result<SaveOutcome, StoreError> {
        Ok(services::save_cycle(&self.db, id, result, alerts, status, polled_at).await?)
    }

    async fn list_active_measurements(&self) -> Result<Vec<measurement::Model>, StoreError> {
        Ok(services::list_active_measurements(&self.db).await?)
    }

    async fn create_measurement(
        &self,
        new_measurement: NewMeasurement,
    ) -> Result<measurement::Model, StoreError> {
        services::create_measurement(&self.db, new_measurement).await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: MeasurementStatus,
    ) -> Result<measurement::Model, StoreError> {
        services::set_status(&self.db, id, status)
            .await?
            .ok_or(StoreError::NotFound(id))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        if services::delete_measurement(&self.db, id).await? {
            Ok(())
        } else {
            Err(StoreError::NotFound(id))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::enums::AlertReason;

    pub(crate) async fn memory_store() -> SeaOrmStore {
        SeaOrmStore::connect("sqlite::memory:").await.unwrap()
    }

    pub(crate) fn new_measurement(target: &str) -> NewMeasurement {
        NewMeasurement {
            target: target.to_string(),
            packet_count: 5,
            frequency_minutes: 1,
            is_hostname: false,
        }
    }

    fn sample_result(ip_hops: i32) -> NewResult {
        NewResult {
            packets_sent: 5,
            packets_received: 5,
            avg_rtt_ms: 12,
            ip_hop_count: ip_hops,
            as_hop_count: 2,
            ip_path: "10.0.0.1 > 8.8.8.8".to_string(),
            as_path: "AS1 > AS15169".to_string(),
            combined_path: "10.0.0.1 (AS1) > 8.8.8.8 (AS15169)".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_starts_scheduled_and_rejects_duplicate_targets() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("8.8.8.8")).await.unwrap();
        assert_eq!(created.status, MeasurementStatus::Scheduled);
        assert!(created.last_poll_at.is_none());

        let duplicate = store.create_measurement(new_measurement("8.8.8.8")).await;
        match duplicate {
            Err(StoreError::AlreadyExists { id, .. }) => assert_eq!(id, created.id),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_target_rejected_even_when_stopped() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("1.1.1.1")).await.unwrap();
        store.set_status(created.id, MeasurementStatus::Stopped).await.unwrap();
        assert!(matches!(
            store.create_measurement(new_measurement("1.1.1.1")).await,
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn save_cycle_appends_in_order_and_updates_parent() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("9.9.9.9")).await.unwrap();
        assert!(store.get_last_result(created.id).await.unwrap().is_none());

        let alert = RaisedAlert {
            raised_at: Utc::now(),
            reason: AlertReason::PacketLoss,
            message: "loss".to_string(),
        };
        let first = store
            .save_cycle(created.id, sample_result(3), &[alert], MeasurementStatus::Running, Utc::now())
            .await
            .unwrap();
        let second = store
            .save_cycle(created.id, sample_result(4), &[], MeasurementStatus::Running, Utc::now())
            .await
            .unwrap();
        assert!(matches!(first, SaveOutcome::Saved { alert_count: 1, .. }));
        assert!(matches!(second, SaveOutcome::Saved { alert_count: 0, .. }));

        let last = store.get_last_result(created.id).await.unwrap().unwrap();
        assert_eq!(last.ip_hop_count, 4);

        let parent = store.get_measurement(created.id).await.unwrap().unwrap();
        assert_eq!(parent.status, MeasurementStatus::Running);
        assert!(parent.last_poll_at.is_some());

        let alerts = store.list_alerts(created.id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        let SaveOutcome::Saved { result_id, .. } = first else {
            unreachable!()
        };
        assert_eq!(alerts[0].result_id, Some(result_id));
        assert_eq!(store.list_results(created.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn save_after_delete_is_a_no_op() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("4.4.4.4")).await.unwrap();
        store.delete(created.id).await.unwrap();

        let outcome = store
            .save_cycle(created.id, sample_result(3), &[], MeasurementStatus::Running, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::MeasurementGone);
        assert!(store.list_results(created.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_cascades_to_results_and_alerts() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("5.5.5.5")).await.unwrap();
        let alert = RaisedAlert {
            raised_at: Utc::now(),
            reason: AlertReason::HighJitter,
            message: "jitter".to_string(),
        };
        store
            .save_cycle(created.id, sample_result(3), &[alert], MeasurementStatus::Running, Utc::now())
            .await
            .unwrap();

        store.delete(created.id).await.unwrap();
        assert!(store.get_measurement(created.id).await.unwrap().is_none());
        assert!(store.list_results(created.id).await.unwrap().is_empty());
        assert!(store.list_alerts(created.id).await.unwrap().is_empty());
        assert!(matches!(store.delete(created.id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn status_transitions_stamp_stopped_at() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("7.7.7.7")).await.unwrap();

        let stopped = store.set_status(created.id, MeasurementStatus::Stopped).await.unwrap();
        assert!(stopped.stopped_at.is_some());

        let restarting = store.set_status(created.id, MeasurementStatus::Restarting).await.unwrap();
        assert!(restarting.stopped_at.is_none());
        assert_eq!(restarting.status, MeasurementStatus::Restarting);

        assert!(matches!(
            store.set_status(Uuid::new_v4(), MeasurementStatus::Stopped).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn cycle_write_keeps_a_stop_issued_mid_cycle() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("6.6.6.6")).await.unwrap();
        store.set_status(created.id, MeasurementStatus::Stopped).await.unwrap();

        let outcome = store
            .save_cycle(created.id, sample_result(3), &[], MeasurementStatus::Running, Utc::now())
            .await
            .unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { .. }));

        let parent = store.get_measurement(created.id).await.unwrap().unwrap();
        assert_eq!(parent.status, MeasurementStatus::Stopped);
        assert!(parent.stopped_at.is_some());
        assert!(parent.last_poll_at.is_some());
        assert_eq!(store.list_results(created.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_status_after_delete_is_not_found() {
        let store = memory_store().await;
        let created = store.create_measurement(new_measurement("3.3.3.3")).await.unwrap();
        store.delete(created.id).await.unwrap();

        assert!(matches!(
            store.set_status(created.id, MeasurementStatus::Restarting).await,
            Err(StoreError::NotFound(id)) if id == created.id
        ));
    }

    #[tokio::test]
    async fn lists_only_active_measurements() {
        let store = memory_store().await;
        let a = store.create_measurement(new_measurement("10.1.1.1")).await.unwrap();
        let b = store.create_measurement(new_measurement("10.1.1.2")).await.unwrap();
        store.create_measurement(new_measurement("10.1.1.3")).await.unwrap();
        store.set_status(a.id, MeasurementStatus::Stopped).await.unwrap();
        store.set_status(b.id, MeasurementStatus::Restarting).await.unwrap();

        let active = store.list_active_measurements().await.unwrap();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|m| m.status.is_active()));
        assert_eq!(store.list_measurements().await.unwrap().len(), 3);
    }
}
