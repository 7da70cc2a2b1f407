//! Data access for measurements, their results and alerts.
//!
//! Every write is keyed by the measurement id, so concurrent cycles for
//! different measurements never touch the same rows.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::alerting::evaluation_service::RaisedAlert;
use crate::db::entities::{measurement, measurement_alert, measurement_result, prelude::*};
use crate::db::enums::MeasurementStatus;
use crate::db::store::{NewMeasurement, NewResult, SaveOutcome, StoreError};

pub async fn create_measurement(
    db: &DatabaseConnection,
    new_measurement: NewMeasurement,
) -> Result<measurement::Model, StoreError> {
    let txn = db.begin().await?;

    if let Some(existing) = Measurement::find()
        .filter(measurement::Column::Target.eq(new_measurement.target.as_str()))
        .one(&txn)
        .await?
    {
        return Err(StoreError::AlreadyExists {
            target: existing.target,
            id: existing.id,
        });
    }

    let created = measurement::ActiveModel {
        id: Set(Uuid::new_v4()),
        target: Set(new_measurement.target),
        packet_count: Set(new_measurement.packet_count),
        frequency_minutes: Set(new_measurement.frequency_minutes),
        is_hostname: Set(new_measurement.is_hostname),
        status: Set(MeasurementStatus::Scheduled),
        created_at: Set(Utc::now()),
        last_poll_at: Set(None),
        stopped_at: Set(None),
    }
    .insert(&txn)
    .await?;

    txn.commit().await?;
    Ok(created)
}

pub async fn get_measurement(
    db: &DatabaseConnection,
    measurement_id: Uuid,
) -> Result<Option<measurement::Model>, DbErr> {
    Measurement::find_by_id(measurement_id).one(db).await
}

pub async fn list_measurements(db: &DatabaseConnection) -> Result<Vec<measurement::Model>, DbErr> {
    Measurement::find()
        .order_by_asc(measurement::Column::CreatedAt)
        .all(db)
        .await
}

pub async fn list_active_measurements(
    db: &DatabaseConnection,
) -> Result<Vec<measurement::Model>, DbErr> {
    Measurement::find()
        .filter(measurement::Column::Status.is_in(MeasurementStatus::active_states()))
        .order_by_asc(measurement::Column::CreatedAt)
        .all(db)
        .await
}

/// The most recently completed cycle. Result ids are assigned in write order,
/// which is also cycle completion order for one measurement.
pub async fn get_last_result(
    db: &DatabaseConnection,
    measurement_id: Uuid,
) -> Result<Option<measurement_result::Model>, DbErr> {
    MeasurementResult::find()
        .filter(measurement_result::Column::MeasurementId.eq(measurement_id))
        .order_by_desc(measurement_result::Column::Id)
        .one(db)
        .await
}

pub async fn list_results(
    db: &DatabaseConnection,
    measurement_id: Uuid,
) -> Result<Vec<measurement_result::Model>, DbErr> {
    MeasurementResult::find()
        .filter(measurement_result::Column::MeasurementId.eq(measurement_id))
        .order_by_asc(measurement_result::Column::Id)
        .all(db)
        .await
}

pub async fn list_alerts(
    db: &DatabaseConnection,
    measurement_id: Uuid,
) -> Result<Vec<measurement_alert::Model>, DbErr> {
    MeasurementAlert::find()
        .filter(measurement_alert::Column::MeasurementId.eq(measurement_id))
        .order_by_asc(measurement_alert::Column::Id)
        .all(db)
        .await
}

/// Appends one cycle's result and alerts, stamps `last_poll_at` and moves
/// the measurement to `status` if it is still active. A measurement deleted
/// while the cycle was in flight turns the write into a no-op.
pub async fn save_cycle(
    db: &DatabaseConnection,
    measurement_id: Uuid,
    result: NewResult,
    alerts: &[RaisedAlert],
    status: MeasurementStatus,
    polled_at: DateTime<Utc>,
) -> Result<SaveOutcome, DbErr> {
    let txn = db.begin().await?;

    let Some(parent) = Measurement::find_by_id(measurement_id).one(&txn).await? else {
        debug!(measurement_id = %measurement_id, "Measurement no longer exists, dropping cycle write.");
        return Ok(SaveOutcome::MeasurementGone);
    };

    let saved_result = measurement_result::ActiveModel {
        measurement_id: Set(measurement_id),
        created_at: Set(polled_at),
        packets_sent: Set(result.packets_sent),
        packets_received: Set(result.packets_received),
        packet_loss: Set(result.packet_loss),
        min_rtt_ms: Set(result.min_rtt_ms),
        avg_rtt_ms: Set(result.avg_rtt_ms),
        max_rtt_ms: Set(result.max_rtt_ms),
        jitter_ms: Set(result.jitter_ms),
        ip_hop_count: Set(result.ip_hop_count),
        as_hop_count: Set(result.as_hop_count),
        ip_path: Set(result.ip_path),
        as_path: Set(result.as_path),
        combined_path: Set(result.combined_path),
        alerting: Set(result.alerting),
        ..Default::default()
    }
    .insert(&txn)
    .await?;

    if !alerts.is_empty() {
        let alert_models = alerts.iter().map(|alert| measurement_alert::ActiveModel {
            measurement_id: Set(measurement_id),
            result_id: Set(Some(saved_result.id)),
            raised_at: Set(alert.raised_at),
            reason: Set(alert.reason),
            message: Set(alert.message.clone()),
            ..Default::default()
        });
        MeasurementAlert::insert_many(alert_models).exec(&txn).await?;
    }

    Measurement::update_many()
        .set(measurement::ActiveModel {
            last_poll_at: Set(Some(polled_at)),
            ..Default::default()
        })
        .filter(measurement::Column::Id.eq(parent.id))
        .exec(&txn)
        .await?;
    // A stop issued while the cycle ran keeps its status.
    let moved = Measurement::update_many()
        .set(measurement::ActiveModel {
            status: Set(status),
            ..Default::default()
        })
        .filter(measurement::Column::Id.eq(parent.id))
        .filter(measurement::Column::Status.is_in(MeasurementStatus::active_states()))
        .exec(&txn)
        .await?;
    if moved.rows_affected == 0 {
        debug!(measurement_id = %measurement_id, "Measurement stopped mid-cycle, keeping its status.");
    }

    txn.commit().await?;

    Ok(SaveOutcome::Saved {
        result_id: saved_result.id,
        alert_count: alerts.len(),
    })
}

/// Applies a lifecycle transition. Stopping stamps `stopped_at`, restarting
/// clears it. Returns `None` when the measurement does not exist.
pub async fn set_status(
    db: &DatabaseConnection,
    measurement_id: Uuid,
    status: MeasurementStatus,
) -> Result<Option<measurement::Model>, DbErr> {
    let stopped_at = match status {
        MeasurementStatus::Stopped => Set(Some(Utc::now())),
        MeasurementStatus::Restarting => Set(None),
        MeasurementStatus::Running | MeasurementStatus::Scheduled => NotSet,
    };

    let txn = db.begin().await?;
    let updated = Measurement::update_many()
        .set(measurement::ActiveModel {
            status: Set(status),
            stopped_at,
            ..Default::default()
        })
        .filter(measurement::Column::Id.eq(measurement_id))
        .exec(&txn)
        .await?;
    if updated.rows_affected == 0 {
        return Ok(None);
    }

    let current = Measurement::find_by_id(measurement_id).one(&txn).await?;
    txn.commit().await?;
    Ok(current)
}

/// Removes a measurement with its results and alerts. Children are deleted
/// explicitly so backends without enforced foreign keys behave the same.
pub async fn delete_measurement(db: &DatabaseConnection, measurement_id: Uuid) -> Result<bool, DbErr> {
    let txn = db.begin().await?;

    MeasurementAlert::delete_many()
        .filter(measurement_alert::Column::MeasurementId.eq(measurement_id))
        .exec(&txn)
        .await?;
    MeasurementResult::delete_many()
        .filter(measurement_result::Column::MeasurementId.eq(measurement_id))
        .exec(&txn)
        .await?;
    let deleted = Measurement::delete_by_id(measurement_id).exec(&txn).await?;

    txn.commit().await?;
    Ok(deleted.rows_affected > 0)
}
