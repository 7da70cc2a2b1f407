use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::alerting::evaluation_service::evaluate_cycle;
use crate::db::enums::MeasurementStatus;
use crate::db::store::{MeasurementStore, NewResult, SaveOutcome};
use crate::measurement::prober::{PingResult, Prober};
use crate::measurement::tracer::{PathTracer, TraceResult};

/// What one timer tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Saved { result_id: i32, alert_count: usize },
    /// The measurement is not in an active state; nothing was probed or written.
    Inactive(MeasurementStatus),
    /// The measurement no longer exists. Its timer should stop.
    Gone,
    ProbeFailed,
    StoreFailed,
}

impl CycleOutcome {
    pub fn keeps_timer(&self) -> bool {
        !matches!(self, CycleOutcome::Gone)
    }
}

pub struct CycleRunner {
    store: Arc<dyn MeasurementStore>,
    prober: Arc<dyn Prober>,
    tracer: PathTracer,
}

impl CycleRunner {
    pub fn new(store: Arc<dyn MeasurementStore>, prober: Arc<dyn Prober>, tracer: PathTracer) -> Self {
        Self {
            store,
            prober,
            tracer,
        }
    }

    /// Runs one cycle. The measurement is re-read first so that stop, restart
    /// and delete take effect on the next tick without touching the timer.
    pub async fn run_tick(&self, measurement_id: Uuid) -> CycleOutcome {
        let measurement = match self.store.get_measurement(measurement_id).await {
            Ok(Some(measurement)) => measurement,
            Ok(None) => {
                info!(measurement_id = %measurement_id, "Measurement was deleted, stopping its timer.");
                return CycleOutcome::Gone;
            }
            Err(e) => {
                error!(measurement_id = %measurement_id, error = %e, "Failed to read measurement, skipping this tick.");
                return CycleOutcome::StoreFailed;
            }
        };

        if !measurement.status.is_active() {
            return CycleOutcome::Inactive(measurement.status);
        }

        let ping = match self
            .prober
            .probe(&measurement.target, measurement.packet_count)
            .await
        {
            Ok(ping) => ping,
            Err(e) => {
                warn!(measurement_id = %measurement_id, host = %measurement.target, error = %e, "Probe failed, no result written for this tick.");
                return CycleOutcome::ProbeFailed;
            }
        };

        let trace = self.tracer.trace(measurement_id, &measurement.target).await;
        let now = Utc::now();
        let alerts = evaluate_cycle(&ping, &trace, now);
        let result = new_result(&ping, &trace, !alerts.is_empty());

        match self
            .store
            .save_cycle(measurement_id, result, &alerts, MeasurementStatus::Running, now)
            .await
        {
            Ok(SaveOutcome::Saved {
                result_id,
                alert_count,
            }) => {
                info!(
                    measurement_id = %measurement_id,
                    result_id,
                    alert_count,
                    loss = ping.packet_loss,
                    avg_rtt_ms = ping.avg_rtt_ms,
                    "Cycle saved."
                );
                CycleOutcome::Saved {
                    result_id,
                    alert_count,
                }
            }
            Ok(SaveOutcome::MeasurementGone) => CycleOutcome::Gone,
            Err(e) => {
                error!(measurement_id = %measurement_id, error = %e, "Failed to save cycle.");
                CycleOutcome::StoreFailed
            }
        }
    }
}

fn new_result(ping: &PingResult, trace: &TraceResult, alerting: bool) -> NewResult {
    NewResult {
        packets_sent: ping.packets_sent,
        packets_received: ping.packets_received,
        packet_loss: ping.packet_loss,
        min_rtt_ms: ping.min_rtt_ms,
        avg_rtt_ms: ping.avg_rtt_ms,
        max_rtt_ms: ping.max_rtt_ms,
        jitter_ms: ping.jitter_ms,
        ip_hop_count: trace.ip_hop_count(),
        as_hop_count: trace.as_hop_count(),
        ip_path: trace.ip_path_text(),
        as_path: trace.as_path_text(),
        combined_path: trace.combined_path_text(),
        alerting,
    }
}
