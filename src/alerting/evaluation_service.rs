//! Alert rules applied to one cycle's probe and trace output.
//!
//! Evaluation is pure: it never reads or writes storage. Every rule is checked
//! independently, so a single cycle may raise several alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::enums::AlertReason;
use crate::measurement::prober::PingResult;
use crate::measurement::tracer::TraceResult;

pub const MIN_RTT_THRESHOLD_MS: i64 = 50;
pub const AVG_RTT_THRESHOLD_MS: i64 = 100;
pub const MAX_RTT_THRESHOLD_MS: i64 = 500;
pub const JITTER_THRESHOLD_MS: i64 = 25;

/// Path rules only compare against a previous hop count above this value;
/// lower counts come from absent or failed traces.
const MIN_PREVIOUS_HOPS: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaisedAlert {
    pub raised_at: DateTime<Utc>,
    pub reason: AlertReason,
    pub message: String,
}

pub fn evaluate_cycle(
    ping: &PingResult,
    trace: &TraceResult,
    now: DateTime<Utc>,
) -> Vec<RaisedAlert> {
    let mut raised = Vec::new();
    let mut raise = |reason: AlertReason, message: String| {
        raised.push(RaisedAlert {
            raised_at: now,
            reason,
            message,
        })
    };

    if ping.packets_received != ping.packets_sent {
        raise(
            AlertReason::PacketLoss,
            format!(
                "Packets received: {} is not the same as sent: {} - loss: {:.2}%",
                ping.packets_received,
                ping.packets_sent,
                ping.packet_loss * 100.0
            ),
        );
    }

    if ping.min_rtt_ms > MIN_RTT_THRESHOLD_MS
        || ping.avg_rtt_ms > AVG_RTT_THRESHOLD_MS
        || ping.max_rtt_ms > MAX_RTT_THRESHOLD_MS
    {
        raise(
            AlertReason::HighLatency,
            format!(
                "Latency threshold exceeded (min > {MIN_RTT_THRESHOLD_MS}ms / avg > {AVG_RTT_THRESHOLD_MS}ms / max > {MAX_RTT_THRESHOLD_MS}ms) - current min: {}ms, avg: {}ms, max: {}ms",
                ping.min_rtt_ms, ping.avg_rtt_ms, ping.max_rtt_ms
            ),
        );
    }

    if ping.jitter_ms > JITTER_THRESHOLD_MS {
        raise(
            AlertReason::HighJitter,
            format!(
                "Jitter threshold exceeded (> {JITTER_THRESHOLD_MS}ms) - current: {}ms",
                ping.jitter_ms
            ),
        );
    }

    let previous = trace.previous.as_ref();

    if let Some((reason, message)) = hop_count_change(
        "AS",
        previous.map(|p| p.as_hop_count),
        trace.as_hop_count(),
        AlertReason::AsPathChangeLonger,
        AlertReason::AsPathChangeShorter,
    ) {
        raise(reason, message);
    }

    if let Some((reason, message)) = hop_count_change(
        "IP",
        previous.map(|p| p.ip_hop_count),
        trace.ip_hop_count(),
        AlertReason::IpPathChangeLonger,
        AlertReason::IpPathChangeShorter,
    ) {
        raise(reason, message);
    }

    raised
}

fn hop_count_change(
    label: &str,
    previous: Option<i32>,
    current: i32,
    longer: AlertReason,
    shorter: AlertReason,
) -> Option<(AlertReason, String)> {
    let previous = previous.filter(|count| *count > MIN_PREVIOUS_HOPS)?;
    let (reason, direction) = match current.cmp(&previous) {
        std::cmp::Ordering::Greater => (longer, "increased"),
        std::cmp::Ordering::Less => (shorter, "decreased"),
        std::cmp::Ordering::Equal => return None,
    };
    Some((
        reason,
        format!("{label} hop count {direction} - current: {current}, previous: {previous}"),
    ))
}
