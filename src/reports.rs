//! Read-side views over stored results: chart series, the latest path as a
//! graph, and the context of an alerting cycle.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::entities::measurement_result;
use crate::measurement::tracer::PATH_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub x: DateTime<Utc>,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: &'static str,
    pub data: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RttSeries {
    pub min: Series,
    pub avg: Series,
    pub max: Series,
    pub jitter: Series,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PacketSeries {
    pub sent: Series,
    pub received: Series,
    pub loss: Series,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopSeries {
    pub ip: Series,
    #[serde(rename = "as")]
    pub as_hops: Series,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CombinedSeries {
    pub rtt: RttSeries,
    pub packets: PacketSeries,
    pub hops: HopSeries,
}

/// The most recent results covering `hours` at the measurement's frequency.
/// Frequencies above an hour still yield one result per requested hour.
pub fn results_in_range(
    results: &[measurement_result::Model],
    frequency_minutes: i32,
    hours: u32,
) -> &[measurement_result::Model] {
    let per_hour = (60 / frequency_minutes.max(1)).max(1) as usize;
    let requested = per_hour * hours.max(1) as usize;
    &results[results.len().saturating_sub(requested)..]
}

pub fn combined_series(
    results: &[measurement_result::Model],
    frequency_minutes: i32,
    hours: u32,
) -> CombinedSeries {
    let in_range = results_in_range(results, frequency_minutes, hours);
    let series = |name: &'static str, value: fn(&measurement_result::Model) -> f64| Series {
        name,
        data: in_range
            .iter()
            .map(|result| Point {
                x: result.created_at,
                y: value(result),
            })
            .collect(),
    };

    CombinedSeries {
        rtt: RttSeries {
            min: series("Latency (Min)", |r| r.min_rtt_ms as f64),
            avg: series("Latency (Avg)", |r| r.avg_rtt_ms as f64),
            max: series("Latency (Max)", |r| r.max_rtt_ms as f64),
            jitter: series("Jitter", |r| r.jitter_ms as f64),
        },
        packets: PacketSeries {
            sent: series("Packets Sent", |r| f64::from(r.packets_sent)),
            received: series("Packets Received", |r| f64::from(r.packets_received)),
            loss: series("Packet Loss", |r| r.packet_loss),
        },
        hops: HopSeries {
            ip: series("IP Hops", |r| f64::from(r.ip_hop_count)),
            as_hops: series("AS Hops", |r| f64::from(r.as_hop_count)),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub id: usize,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TraceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

/// One node per combined-path entry, linked in path order.
pub fn trace_graph(result: &measurement_result::Model) -> TraceGraph {
    let labels: Vec<&str> = result
        .combined_path
        .split(PATH_SEPARATOR)
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .collect();

    TraceGraph {
        nodes: labels
            .iter()
            .enumerate()
            .map(|(id, label)| GraphNode {
                id,
                label: label.to_string(),
            })
            .collect(),
        edges: (1..labels.len())
            .map(|to| GraphEdge { from: to - 1, to })
            .collect(),
    }
}

/// An alerting cycle next to the measurement's current path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertDetails {
    pub polled_at: DateTime<Utc>,
    pub avg_rtt_ms: i64,
    pub jitter_ms: i64,
    pub packet_loss: f64,
    pub ip_path: String,
    pub as_path: String,
    pub latest_ip_path: String,
    pub latest_as_path: String,
}

pub fn alert_details(
    alerting: &measurement_result::Model,
    latest: &measurement_result::Model,
) -> AlertDetails {
    AlertDetails {
        polled_at: alerting.created_at,
        avg_rtt_ms: alerting.avg_rtt_ms,
        jitter_ms: alerting.jitter_ms,
        packet_loss: alerting.packet_loss,
        ip_path: alerting.ip_path.clone(),
        as_path: alerting.as_path.clone(),
        latest_ip_path: latest.ip_path.clone(),
        latest_as_path: latest.as_path.clone(),
    }
}
