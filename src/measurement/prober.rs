//! ICMP latency sampling for one target and one cycle.

use async_trait::async_trait;
use rand::random;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence, SurgeError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::measurement::target::{self, TargetError};

pub const MIN_PACKET_COUNT: i32 = 1;
pub const MAX_PACKET_COUNT: i32 = 100;

const PACKET_TIMEOUT: Duration = Duration::from_secs(1);
const SEND_SPACING: Duration = Duration::from_millis(200);
const DEADLINE_SLACK: Duration = Duration::from_secs(2);
const PAYLOAD: [u8; 56] = [0; 56];

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Packet count must be between {MIN_PACKET_COUNT} and {MAX_PACKET_COUNT}, got {0}")]
    InvalidCount(i32),
    #[error(transparent)]
    Resolve(#[from] TargetError),
    #[error("ICMP transport error: {0}")]
    Transport(String),
}

/// Aggregate statistics of one burst of echo requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingResult {
    pub packets_sent: i32,
    pub packets_received: i32,
    /// Fraction in `0.0..=1.0`.
    pub packet_loss: f64,
    pub min_rtt_ms: i64,
    pub avg_rtt_ms: i64,
    pub max_rtt_ms: i64,
    /// Population standard deviation of the round-trip times.
    pub jitter_ms: i64,
}

impl PingResult {
    pub fn from_samples(sent: i32, rtts: &[Duration]) -> Self {
        let received = rtts.len() as i32;
        if sent <= 0 {
            return Self::default();
        }
        let packet_loss = f64::from(sent - received.min(sent)) / f64::from(sent);
        if rtts.is_empty() {
            return Self {
                packets_sent: sent,
                packet_loss,
                ..Self::default()
            };
        }

        let millis: Vec<f64> = rtts.iter().map(|rtt| rtt.as_secs_f64() * 1000.0).collect();
        let n = millis.len() as f64;
        let mean = millis.iter().sum::<f64>() / n;
        let variance = millis.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        let min = millis.iter().copied().fold(f64::INFINITY, f64::min);
        let max = millis.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Self {
            packets_sent: sent,
            packets_received: received,
            packet_loss,
            min_rtt_ms: min as i64,
            avg_rtt_ms: mean as i64,
            max_rtt_ms: max as i64,
            jitter_ms: variance.sqrt() as i64,
        }
    }
}

pub fn validate_count(count: i32) -> Result<(), ProbeError> {
    if (MIN_PACKET_COUNT..=MAX_PACKET_COUNT).contains(&count) {
        Ok(())
    } else {
        Err(ProbeError::InvalidCount(count))
    }
}

/// Timing parameters for one probe call, derived from its packet count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    pub packet_timeout: Duration,
    pub spacing: Duration,
    pub deadline: Duration,
}

impl ProbeSettings {
    pub fn for_count(count: i32) -> Self {
        let count = count.max(0) as u32;
        Self {
            packet_timeout: PACKET_TIMEOUT,
            spacing: SEND_SPACING,
            deadline: (PACKET_TIMEOUT + SEND_SPACING) * count + DEADLINE_SLACK,
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, target: &str, count: i32) -> Result<PingResult, ProbeError>;
}

pub struct IcmpProber {
    ttl: u32,
}

impl IcmpProber {
    pub fn new(ttl: u32) -> Self {
        Self { ttl }
    }

    fn client_for(&self, addr: IpAddr) -> Result<Client, ProbeError> {
        let kind = if addr.is_ipv4() { ICMP::V4 } else { ICMP::V6 };
        let config = Config::builder().kind(kind).ttl(self.ttl).build();
        Client::new(&config)
            .map_err(|e| ProbeError::Transport(format!("failed to open ICMP socket: {e}")))
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: &str, count: i32) -> Result<PingResult, ProbeError> {
        validate_count(count)?;
        let addr = target::resolve(target).await?;
        let settings = ProbeSettings::for_count(count);
        let client = self.client_for(addr)?;
        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;

        let deadline = Instant::now() + settings.deadline;
        let mut rtts = Vec::with_capacity(count as usize);

        for seq in 0..count as u16 {
            if seq > 0 {
                tokio::time::sleep(settings.spacing).await;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(host = %target, seq, "Probe deadline reached, remaining packets count as lost.");
                break;
            }
            pinger.timeout(settings.packet_timeout.min(remaining));

            match pinger.ping(PingSequence(seq), &PAYLOAD).await {
                Ok((_packet, rtt)) => rtts.push(rtt),
                Err(SurgeError::Timeout { .. }) => {
                    debug!(host = %target, seq, "Echo request timed out.");
                }
                Err(e) => {
                    warn!(host = %target, seq, error = %e, "Echo request failed.");
                    return Err(ProbeError::Transport(e.to_string()));
                }
            }
        }

        Ok(PingResult::from_samples(count, &rtts))
    }
}
