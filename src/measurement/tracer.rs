//! Hop path tracing with AS attribution, compared against the last stored path.

use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::store::MeasurementStore;
use crate::measurement::hop_discovery::{Hop, HopDiscovery};
use crate::measurement::resolver::Resolver;
use crate::measurement::target::{self, TargetError};

pub const PATH_SEPARATOR: &str = " > ";
const UNKNOWN_ASN: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error(transparent)]
    Resolve(#[from] TargetError),
    #[error("Hop discovery is not supported for {0}")]
    Unsupported(IpAddr),
    #[error("Hop discovery socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// One responding address on the path and its AS, empty when unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedHop {
    pub ip: IpAddr,
    pub asn: String,
}

/// Paths and hop counts of the most recent stored result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousPath {
    pub ip_path: String,
    pub as_path: String,
    pub ip_hop_count: i32,
    pub as_hop_count: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraceResult {
    pub hops: Vec<TracedHop>,
    /// Consecutive duplicates removed, unknown ASNs omitted.
    pub as_path: Vec<String>,
    pub previous: Option<PreviousPath>,
}

impl TraceResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn ip_hop_count(&self) -> i32 {
        self.hops.len() as i32
    }

    pub fn as_hop_count(&self) -> i32 {
        self.as_path.len() as i32
    }

    pub fn ip_path_text(&self) -> String {
        self.hops
            .iter()
            .map(|hop| hop.ip.to_string())
            .collect::<Vec<_>>()
            .join(PATH_SEPARATOR)
    }

    pub fn as_path_text(&self) -> String {
        self.as_path.join(PATH_SEPARATOR)
    }

    pub fn combined_path_text(&self) -> String {
        self.hops
            .iter()
            .map(|hop| {
                let asn = if hop.asn.is_empty() { UNKNOWN_ASN } else { &hop.asn };
                format!("{} ({asn})", hop.ip)
            })
            .collect::<Vec<_>>()
            .join(PATH_SEPARATOR)
    }
}

/// Removes repeats only where they are adjacent: `[A, B, B, A]` becomes `[A, B, A]`.
pub fn dedup_consecutive<I>(asns: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut path: Vec<String> = Vec::new();
    for asn in asns {
        if path.last() != Some(&asn) {
            path.push(asn);
        }
    }
    path
}

pub struct PathTracer {
    discovery: Arc<dyn HopDiscovery>,
    resolver: Arc<dyn Resolver>,
    store: Arc<dyn MeasurementStore>,
}

impl PathTracer {
    pub fn new(
        discovery: Arc<dyn HopDiscovery>,
        resolver: Arc<dyn Resolver>,
        store: Arc<dyn MeasurementStore>,
    ) -> Self {
        Self {
            discovery,
            resolver,
            store,
        }
    }

    /// Never fails: a path that cannot be discovered, including one where no
    /// hop answered, yields [`TraceResult::empty`], which also carries no
    /// previous path.
    pub async fn trace(&self, measurement_id: Uuid, target: &str) -> TraceResult {
        let hops = match self.discover(target).await {
            Ok(hops) => hops,
            Err(e) => {
                warn!(measurement_id = %measurement_id, host = %target, error = %e, "Path discovery failed, using an empty trace.");
                return TraceResult::empty();
            }
        };
        if hops.iter().all(|hop| hop.addrs.is_empty()) {
            warn!(measurement_id = %measurement_id, host = %target, probed = hops.len(), "No hop answered, using an empty trace.");
            return TraceResult::empty();
        }

        let hops = self.attribute(&hops).await;
        let as_path = dedup_consecutive(
            hops.iter()
                .filter(|hop| !hop.asn.is_empty())
                .map(|hop| hop.asn.clone()),
        );
        let previous = self.previous_path(measurement_id).await;

        debug!(
            measurement_id = %measurement_id,
            ip_hops = hops.len(),
            as_hops = as_path.len(),
            has_previous = previous.is_some(),
            "Trace complete."
        );

        TraceResult {
            hops,
            as_path,
            previous,
        }
    }

    async fn discover(&self, target: &str) -> Result<Vec<Hop>, TraceError> {
        let addr = target::resolve(target).await?;
        self.discovery.discover(addr).await
    }

    async fn attribute(&self, hops: &[Hop]) -> Vec<TracedHop> {
        let responders: Vec<IpAddr> = hops.iter().flat_map(|hop| hop.addrs.iter().copied()).collect();
        let lookups = join_all(responders.iter().map(|ip| self.resolver.lookup(*ip))).await;

        responders
            .into_iter()
            .zip(lookups)
            .map(|(ip, info)| TracedHop { ip, asn: info.asn })
            .collect()
    }

    async fn previous_path(&self, measurement_id: Uuid) -> Option<PreviousPath> {
        match self.store.get_last_result(measurement_id).await {
            Ok(last) => last.map(|result| PreviousPath {
                ip_path: result.ip_path,
                as_path: result.as_path,
                ip_hop_count: result.ip_hop_count,
                as_hop_count: result.as_hop_count,
            }),
            Err(e) => {
                warn!(measurement_id = %measurement_id, error = %e, "Could not read previous result, treating it as absent.");
                None
            }
        }
    }
}
