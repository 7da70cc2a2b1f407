//! IP attribution lookups (ISP, ASN, country) against an ip-api compatible
//! JSON endpoint.
//!
//! Lookups never fail from the caller's point of view: transport or decode
//! problems are logged and yield an empty [`IpInfo`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::version;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    pub isp: String,
    /// Autonomous system as reported by the lookup service, e.g. `AS15169 Google LLC`.
    pub asn: String,
    pub country: String,
    pub country_code: String,
}

impl IpInfo {
    /// True for `status: fail` answers such as private or reserved ranges.
    pub fn is_empty(&self) -> bool {
        self.isp.is_empty() && self.asn.is_empty() && self.country.is_empty()
    }
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, ip: IpAddr) -> IpInfo;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    #[serde(default)]
    isp: String,
    #[serde(default, rename = "as")]
    asn: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
}

impl From<IpApiResponse> for IpInfo {
    fn from(response: IpApiResponse) -> Self {
        Self {
            isp: response.isp,
            asn: response.asn,
            country: response.country,
            country_code: response.country_code,
        }
    }
}

struct CacheEntry {
    info: IpInfo,
    cached_at: Instant,
}

pub struct IpApiResolver {
    client: reqwest::Client,
    base_url: String,
    cache: DashMap<IpAddr, CacheEntry>,
    cache_ttl: Duration,
}

impl IpApiResolver {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(version::user_agent())
            .build()?;
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Ok(Self {
            client,
            base_url,
            cache: DashMap::new(),
            cache_ttl,
        })
    }

    fn cached(&self, ip: IpAddr) -> Option<IpInfo> {
        if let Some(entry) = self.cache.get(&ip)
            && entry.cached_at.elapsed() < self.cache_ttl
        {
            return Some(entry.info.clone());
        }
        self.cache
            .remove_if(&ip, |_, entry| entry.cached_at.elapsed() >= self.cache_ttl);
        None
    }

    async fn fetch(&self, ip: IpAddr) -> Result<IpInfo, reqwest::Error> {
        let url = format!("{}{ip}", self.base_url);
        let response = self.client.get(&url).send().await?.error_for_status()?;
        let body: IpApiResponse = response.json().await?;
        Ok(body.into())
    }
}

#[async_trait]
impl Resolver for IpApiResolver {
    async fn lookup(&self, ip: IpAddr) -> IpInfo {
        if let Some(info) = self.cached(ip) {
            return info;
        }

        match self.fetch(ip).await {
            Ok(info) if info.is_empty() => {
                debug!(%ip, "Lookup service has no attribution for this address.");
                info
            }
            Ok(info) => {
                debug!(%ip, asn = %info.asn, "Resolved hop attribution.");
                self.cache.insert(
                    ip,
                    CacheEntry {
                        info: info.clone(),
                        cached_at: Instant::now(),
                    },
                );
                info
            }
            Err(e) => {
                warn!(%ip, error = %e, "IP lookup failed, continuing without attribution.");
                IpInfo::default()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Static attribution table; unknown addresses resolve to an empty record.
    #[derive(Default)]
    pub(crate) struct FakeResolver {
        pub table: HashMap<IpAddr, String>,
    }

    impl FakeResolver {
        pub(crate) fn with_asns(entries: &[(&str, &str)]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(ip, asn)| (ip.parse().unwrap(), asn.to_string()))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Resolver for FakeResolver {
        async fn lookup(&self, ip: IpAddr) -> IpInfo {
            self.table
                .get(&ip)
                .map(|asn| IpInfo {
                    asn: asn.clone(),
                    ..IpInfo::default()
                })
                .unwrap_or_default()
        }
    }

    #[test]
    fn decodes_lookup_payload() {
        let body = r#"{"status":"success","country":"United States","countryCode":"US",
            "isp":"Google LLC","as":"AS15169 Google LLC","query":"8.8.8.8"}"#;
        let info: IpInfo = serde_json::from_str::<IpApiResponse>(body).unwrap().into();
        assert_eq!(info.asn, "AS15169 Google LLC");
        assert_eq!(info.isp, "Google LLC");
        assert_eq!(info.country_code, "US");
    }

    #[test]
    fn failed_status_payload_decodes_to_empty() {
        let body = r#"{"status":"fail","message":"private range","query":"10.0.0.1"}"#;
        let info: IpInfo = serde_json::from_str::<IpApiResponse>(body).unwrap().into();
        assert!(info.is_empty());
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_empty() {
        let resolver = IpApiResolver::new(
            "http://127.0.0.1:9/json",
            Duration::from_millis(300),
            Duration::from_secs(60),
        )
        .unwrap();
        let info = resolver.lookup("8.8.8.8".parse().unwrap()).await;
        assert_eq!(info, IpInfo::default());
        assert!(resolver.cache.is_empty());
    }

    #[tokio::test]
    async fn fresh_cache_entries_are_served() {
        let resolver =
            IpApiResolver::new("http://127.0.0.1:9/json", Duration::from_millis(300), Duration::from_secs(60))
                .unwrap();
        let ip: IpAddr = "1.1.1.1".parse().unwrap();
        resolver.cache.insert(
            ip,
            CacheEntry {
                info: IpInfo {
                    asn: "AS13335 Cloudflare, Inc.".to_string(),
                    ..IpInfo::default()
                },
                cached_at: Instant::now(),
            },
        );
        assert_eq!(resolver.lookup(ip).await.asn, "AS13335 Cloudflare, Inc.");
    }

    #[tokio::test]
    async fn expired_cache_entries_are_evicted() {
        let resolver =
            IpApiResolver::new("http://127.0.0.1:9/json", Duration::from_millis(300), Duration::from_millis(20))
                .unwrap();
        let ip: IpAddr = "9.9.9.9".parse().unwrap();
        resolver.cache.insert(
            ip,
            CacheEntry {
                info: IpInfo {
                    asn: "AS19281 Quad9".to_string(),
                    ..IpInfo::default()
                },
                cached_at: Instant::now(),
            },
        );
        assert!(resolver.cached(ip).is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(resolver.cached(ip).is_none());
        assert!(!resolver.cache.contains_key(&ip));
    }
}
