use std::sync::Arc;

use crate::db::store::{MeasurementStore, SeaOrmStore};
use crate::measurement::hop_discovery::IcmpHopDiscovery;
use crate::measurement::prober::IcmpProber;
use crate::measurement::resolver::IpApiResolver;
use crate::measurement::tracer::PathTracer;
use crate::measurement::{CycleRunner, MeasurementControl, Scheduler};
use crate::server::config::AppConfig;

/// The wired-up measurement engine: ICMP prober, raw-socket tracer, HTTP
/// resolver and the scheduler driving them, all over one store.
pub struct Engine {
    pub store: Arc<SeaOrmStore>,
    pub scheduler: Arc<Scheduler>,
    pub control: MeasurementControl,
}

impl Engine {
    pub fn build(store: Arc<SeaOrmStore>, config: &AppConfig) -> Result<Self, reqwest::Error> {
        let resolver = IpApiResolver::new(
            config.resolver_url.clone(),
            config.resolver_timeout(),
            config.resolver_cache_ttl(),
        )?;
        let dyn_store: Arc<dyn MeasurementStore> = store.clone();

        let tracer = PathTracer::new(
            Arc::new(IcmpHopDiscovery::new(config.hop_settings())),
            Arc::new(resolver),
            dyn_store.clone(),
        );
        let runner = Arc::new(CycleRunner::new(
            dyn_store.clone(),
            Arc::new(IcmpProber::new(config.icmp_ttl)),
            tracer,
        ));
        let scheduler = Arc::new(Scheduler::new(dyn_store.clone(), runner));
        let control = MeasurementControl::new(dyn_store, scheduler.clone());

        Ok(Self {
            store,
            scheduler,
            control,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::tests::memory_store;

    #[tokio::test]
    async fn engine_wires_control_to_scheduler() {
        let store = Arc::new(memory_store().await);
        let engine = Engine::build(store, &AppConfig::default()).unwrap();

        let m = engine.control.create("192.0.2.1", 3, 10).await.unwrap();
        assert!(engine.scheduler.is_scheduled(m.id));
        assert_eq!(engine.store.list_measurements().await.unwrap().len(), 1);
        engine.scheduler.shutdown();
    }
}
