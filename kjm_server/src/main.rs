use std::{error::Error, sync::Arc};

use kjm_lib::{
    build_loops,
    cluster::ClusterWorkloadClient,
    config::{BackendKind, EngineConfig},
    kube_client::KubeWorkloadClient,
    memory_cluster::InMemoryCluster,
    scheduler::ReconciliationScheduler,
    service::JobService,
    store::{JobRecordStore, MemoryJobStore},
};
use rocket::figment::Figment;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[macro_use]
extern crate rocket;

mod routes;

/// the `engine` table of the rocket config, defaults when it is absent
fn engine_config(figment: &Figment) -> Result<EngineConfig, rocket::figment::Error> {
    match figment.extract_inner::<EngineConfig>("engine") {
        Ok(config) => Ok(config),
        Err(err) if err.missing() => {
            info!("no engine configuration found, using defaults");
            Ok(EngineConfig::default())
        }
        Err(err) => Err(err),
    }
}

async fn cluster_client(
    config: &EngineConfig,
) -> Result<Arc<dyn ClusterWorkloadClient>, Box<dyn Error>> {
    let cluster: Arc<dyn ClusterWorkloadClient> = match config.backend {
        BackendKind::Kubernetes => Arc::new(KubeWorkloadClient::connect().await?),
        BackendKind::Memory => {
            warn!("using the in-memory cluster, no workloads will be executed");
            Arc::new(InMemoryCluster::new())
        }
    };
    Ok(cluster)
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let rocket = rocket::build();
    let config = engine_config(rocket.figment())?;
    config.validate()?;
    let config = Arc::new(config);
    info!(backend = ?config.backend, namespace = %config.namespace, "starting job manager");

    let store: Arc<dyn JobRecordStore> = Arc::new(MemoryJobStore::new());
    let cluster = cluster_client(&config).await?;

    let scheduler =
        ReconciliationScheduler::start(build_loops(store.clone(), cluster.clone(), config.clone()));
    let service = JobService::new(store, cluster, config);
    let launched = routes::mount(rocket, service).launch().await;

    scheduler.shutdown().await;
    launched?;
    Ok(())
}

#[cfg(test)]
mod test {
    use kjm_lib::config::BackendKind;
    use rocket::figment::{providers::Serialized, Figment};
    use serde::Serialize;

    use super::engine_config;

    #[derive(Serialize)]
    struct Partial {
        backend: &'static str,
        namespace: &'static str,
        launch_interval_secs: u64,
    }

    #[test]
    fn test_engine_config_defaults_when_missing() {
        let config = engine_config(&Figment::new()).unwrap();
        assert_eq!(BackendKind::Kubernetes, config.backend);
        assert_eq!(30, config.launch_interval_secs);
    }

    #[test]
    fn test_engine_config_partial_table() {
        let figment = Figment::new().merge(Serialized::default(
            "engine",
            Partial {
                backend: "memory",
                namespace: "batch",
                launch_interval_secs: 5,
            },
        ));
        let config = engine_config(&figment).unwrap();
        assert_eq!(BackendKind::Memory, config.backend);
        assert_eq!("batch", config.namespace);
        assert_eq!(5, config.launch_interval_secs);
        assert_eq!(15, config.monitor_interval_secs);
    }

    #[test]
    fn test_engine_config_rejects_bad_values() {
        let figment = Figment::new().merge(Serialized::default("engine.backend", "docker"));
        assert!(engine_config(&figment).is_err());
    }
}
