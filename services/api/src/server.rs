use crate::cli::ServeArgs;
use crate::infra::{AppState, StaticDirectory};
use crate::routes::with_registry_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use dataspace_registry::config::AppConfig;
use dataspace_registry::error::AppError;
use dataspace_registry::registration::{
    ClaimPolicy, InMemoryParticipantStore, RegistrationService, RegistrationStateMachine,
};
use dataspace_registry::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(workers) = args.workers.take() {
        config.registration.workers = workers.max(1);
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryParticipantStore::new());
    let service = Arc::new(RegistrationService::new(
        store.clone(),
        config.registration.stall_threshold,
    ));
    let machine = Arc::new(RegistrationStateMachine::new(
        store,
        Arc::new(StaticDirectory::open()),
        Arc::new(ClaimPolicy::default()),
        config.registration.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers: Vec<_> = (0..config.registration.workers)
        .map(|worker| machine.clone().start(worker, shutdown_rx.clone()))
        .collect();

    let app = with_registry_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        workers = workers.len(),
        "dataspace registry ready"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    readiness_flag.store(false, Ordering::Release);
    if shutdown_tx.send(true).is_err() {
        warn!("registration workers already stopped");
    }
    for worker in workers {
        if let Err(err) = worker.await {
            warn!(error = %err, "registration worker ended abnormally");
        }
    }

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "unable to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "unable to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("graceful shutdown initiated");
}
