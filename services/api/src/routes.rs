use crate::infra::AppState;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use dataspace_registry::registration::{registry_router, ParticipantStore, RegistrationService};
use serde_json::json;
use std::sync::Arc;

pub(crate) fn with_registry_routes<S>(service: Arc<RegistrationService<S>>) -> axum::Router
where
    S: ParticipantStore + 'static,
{
    registry_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Acquire);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use dataspace_registry::registration::InMemoryParticipantStore;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(ready: bool) -> (axum::Router, Arc<AtomicBool>) {
        let readiness = Arc::new(AtomicBool::new(ready));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let service = Arc::new(RegistrationService::new(
            Arc::new(InMemoryParticipantStore::new()),
            Duration::from_secs(900),
        ));
        (
            with_registry_routes(service).layer(Extension(state)),
            readiness,
        )
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request builds")
    }

    #[tokio::test]
    async fn health_is_always_ok() {
        let (router, _) = app(false);
        let response = router.oneshot(get("/health")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_the_flag() {
        let (router, readiness) = app(false);
        let response = router
            .clone()
            .oneshot(get("/ready"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.store(true, Ordering::Release);
        let response = router.oneshot(get("/ready")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn registry_routes_are_mounted() {
        let (router, _) = app(true);
        let response = router
            .clone()
            .oneshot(
                Request::post("/api/v1/registry/participants")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"did":"did:example:alice"}"#))
                    .expect("request builds"),
            )
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let listed = router
            .oneshot(get("/api/v1/registry/participants"))
            .await
            .expect("route executes");
        assert_eq!(listed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_render_as_prometheus_text() {
        let (router, _) = app(true);
        let response = router.oneshot(get("/metrics")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some("text/plain; version=0.0.4".as_bytes())
        );
    }
}
