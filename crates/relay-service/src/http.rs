//! Control & admin HTTP surface (component L, §4.13): dev-only, unauthenticated
//! endpoints for liveness, readiness, stress injection, and shutdown.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::Readiness;
use relay_stress::BatchSynthesizer;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

pub struct AdminState {
    pub readiness: Arc<Readiness>,
    pub stress: Option<Arc<BatchSynthesizer>>,
    pub metrics_handle: PrometheusHandle,
    pub root_cancel: CancellationToken,
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/stress", post(trigger_stress))
        .route("/stop", post(request_stop))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Serialize)]
struct ReadyBody {
    leader_ready: bool,
    consumer_ready: bool,
}

async fn readyz(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let leader_ready = state.readiness.leader_ready();
    let consumer_ready = state.readiness.consumer_ready();
    let body = ReadyBody { leader_ready, consumer_ready };
    let status = if leader_ready && consumer_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(body))
}

#[derive(Serialize)]
struct StressBody {
    published: usize,
    failed: usize,
}

async fn trigger_stress(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let Some(stress) = &state.stress else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let outcome = stress.trigger_batch().await;
    Json(StressBody { published: outcome.published, failed: outcome.failed }).into_response()
}

async fn request_stop(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    tracing::info!("shutdown requested via admin surface");
    state.root_cancel.cancel();
    StatusCode::ACCEPTED
}

async fn metrics(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    state.metrics_handle.render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    fn state(stress: Option<Arc<BatchSynthesizer>>) -> Arc<AdminState> {
        Arc::new(AdminState {
            readiness: Arc::new(Readiness::new()),
            stress,
            metrics_handle: PrometheusBuilder::new().build_recorder().handle(),
            root_cancel: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn healthz_is_always_ok() {
        let app = router(state(None));
        let response = app.oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readyz_reports_unavailable_before_components_report_ready() {
        let app = router(state(None));
        let response = app.oneshot(Request::builder().uri("/readyz").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn stress_endpoint_404s_when_stress_mode_disabled() {
        let app = router(state(None));
        let response = app
            .oneshot(Request::builder().method("POST").uri("/stress").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stop_cancels_the_root_token() {
        let admin_state = state(None);
        let cancel = admin_state.root_cancel.clone();
        let app = router(admin_state);
        let response = app
            .oneshot(Request::builder().method("POST").uri("/stop").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(cancel.is_cancelled());
    }
}
