//! Prometheus exposition on the app router. The recorder itself is
//! installed once at startup; this handler renders whatever it has
//! accumulated.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::OnceCell;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Publish the recorder handle; later calls are ignored.
pub fn set_prometheus_handle(handle: PrometheusHandle) {
    let _ = PROMETHEUS.set(handle);
}

pub async fn metrics_handler() -> impl IntoResponse {
    match PROMETHEUS.get() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::SERVICE_UNAVAILABLE, String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::response::Response;

    async fn status_of(response: Response) -> StatusCode {
        let status = response.status();
        let _ = to_bytes(response.into_body(), usize::MAX).await;
        status
    }

    #[tokio::test]
    async fn test_renders_once_handle_is_set() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        set_prometheus_handle(recorder.handle());

        let response = metrics_handler().await.into_response();
        assert_eq!(status_of(response).await, StatusCode::OK);
    }
}
