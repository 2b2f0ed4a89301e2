//! Prometheus metrics endpoint.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Renders every recorded metric in Prometheus text format. The router
/// gives this route the `PrometheusHandle` as its own state.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("conf_joins_total", "outcome" => "joined").increment(1);
        });

        let body = metrics_handler(State(handle)).await;
        assert!(body.contains("conf_joins_total"));
    }
}
