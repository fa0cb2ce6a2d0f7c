//! Prometheus metrics for the stream gate and the sync engine
//!
//! Everything registers into [`REGISTRY`], exposed by the `/metrics` endpoint.

use prometheus::{
    register_counter_vec_with_registry, register_histogram_vec_with_registry,
    register_int_gauge_with_registry, CounterVec, Encoder, HistogramVec, IntGauge, Registry,
    TextEncoder,
};

/// Global metrics registry
pub static REGISTRY: std::sync::LazyLock<Registry> = std::sync::LazyLock::new(Registry::new);

/// HTTP request duration histogram
pub static HTTP_REQUEST_DURATION: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
    register_histogram_vec_with_registry!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["endpoint", "method", "status"],
        REGISTRY.clone()
    )
    .expect("Failed to register HTTP_REQUEST_DURATION")
});

/// Stream tokens and delivery gate
pub mod stream {
    use super::{
        register_counter_vec_with_registry, register_int_gauge_with_registry, CounterVec,
        IntGauge, REGISTRY,
    };

    /// Tokens issued, by quality
    pub static TOKENS_ISSUED: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "stream_tokens_issued_total",
            "Total number of stream tokens issued",
            &["quality"],
            REGISTRY.clone()
        )
        .expect("Failed to register TOKENS_ISSUED")
    });

    /// Validation outcomes: ok, expired, bad_signature
    pub static TOKEN_VALIDATIONS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "stream_token_validations_total",
            "Total number of stream token validations",
            &["outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register TOKEN_VALIDATIONS")
    });

    /// Responses by status class: full, partial, unsatisfiable
    pub static RESPONSES: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "stream_responses_total",
            "Total number of delivery gate responses",
            &["kind"],
            REGISTRY.clone()
        )
        .expect("Failed to register RESPONSES")
    });

    pub static ACTIVE_STREAMS: std::sync::LazyLock<IntGauge> = std::sync::LazyLock::new(|| {
        register_int_gauge_with_registry!(
            "stream_active_transfers",
            "Current number of in-flight media transfers",
            REGISTRY.clone()
        )
        .expect("Failed to register ACTIVE_STREAMS")
    });
}

/// Replica reconciliation, fan-out and conflicts
pub mod sync {
    use super::{
        register_counter_vec_with_registry, register_histogram_vec_with_registry, CounterVec,
        HistogramVec, REGISTRY,
    };

    /// Reconcile outcomes: completed, failed
    pub static RECONCILIATIONS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "sync_reconciliations_total",
            "Total number of replica reconciliations",
            &["outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register RECONCILIATIONS")
    });

    pub static RECONCILE_LATENCY: std::sync::LazyLock<HistogramVec> = std::sync::LazyLock::new(|| {
        register_histogram_vec_with_registry!(
            "sync_reconcile_latency_seconds",
            "Replica reconciliation latency in seconds",
            &["platform"],
            REGISTRY.clone()
        )
        .expect("Failed to register RECONCILE_LATENCY")
    });

    /// Propagation results per kind (position, play_state, quality, ui) and outcome
    pub static PROPAGATIONS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "sync_propagations_total",
            "Total number of peer replica updates from propagation",
            &["kind", "outcome"],
            REGISTRY.clone()
        )
        .expect("Failed to register PROPAGATIONS")
    });

    /// Conflict events: detected, resolved
    pub static CONFLICTS: std::sync::LazyLock<CounterVec> = std::sync::LazyLock::new(|| {
        register_counter_vec_with_registry!(
            "sync_conflicts_total",
            "Total number of replica conflict events",
            &["event"],
            REGISTRY.clone()
        )
        .expect("Failed to register CONFLICTS")
    });
}

/// Expose metrics in Prometheus format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|_| prometheus::Error::Msg("Invalid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        HTTP_REQUEST_DURATION
            .with_label_values(&["test", "get", "200"])
            .observe(0.1);
        sync::RECONCILIATIONS.with_label_values(&["completed"]).inc();
        stream::TOKENS_ISSUED.with_label_values(&["1080p"]).inc();

        let output = gather_metrics().unwrap();
        assert!(output.contains("http_request_duration_seconds"));
        assert!(output.contains("sync_reconciliations_total"));
        assert!(output.contains("stream_tokens_issued_total"));
    }
}
