// Module: observability
// HTTP request metrics recorded into the playsync-core registry

pub mod metrics_middleware;

pub use metrics_middleware::metrics_layer;
