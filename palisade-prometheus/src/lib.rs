pub mod handler;
pub mod layer;
pub mod metrics;
pub mod sink;

pub use handler::metrics_handler;
pub use layer::PrometheusLayer;
pub use metrics::MetricsConfig;
pub use sink::MetricsSink;
