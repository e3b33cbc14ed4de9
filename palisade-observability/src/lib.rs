pub mod config;
pub mod middleware;
pub mod propagation;
pub mod tracing_setup;

pub use config::{LogFormat, ObservabilityConfig};
pub use middleware::TraceLayer;
pub use propagation::{inject_trace_context, install_propagator};
pub use tracing_setup::{init_tracing, OtelGuard};
