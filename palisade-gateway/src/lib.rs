pub mod admin;
pub mod admission;
pub mod handler;
pub mod server;
pub mod state;

pub use server::{build_router, run};
pub use state::{GatewayState, SharedState, UpstreamRuntime};
