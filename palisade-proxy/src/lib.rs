pub mod dispatch;
pub mod route;
pub mod upstream;

pub use dispatch::{dispatch, forward_headers};
pub use route::{Route, RouteTable};
pub use upstream::Upstream;
