//
// src/proxy/mod.rs
//
pub mod director;
mod endpoint;
mod error;
mod gateway;
mod route;
mod tunnel;

pub use endpoint::GatewayProxy;
pub use error::{ErrorEnvelope, GatewayError, BAD_GATEWAY_MESSAGE, SERVICE_UNAVAILABLE_MESSAGE};
pub use gateway::Gateway;
pub use route::ServiceRoute;
