// src/transport/mod.rs
mod resilient;
mod upstream;

pub use resilient::{ProxyOutcome, ResilientTransport};
pub use upstream::{HyperUpstream, TransportError, Upstream};
