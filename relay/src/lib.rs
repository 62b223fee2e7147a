//! HookTunnel Relay
//!
//! Accepts webhook deliveries on a public HTTP ingress and relays them to
//! tunnel clients over the streams those clients opened.

pub mod config;
pub mod control;
pub mod ingress;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod shutdown;
pub mod tunnel;

pub use config::RelayConfig;
pub use ingress::Ingress;
pub use relay::{LinkedStream, RelayServer};
