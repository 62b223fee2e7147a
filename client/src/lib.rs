//! HookTunnel client library
//!
//! Registers a listener with a relay and replays delivered webhooks against
//! a local HTTP target.

pub mod config;
pub mod proxy;
pub mod tunnel;

pub use proxy::LocalDispatcher;
pub use tunnel::{DeliveryExecutor, TunnelClient};
