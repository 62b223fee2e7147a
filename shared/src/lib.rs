//! HookTunnel Shared Library
//!
//! Wire types for the relay protocol, header folding helpers, and the
//! error taxonomy shared by the relay and the tunnel client.

pub mod error;
pub mod headers;
pub mod protocol;

pub use error::{Error, Result};
