//! Backstream relay
//!
//! The public half of the tunnel. Ordinary HTTP callers are forwarded through
//! the [`hub::Hub`] to every connected agent; agents connect over WebSocket
//! (marked by the `Backstream-Client` header) and stream replies back.

pub mod config;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod policy;

pub use config::{Args, Config, LogFormat};
pub use error::RelayError;
pub use handlers::{AppState, build_router, serve};
pub use hub::{AgentQueue, Hub};
pub use policy::{AuthPolicy, PolicyError, PolicyInput, PolicyOutput, RulePolicy};
