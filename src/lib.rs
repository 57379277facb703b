//! MikroTik RouterOS traffic telemetry relay
//!
//! Streams live interface traffic counters from RouterOS devices to
//! browser clients over WebSocket, and exposes a small token-gated HTTP
//! surface for interface and resource queries.
//!
//! # Architecture
//!
//! ```text
//!   browser ──ws──► server::ws ──► relay::SessionManager
//!                                        │
//!                                        ▼
//!                                  Subscription ──► device (API) ──► router
//!                                        │
//!                    group broadcast ◄───┘
//!
//!   browser ──GET /interfaces──► server::http ──► device (API) ──► router
//! ```
//!
//! Each WebSocket session owns at most one upstream subscription; samples
//! fan out to the session's broadcast group and everything the session
//! owns is released exactly once on disconnect. The HTTP handlers open a
//! device connection per request and always close it, success or failure.

pub mod config;
pub mod device;
pub mod error;
pub mod relay;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::{GroupKeying, SessionManager};
pub use server::AppState;
