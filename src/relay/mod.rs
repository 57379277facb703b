//! Subscription session relay
//!
//! The core of the service: maps each authenticated real-time connection
//! to at most one upstream telemetry stream and fans decoded samples out
//! to the connection's broadcast group.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<SessionManager>
//!                  ┌──────────────────────────┐
//!                  │ sessions: id → Session   │
//!                  │ groups: GroupRegistry    │
//!                  └───────────┬──────────────┘
//!                              │ start_streaming
//!                              ▼
//!                    Subscription (per session)
//!                device ── monitor-traffic ── pump
//!                              │
//!                              ▼ broadcast(group)
//!              ┌───────────────┼───────────────┐
//!              ▼               ▼               ▼
//!         [member ws]     [member ws]     [member ws]
//! ```
//!
//! Teardown ordering is the load-bearing invariant: a subscription's
//! stream handle closes before its device handle, and both before the
//! session's group memberships are removed, so a sample can never reach a
//! session that is already gone.

pub mod group;
pub mod manager;
pub mod session;
pub mod subscription;

use thiserror::Error;

use crate::error::DeviceError;

pub use group::{GroupKey, GroupKeying, GroupRegistry};
pub use manager::SessionManager;
pub use session::SessionId;
pub use subscription::{StreamTarget, Subscription};

/// Errors from relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// The session is not currently connected
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    /// Host or interface was empty
    #[error("host and interface must be non-empty")]
    EmptyTarget,

    /// The device connection or streaming command failed
    #[error(transparent)]
    Device(#[from] DeviceError),
}
