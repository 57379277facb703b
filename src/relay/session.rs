//! Session identity and per-connection state

use tokio::sync::mpsc;

use crate::device::TrafficSample;

use super::subscription::Subscription;

/// Opaque identifier for one real-time connection.
///
/// Assigned at connection time, stable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State for one connected client
pub(super) struct Session {
    /// Outbound sample channel to the client's write task
    pub outbound: mpsc::Sender<TrafficSample>,

    /// At most one active subscription, exclusively owned
    pub subscription: Option<Subscription>,
}

impl Session {
    pub(super) fn new(outbound: mpsc::Sender<TrafficSample>) -> Self {
        Self {
            outbound,
            subscription: None,
        }
    }
}
