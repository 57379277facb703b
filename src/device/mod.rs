//! RouterOS device client
//!
//! Everything that touches a device lives here: the API wire protocol
//! ([`proto`]), the tagged connection ([`client`]), the decoded record
//! types ([`types`]) and the trait seam the rest of the crate consumes
//! ([`connector`]).
//!
//! # Architecture
//!
//! ```text
//!            Box<dyn DeviceSession>
//!          ┌──────────────────────────┐
//!          │ ApiSession               │
//!          │   └─ ApiConnection ──────┼──► reader task ──► routes by .tag
//!          │        /interface/print  │
//!          │        monitor-traffic ──┼──► TrafficStream { samples, control }
//!          └──────────────────────────┘
//! ```
//!
//! Commands are tagged so one connection can interleave a long-running
//! `monitor-traffic` with its own `/cancel`.

pub mod client;
pub mod connector;
pub mod proto;
pub mod types;

pub use client::{ApiConnection, Credentials};
pub use connector::{
    ApiConnector, DeviceConnector, DeviceSession, StreamControl, TrafficStream,
};
pub use proto::{Command, Reply, ReplyKind};
pub use types::{InterfaceRecord, ResourceSnapshot, TrafficSample};
