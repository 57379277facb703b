//! Active streaming subscription
//!
//! A subscription owns one device connection, the stream control for its
//! `monitor-traffic` command, and the pump task that forwards samples to
//! the owning broadcast group. Teardown releases everything exactly once,
//! in a fixed order: cancel delivery, close the stream, close the device.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::{DeviceSession, StreamControl, TrafficSample, TrafficStream};

use super::group::{GroupKey, GroupRegistry};

/// The device and interface a subscription monitors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub host: String,
    pub interface: String,
}

impl std::fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.host, self.interface)
    }
}

/// One open streaming command against one device interface
pub struct Subscription {
    target: StreamTarget,
    group: GroupKey,
    device: Option<Box<dyn DeviceSession>>,
    control: Option<Box<dyn StreamControl>>,
    pump: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Subscription {
    /// Take ownership of a device session and its traffic stream and start
    /// pumping samples into the owning group.
    pub(super) fn start(
        device: Box<dyn DeviceSession>,
        stream: TrafficStream,
        target: StreamTarget,
        group: GroupKey,
        groups: Arc<GroupRegistry>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_samples(
            stream.samples,
            groups,
            group.clone(),
            cancel.clone(),
        ));

        Self {
            target,
            group,
            device: Some(device),
            control: Some(stream.control),
            pump: Some(pump),
            cancel,
        }
    }

    /// The group receiving this subscription's samples.
    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    /// The monitored target.
    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    /// Release everything this subscription owns. Idempotent.
    ///
    /// Order matters: delivery is cancelled and the stream closed before
    /// the device connection is severed, so no sample can arrive once the
    /// caller proceeds to group-membership cleanup.
    pub(super) async fn shutdown(&mut self) {
        self.cancel.cancel();
        if let Some(mut control) = self.control.take() {
            control.close().await;
        }
        if let Some(mut device) = self.device.take() {
            device.close().await;
        }
        if let Some(pump) = self.pump.take() {
            let _ = pump.await;
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // backstop for a subscription dropped without shutdown: stop
        // delivery immediately; handle release stays on the explicit path
        self.cancel.cancel();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

async fn pump_samples(
    mut samples: mpsc::Receiver<TrafficSample>,
    groups: Arc<GroupRegistry>,
    group: GroupKey,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            sample = samples.recv() => {
                let Some(sample) = sample else { break };
                // a sample racing the close is dropped, never delivered
                if cancel.is_cancelled() {
                    break;
                }
                groups.broadcast(&group, sample).await;
            }
        }
    }
}
