//! Device client trait seam
//!
//! The relay core and the HTTP handlers talk to devices only through these
//! traits, so tests can substitute a scripted device that records call
//! order. [`ApiConnector`] is the production implementation over the API
//! connection.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::DeviceError;

use super::client::{ApiConnection, Credentials};
use super::proto::ReplyKind;
use super::types::{InterfaceRecord, ResourceSnapshot, TrafficSample};

/// Sample buffer between the device stream and the relay pump
const SAMPLE_CHANNEL_CAPACITY: usize = 32;

/// Opens connections to devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync + 'static {
    /// Connect and authenticate against `host`.
    async fn connect(&self, host: &str) -> Result<Box<dyn DeviceSession>, DeviceError>;
}

/// One authenticated connection to a device.
///
/// Owned exclusively by whoever opened it; `close` must be called on every
/// path, success or failure, and must be idempotent.
#[async_trait]
pub trait DeviceSession: Send + Sync + 'static {
    /// `/interface/print`: all interfaces, unfiltered.
    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceRecord>, DeviceError>;

    /// `/system/resource/print`: the single resource record.
    async fn system_resources(&mut self) -> Result<ResourceSnapshot, DeviceError>;

    /// Start `monitor-traffic` for one interface.
    async fn monitor_traffic(&mut self, interface: &str) -> Result<TrafficStream, DeviceError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// Handle for stopping a running traffic stream.
///
/// After `close` resolves no further sample is delivered; a sample in
/// flight at that moment is dropped.
#[async_trait]
pub trait StreamControl: Send + Sync + 'static {
    async fn close(&mut self);
}

/// A live traffic stream: decoded samples plus the handle that stops them.
pub struct TrafficStream {
    /// Decoded samples, in delivery order
    pub samples: mpsc::Receiver<TrafficSample>,
    /// Closing this stops delivery
    pub control: Box<dyn StreamControl>,
}

/// Production connector backed by the RouterOS API.
pub struct ApiConnector {
    credentials: Credentials,
    port: u16,
    connect_timeout: Duration,
}

impl ApiConnector {
    /// Build a connector from runtime configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            credentials: Credentials {
                username: config.api_user.clone(),
                password: config.api_password.clone(),
            },
            port: config.device_port,
            connect_timeout: config.connect_timeout,
        }
    }
}

#[async_trait]
impl DeviceConnector for ApiConnector {
    async fn connect(&self, host: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
        let conn =
            ApiConnection::connect(host, self.port, &self.credentials, self.connect_timeout)
                .await?;
        Ok(Box::new(ApiSession { conn }))
    }
}

/// [`DeviceSession`] over a live API connection.
struct ApiSession {
    conn: ApiConnection,
}

#[async_trait]
impl DeviceSession for ApiSession {
    async fn list_interfaces(&mut self) -> Result<Vec<InterfaceRecord>, DeviceError> {
        let replies = self.conn.command("/interface/print", &[]).await?;
        Ok(replies.iter().map(InterfaceRecord::from_reply).collect())
    }

    async fn system_resources(&mut self) -> Result<ResourceSnapshot, DeviceError> {
        let replies = self.conn.command("/system/resource/print", &[]).await?;
        let reply = replies
            .first()
            .ok_or_else(|| DeviceError::Protocol("empty resource reply".into()))?;
        Ok(ResourceSnapshot::from_reply(reply))
    }

    async fn monitor_traffic(&mut self, interface: &str) -> Result<TrafficStream, DeviceError> {
        let (tag, mut replies) = self
            .conn
            .stream("/interface/monitor-traffic", &[("interface", interface)])
            .await?;

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let host = self.conn.host().to_owned();
        let interface = interface.to_owned();
        let adapter_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = adapter_cancel.cancelled() => break,
                    reply = replies.recv() => {
                        let Some(reply) = reply else { break };
                        match reply.kind {
                            ReplyKind::Data => {
                                if adapter_cancel.is_cancelled() {
                                    break;
                                }
                                let sample = TrafficSample::from_reply(&reply);
                                if sample_tx.send(sample).await.is_err() {
                                    break;
                                }
                            }
                            // trap here means the stream was interrupted or the
                            // interface vanished; either way delivery is over
                            ReplyKind::Trap | ReplyKind::Fatal => {
                                tracing::debug!(host = %host, interface = %interface, message = %reply.message(), "traffic stream ended");
                                break;
                            }
                            ReplyKind::Done => break,
                        }
                    }
                }
            }
        });

        Ok(TrafficStream {
            samples: sample_rx,
            control: Box::new(ApiStreamControl {
                conn: self.conn.clone(),
                tag,
                cancel,
                closed: false,
            }),
        })
    }

    async fn close(&mut self) {
        self.conn.close().await;
    }
}

/// Stops a `monitor-traffic` command: cancels local delivery first, then
/// tells the device to stop sending.
struct ApiStreamControl {
    conn: ApiConnection,
    tag: u32,
    cancel: CancellationToken,
    closed: bool,
}

#[async_trait]
impl StreamControl for ApiStreamControl {
    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        if let Err(error) = self.conn.cancel(self.tag).await {
            tracing::debug!(host = %self.conn.host(), tag = self.tag, error = %error, "stream cancel failed");
        }
    }
}
