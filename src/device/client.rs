//! RouterOS API connection
//!
//! One TCP connection to a device's API service. A reader task owns the
//! read half, decodes reply sentences and routes them by `.tag` to the
//! command that issued them; the write half is shared behind a mutex so
//! one-shot commands and stream cancellation can interleave.
//!
//! Every command is tagged, including `/login`, so routing never depends
//! on reply ordering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::DeviceError;

use super::proto::{self, Command, Reply, ReplyKind};

/// Credentials for the device API login
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Reply buffer for one-shot commands
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Reply buffer for streaming commands
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// A live connection to a RouterOS device
#[derive(Clone, Debug)]
pub struct ApiConnection {
    inner: Arc<ConnInner>,
}

#[derive(Debug)]
struct ConnInner {
    host: String,
    writer: Mutex<OwnedWriteHalf>,
    routes: Mutex<HashMap<u32, mpsc::Sender<Reply>>>,
    next_tag: AtomicU32,
    shutdown: CancellationToken,
}

impl ApiConnection {
    /// Connect and log in.
    ///
    /// The TCP connect is bounded by `timeout`; login uses the post-6.43
    /// plaintext scheme. A rejected login closes the connection and maps
    /// to [`DeviceError::Login`].
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let addr = format!("{host}:{port}");
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| DeviceError::Timeout { host: host.into() })?
            .map_err(|source| DeviceError::Connect {
                host: host.into(),
                source,
            })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let inner = Arc::new(ConnInner {
            host: host.to_owned(),
            writer: Mutex::new(write_half),
            routes: Mutex::new(HashMap::new()),
            next_tag: AtomicU32::new(1),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(read_loop(read_half, Arc::clone(&inner)));

        let connection = Self { inner };
        if let Err(error) = connection.login(credentials).await {
            connection.close().await;
            return Err(error);
        }

        tracing::debug!(host, "device connection established");
        Ok(connection)
    }

    /// Host this connection points at.
    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// Whether the connection has been closed or lost.
    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), DeviceError> {
        self.command(
            "/login",
            &[
                ("name", &credentials.username),
                ("password", &credentials.password),
            ],
        )
        .await
        .map(drop)
        .map_err(|error| match error {
            DeviceError::Trap(message) | DeviceError::Fatal(message) => {
                DeviceError::Login(message)
            }
            other => other,
        })
    }

    /// Run a one-shot command, collecting data replies until `!done`.
    pub async fn command(
        &self,
        path: &str,
        attrs: &[(&str, &str)],
    ) -> Result<Vec<Reply>, DeviceError> {
        let (tag, mut rx) = self.register(COMMAND_CHANNEL_CAPACITY).await?;
        if let Err(error) = self.send(path, attrs, tag).await {
            self.unregister(tag).await;
            return Err(error);
        }

        let mut replies = Vec::new();
        let result = loop {
            let Some(reply) = rx.recv().await else {
                break Err(DeviceError::Closed);
            };
            match reply.kind {
                ReplyKind::Data => replies.push(reply),
                ReplyKind::Done => break Ok(replies),
                ReplyKind::Trap => break Err(DeviceError::Trap(reply.message())),
                ReplyKind::Fatal => break Err(DeviceError::Fatal(reply.message())),
            }
        };

        self.unregister(tag).await;
        result
    }

    /// Start a streaming command.
    ///
    /// Replies flow to the returned receiver until the command is cancelled
    /// with [`ApiConnection::cancel`] or the connection closes.
    pub async fn stream(
        &self,
        path: &str,
        attrs: &[(&str, &str)],
    ) -> Result<(u32, mpsc::Receiver<Reply>), DeviceError> {
        let (tag, rx) = self.register(STREAM_CHANNEL_CAPACITY).await?;
        if let Err(error) = self.send(path, attrs, tag).await {
            self.unregister(tag).await;
            return Err(error);
        }
        Ok((tag, rx))
    }

    /// Cancel a streaming command by tag.
    ///
    /// After this resolves the tag's route is gone; a reply racing the
    /// cancellation is dropped, never delivered late.
    pub async fn cancel(&self, tag: u32) -> Result<(), DeviceError> {
        self.unregister(tag).await;
        self.command("/cancel", &[("tag", &tag.to_string())])
            .await
            .map(drop)
    }

    /// Close the connection. Idempotent; pending commands see
    /// [`DeviceError::Closed`].
    pub async fn close(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();
        self.inner.routes.lock().await.clear();
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
        tracing::debug!(host = %self.inner.host, "device connection closed");
    }

    async fn register(&self, capacity: usize) -> Result<(u32, mpsc::Receiver<Reply>), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity);
        self.inner.routes.lock().await.insert(tag, tx);
        Ok((tag, rx))
    }

    async fn unregister(&self, tag: u32) {
        self.inner.routes.lock().await.remove(&tag);
    }

    async fn send(&self, path: &str, attrs: &[(&str, &str)], tag: u32) -> Result<(), DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::Closed);
        }
        let mut command = Command::new(path);
        for (key, value) in attrs {
            command = command.attr(key, value);
        }
        let bytes = command.tag(tag).encode();

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl ConnInner {
    async fn dispatch(&self, reply: Reply) {
        if reply.kind == ReplyKind::Fatal {
            tracing::warn!(host = %self.host, message = %reply.message(), "device sent fatal");
            let routes = std::mem::take(&mut *self.routes.lock().await);
            for tx in routes.values() {
                let _ = tx.try_send(reply.clone());
            }
            self.shutdown.cancel();
            return;
        }

        let Some(tag) = reply.tag else {
            tracing::debug!(host = %self.host, "dropping untagged reply");
            return;
        };

        let mut routes = self.routes.lock().await;
        let Some(tx) = routes.get(&tag) else {
            // cancelled or already-finished command, drop
            return;
        };
        match tx.try_send(reply) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                routes.remove(&tag);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(host = %self.host, tag, "reply buffer full, dropping");
            }
        }
    }

    async fn fail(&self) {
        self.shutdown.cancel();
        self.routes.lock().await.clear();
    }
}

async fn read_loop(read_half: OwnedReadHalf, inner: Arc<ConnInner>) {
    let mut reader = BufReader::new(read_half);
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        loop {
            match proto::decode_sentence(&mut buf) {
                Ok(Some(words)) if words.is_empty() => continue,
                Ok(Some(words)) => match Reply::parse(&words) {
                    Ok(reply) => inner.dispatch(reply).await,
                    Err(error) => {
                        tracing::debug!(host = %inner.host, error = %error, "ignoring unparseable sentence");
                    }
                },
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(host = %inner.host, error = %error, "framing error, closing");
                    inner.fail().await;
                    return;
                }
            }
        }

        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            read = reader.read_buf(&mut buf) => match read {
                Ok(0) => {
                    tracing::debug!(host = %inner.host, "device closed the connection");
                    inner.fail().await;
                    return;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!(host = %inner.host, error = %error, "read failed");
                    inner.fail().await;
                    return;
                }
            },
        }
    }
}
