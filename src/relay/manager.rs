//! Session manager
//!
//! Owns the mapping from session identity to connection state and mediates
//! every state transition: connect, start-streaming, disconnect. All
//! shared state lives in this one object, constructed per process and
//! passed around by `Arc`, so tests get a fresh world each time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::device::{DeviceConnector, TrafficSample};

use super::group::{GroupKey, GroupKeying, GroupRegistry};
use super::session::{Session, SessionId};
use super::subscription::{StreamTarget, Subscription};
use super::RelayError;

/// Tracks sessions, their subscriptions and broadcast-group membership.
pub struct SessionManager {
    connector: Arc<dyn DeviceConnector>,
    sessions: RwLock<HashMap<SessionId, Session>>,
    groups: Arc<GroupRegistry>,
    keying: GroupKeying,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Create a manager with the default (per-session) group keying.
    pub fn new(connector: Arc<dyn DeviceConnector>) -> Self {
        Self::with_keying(connector, GroupKeying::default())
    }

    /// Create a manager with an explicit group keying policy.
    pub fn with_keying(connector: Arc<dyn DeviceConnector>, keying: GroupKeying) -> Self {
        Self {
            connector,
            sessions: RwLock::new(HashMap::new()),
            groups: Arc::new(GroupRegistry::new()),
            keying,
            next_id: AtomicU64::new(1),
        }
    }

    /// The broadcast-group registry.
    pub fn groups(&self) -> &Arc<GroupRegistry> {
        &self.groups
    }

    /// Number of connected sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Register a newly connected client and allocate its identity.
    pub async fn register(&self, outbound: mpsc::Sender<TrafficSample>) -> SessionId {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().await.insert(id, Session::new(outbound));
        tracing::info!(session = %id, "session connected");
        id
    }

    /// Begin streaming traffic for `interface` on `host` to the session's
    /// broadcast group.
    ///
    /// Replaces any prior subscription, releasing its resources first. On
    /// failure the session is left without a subscription and nothing is
    /// leaked; the attempt is not retried.
    pub async fn start_streaming(
        &self,
        id: SessionId,
        host: &str,
        interface: &str,
    ) -> Result<(), RelayError> {
        if host.is_empty() || interface.is_empty() {
            return Err(RelayError::EmptyTarget);
        }
        let key = self.keying.key_for(id, host, interface);

        let (outbound, prior) = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.get_mut(&id).ok_or(RelayError::UnknownSession(id))?;
            (session.outbound.clone(), session.subscription.take())
        };

        if let Some(prior) = prior {
            self.retire(id, prior, Some(&key)).await;
        }

        self.groups.join(key.clone(), id, outbound).await;

        let mut device = match self.connector.connect(host).await {
            Ok(device) => device,
            Err(error) => {
                tracing::warn!(session = %id, host, error = %error, "device connection failed");
                return Err(error.into());
            }
        };

        let stream = match device.monitor_traffic(interface).await {
            Ok(stream) => stream,
            Err(error) => {
                device.close().await;
                tracing::warn!(session = %id, host, interface, error = %error, "monitor-traffic failed");
                return Err(error.into());
            }
        };

        let subscription = Subscription::start(
            device,
            stream,
            StreamTarget {
                host: host.to_owned(),
                interface: interface.to_owned(),
            },
            key.clone(),
            Arc::clone(&self.groups),
        );

        let displaced = {
            let mut sessions = self.sessions.write().await;
            match sessions.get_mut(&id) {
                Some(session) => session.subscription.replace(subscription),
                // the session disconnected while we were connecting
                None => Some(subscription),
            }
        };
        if let Some(displaced) = displaced {
            self.retire(id, displaced, Some(&key)).await;
            return Ok(());
        }

        tracing::info!(session = %id, host, interface, group = %key, "traffic streaming started");
        Ok(())
    }

    /// Tear down a session: subscription first (stream handle, then device
    /// handle), then every group membership, dropping emptied groups.
    ///
    /// Idempotent; a second call finds nothing to release.
    pub async fn disconnect(&self, id: SessionId) {
        let session = self.sessions.write().await.remove(&id);
        let Some(mut session) = session else {
            self.groups.leave_all(id).await;
            return;
        };

        if let Some(mut subscription) = session.subscription.take() {
            tracing::debug!(session = %id, target = %subscription.target(), "closing subscription");
            subscription.shutdown().await;
        }
        self.groups.leave_all(id).await;
        tracing::info!(session = %id, "session disconnected");
    }

    /// Shut down a subscription and drop its group membership unless the
    /// session is staying in that group (`keep` matches).
    async fn retire(&self, id: SessionId, mut subscription: Subscription, keep: Option<&GroupKey>) {
        tracing::debug!(session = %id, target = %subscription.target(), "replacing subscription");
        let leave = keep != Some(subscription.group());
        let group = subscription.group().clone();
        subscription.shutdown().await;
        if leave {
            self.groups.leave(&group, id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use crate::device::{
        DeviceSession, InterfaceRecord, ResourceSnapshot, StreamControl, TrafficStream,
    };
    use crate::error::DeviceError;

    struct MockConnector {
        log: Arc<Mutex<Vec<String>>>,
        connects: AtomicUsize,
        fail_connect: bool,
        fail_stream: bool,
        samples: Vec<TrafficSample>,
    }

    impl MockConnector {
        fn new() -> Arc<Self> {
            Self::with_samples(vec![TrafficSample {
                rx_bps: 1000,
                tx_bps: 500,
            }])
        }

        fn with_samples(samples: Vec<TrafficSample>) -> Arc<Self> {
            Arc::new(Self {
                log: Arc::new(Mutex::new(Vec::new())),
                connects: AtomicUsize::new(0),
                fail_connect: false,
                fail_stream: false,
                samples,
            })
        }

        fn failing_connect() -> Arc<Self> {
            Arc::new(Self {
                log: Arc::new(Mutex::new(Vec::new())),
                connects: AtomicUsize::new(0),
                fail_connect: true,
                fail_stream: false,
                samples: Vec::new(),
            })
        }

        fn failing_stream() -> Arc<Self> {
            Arc::new(Self {
                log: Arc::new(Mutex::new(Vec::new())),
                connects: AtomicUsize::new(0),
                fail_connect: false,
                fail_stream: true,
                samples: Vec::new(),
            })
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn count(&self, entry: &str) -> usize {
            self.log().iter().filter(|e| *e == entry).count()
        }
    }

    #[async_trait]
    impl DeviceConnector for MockConnector {
        async fn connect(&self, host: &str) -> Result<Box<dyn DeviceSession>, DeviceError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("connect:{host}"));
            if self.fail_connect {
                return Err(DeviceError::Timeout { host: host.into() });
            }
            Ok(Box::new(MockSession {
                log: Arc::clone(&self.log),
                fail_stream: self.fail_stream,
                samples: self.samples.clone(),
            }))
        }
    }

    struct MockSession {
        log: Arc<Mutex<Vec<String>>>,
        fail_stream: bool,
        samples: Vec<TrafficSample>,
    }

    #[async_trait]
    impl DeviceSession for MockSession {
        async fn list_interfaces(&mut self) -> Result<Vec<InterfaceRecord>, DeviceError> {
            unimplemented!("not used by manager tests")
        }

        async fn system_resources(&mut self) -> Result<ResourceSnapshot, DeviceError> {
            unimplemented!("not used by manager tests")
        }

        async fn monitor_traffic(&mut self, interface: &str) -> Result<TrafficStream, DeviceError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("stream.open:{interface}"));
            if self.fail_stream {
                return Err(DeviceError::Trap("unknown interface".into()));
            }
            let (tx, rx) = mpsc::channel(8);
            for sample in &self.samples {
                tx.try_send(*sample).unwrap();
            }
            Ok(TrafficStream {
                samples: rx,
                control: Box::new(MockControl {
                    log: Arc::clone(&self.log),
                    sample_tx: Some(tx),
                }),
            })
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().push("device.close".into());
        }
    }

    struct MockControl {
        log: Arc<Mutex<Vec<String>>>,
        sample_tx: Option<mpsc::Sender<TrafficSample>>,
    }

    #[async_trait]
    impl StreamControl for MockControl {
        async fn close(&mut self) {
            self.log.lock().unwrap().push("stream.close".into());
            self.sample_tx.take();
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<TrafficSample>) -> TrafficSample {
        timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for sample")
            .expect("sample channel closed")
    }

    #[tokio::test]
    async fn test_streaming_scenario() {
        let mock = MockConnector::new();
        let manager = SessionManager::new(mock.clone());

        let (tx, mut rx) = mpsc::channel(8);
        let id = manager.register(tx).await;

        manager
            .start_streaming(id, "10.0.0.1", "ether1")
            .await
            .unwrap();

        let sample = recv(&mut rx).await;
        assert_eq!(sample.rx_bps, 1000);
        assert_eq!(sample.tx_bps, 500);

        manager.disconnect(id).await;

        assert_eq!(
            mock.log(),
            vec![
                "connect:10.0.0.1",
                "stream.open:ether1",
                "stream.close",
                "device.close",
            ]
        );
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(manager.groups().group_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let mock = MockConnector::new();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;
        manager
            .start_streaming(id, "10.0.0.1", "ether1")
            .await
            .unwrap();

        manager.disconnect(id).await;
        manager.disconnect(id).await;

        assert_eq!(mock.count("stream.close"), 1);
        assert_eq!(mock.count("device.close"), 1);
    }

    #[tokio::test]
    async fn test_restart_replaces_prior_subscription() {
        let mock = MockConnector::new();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;

        manager
            .start_streaming(id, "10.0.0.1", "ether1")
            .await
            .unwrap();
        manager
            .start_streaming(id, "10.0.0.1", "ether2")
            .await
            .unwrap();

        // the prior stream and device were released before the new connect
        assert_eq!(
            mock.log(),
            vec![
                "connect:10.0.0.1",
                "stream.open:ether1",
                "stream.close",
                "device.close",
                "connect:10.0.0.1",
                "stream.open:ether2",
            ]
        );

        manager.disconnect(id).await;
        assert_eq!(mock.count("stream.close"), 2);
        assert_eq!(mock.count("device.close"), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_no_subscription() {
        let mock = MockConnector::failing_connect();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;

        let result = manager.start_streaming(id, "10.0.0.1", "ether1").await;
        assert!(matches!(result, Err(RelayError::Device(_))));

        // group membership is kept (matching the observed behavior); the
        // failed attempt opened nothing, so there is nothing to close
        let key = GroupKey::Session(id);
        assert!(manager.groups().is_member(&key, id).await);
        assert_eq!(mock.log(), vec!["connect:10.0.0.1"]);

        // a later disconnect has nothing extra to release
        manager.disconnect(id).await;
        assert_eq!(mock.count("stream.close"), 0);
        assert_eq!(mock.count("device.close"), 0);
        assert_eq!(manager.groups().group_count().await, 0);
    }

    #[tokio::test]
    async fn test_stream_failure_closes_device() {
        let mock = MockConnector::failing_stream();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;

        let result = manager.start_streaming(id, "10.0.0.1", "ether1").await;
        assert!(matches!(result, Err(RelayError::Device(_))));

        // the freshly opened connection is closed, not leaked
        assert_eq!(
            mock.log(),
            vec!["connect:10.0.0.1", "stream.open:ether1", "device.close"]
        );
    }

    #[tokio::test]
    async fn test_rejects_unknown_session_and_empty_target() {
        let mock = MockConnector::new();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;

        let unknown = SessionId::new(999);
        assert!(matches!(
            manager.start_streaming(unknown, "10.0.0.1", "ether1").await,
            Err(RelayError::UnknownSession(_))
        ));
        assert!(matches!(
            manager.start_streaming(id, "", "ether1").await,
            Err(RelayError::EmptyTarget)
        ));
        assert!(matches!(
            manager.start_streaming(id, "10.0.0.1", "").await,
            Err(RelayError::EmptyTarget)
        ));

        // validation happens before any device I/O
        assert_eq!(mock.connects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_per_target_keying_shares_fanout() {
        let mock = MockConnector::new();
        let manager = SessionManager::with_keying(mock.clone(), GroupKeying::PerTarget);

        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        let s1 = manager.register(tx1).await;
        let s2 = manager.register(tx2.clone()).await;

        // second observer of the same target joins the group directly
        let key = GroupKeying::PerTarget.key_for(s1, "10.0.0.1", "ether1");
        manager.groups().join(key.clone(), s2, tx2).await;

        manager
            .start_streaming(s1, "10.0.0.1", "ether1")
            .await
            .unwrap();

        assert_eq!(recv(&mut rx1).await.rx_bps, 1000);
        assert_eq!(recv(&mut rx2).await.rx_bps, 1000);

        // co-observer keeps the group alive after the originator leaves
        manager.disconnect(s1).await;
        assert_eq!(manager.groups().member_count(&key).await, 1);

        manager.disconnect(s2).await;
        assert_eq!(manager.groups().group_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_without_streaming() {
        let mock = MockConnector::new();
        let manager = SessionManager::new(mock.clone());

        let (tx, _rx) = mpsc::channel(8);
        let id = manager.register(tx).await;
        manager.disconnect(id).await;

        assert!(mock.log().is_empty());
        assert_eq!(manager.session_count().await, 0);
    }
}
