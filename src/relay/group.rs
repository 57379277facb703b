//! Broadcast groups
//!
//! A group is a named set of sessions that receive the same sample stream.
//! Groups are created lazily on the first join and removed the moment the
//! last member leaves; an empty group never lingers.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};

use crate::device::TrafficSample;

use super::session::SessionId;

/// Identifies a broadcast group.
///
/// The observed deployment keys each group by the originating session,
/// which makes fan-out single-member. Keying by target lets every observer
/// of the same interface share one group; see [`GroupKeying`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// One group per originating session
    Session(SessionId),
    /// One group per monitored `host`/`interface` pair
    Target { host: String, interface: String },
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupKey::Session(id) => write!(f, "session:{id}"),
            GroupKey::Target { host, interface } => write!(f, "{host}/{interface}"),
        }
    }
}

/// Group keying policy, fixed at manager construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupKeying {
    /// Key by the requesting session (observed behavior, the default)
    #[default]
    PerSession,
    /// Key by monitored target, sharing fan-out between observers
    PerTarget,
}

impl GroupKeying {
    /// Compute the group key for a streaming request.
    pub fn key_for(&self, id: SessionId, host: &str, interface: &str) -> GroupKey {
        match self {
            GroupKeying::PerSession => GroupKey::Session(id),
            GroupKeying::PerTarget => GroupKey::Target {
                host: host.to_owned(),
                interface: interface.to_owned(),
            },
        }
    }
}

/// Registry of broadcast groups and their members
pub struct GroupRegistry {
    groups: RwLock<HashMap<GroupKey, Group>>,
}

struct Group {
    members: HashMap<SessionId, mpsc::Sender<TrafficSample>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: RwLock::new(HashMap::new()),
        }
    }

    /// Add a member, creating the group if absent.
    pub async fn join(&self, key: GroupKey, id: SessionId, sender: mpsc::Sender<TrafficSample>) {
        let mut groups = self.groups.write().await;
        let group = groups.entry(key.clone()).or_insert_with(|| Group {
            members: HashMap::new(),
        });
        if group.members.insert(id, sender).is_none() {
            tracing::debug!(group = %key, session = %id, members = group.members.len(), "joined group");
        }
    }

    /// Remove a member from one group, dropping the group if emptied.
    pub async fn leave(&self, key: &GroupKey, id: SessionId) {
        let mut groups = self.groups.write().await;
        if let Some(group) = groups.get_mut(key) {
            if group.members.remove(&id).is_some() {
                tracing::debug!(group = %key, session = %id, "left group");
            }
            if group.members.is_empty() {
                groups.remove(key);
            }
        }
    }

    /// Remove a member from every group it belongs to, dropping any group
    /// left empty. Safe to call for an id with no memberships.
    pub async fn leave_all(&self, id: SessionId) {
        let mut groups = self.groups.write().await;
        groups.retain(|key, group| {
            if group.members.remove(&id).is_some() && group.members.is_empty() {
                tracing::debug!(group = %key, "group emptied, removing");
                return false;
            }
            true
        });
    }

    /// Deliver a sample to every current member of a group.
    ///
    /// A member whose channel is full or closed misses this sample; the
    /// broadcast never blocks on a slow client. Returns the number of
    /// members reached.
    pub async fn broadcast(&self, key: &GroupKey, sample: TrafficSample) -> usize {
        let groups = self.groups.read().await;
        let Some(group) = groups.get(key) else {
            return 0;
        };

        let mut reached = 0;
        for (id, sender) in &group.members {
            match sender.try_send(sample) {
                Ok(()) => reached += 1,
                Err(_) => {
                    tracing::warn!(group = %key, session = %id, "member channel unavailable, dropping sample");
                }
            }
        }
        reached
    }

    /// Whether `id` is currently a member of the group.
    pub async fn is_member(&self, key: &GroupKey, id: SessionId) -> bool {
        self.groups
            .read()
            .await
            .get(key)
            .is_some_and(|group| group.members.contains_key(&id))
    }

    /// Current member count of a group (0 if the group does not exist).
    pub async fn member_count(&self, key: &GroupKey) -> usize {
        self.groups
            .read()
            .await
            .get(key)
            .map_or(0, |group| group.members.len())
    }

    /// Number of live groups.
    pub async fn group_count(&self) -> usize {
        self.groups.read().await.len()
    }
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
