//! Process-wide directory of live connections and their group memberships.
//!
//! [`Registry`] is created once at application startup, shared behind an
//! `Arc`, and queried from any number of channel tasks and callbacks
//! concurrently. A single reader-writer lock guards two co-located maps: the
//! connection directory and the group index. The lock discipline is strict:
//! mutation takes the write lock, queries and broadcast snapshots take the
//! read lock, and no lock is ever held across socket I/O or user-supplied
//! predicate evaluation.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    sync::Arc,
};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::RwLock,
};
use tracing::{debug, warn};

use crate::{
    conn::Connection,
    error::{BroadcastError, RegistryError, SendError},
};

#[derive(Debug)]
struct RegistryInner<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Live connections by id. The registry holds a non-owning share; the
    /// connection's true owner is its channel task.
    connections: HashMap<String, Arc<Connection<T>>>,

    /// Group name to member connection ids. A group exists exactly while it
    /// has at least one member; every member id is also a key in
    /// `connections`.
    groups: HashMap<String, HashSet<String>>,
}

/// Payload shared across every recipient of one broadcast.
#[derive(Clone, Copy)]
enum Payload<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

/// Thread-safe directory of live connections with named-group broadcast.
///
/// ## Example
///
/// ```rust
/// use gale::registry::Registry;
/// use std::sync::Arc;
/// use tokio::net::TcpStream;
///
/// async fn notify_room(registry: &Arc<Registry<TcpStream>>) {
///     if let Err(partial) = registry.broadcast_to_group_text("room1", "hi").await {
///         tracing::warn!(error = %partial, "some members missed the update");
///     }
/// }
/// ```
#[derive(Debug)]
pub struct Registry<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    inner: RwLock<RegistryInner<T>>,
}

impl<T> Registry<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                connections: HashMap::new(),
                groups: HashMap::new(),
            }),
        }
    }

    /// Registers a connection. Called by the channel once `on_connect` has
    /// succeeded, never by application code.
    pub(crate) async fn add_connection(&self, conn: Arc<Connection<T>>) {
        let mut inner = self.inner.write().await;
        inner.connections.insert(conn.id().to_string(), conn);
    }

    /// Deregisters a connection, cascading removal out of every group it
    /// belonged to and dropping groups that become empty. No orphaned
    /// memberships survive this call.
    pub(crate) async fn remove_connection(&self, id: &str) {
        let mut inner = self.inner.write().await;
        inner.connections.remove(id);
        inner.groups.retain(|_, members| {
            members.remove(id);
            !members.is_empty()
        });
    }

    /// Adds a connection to a group, creating the group if needed.
    ///
    /// Idempotent for an existing member. Fails with
    /// [`RegistryError::ConnectionNotFound`] when the connection is not
    /// currently registered, which keeps the group index free of ids the
    /// directory does not know about.
    pub async fn join(&self, conn_id: &str, group: &str) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.connections.contains_key(conn_id) {
            return Err(RegistryError::ConnectionNotFound(conn_id.to_string()));
        }
        inner
            .groups
            .entry(group.to_string())
            .or_default()
            .insert(conn_id.to_string());
        debug!(conn_id, group, "joined group");
        Ok(())
    }

    /// Removes a connection from a group. A no-op when either the group or
    /// the membership does not exist; empty groups are pruned.
    pub async fn leave(&self, conn_id: &str, group: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.groups.get_mut(group) {
            members.remove(conn_id);
            if members.is_empty() {
                inner.groups.remove(group);
            }
        }
    }

    /// Removes a connection from every group it belongs to.
    pub async fn leave_all(&self, conn_id: &str) {
        let mut inner = self.inner.write().await;
        inner.groups.retain(|_, members| {
            members.remove(conn_id);
            !members.is_empty()
        });
    }

    /// Returns the names of the groups this connection currently belongs to.
    pub async fn groups(&self, conn_id: &str) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .groups
            .iter()
            .filter(|(_, members)| members.contains(conn_id))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Point lookup by connection id.
    pub async fn get(&self, conn_id: &str) -> Option<Arc<Connection<T>>> {
        let inner = self.inner.read().await;
        inner.connections.get(conn_id).cloned()
    }

    /// Snapshot of every live connection.
    pub async fn all(&self) -> Vec<Arc<Connection<T>>> {
        let inner = self.inner.read().await;
        inner.connections.values().cloned().collect()
    }

    /// Snapshot-then-filter over the live connections.
    ///
    /// The predicate runs outside the registry lock, so it is free to be
    /// slow or to call back into the registry.
    pub async fn filter<F>(&self, mut predicate: F) -> Vec<Arc<Connection<T>>>
    where
        F: FnMut(&Connection<T>) -> bool,
    {
        let snapshot = self.all().await;
        snapshot.into_iter().filter(|c| predicate(c)).collect()
    }

    /// Number of live connections.
    pub async fn count(&self) -> usize {
        let inner = self.inner.read().await;
        inner.connections.len()
    }

    /// Number of members in a group; zero for a group that does not exist.
    pub async fn group_count(&self, group: &str) -> usize {
        let inner = self.inner.read().await;
        inner.groups.get(group).map_or(0, HashSet::len)
    }

    /// Broadcasts a binary payload to every member of a group.
    ///
    /// Delivery is best effort and non-atomic: the member list is copied out
    /// under the read lock, the lock is released, and each recipient is
    /// written through its own write lock. A slow or stalled recipient never
    /// blocks registry mutation. Per-recipient failures are collected into a
    /// single [`BroadcastError`]; successful deliveries are not rolled back.
    pub async fn broadcast_to_group(
        &self,
        group: &str,
        bytes: &[u8],
    ) -> Result<(), BroadcastError> {
        let targets = self.group_snapshot(group).await;
        self.deliver(targets, Payload::Binary(bytes), group).await
    }

    /// Broadcasts a UTF-8 text payload to every member of a group.
    pub async fn broadcast_to_group_text(
        &self,
        group: &str,
        text: &str,
    ) -> Result<(), BroadcastError> {
        let targets = self.group_snapshot(group).await;
        self.deliver(targets, Payload::Text(text), group).await
    }

    /// Broadcasts a binary payload to every live connection.
    pub async fn broadcast_to_all(&self, bytes: &[u8]) -> Result<(), BroadcastError> {
        let targets = self.all().await;
        self.deliver(targets, Payload::Binary(bytes), "all").await
    }

    /// Broadcasts a UTF-8 text payload to every live connection.
    pub async fn broadcast_to_all_text(&self, text: &str) -> Result<(), BroadcastError> {
        let targets = self.all().await;
        self.deliver(targets, Payload::Text(text), "all").await
    }

    /// Copies out the member connections of a group under the read lock.
    async fn group_snapshot(&self, group: &str) -> Vec<Arc<Connection<T>>> {
        let inner = self.inner.read().await;
        match inner.groups.get(group) {
            Some(members) => members
                .iter()
                .filter_map(|id| inner.connections.get(id).cloned())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Writes the payload to each target, outside any registry lock.
    async fn deliver(
        &self,
        targets: Vec<Arc<Connection<T>>>,
        payload: Payload<'_>,
        label: &str,
    ) -> Result<(), BroadcastError> {
        let total = targets.len();
        let mut failures: Vec<(String, SendError)> = Vec::new();
        for conn in targets {
            let result = match payload {
                Payload::Text(text) => conn.send_text(text).await,
                Payload::Binary(bytes) => conn.send_binary(bytes.to_vec()).await,
            };
            if let Err(e) = result {
                warn!(conn_id = %conn.id(), label, error = %e, "broadcast delivery failed");
                failures.push((conn.id().to_string(), e));
            }
        }
        debug!(label, recipients = total, failed = failures.len(), "broadcast delivered");
        if failures.is_empty() {
            Ok(())
        } else {
            Err(BroadcastError {
                failed: failures.len(),
                total,
                failures,
            })
        }
    }
}

impl<T> Default for Registry<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + Debug + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
