use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use courier_types::events::GatewayEvent;

/// A named logical broadcast group. Every connection auto-joins its owner's
/// `User` group; `Pair` groups are joined explicitly when a client enters a
/// conversation. The pair key is canonicalized so both participants resolve
/// the same group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    User(i64),
    Pair(i64, i64),
}

impl Group {
    pub fn pair(a: i64, b: i64) -> Self {
        if a <= b { Self::Pair(a, b) } else { Self::Pair(b, a) }
    }
}

/// Routes events to live connections. Each connection gets an unbounded
/// channel; delivery to a connection that disappeared is silently dropped
/// (no offline queueing).
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<DispatcherInner>>,
}

#[derive(Default)]
struct DispatcherInner {
    conns: HashMap<Uuid, ConnHandle>,
    groups: HashMap<Group, HashSet<Uuid>>,
}

struct ConnHandle {
    tx: mpsc::UnboundedSender<GatewayEvent>,
    memberships: HashSet<Group>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection for `user_id` and auto-joins its per-user
    /// group. Returns the connection id and the event receiver the socket
    /// loop drains.
    pub async fn register(&self, user_id: i64) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut inner = self.inner.write().await;
        let group = Group::User(user_id);
        inner.conns.insert(
            conn_id,
            ConnHandle {
                tx,
                memberships: HashSet::from([group]),
            },
        );
        inner.groups.entry(group).or_default().insert(conn_id);

        (conn_id, rx)
    }

    /// Drops a connection and every group membership it held.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut inner = self.inner.write().await;
        let Some(handle) = inner.conns.remove(&conn_id) else {
            return;
        };
        for group in handle.memberships {
            if let Some(members) = inner.groups.get_mut(&group) {
                members.remove(&conn_id);
                if members.is_empty() {
                    inner.groups.remove(&group);
                }
            }
        }
    }

    pub async fn join(&self, conn_id: Uuid, group: Group) {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;
        if let Some(handle) = inner.conns.get_mut(&conn_id) {
            handle.memberships.insert(group);
            inner.groups.entry(group).or_default().insert(conn_id);
        }
    }

    pub async fn leave(&self, conn_id: Uuid, group: Group) {
        let mut inner = self.inner.write().await;
        if let Some(handle) = inner.conns.get_mut(&conn_id) {
            handle.memberships.remove(&group);
        }
        if let Some(members) = inner.groups.get_mut(&group) {
            members.remove(&conn_id);
            if members.is_empty() {
                inner.groups.remove(&group);
            }
        }
    }

    /// Delivers an event to every connection in a group.
    pub async fn send_to_group(&self, group: Group, event: GatewayEvent) {
        let inner = self.inner.read().await;
        let Some(members) = inner.groups.get(&group) else {
            return;
        };
        for conn_id in members {
            if let Some(handle) = inner.conns.get(conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// Delivers an event to all of a user's devices.
    pub async fn send_to_user(&self, user_id: i64, event: GatewayEvent) {
        self.send_to_group(Group::User(user_id), event).await;
    }

    /// Delivers an event to every live connection. Used for presence fan-out.
    pub async fn broadcast(&self, event: GatewayEvent) {
        let inner = self.inner.read().await;
        for handle in inner.conns.values() {
            let _ = handle.tx.send(event.clone());
        }
    }
}
