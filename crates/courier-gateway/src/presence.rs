use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

/// Result of removing a connection: who owned it and how many of their
/// devices remain. `remaining == 0` means the user just went offline and the
/// caller should stamp `last_seen`.
#[derive(Debug, Clone, Copy)]
pub struct Departure {
    pub user_id: i64,
    pub remaining: usize,
}

/// Tracks which users are online and with how many devices. Purely
/// process-local and ephemeral; nothing here survives a restart. All methods
/// take the single registry lock, so register/unregister/is_online are
/// linearizable with respect to each other.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<RwLock<PresenceInner>>,
}

#[derive(Default)]
struct PresenceInner {
    /// user_id -> live connection ids (one per device)
    devices: HashMap<i64, HashSet<Uuid>>,
    /// connection id -> owning user
    owners: HashMap<Uuid, i64>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the user's device set. Returns the device count
    /// after registration; 1 means the user just came online.
    pub async fn register(&self, user_id: i64, conn_id: Uuid) -> usize {
        let mut inner = self.inner.write().await;
        inner.owners.insert(conn_id, user_id);
        let devices = inner.devices.entry(user_id).or_default();
        devices.insert(conn_id);
        devices.len()
    }

    /// Removes a connection from its owner's device set.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<Departure> {
        let mut inner = self.inner.write().await;
        let user_id = inner.owners.remove(&conn_id)?;

        let remaining = match inner.devices.get_mut(&user_id) {
            Some(devices) => {
                devices.remove(&conn_id);
                devices.len()
            }
            None => 0,
        };
        if remaining == 0 {
            inner.devices.remove(&user_id);
        }

        Some(Departure { user_id, remaining })
    }

    pub async fn is_online(&self, user_id: i64) -> bool {
        self.inner.read().await.devices.contains_key(&user_id)
    }

    pub async fn device_count(&self, user_id: i64) -> usize {
        self.inner
            .read()
            .await
            .devices
            .get(&user_id)
            .map_or(0, |d| d.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_device_brings_user_online() {
        let presence = PresenceRegistry::new();
        assert!(!presence.is_online(1).await);

        let count = presence.register(1, Uuid::new_v4()).await;
        assert_eq!(count, 1);
        assert!(presence.is_online(1).await);
    }

    #[tokio::test]
    async fn user_stays_online_until_last_device_leaves() {
        let presence = PresenceRegistry::new();
        let phone = Uuid::new_v4();
        let laptop = Uuid::new_v4();
        presence.register(7, phone).await;
        assert_eq!(presence.register(7, laptop).await, 2);

        let departure = presence.unregister(phone).await.expect("known conn");
        assert_eq!(departure.user_id, 7);
        assert_eq!(departure.remaining, 1);
        assert!(presence.is_online(7).await);
        assert_eq!(presence.device_count(7).await, 1);

        let departure = presence.unregister(laptop).await.expect("known conn");
        assert_eq!(departure.remaining, 0);
        assert!(!presence.is_online(7).await);
        assert_eq!(presence.device_count(7).await, 0);
    }

    #[tokio::test]
    async fn unknown_connection_is_ignored() {
        let presence = PresenceRegistry::new();
        assert!(presence.unregister(Uuid::new_v4()).await.is_none());
    }
}
