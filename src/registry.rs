//! Connection Registry
//!
//! Durable bookkeeping of hub memberships. Enforces the two uniqueness
//! invariants the rest of the core relies on: one hub per channel, one
//! connection per `(hub, server)`.

use crate::model::{ChannelId, Connection, HubId, ServerId};
use crate::store::{Repository, StoreError};
use std::sync::Arc;
use tracing::info;

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("channel {0} is already connected to a hub")]
    DuplicateChannel(ChannelId),

    #[error("server {server} already has a connection in hub {hub}")]
    AlreadyJoined { hub: HubId, server: ServerId },

    #[error("channel {0} is not connected to any hub")]
    NotConnected(ChannelId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Registry over the persistent connection collection.
pub struct ConnectionRegistry<S: Repository> {
    store: Arc<S>,
}

impl<S: Repository> Clone for ConnectionRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Repository> ConnectionRegistry<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Connected members of a hub, in stable iteration order for fan-out.
    /// Paused connections are excluded.
    pub async fn list_active(&self, hub: &HubId) -> RegistryResult<Vec<Connection>> {
        let all = self.store.connections_in_hub(hub).await?;
        Ok(all.into_iter().filter(|c| c.connected).collect())
    }

    /// Active connection count, exposed for announcements.
    pub async fn count_active(&self, hub: &HubId) -> RegistryResult<usize> {
        Ok(self.list_active(hub).await?.len())
    }

    pub async fn find_by_channel(&self, channel: &ChannelId) -> RegistryResult<Option<Connection>> {
        Ok(self.store.connection_by_channel(channel).await?)
    }

    pub async fn find_by_server(
        &self,
        hub: &HubId,
        server: &ServerId,
    ) -> RegistryResult<Option<Connection>> {
        Ok(self.store.connection_by_server(hub, server).await?)
    }

    /// Insert a new membership. Fails if the channel is mapped to any hub,
    /// or the server already has a connection in this hub.
    pub async fn insert(&self, connection: Connection) -> RegistryResult<()> {
        if self
            .store
            .connection_by_channel(&connection.channel_id)
            .await?
            .is_some()
        {
            return Err(RegistryError::DuplicateChannel(connection.channel_id));
        }
        if self
            .store
            .connection_by_server(&connection.hub_id, &connection.server_id)
            .await?
            .is_some()
        {
            return Err(RegistryError::AlreadyJoined {
                hub: connection.hub_id,
                server: connection.server_id,
            });
        }

        info!(
            hub = %connection.hub_id,
            server = %connection.server_id,
            channel = %connection.channel_id,
            "connection added"
        );
        self.store.insert_connection(connection).await?;
        Ok(())
    }

    /// Hard delete. Used on explicit disconnect and when a destination turns
    /// out to be unreachable during fan-out.
    pub async fn remove(&self, channel: &ChannelId) -> RegistryResult<()> {
        if !self.store.delete_connection(channel).await? {
            return Err(RegistryError::NotConnected(channel.clone()));
        }
        info!(channel = %channel, "connection removed");
        Ok(())
    }

    /// Soft pause: the membership is kept, the destination stops receiving
    /// and sending until reconnected.
    pub async fn mark_disconnected(&self, channel: &ChannelId) -> RegistryResult<()> {
        self.set_connected(channel, false).await
    }

    /// Undo a soft pause.
    pub async fn mark_connected(&self, channel: &ChannelId) -> RegistryResult<()> {
        self.set_connected(channel, true).await
    }

    async fn set_connected(&self, channel: &ChannelId, connected: bool) -> RegistryResult<()> {
        let mut connection = self
            .store
            .connection_by_channel(channel)
            .await?
            .ok_or_else(|| RegistryError::NotConnected(channel.clone()))?;
        connection.connected = connected;
        self.store.update_connection(connection).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Endpoint;
    use crate::store::MemoryStore;

    fn test_connection(hub: HubId, server: &str, channel: &str) -> Connection {
        Connection {
            hub_id: hub,
            server_id: ServerId(server.to_string()),
            channel_id: ChannelId(channel.to_string()),
            endpoint: Endpoint(format!("endpoint://{channel}")),
            connected: true,
            compact_mode: false,
            profanity_filter: true,
            parent_id: None,
        }
    }

    fn registry() -> ConnectionRegistry<MemoryStore> {
        ConnectionRegistry::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_insert_and_list_active() {
        let registry = registry();
        let hub = HubId::new();
        registry.insert(test_connection(hub, "s1", "c1")).await.unwrap();
        registry.insert(test_connection(hub, "s2", "c2")).await.unwrap();

        assert_eq!(registry.count_active(&hub).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_channel_unique_across_hubs() {
        let registry = registry();
        let hub_a = HubId::new();
        let hub_b = HubId::new();
        registry.insert(test_connection(hub_a, "s1", "c1")).await.unwrap();

        let err = registry
            .insert(test_connection(hub_b, "s2", "c1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateChannel(_)));
    }

    #[tokio::test]
    async fn test_server_unique_within_hub() {
        let registry = registry();
        let hub = HubId::new();
        registry.insert(test_connection(hub, "s1", "c1")).await.unwrap();

        let err = registry
            .insert(test_connection(hub, "s1", "c2"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyJoined { .. }));

        // same server may join a different hub
        registry
            .insert(test_connection(HubId::new(), "s1", "c2"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_pause_excludes_from_active_but_keeps_membership() {
        let registry = registry();
        let hub = HubId::new();
        let channel = ChannelId("c1".into());
        registry.insert(test_connection(hub, "s1", "c1")).await.unwrap();

        registry.mark_disconnected(&channel).await.unwrap();
        assert_eq!(registry.count_active(&hub).await.unwrap(), 0);
        assert!(registry.find_by_channel(&channel).await.unwrap().is_some());

        registry.mark_connected(&channel).await.unwrap();
        assert_eq!(registry.count_active(&hub).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove_unknown_channel_errors() {
        let registry = registry();
        let err = registry.remove(&ChannelId("nope".into())).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotConnected(_)));
    }
}
