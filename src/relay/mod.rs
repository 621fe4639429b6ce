//! Relay Engine
//!
//! Fans a passed message out to every other connected destination in its
//! hub, records the resulting origin-to-copies mapping, and replays edits
//! and deletes against that mapping. Deliveries within one broadcast run
//! concurrently and are isolated from one another: a dead destination is
//! pruned and skipped, never a reason to fail the broadcast.

pub mod mock;
pub mod traits;

pub use mock::{MockDelivery, MockFeedback};
pub use traits::{Delivery, DeliveryError, DeliveryResult, Feedback, OutboundMessage};

use crate::model::{BroadcastRecord, Connection, Hub, InboundMessage, MessageId};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::store::{Repository, StoreError};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay errors. Individual delivery failures never surface here; they are
/// handled inside the broadcast.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("no broadcast record for message {0}")]
    RecordNotFound(MessageId),

    #[error("message {0} is past the retention window")]
    RetentionElapsed(MessageId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Relay-wide constants.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// How long broadcast records are kept; edits and deletes past this
    /// window are refused and the records become prunable.
    pub retention: Duration,
    /// Display name used for hub service announcements
    pub announcer_name: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 3600),
            announcer_name: "Hubcast".into(),
        }
    }
}

/// The fan-out engine. Cheaply cloneable; clones share the store, registry
/// and delivery handles.
pub struct RelayEngine<S: Repository, D: Delivery> {
    store: Arc<S>,
    registry: ConnectionRegistry<S>,
    delivery: Arc<D>,
    config: RelayConfig,
}

impl<S: Repository, D: Delivery> Clone for RelayEngine<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: self.registry.clone(),
            delivery: Arc::clone(&self.delivery),
            config: self.config.clone(),
        }
    }
}

impl<S: Repository, D: Delivery> RelayEngine<S, D> {
    pub fn new(
        store: Arc<S>,
        registry: ConnectionRegistry<S>,
        delivery: Arc<D>,
        config: RelayConfig,
    ) -> Self {
        Self {
            store,
            registry,
            delivery,
            config,
        }
    }

    /// Fan `message` out to every other connected destination in the hub.
    ///
    /// `relay_content` is the moderated copy (transforms applied); the
    /// record keeps the origin ids so later edits and deletes can be
    /// propagated. Destinations that fail are pruned from the registry and
    /// left out of the record.
    pub async fn broadcast(
        &self,
        hub: &Hub,
        origin: &Connection,
        message: &InboundMessage,
        relay_content: &str,
    ) -> RelayResult<BroadcastRecord> {
        let targets: Vec<Connection> = self
            .registry
            .list_active(&hub.id)
            .await?
            .into_iter()
            .filter(|c| c.channel_id != origin.channel_id)
            .collect();

        let sends = targets.iter().map(|target| {
            let outbound = OutboundMessage {
                hub_name: hub.name.clone(),
                sender_name: message.sender_name.clone(),
                sender_id: message.sender_id.clone(),
                server_name: message.server_name.clone(),
                content: relay_content.to_string(),
                attachment_url: message.attachment.as_ref().map(|a| a.url.clone()),
                compact: target.compact_mode,
            };
            let delivery = Arc::clone(&self.delivery);
            async move {
                let result = delivery.send(&target.endpoint, &outbound).await;
                (target, result)
            }
        });

        let mut deliveries = HashMap::new();
        for (target, result) in join_all(sends).await {
            match result {
                Ok(delivered_id) => {
                    deliveries.insert(target.channel_id.clone(), delivered_id);
                }
                Err(e) => {
                    warn!(
                        hub = %hub.id,
                        channel = %target.channel_id,
                        error = %e,
                        "delivery failed, pruning destination"
                    );
                    // races with an explicit disconnect are fine
                    if let Err(remove_err) = self.registry.remove(&target.channel_id).await {
                        if !matches!(remove_err, RegistryError::NotConnected(_)) {
                            return Err(remove_err.into());
                        }
                    }
                }
            }
        }

        let record = BroadcastRecord {
            hub_id: hub.id,
            origin_message_id: message.id.clone(),
            origin_sender_id: message.sender_id.clone(),
            origin_server_id: message.server_id.clone(),
            created_at: SystemTime::now(),
            deliveries,
        };
        self.store.insert_record(record.clone()).await?;

        info!(
            hub = %hub.id,
            origin = %message.id,
            delivered = record.deliveries.len(),
            attempted = targets.len(),
            "broadcast complete"
        );
        Ok(record)
    }

    /// Replay an edit of the original message against every recorded copy.
    /// Returns how many copies were edited; per-destination failures are
    /// logged and skipped.
    pub async fn edit_propagate(
        &self,
        origin_message: &MessageId,
        new_content: &str,
    ) -> RelayResult<usize> {
        let record = self.lookup_mutable(origin_message).await?;
        let edits = record.deliveries.iter().map(|(channel, delivered)| {
            let delivery = Arc::clone(&self.delivery);
            let store = Arc::clone(&self.store);
            async move {
                // the destination may have been pruned since the broadcast
                let Ok(Some(connection)) = store.connection_by_channel(channel).await else {
                    return None;
                };
                match delivery.edit(&connection.endpoint, delivered, new_content).await {
                    Ok(()) => Some(()),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "edit propagation failed");
                        None
                    }
                }
            }
        });

        let edited = join_all(edits).await.into_iter().flatten().count();
        info!(origin = %origin_message, edited, "edit propagated");
        Ok(edited)
    }

    /// Replay a delete of the original message against every recorded copy.
    pub async fn delete_propagate(&self, origin_message: &MessageId) -> RelayResult<usize> {
        let record = self.lookup_mutable(origin_message).await?;
        let deletes = record.deliveries.iter().map(|(channel, delivered)| {
            let delivery = Arc::clone(&self.delivery);
            let store = Arc::clone(&self.store);
            async move {
                let Ok(Some(connection)) = store.connection_by_channel(channel).await else {
                    return None;
                };
                match delivery.delete(&connection.endpoint, delivered).await {
                    Ok(()) => Some(()),
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "delete propagation failed");
                        None
                    }
                }
            }
        });

        let deleted = join_all(deletes).await.into_iter().flatten().count();
        info!(origin = %origin_message, deleted, "delete propagated");
        Ok(deleted)
    }

    /// Deliver a service notice to every active connection of the hub.
    /// Failures are logged and ignored; announcements are best-effort.
    pub async fn announce(&self, hub: &Hub, text: &str) -> RelayResult<()> {
        let targets = self.registry.list_active(&hub.id).await?;
        let sends = targets.iter().map(|target| {
            let outbound = OutboundMessage {
                hub_name: hub.name.clone(),
                sender_name: self.config.announcer_name.clone(),
                sender_id: crate::model::UserId(String::new()),
                server_name: self.config.announcer_name.clone(),
                content: text.to_string(),
                attachment_url: None,
                compact: target.compact_mode,
            };
            let delivery = Arc::clone(&self.delivery);
            async move {
                if let Err(e) = delivery.send(&target.endpoint, &outbound).await {
                    warn!(channel = %target.channel_id, error = %e, "announcement not delivered");
                }
            }
        });
        join_all(sends).await;
        Ok(())
    }

    /// Drop records past the retention window. Returns how many were pruned.
    pub async fn prune_expired_records(&self) -> RelayResult<usize> {
        let cutoff = SystemTime::now() - self.config.retention;
        Ok(self.store.delete_records_before(cutoff).await?)
    }

    async fn lookup_mutable(&self, origin_message: &MessageId) -> RelayResult<BroadcastRecord> {
        let record = self
            .store
            .record_by_origin(origin_message)
            .await?
            .ok_or_else(|| RelayError::RecordNotFound(origin_message.clone()))?;

        let age = SystemTime::now()
            .duration_since(record.created_at)
            .unwrap_or(Duration::ZERO);
        if age > self.config.retention {
            return Err(RelayError::RetentionElapsed(origin_message.clone()));
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Attachment, ChannelId, Endpoint, HubId, HubSettings, ServerId, UserId, Visibility,
    };
    use crate::store::MemoryStore;

    fn test_hub() -> Hub {
        Hub {
            id: HubId::new(),
            name: "lounge".into(),
            visibility: Visibility::Public,
            owner: UserId("owner".into()),
            settings: HubSettings::default(),
        }
    }

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

    fn test_message(channel: &str, content: &str) -> InboundMessage {
        InboundMessage {
            id: MessageId("m1".into()),
            sender_id: UserId("u1".into()),
            sender_name: "alice".into(),
            server_id: ServerId("s1".into()),
            server_name: "Server One".into(),
            channel_id: ChannelId(channel.to_string()),
            content: content.to_string(),
            sticker_count: 0,
            attachment: None,
            sent_at: SystemTime::now(),
        }
    }

    struct Fixture {
        engine: RelayEngine<MemoryStore, MockDelivery>,
        registry: ConnectionRegistry<MemoryStore>,
        delivery: MockDelivery,
        hub: Hub,
    }

    async fn fixture(channels: &[&str]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new(Arc::clone(&store));
        let delivery = MockDelivery::new();
        let hub = test_hub();

        for (i, channel) in channels.iter().enumerate() {
            registry
                .insert(test_connection(hub.id, &format!("s{i}"), channel))
                .await
                .unwrap();
        }

        let engine = RelayEngine::new(
            store,
            registry.clone(),
            Arc::new(delivery.clone()),
            RelayConfig::default(),
        );
        Fixture {
            engine,
            registry,
            delivery,
            hub,
        }
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin() {
        let f = fixture(&["c1", "c2", "c3"]).await;
        let origin = f
            .registry
            .find_by_channel(&ChannelId("c1".into()))
            .await
            .unwrap()
            .unwrap();

        let record = f
            .engine
            .broadcast(&f.hub, &origin, &test_message("c1", "hello"), "hello")
            .await
            .unwrap();

        assert_eq!(record.deliveries.len(), 2);
        assert!(!record.deliveries.contains_key(&ChannelId("c1".into())));
        assert!(f.delivery.delivered_to(&Endpoint("endpoint://c1".into())).is_empty());
        assert_eq!(f.delivery.delivered().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_destination_is_isolated_and_pruned() {
        let f = fixture(&["c1", "c2", "c3", "c4"]).await;
        f.delivery.fail_endpoint(&Endpoint("endpoint://c3".into()));
        let origin = f
            .registry
            .find_by_channel(&ChannelId("c1".into()))
            .await
            .unwrap()
            .unwrap();

        let record = f
            .engine
            .broadcast(&f.hub, &origin, &test_message("c1", "hi"), "hi")
            .await
            .unwrap();

        // others still delivered
        assert_eq!(record.deliveries.len(), 2);
        assert!(record.deliveries.contains_key(&ChannelId("c2".into())));
        assert!(record.deliveries.contains_key(&ChannelId("c4".into())));
        assert!(!record.deliveries.contains_key(&ChannelId("c3".into())));

        // the dead destination was pruned as if it had left
        assert!(f
            .registry
            .find_by_channel(&ChannelId("c3".into()))
            .await
            .unwrap()
            .is_none());
        assert_eq!(f.registry.count_active(&f.hub.id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_broadcast_carries_relay_content_and_attachment() {
        let f = fixture(&["c1", "c2"]).await;
        let origin = f
            .registry
            .find_by_channel(&ChannelId("c1".into()))
            .await
            .unwrap()
            .unwrap();

        let mut message = test_message("c1", "join http://example.com now");
        message.attachment = Some(Attachment {
            content_type: Some("image/png".into()),
            size_bytes: 100,
            url: "attachment://pic".into(),
        });

        f.engine
            .broadcast(&f.hub, &origin, &message, "join `[link hidden]` now")
            .await
            .unwrap();

        let sent = f.delivery.delivered();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message.content, "join `[link hidden]` now");
        assert_eq!(sent[0].message.attachment_url.as_deref(), Some("attachment://pic"));
        assert_eq!(sent[0].message.hub_name, "lounge");
    }

    #[tokio::test]
    async fn test_edit_propagates_only_to_recorded_copies() {
        let f = fixture(&["c1", "c2", "c3"]).await;
        f.delivery.fail_endpoint(&Endpoint("endpoint://c3".into()));
        let origin = f
            .registry
            .find_by_channel(&ChannelId("c1".into()))
            .await
            .unwrap()
            .unwrap();

        f.engine
            .broadcast(&f.hub, &origin, &test_message("c1", "helo"), "helo")
            .await
            .unwrap();

        let edited = f
            .engine
            .edit_propagate(&MessageId("m1".into()), "hello")
            .await
            .unwrap();
        assert_eq!(edited, 1);

        let edits = f.delivery.edits();
        assert_eq!(edits.len(), 1);
        assert_eq!(edits[0].0, Endpoint("endpoint://c2".into()));
        assert_eq!(edits[0].2, "hello");
    }

    #[tokio::test]
    async fn test_delete_propagates_and_missing_record_errors() {
        let f = fixture(&["c1", "c2"]).await;
        let origin = f
            .registry
            .find_by_channel(&ChannelId("c1".into()))
            .await
            .unwrap()
            .unwrap();

        f.engine
            .broadcast(&f.hub, &origin, &test_message("c1", "oops"), "oops")
            .await
            .unwrap();

        let deleted = f.engine.delete_propagate(&MessageId("m1".into())).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(f.delivery.deletes().len(), 1);

        let err = f
            .engine
            .delete_propagate(&MessageId("unknown".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RecordNotFound(_)));
    }

    #[tokio::test]
    async fn test_mutation_refused_past_retention() {
        let store = Arc::new(MemoryStore::new());
        let registry = ConnectionRegistry::new(Arc::clone(&store));
        let engine = RelayEngine::new(
            Arc::clone(&store),
            registry,
            Arc::new(MockDelivery::new()),
            RelayConfig {
                retention: Duration::from_secs(3600),
                ..Default::default()
            },
        );

        store
            .insert_record(BroadcastRecord {
                hub_id: HubId::new(),
                origin_message_id: MessageId("old".into()),
                origin_sender_id: UserId("u".into()),
                origin_server_id: ServerId("s".into()),
                created_at: SystemTime::now() - Duration::from_secs(7200),
                deliveries: HashMap::new(),
            })
            .await
            .unwrap();

        let err = engine
            .edit_propagate(&MessageId("old".into()), "new text")
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::RetentionElapsed(_)));

        // and the record is prunable
        assert_eq!(engine.prune_expired_records().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_announce_reaches_every_active_connection() {
        let f = fixture(&["c1", "c2", "c3"]).await;
        f.registry
            .mark_disconnected(&ChannelId("c3".into()))
            .await
            .unwrap();

        f.engine.announce(&f.hub, "A new server joined!").await.unwrap();

        let sent = f.delivery.delivered();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|d| d.message.content == "A new server joined!"));
    }
}
