//! Persistence Abstraction
//!
//! The relay core never talks to a database directly. Everything durable
//! goes through the [`Repository`] trait: point lookups by unique key plus
//! simple equality filters over hubs, connections, broadcast records and
//! blacklist entries. The store is assumed to provide per-record atomicity
//! but no cross-record transactions.
//!
//! [`MemoryStore`] is the bundled implementation (mutex-guarded maps); a
//! SQL-backed one belongs to the embedding application.

pub mod memory;

pub use memory::MemoryStore;

use crate::model::{
    BlacklistEntry, BroadcastRecord, ChannelId, Connection, Hub, HubId, MessageId, ServerId,
    Subject,
};
use async_trait::async_trait;
use std::time::SystemTime;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Store errors. Anything surfacing from here is fatal for the operation in
/// flight; callers must not record partial relay state as successful.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Abstract repository over the four persisted collections.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    // Hubs
    async fn hub(&self, id: &HubId) -> StoreResult<Option<Hub>>;
    async fn public_hub_by_name(&self, name: &str) -> StoreResult<Option<Hub>>;
    async fn upsert_hub(&self, hub: Hub) -> StoreResult<()>;

    // Connections
    async fn connection_by_channel(&self, channel: &ChannelId) -> StoreResult<Option<Connection>>;
    async fn connection_by_server(
        &self,
        hub: &HubId,
        server: &ServerId,
    ) -> StoreResult<Option<Connection>>;
    /// All connections of a hub, connected or paused, in stable insertion
    /// order.
    async fn connections_in_hub(&self, hub: &HubId) -> StoreResult<Vec<Connection>>;
    async fn insert_connection(&self, connection: Connection) -> StoreResult<()>;
    /// Replace the connection stored under `connection.channel_id`.
    async fn update_connection(&self, connection: Connection) -> StoreResult<()>;
    /// Returns false when no connection was stored under `channel`.
    async fn delete_connection(&self, channel: &ChannelId) -> StoreResult<bool>;

    // Broadcast records
    async fn insert_record(&self, record: BroadcastRecord) -> StoreResult<()>;
    async fn record_by_origin(&self, origin: &MessageId) -> StoreResult<Option<BroadcastRecord>>;
    /// Lookup by any *delivered* message id (moderator tooling resolves a
    /// relayed copy back to its record).
    async fn record_by_delivered(
        &self,
        delivered: &MessageId,
    ) -> StoreResult<Option<BroadcastRecord>>;
    /// Drop records created before `cutoff`; returns how many were pruned.
    async fn delete_records_before(&self, cutoff: SystemTime) -> StoreResult<usize>;

    // Blacklist entries
    async fn blacklist_entry(
        &self,
        hub: &HubId,
        subject: &Subject,
    ) -> StoreResult<Option<BlacklistEntry>>;
    async fn all_blacklist_entries(&self) -> StoreResult<Vec<BlacklistEntry>>;
    /// Insert or replace the entry for `(entry.hub_id, entry.subject)`.
    async fn upsert_blacklist_entry(&self, entry: BlacklistEntry) -> StoreResult<()>;
    /// Returns false when no entry existed.
    async fn delete_blacklist_entry(&self, hub: &HubId, subject: &Subject) -> StoreResult<bool>;
    async fn set_blacklist_notified(&self, hub: &HubId, subject: &Subject) -> StoreResult<()>;
}
