//! In-Memory Repository
//!
//! Mutex-guarded maps implementing [`Repository`]. Backs the crate's own
//! tests and any embedding that does not need durability across restarts.

use super::{Repository, StoreResult};
use crate::model::{
    BlacklistEntry, BroadcastRecord, ChannelId, Connection, Hub, HubId, MessageId, ServerId,
    Subject,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

#[derive(Default)]
struct Collections {
    hubs: HashMap<HubId, Hub>,
    /// channel -> connection; insertion order tracked separately so hub
    /// iteration stays stable for fan-out
    connections: HashMap<ChannelId, Connection>,
    connection_order: Vec<ChannelId>,
    records: HashMap<MessageId, BroadcastRecord>,
    blacklist: HashMap<(HubId, Subject), BlacklistEntry>,
}

/// In-memory store, cheaply cloneable (shared state behind an Arc).
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored connections (for assertions)
    pub fn connection_count(&self) -> usize {
        self.state.lock().unwrap().connections.len()
    }

    /// Number of stored broadcast records (for assertions)
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().records.len()
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn hub(&self, id: &HubId) -> StoreResult<Option<Hub>> {
        Ok(self.state.lock().unwrap().hubs.get(id).cloned())
    }

    async fn public_hub_by_name(&self, name: &str) -> StoreResult<Option<Hub>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .hubs
            .values()
            .find(|h| h.name == name && h.visibility == crate::model::Visibility::Public)
            .cloned())
    }

    async fn upsert_hub(&self, hub: Hub) -> StoreResult<()> {
        self.state.lock().unwrap().hubs.insert(hub.id, hub);
        Ok(())
    }

    async fn connection_by_channel(&self, channel: &ChannelId) -> StoreResult<Option<Connection>> {
        Ok(self.state.lock().unwrap().connections.get(channel).cloned())
    }

    async fn connection_by_server(
        &self,
        hub: &HubId,
        server: &ServerId,
    ) -> StoreResult<Option<Connection>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .connections
            .values()
            .find(|c| &c.hub_id == hub && &c.server_id == server)
            .cloned())
    }

    async fn connections_in_hub(&self, hub: &HubId) -> StoreResult<Vec<Connection>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .connection_order
            .iter()
            .filter_map(|ch| state.connections.get(ch))
            .filter(|c| &c.hub_id == hub)
            .cloned()
            .collect())
    }

    async fn insert_connection(&self, connection: Connection) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let channel = connection.channel_id.clone();
        if state.connections.insert(channel.clone(), connection).is_none() {
            state.connection_order.push(channel);
        }
        Ok(())
    }

    async fn update_connection(&self, connection: Connection) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        let channel = connection.channel_id.clone();
        if state.connections.insert(channel.clone(), connection).is_none() {
            state.connection_order.push(channel);
        }
        Ok(())
    }

    async fn delete_connection(&self, channel: &ChannelId) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        let removed = state.connections.remove(channel).is_some();
        if removed {
            state.connection_order.retain(|ch| ch != channel);
        }
        Ok(removed)
    }

    async fn insert_record(&self, record: BroadcastRecord) -> StoreResult<()> {
        self.state
            .lock()
            .unwrap()
            .records
            .insert(record.origin_message_id.clone(), record);
        Ok(())
    }

    async fn record_by_origin(&self, origin: &MessageId) -> StoreResult<Option<BroadcastRecord>> {
        Ok(self.state.lock().unwrap().records.get(origin).cloned())
    }

    async fn record_by_delivered(
        &self,
        delivered: &MessageId,
    ) -> StoreResult<Option<BroadcastRecord>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .records
            .values()
            .find(|r| r.deliveries.values().any(|id| id == delivered))
            .cloned())
    }

    async fn delete_records_before(&self, cutoff: SystemTime) -> StoreResult<usize> {
        let mut state = self.state.lock().unwrap();
        let before = state.records.len();
        state.records.retain(|_, r| r.created_at >= cutoff);
        Ok(before - state.records.len())
    }

    async fn blacklist_entry(
        &self,
        hub: &HubId,
        subject: &Subject,
    ) -> StoreResult<Option<BlacklistEntry>> {
        let state = self.state.lock().unwrap();
        Ok(state.blacklist.get(&(*hub, subject.clone())).cloned())
    }

    async fn all_blacklist_entries(&self) -> StoreResult<Vec<BlacklistEntry>> {
        Ok(self.state.lock().unwrap().blacklist.values().cloned().collect())
    }

    async fn upsert_blacklist_entry(&self, entry: BlacklistEntry) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .blacklist
            .insert((entry.hub_id, entry.subject.clone()), entry);
        Ok(())
    }

    async fn delete_blacklist_entry(&self, hub: &HubId, subject: &Subject) -> StoreResult<bool> {
        let mut state = self.state.lock().unwrap();
        Ok(state.blacklist.remove(&(*hub, subject.clone())).is_some())
    }

    async fn set_blacklist_notified(&self, hub: &HubId, subject: &Subject) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.blacklist.get_mut(&(*hub, subject.clone())) {
            entry.notified = true;
        }
        Ok(())
    }
}
