//! Core Data Model
//!
//! Ids and persisted records shared across the relay core. Platform-assigned
//! identifiers (servers, channels, users, messages) are opaque strings; hub
//! ids are minted locally.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;
use uuid::Uuid;

/// Hub identifier (locally minted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HubId(pub Uuid);

impl HubId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HubId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server (guild) identifier, platform-assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub String);

/// Channel identifier, platform-assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

/// User identifier, platform-assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

/// Message identifier, platform-assigned
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

/// Per-destination delivery endpoint (e.g. a webhook URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint(pub String);

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hub visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Visibility {
    /// Joinable by name
    Public,
    /// Joinable only through an invite resolved by the command layer
    Private,
}

/// Per-hub moderation settings
///
/// `invite` is the hub's own advertised invite, referenced by the
/// invite-link rejection notice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSettings {
    pub spam_filter: bool,
    pub block_invites: bool,
    pub hide_links: bool,
    pub invite: Option<String>,
}

/// A named topic grouping multiple destinations whose messages are mutually
/// relayed. Identity is immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hub {
    pub id: HubId,
    pub name: String,
    pub visibility: Visibility,
    pub owner: UserId,
    pub settings: HubSettings,
}

/// A destination's membership record in a hub.
///
/// Invariants (enforced by the registry, assumed by everything else):
/// - a `channel_id` belongs to at most one hub at a time
/// - at most one connection per `(hub_id, server_id)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub hub_id: HubId,
    pub server_id: ServerId,
    pub channel_id: ChannelId,
    pub endpoint: Endpoint,
    /// false = paused (kept but excluded from fan-out)
    pub connected: bool,
    pub compact_mode: bool,
    pub profanity_filter: bool,
    /// Thread-parent channel, when the destination is a thread
    pub parent_id: Option<ChannelId>,
}

/// Durable mapping from an original message to the delivered copies it
/// produced. Sole mechanism for edit/delete propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRecord {
    pub hub_id: HubId,
    pub origin_message_id: MessageId,
    pub origin_sender_id: UserId,
    pub origin_server_id: ServerId,
    pub created_at: SystemTime,
    /// destination channel -> delivered message. Failed destinations are
    /// simply absent.
    pub deliveries: HashMap<ChannelId, MessageId>,
}

/// Who a blacklist entry suspends
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    User(UserId),
    Server(ServerId),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::User(id) => write!(f, "user {}", id),
            Subject::Server(id) => write!(f, "server {}", id),
        }
    }
}

/// A time-bounded or permanent suspension of a user or server from a hub.
///
/// At most one active entry per `(hub_id, subject)`; a new entry replaces
/// the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub hub_id: HubId,
    pub subject: Subject,
    pub reason: String,
    pub issued_at: SystemTime,
    /// None = permanent
    pub expires_at: Option<SystemTime>,
    /// Whether the one-time suspension notice has been delivered
    pub notified: bool,
}

impl BlacklistEntry {
    /// True while the entry suspends its subject. An entry past its
    /// `expires_at` reads as inactive even if the expiry task that should
    /// remove it was lost.
    pub fn is_active_at(&self, now: SystemTime) -> bool {
        match self.expires_at {
            Some(expires) => now < expires,
            None => true,
        }
    }
}

/// An inbound message as handed over by the command layer, already resolved
/// to ids. At most the first attachment is considered by moderation.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub server_id: ServerId,
    pub server_name: String,
    pub channel_id: ChannelId,
    pub content: String,
    pub sticker_count: u32,
    pub attachment: Option<Attachment>,
    pub sent_at: SystemTime,
}

/// First attachment of an inbound message
#[derive(Debug, Clone)]
pub struct Attachment {
    pub content_type: Option<String>,
    pub size_bytes: u64,
    pub url: String,
}
