//! Delivery Capability Traits
//!
//! The core owns no transport. Each destination is reached through an
//! injected [`Delivery`] capability (send/edit/delete against an endpoint),
//! and moderation feedback goes through [`Feedback`]. Implementations wrap
//! whatever the embedding platform offers (webhooks, bot API calls); the
//! mocks in [`super::mock`] replace them in tests.

use crate::model::{ChannelId, Endpoint, MessageId, UserId};
use async_trait::async_trait;

/// Result type for delivery operations
pub type DeliveryResult<T> = Result<T, DeliveryError>;

/// Delivery errors. `Unreachable` means the destination is gone for good
/// (deleted channel, revoked endpoint) and is what triggers pruning.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("destination unreachable: {0}")]
    Unreachable(String),

    #[error("destination rejected the message: {0}")]
    Rejected(String),
}

/// A relayed message as handed to a destination. Rendering (embed vs. plain,
/// compact vs. full) is the presentation layer's business; the core only
/// carries the data and the per-destination `compact` preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub hub_name: String,
    pub sender_name: String,
    pub sender_id: UserId,
    pub server_name: String,
    pub content: String,
    pub attachment_url: Option<String>,
    /// The receiving connection's compact-mode preference
    pub compact: bool,
}

/// Per-destination send capability.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    /// Deliver a message; returns the destination's id for the created copy.
    async fn send(&self, endpoint: &Endpoint, message: &OutboundMessage)
        -> DeliveryResult<MessageId>;

    /// Edit a previously delivered copy.
    async fn edit(
        &self,
        endpoint: &Endpoint,
        message: &MessageId,
        content: &str,
    ) -> DeliveryResult<()>;

    /// Delete a previously delivered copy.
    async fn delete(&self, endpoint: &Endpoint, message: &MessageId) -> DeliveryResult<()>;
}

/// Moderation feedback capability: the core decides *which* notice to send,
/// the implementation decides how it looks.
#[async_trait]
pub trait Feedback: Send + Sync + 'static {
    async fn reply(&self, channel: &ChannelId, to: &MessageId, text: &str) -> DeliveryResult<()>;
    async fn react(&self, channel: &ChannelId, to: &MessageId, emoji: &str) -> DeliveryResult<()>;
    async fn direct_message(&self, user: &UserId, text: &str) -> DeliveryResult<()>;
    async fn channel_notice(&self, channel: &ChannelId, text: &str) -> DeliveryResult<()>;
}
