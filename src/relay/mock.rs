//! Mock Delivery and Feedback for Testing
//!
//! Records everything, delivers nothing. Individual endpoints can be made
//! to fail to exercise fault isolation.

use super::traits::*;
use crate::model::{ChannelId, Endpoint, MessageId, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// A message the mock "delivered" to an endpoint
#[derive(Debug, Clone)]
pub struct Delivered {
    pub endpoint: Endpoint,
    pub message: OutboundMessage,
    pub id: MessageId,
}

#[derive(Default)]
struct MockDeliveryState {
    delivered: Vec<Delivered>,
    edits: Vec<(Endpoint, MessageId, String)>,
    deletes: Vec<(Endpoint, MessageId)>,
    failing: HashSet<Endpoint>,
    next_id: u64,
}

/// Mock delivery capability
#[derive(Clone, Default)]
pub struct MockDelivery {
    state: Arc<Mutex<MockDeliveryState>>,
}

impl MockDelivery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call against `endpoint` fail with `Unreachable`.
    pub fn fail_endpoint(&self, endpoint: &Endpoint) {
        self.state.lock().unwrap().failing.insert(endpoint.clone());
    }

    /// All successful deliveries, in call order.
    pub fn delivered(&self) -> Vec<Delivered> {
        self.state.lock().unwrap().delivered.clone()
    }

    /// Successful deliveries to one endpoint.
    pub fn delivered_to(&self, endpoint: &Endpoint) -> Vec<Delivered> {
        self.state
            .lock()
            .unwrap()
            .delivered
            .iter()
            .filter(|d| &d.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn edits(&self) -> Vec<(Endpoint, MessageId, String)> {
        self.state.lock().unwrap().edits.clone()
    }

    pub fn deletes(&self) -> Vec<(Endpoint, MessageId)> {
        self.state.lock().unwrap().deletes.clone()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        *state = MockDeliveryState::default();
    }
}

#[async_trait]
impl Delivery for MockDelivery {
    async fn send(
        &self,
        endpoint: &Endpoint,
        message: &OutboundMessage,
    ) -> DeliveryResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(endpoint) {
            return Err(DeliveryError::Unreachable(endpoint.0.clone()));
        }
        state.next_id += 1;
        let id = MessageId(format!("delivered-{}", state.next_id));
        state.delivered.push(Delivered {
            endpoint: endpoint.clone(),
            message: message.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    async fn edit(
        &self,
        endpoint: &Endpoint,
        message: &MessageId,
        content: &str,
    ) -> DeliveryResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(endpoint) {
            return Err(DeliveryError::Unreachable(endpoint.0.clone()));
        }
        state
            .edits
            .push((endpoint.clone(), message.clone(), content.to_string()));
        Ok(())
    }

    async fn delete(&self, endpoint: &Endpoint, message: &MessageId) -> DeliveryResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(endpoint) {
            return Err(DeliveryError::Unreachable(endpoint.0.clone()));
        }
        state.deletes.push((endpoint.clone(), message.clone()));
        Ok(())
    }
}

#[derive(Default)]
struct MockFeedbackState {
    replies: Vec<(ChannelId, MessageId, String)>,
    reactions: Vec<(ChannelId, MessageId, String)>,
    direct_messages: Vec<(UserId, String)>,
    notices: Vec<(ChannelId, String)>,
}

/// Mock moderation feedback capability
#[derive(Clone, Default)]
pub struct MockFeedback {
    state: Arc<Mutex<MockFeedbackState>>,
}

impl MockFeedback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replies(&self) -> Vec<(ChannelId, MessageId, String)> {
        self.state.lock().unwrap().replies.clone()
    }

    pub fn reactions(&self) -> Vec<(ChannelId, MessageId, String)> {
        self.state.lock().unwrap().reactions.clone()
    }

    pub fn direct_messages(&self) -> Vec<(UserId, String)> {
        self.state.lock().unwrap().direct_messages.clone()
    }

    pub fn notices(&self) -> Vec<(ChannelId, String)> {
        self.state.lock().unwrap().notices.clone()
    }

    /// Total side effects recorded (for "no side effect" assertions)
    pub fn total(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.replies.len()
            + state.reactions.len()
            + state.direct_messages.len()
            + state.notices.len()
    }
}

#[async_trait]
impl Feedback for MockFeedback {
    async fn reply(&self, channel: &ChannelId, to: &MessageId, text: &str) -> DeliveryResult<()> {
        self.state
            .lock()
            .unwrap()
            .replies
            .push((channel.clone(), to.clone(), text.to_string()));
        Ok(())
    }

    async fn react(&self, channel: &ChannelId, to: &MessageId, emoji: &str) -> DeliveryResult<()> {
        self.state
            .lock()
            .unwrap()
            .reactions
            .push((channel.clone(), to.clone(), emoji.to_string()));
        Ok(())
    }

    async fn direct_message(&self, user: &UserId, text: &str) -> DeliveryResult<()> {
        self.state
            .lock()
            .unwrap()
            .direct_messages
            .push((user.clone(), text.to_string()));
        Ok(())
    }

    async fn channel_notice(&self, channel: &ChannelId, text: &str) -> DeliveryResult<()> {
        self.state
            .lock()
            .unwrap()
            .notices
            .push((channel.clone(), text.to_string()));
        Ok(())
    }
}
