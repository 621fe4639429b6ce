//! Hubcast - Cross-Server Hub Relay Core
//!
//! Connects channels on independent chat servers into shared hubs: a
//! message posted in one destination is relayed to every other destination
//! subscribed to the same hub, gated by an ordered moderation pipeline,
//! spam-escalated blacklisting with timed expiry, and a two-step onboarding
//! flow for first-time joins.
//!
//! Key principles:
//! - Library-level subsystem: no transport of its own, every destination is
//!   reached through an injected delivery capability
//! - Per-destination fault isolation: one dead destination never blocks a
//!   broadcast
//! - Persisted expiries are authoritative; in-memory timers are an
//!   optimization reconciled at startup

pub mod blacklist;
pub mod model;
pub mod moderation;
pub mod onboarding;
pub mod registry;
pub mod relay;
pub mod service;
pub mod store;

pub use blacklist::{BlacklistError, BlacklistScheduler};
pub use model::{
    Attachment, BlacklistEntry, BroadcastRecord, ChannelId, Connection, Endpoint, Hub, HubId,
    HubSettings, InboundMessage, MessageId, ServerId, Subject, UserId, Visibility,
};
pub use moderation::{ModerationConfig, ModerationPipeline, Verdict, WordFilter};
pub use onboarding::{OnboardingConfig, OnboardingGate, OnboardingState};
pub use registry::{ConnectionRegistry, RegistryError};
pub use relay::{Delivery, Feedback, OutboundMessage, RelayConfig, RelayEngine};
pub use service::{HubService, JoinOutcome, JoinRequest, RelayOutcome, ServiceConfig, ServiceError};
pub use store::{MemoryStore, Repository, StoreError};
