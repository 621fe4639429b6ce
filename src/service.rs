//! Hub Service
//!
//! Composition root and the surface the command layer talks to. Wires the
//! registry, moderation pipeline, blacklist scheduler, relay engine and
//! onboarding gate together and owns the join/leave/message flows.
//!
//! The command layer hands over fully resolved requests (ids, not raw
//! text); rendering of prompts and notices is behind the injected
//! [`Feedback`] and [`JoinPrompter`] capabilities.

use crate::blacklist::{BlacklistError, BlacklistScheduler};
use crate::model::{
    BlacklistEntry, BroadcastRecord, ChannelId, Connection, Endpoint, Hub, HubId, InboundMessage,
    MessageId, ServerId, Subject, UserId,
};
use crate::moderation::{
    apply_rejection, CheckKind, ModerationConfig, ModerationError, ModerationPipeline, Verdict,
    WordFilter,
};
use crate::onboarding::{
    run_onboarding, JoinPrompter, OnboardingConfig, OnboardingError, OnboardingGate,
    OnboardingState,
};
use crate::registry::{ConnectionRegistry, RegistryError};
use crate::relay::{Delivery, Feedback, RelayConfig, RelayEngine, RelayError};
use crate::store::{Repository, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors surfaced to the command layer. Everything else (moderation
/// rejections, single-destination delivery failures) is consumed inside the
/// core.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("hub {0} does not exist")]
    HubNotFound(HubId),

    #[error("user or server is blacklisted from hub {0}")]
    Blacklisted(HubId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Onboarding(#[from] OnboardingError),

    #[error(transparent)]
    Moderation(#[from] ModerationError),

    #[error(transparent)]
    Blacklist(#[from] BlacklistError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Service-wide configuration bundle
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub moderation: ModerationConfig,
    pub relay: RelayConfig,
    pub onboarding: OnboardingConfig,
}

/// A validated join request from the command layer. The hub id is already
/// resolved (name lookup and invite codes are the command layer's job).
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub hub_id: HubId,
    pub server_id: ServerId,
    pub server_name: String,
    pub channel_id: ChannelId,
    /// Thread-parent channel when the destination is a thread
    pub parent_id: Option<ChannelId>,
    pub endpoint: Endpoint,
    pub actor: UserId,
    pub member_count: u64,
}

/// Outcome of a join attempt that made it past validation
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined {
        connection: Connection,
        /// Active connections after the join, for announcements
        hub_size: usize,
    },
    /// Onboarding ended in Cancelled or TimedOut
    Declined(OnboardingState),
}

/// Outcome of an inbound message
#[derive(Debug, Clone)]
pub enum RelayOutcome {
    Relayed(BroadcastRecord),
    Rejected(CheckKind),
    /// Channel not connected to any hub, or paused
    Ignored,
}

/// The assembled relay core.
pub struct HubService<S: Repository, D: Delivery, F: Feedback> {
    store: Arc<S>,
    registry: ConnectionRegistry<S>,
    scheduler: BlacklistScheduler<S>,
    pipeline: ModerationPipeline,
    engine: RelayEngine<S, D>,
    gate: OnboardingGate,
    feedback: Arc<F>,
}

impl<S: Repository, D: Delivery, F: Feedback> HubService<S, D, F> {
    pub fn new(store: Arc<S>, delivery: Arc<D>, feedback: Arc<F>, config: ServiceConfig) -> Self {
        Self::with_filter(store, delivery, feedback, config, WordFilter::default())
    }

    /// Build with an operator-supplied word filter (the embedded default
    /// ships no slur entries).
    pub fn with_filter(
        store: Arc<S>,
        delivery: Arc<D>,
        feedback: Arc<F>,
        config: ServiceConfig,
        filter: WordFilter,
    ) -> Self {
        let registry = ConnectionRegistry::new(Arc::clone(&store));
        let scheduler = BlacklistScheduler::new(Arc::clone(&store));
        let pipeline =
            ModerationPipeline::standard(scheduler.clone(), filter, config.moderation);
        let engine = RelayEngine::new(
            Arc::clone(&store),
            registry.clone(),
            delivery,
            config.relay,
        );
        let gate = OnboardingGate::new(config.onboarding);

        Self {
            store,
            registry,
            scheduler,
            pipeline,
            engine,
            gate,
            feedback,
        }
    }

    /// Startup reconciliation: expire stale blacklist entries and re-arm
    /// timers for the live ones. Call once before serving events.
    pub async fn startup_reconcile(&self) -> ServiceResult<usize> {
        Ok(self.scheduler.reconcile().await?)
    }

    // ------------------------------------------------------------------
    // Message flow
    // ------------------------------------------------------------------

    /// Run an inbound message through moderation and, on pass, broadcast it.
    ///
    /// Callers must feed messages from one sender in submission order and
    /// await each call before the next; the pipeline never reorders them.
    pub async fn handle_message(&self, message: InboundMessage) -> ServiceResult<RelayOutcome> {
        let Some(connection) = self.registry.find_by_channel(&message.channel_id).await? else {
            return Ok(RelayOutcome::Ignored);
        };
        if !connection.connected {
            return Ok(RelayOutcome::Ignored);
        }

        let hub = self
            .store
            .hub(&connection.hub_id)
            .await?
            .ok_or(ServiceError::HubNotFound(connection.hub_id))?;

        match self.pipeline.run(&message, &connection, &hub).await? {
            Verdict::Reject(rejection) => {
                apply_rejection(
                    &rejection,
                    &message.channel_id,
                    &message.id,
                    &message.sender_id,
                    self.feedback.as_ref(),
                )
                .await;
                Ok(RelayOutcome::Rejected(rejection.check))
            }
            Verdict::Pass { relay_content } => {
                let record = self
                    .engine
                    .broadcast(&hub, &connection, &message, &relay_content)
                    .await?;
                Ok(RelayOutcome::Relayed(record))
            }
        }
    }

    /// Run the moderation pipeline without relaying. Returns None when the
    /// channel is not connected (or paused); no side effect is executed.
    pub async fn run_checks(&self, message: &InboundMessage) -> ServiceResult<Option<Verdict>> {
        let Some(connection) = self.registry.find_by_channel(&message.channel_id).await? else {
            return Ok(None);
        };
        if !connection.connected {
            return Ok(None);
        }
        let hub = self
            .store
            .hub(&connection.hub_id)
            .await?
            .ok_or(ServiceError::HubNotFound(connection.hub_id))?;
        Ok(Some(self.pipeline.run(message, &connection, &hub).await?))
    }

    /// Propagate an edit of the original message to every relayed copy.
    pub async fn edit_propagate(
        &self,
        origin_message: &MessageId,
        new_content: &str,
    ) -> ServiceResult<usize> {
        Ok(self.engine.edit_propagate(origin_message, new_content).await?)
    }

    /// Propagate a delete of the original message to every relayed copy.
    pub async fn delete_propagate(&self, origin_message: &MessageId) -> ServiceResult<usize> {
        Ok(self.engine.delete_propagate(origin_message).await?)
    }

    /// Drop broadcast records past the retention window.
    pub async fn prune_expired_records(&self) -> ServiceResult<usize> {
        Ok(self.engine.prune_expired_records().await?)
    }

    // ------------------------------------------------------------------
    // Membership flow
    // ------------------------------------------------------------------

    /// Full join flow: validation, onboarding, connection, announcement.
    pub async fn join_hub<P: JoinPrompter>(
        &self,
        request: JoinRequest,
        prompter: &P,
    ) -> ServiceResult<JoinOutcome> {
        let hub = self
            .store
            .hub(&request.hub_id)
            .await?
            .ok_or(ServiceError::HubNotFound(request.hub_id))?;

        if let Some(existing) = self.registry.find_by_channel(&request.channel_id).await? {
            return Err(RegistryError::DuplicateChannel(existing.channel_id).into());
        }
        if self
            .registry
            .find_by_server(&hub.id, &request.server_id)
            .await?
            .is_some()
        {
            return Err(RegistryError::AlreadyJoined {
                hub: hub.id,
                server: request.server_id,
            }
            .into());
        }

        let user_blocked = self
            .scheduler
            .is_active(&hub.id, &Subject::User(request.actor.clone()))
            .await?;
        let server_blocked = self
            .scheduler
            .is_active(&hub.id, &Subject::Server(request.server_id.clone()))
            .await?;
        if user_blocked || server_blocked {
            return Err(ServiceError::Blacklisted(hub.id));
        }

        // the gate is also the duplicate-join mutual exclusion
        let outcome = run_onboarding(&self.gate, prompter, &request.channel_id, &hub.name).await?;
        if outcome != OnboardingState::Accepted {
            return Ok(JoinOutcome::Declined(outcome));
        }

        let connection = Connection {
            hub_id: hub.id,
            server_id: request.server_id,
            channel_id: request.channel_id,
            endpoint: request.endpoint,
            connected: true,
            compact_mode: false,
            profanity_filter: true,
            parent_id: request.parent_id,
        };
        self.registry.insert(connection.clone()).await?;

        let hub_size = self.registry.count_active(&hub.id).await?;
        self.engine
            .announce(
                &hub,
                &format!(
                    "A new server has joined the hub!\n\n\
                     **Server Name:** __{}__\n\
                     **Member Count:** __{}__\n\n\
                     We now have **{}** servers with us!",
                    request.server_name, request.member_count, hub_size
                ),
            )
            .await?;

        info!(hub = %hub.id, server = %connection.server_id, hub_size, "server joined hub");
        Ok(JoinOutcome::Joined {
            connection,
            hub_size,
        })
    }

    /// Leave the hub: the membership is kept but paused.
    pub async fn leave_hub(&self, channel: &ChannelId) -> ServiceResult<()> {
        Ok(self.registry.mark_disconnected(channel).await?)
    }

    /// Resume a paused membership.
    pub async fn resume(&self, channel: &ChannelId) -> ServiceResult<()> {
        Ok(self.registry.mark_connected(channel).await?)
    }

    /// Disconnect for good: the membership is deleted.
    pub async fn disconnect(&self, channel: &ChannelId) -> ServiceResult<()> {
        Ok(self.registry.remove(channel).await?)
    }

    /// Onboarding state for a channel, None when nothing is in progress.
    pub fn onboarding_state(&self, channel: &ChannelId) -> Option<OnboardingState> {
        self.gate.state(channel)
    }

    // ------------------------------------------------------------------
    // Blacklist flow
    // ------------------------------------------------------------------

    pub async fn blacklist(
        &self,
        hub: HubId,
        subject: Subject,
        reason: &str,
        duration: Option<Duration>,
    ) -> ServiceResult<BlacklistEntry> {
        Ok(self.scheduler.blacklist(hub, subject, reason, duration).await?)
    }

    pub async fn unblacklist(&self, hub: &HubId, subject: &Subject) -> ServiceResult<bool> {
        Ok(self.scheduler.unblacklist(hub, subject).await?)
    }

    pub async fn is_blacklisted(&self, hub: &HubId, subject: &Subject) -> ServiceResult<bool> {
        Ok(self.scheduler.is_active(hub, subject).await?)
    }

    // ------------------------------------------------------------------
    // Component access (tests, embedding glue)
    // ------------------------------------------------------------------

    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }

    pub fn scheduler(&self) -> &BlacklistScheduler<S> {
        &self.scheduler
    }

    pub fn pipeline(&self) -> &ModerationPipeline {
        &self.pipeline
    }

    pub fn engine(&self) -> &RelayEngine<S, D> {
        &self.engine
    }

    pub fn gate(&self) -> &OnboardingGate {
        &self.gate
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a hub. Administrative; identity is immutable afterwards.
    pub async fn create_hub(&self, hub: Hub) -> ServiceResult<()> {
        info!(hub = %hub.id, name = %hub.name, "hub created");
        Ok(self.store.upsert_hub(hub).await?)
    }
}
