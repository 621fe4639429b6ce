//! Moderation Pipeline
//!
//! Every inbound message passes an ordered, short-circuiting list of check
//! units before relay. Each unit inspects (message, connection, hub) and
//! either passes or rejects with exactly one side effect; the pipeline stops
//! at the first rejection and later checks never run. The list is built at
//! startup and can be replaced wholesale in tests (`with_checks`).

pub mod antispam;
pub mod checks;
pub mod wordfilter;

pub use antispam::{SpamConfig, SpamTracker, SpamViolation};
pub use wordfilter::WordFilter;

use crate::blacklist::BlacklistError;
use crate::model::{ChannelId, Connection, Hub, InboundMessage, MessageId, UserId};
use crate::relay::traits::Feedback;
use crate::store::StoreError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Result type for pipeline runs
pub type ModerationResult<T> = Result<T, ModerationError>;

/// Fatal pipeline errors (store unavailable). Rejections are not errors.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blacklist(#[from] BlacklistError),
}

/// Identifies a check unit. One variant per unit keeps dispatch and test
/// assertions exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Blacklist,
    SpamFilter,
    Length,
    Slur,
    InviteLink,
    StickerOnly,
    Attachment,
    ServerName,
    ProfanityAudit,
    HideLinks,
}

/// The single side effect a rejecting check asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectionAction {
    /// Drop with no user-visible effect (still logged)
    Silent,
    /// Reply to the offending message in its channel
    Reply(String),
    /// React to the offending message
    React(String),
    /// Direct-message the author
    DirectMessage(String),
    /// Post in the origin channel without replying to the message
    ChannelNotice(String),
}

/// A failed check: which unit rejected, and what to do about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub check: CheckKind,
    pub action: RejectionAction,
}

/// Outcome of one check unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Reject(Rejection),
}

/// Outcome of a full pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed; `relay_content` is the content to fan out (the
    /// stored original stays untouched by transforms).
    Pass { relay_content: String },
    Reject(Rejection),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass { .. })
    }
}

/// Everything a check unit may look at. `relay_content` starts as a copy of
/// the message content; transform units mutate it in place.
pub struct CheckContext<'a> {
    pub message: &'a InboundMessage,
    pub connection: &'a Connection,
    pub hub: &'a Hub,
    pub relay_content: String,
}

/// One unit of the pipeline.
#[async_trait]
pub trait MessageCheck: Send + Sync {
    fn kind(&self) -> CheckKind;
    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome>;
}

/// Pipeline-wide limits and policies. Hub settings gate individual units at
/// run time; this struct carries the constants.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    pub max_content_chars: usize,
    pub max_attachment_bytes: u64,
    pub allowed_attachment_types: Vec<String>,
    pub invite_patterns: Vec<String>,
    pub spam: SpamConfig,
    /// How long a spam escalation suspends the sender
    pub auto_blacklist_duration: Duration,
    /// Reaction signalling a spam rejection
    pub spam_reaction: String,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            max_content_chars: 1000,
            max_attachment_bytes: 8 * 1024 * 1024,
            allowed_attachment_types: vec![
                "image/gif".into(),
                "image/png".into(),
                "image/jpeg".into(),
                "image/jpg".into(),
                "image/webp".into(),
            ],
            invite_patterns: vec![
                "discord.gg".into(),
                "discord.com/invite".into(),
                "dsc.gg".into(),
            ],
            spam: SpamConfig::default(),
            auto_blacklist_duration: Duration::from_secs(5 * 60),
            spam_reaction: "\u{23f3}".into(),
        }
    }
}

/// Ordered list of check units.
pub struct ModerationPipeline {
    checks: Vec<Box<dyn MessageCheck>>,
}

impl ModerationPipeline {
    /// The canonical pipeline. Order matters: suspensions first, spam
    /// escalation second, content checks after, transforms last.
    pub fn standard<S: crate::store::Repository>(
        scheduler: crate::blacklist::BlacklistScheduler<S>,
        filter: WordFilter,
        config: ModerationConfig,
    ) -> Self {
        Self {
            checks: checks::standard_checks(scheduler, filter, config),
        }
    }

    /// A pipeline with an explicit unit list. Tests use this to run subsets
    /// or custom orders.
    pub fn with_checks(checks: Vec<Box<dyn MessageCheck>>) -> Self {
        Self { checks }
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every unit in order, short-circuiting on the first rejection.
    pub async fn run(
        &self,
        message: &InboundMessage,
        connection: &Connection,
        hub: &Hub,
    ) -> ModerationResult<Verdict> {
        let mut ctx = CheckContext {
            message,
            connection,
            hub,
            relay_content: message.content.clone(),
        };

        for check in &self.checks {
            match check.run(&mut ctx).await? {
                CheckOutcome::Pass => {}
                CheckOutcome::Reject(rejection) => {
                    debug!(
                        check = ?rejection.check,
                        message = %message.id,
                        sender = %message.sender_id,
                        "message rejected"
                    );
                    return Ok(Verdict::Reject(rejection));
                }
            }
        }

        Ok(Verdict::Pass {
            relay_content: ctx.relay_content,
        })
    }
}

/// Execute a rejection's side effect through the feedback capability.
/// Feedback failures are swallowed: a rejection notice that cannot be
/// delivered never blocks the pipeline's caller.
pub async fn apply_rejection<F: Feedback>(
    rejection: &Rejection,
    channel: &ChannelId,
    message: &MessageId,
    sender: &UserId,
    feedback: &F,
) {
    let result = match &rejection.action {
        RejectionAction::Silent => Ok(()),
        RejectionAction::Reply(text) => feedback.reply(channel, message, text).await,
        RejectionAction::React(emoji) => feedback.react(channel, message, emoji).await,
        RejectionAction::DirectMessage(text) => feedback.direct_message(sender, text).await,
        RejectionAction::ChannelNotice(text) => feedback.channel_notice(channel, text).await,
    };
    if let Err(e) = result {
        debug!(check = ?rejection.check, error = %e, "rejection feedback not delivered");
    }
}
