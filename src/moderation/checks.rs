//! Check Units
//!
//! The individual pipeline units, in their canonical order. Each is
//! independently constructible so tests can run subsets or reorder them.

use super::wordfilter::{self, WordFilter};
use super::{
    CheckContext, CheckKind, CheckOutcome, MessageCheck, ModerationConfig, ModerationResult,
    Rejection, RejectionAction, SpamTracker,
};
use crate::blacklist::BlacklistScheduler;
use crate::model::Subject;
use crate::store::Repository;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Build the canonical unit list.
pub fn standard_checks<S: Repository>(
    scheduler: BlacklistScheduler<S>,
    filter: WordFilter,
    config: ModerationConfig,
) -> Vec<Box<dyn MessageCheck>> {
    let filter = Arc::new(filter);
    vec![
        Box::new(BlacklistCheck {
            scheduler: scheduler.clone(),
        }),
        Box::new(SpamCheck {
            scheduler,
            tracker: Mutex::new(SpamTracker::new(config.spam.clone())),
            infraction_limit: config.spam.infraction_limit,
            auto_duration: config.auto_blacklist_duration,
            reaction: config.spam_reaction.clone(),
        }),
        Box::new(LengthCheck {
            max_chars: config.max_content_chars,
        }),
        Box::new(SlurCheck {
            filter: Arc::clone(&filter),
        }),
        Box::new(InviteCheck {
            patterns: config.invite_patterns.clone(),
        }),
        Box::new(StickerCheck),
        Box::new(AttachmentCheck {
            allowed_types: config.allowed_attachment_types.clone(),
            max_bytes: config.max_attachment_bytes,
        }),
        Box::new(ServerNameCheck {
            filter: Arc::clone(&filter),
        }),
        Box::new(ProfanityAuditCheck { filter }),
        Box::new(LinkTransform),
    ]
}

fn reject(check: CheckKind, action: RejectionAction) -> ModerationResult<CheckOutcome> {
    Ok(CheckOutcome::Reject(Rejection { check, action }))
}

/// Suspended senders and servers are dropped silently. A user's first
/// attempt after suspension gets a one-time DM with the reason.
pub struct BlacklistCheck<S: Repository> {
    pub scheduler: BlacklistScheduler<S>,
}

#[async_trait]
impl<S: Repository> MessageCheck for BlacklistCheck<S> {
    fn kind(&self) -> CheckKind {
        CheckKind::Blacklist
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        let hub = ctx.hub.id;
        let user_subject = Subject::User(ctx.message.sender_id.clone());
        let now = SystemTime::now();

        if let Some(entry) = self.scheduler.entry(&hub, &user_subject).await? {
            if entry.is_active_at(now) {
                if !entry.notified {
                    self.scheduler.mark_notified(&hub, &user_subject).await?;
                    let until = entry
                        .expires_at
                        .and_then(|expires| expires.duration_since(now).ok())
                        .map(|remaining| {
                            // round to seconds, humantime renders the rest
                            let secs = Duration::from_secs(remaining.as_secs());
                            format!(" Expires in {}.", humantime::format_duration(secs))
                        })
                        .unwrap_or_default();
                    return reject(
                        CheckKind::Blacklist,
                        RejectionAction::DirectMessage(format!(
                            "You are blacklisted from the hub **{}** for reason **{}**.{until}",
                            ctx.hub.name, entry.reason
                        )),
                    );
                }
                return reject(CheckKind::Blacklist, RejectionAction::Silent);
            }
        }

        let server_subject = Subject::Server(ctx.message.server_id.clone());
        if self.scheduler.is_active(&hub, &server_subject).await? {
            return reject(CheckKind::Blacklist, RejectionAction::Silent);
        }

        Ok(CheckOutcome::Pass)
    }
}

/// Sliding-window spam filter, gated on the hub's `spam_filter` setting.
/// At the infraction limit the sender is auto-blacklisted for a fixed
/// duration; every violation gets the timeout reaction.
pub struct SpamCheck<S: Repository> {
    pub scheduler: BlacklistScheduler<S>,
    pub tracker: Mutex<SpamTracker>,
    pub infraction_limit: u32,
    pub auto_duration: Duration,
    pub reaction: String,
}

#[async_trait]
impl<S: Repository> MessageCheck for SpamCheck<S> {
    fn kind(&self) -> CheckKind {
        CheckKind::SpamFilter
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if !ctx.hub.settings.spam_filter {
            return Ok(CheckOutcome::Pass);
        }

        let sender = ctx.message.sender_id.clone();
        let violation = {
            let mut tracker = self.tracker.lock().unwrap();
            let violation = tracker.record(&sender, ctx.message.sent_at);
            if violation.is_some_and(|v| v.infractions >= self.infraction_limit) {
                tracker.reset(&sender);
            }
            violation
        };

        let Some(violation) = violation else {
            return Ok(CheckOutcome::Pass);
        };

        if violation.infractions >= self.infraction_limit {
            self.scheduler
                .blacklist(
                    ctx.hub.id,
                    Subject::User(sender),
                    "Auto-blacklisted for spamming.",
                    Some(self.auto_duration),
                )
                .await?;
        }

        reject(
            CheckKind::SpamFilter,
            RejectionAction::React(self.reaction.clone()),
        )
    }
}

/// Content length cap, with a user-visible reply.
pub struct LengthCheck {
    pub max_chars: usize,
}

#[async_trait]
impl MessageCheck for LengthCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Length
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if ctx.message.content.chars().count() > self.max_chars {
            return reject(
                CheckKind::Length,
                RejectionAction::Reply(format!(
                    "Please keep your message shorter than {} characters.",
                    self.max_chars
                )),
            );
        }
        Ok(CheckOutcome::Pass)
    }
}

/// Slur-tier matches drop the message silently; the content is logged for
/// moderators, the author gets nothing.
pub struct SlurCheck {
    pub filter: Arc<WordFilter>,
}

#[async_trait]
impl MessageCheck for SlurCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Slur
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if self.filter.has_slur(&ctx.message.content) {
            self.filter.log_match(
                &ctx.message.content,
                &ctx.message.sender_id,
                &ctx.message.server_id,
                &ctx.hub.id,
            );
            return reject(CheckKind::Slur, RejectionAction::Silent);
        }
        Ok(CheckOutcome::Pass)
    }
}

/// Third-party invite links, gated on the hub's `block_invites` setting.
pub struct InviteCheck {
    pub patterns: Vec<String>,
}

#[async_trait]
impl MessageCheck for InviteCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::InviteLink
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if !ctx.hub.settings.block_invites {
            return Ok(CheckOutcome::Pass);
        }
        if wordfilter::contains_invite(&ctx.message.content, &self.patterns) {
            let text = match &ctx.hub.settings.invite {
                Some(invite) => format!(
                    "Do not advertise other servers in the hub. Use the hub's own invite instead: {invite}"
                ),
                None => "Do not advertise other servers in the hub. Ask a hub moderator to set \
                         the hub's invite instead."
                    .to_string(),
            };
            return reject(CheckKind::InviteLink, RejectionAction::Reply(text));
        }
        Ok(CheckOutcome::Pass)
    }
}

/// Sticker-only messages cannot be relayed.
pub struct StickerCheck;

#[async_trait]
impl MessageCheck for StickerCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::StickerOnly
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if ctx.message.sticker_count > 0 && ctx.message.content.is_empty() {
            return reject(
                CheckKind::StickerOnly,
                RejectionAction::Reply(
                    "Stickers cannot be relayed to other servers. Send an image or a message \
                     alongside instead."
                        .to_string(),
                ),
            );
        }
        Ok(CheckOutcome::Pass)
    }
}

/// First attachment only: type allowlist and size cap.
pub struct AttachmentCheck {
    pub allowed_types: Vec<String>,
    pub max_bytes: u64,
}

#[async_trait]
impl MessageCheck for AttachmentCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::Attachment
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        let Some(attachment) = &ctx.message.attachment else {
            return Ok(CheckOutcome::Pass);
        };

        if let Some(content_type) = &attachment.content_type {
            if !self.allowed_types.iter().any(|t| t == content_type) {
                return reject(
                    CheckKind::Attachment,
                    RejectionAction::Reply(
                        "Only images and gifs can be relayed to other servers.".to_string(),
                    ),
                );
            }
        }

        if attachment.size_bytes > self.max_bytes {
            return reject(
                CheckKind::Attachment,
                RejectionAction::Reply(format!(
                    "Please keep attachments under {} MiB.",
                    self.max_bytes / (1024 * 1024)
                )),
            );
        }

        Ok(CheckOutcome::Pass)
    }
}

/// A server whose display name matches the filter is blocked from relaying
/// entirely until the name is fixed; the warning lands in the channel.
pub struct ServerNameCheck {
    pub filter: Arc<WordFilter>,
}

#[async_trait]
impl MessageCheck for ServerNameCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::ServerName
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        let name = &ctx.message.server_name;
        if self.filter.has_profanity(name) || self.filter.has_slur(name) {
            return reject(
                CheckKind::ServerName,
                RejectionAction::ChannelNotice(
                    "This server's name contains terms that cannot be shown in the hub. \
                     Please fix the server name before chatting."
                        .to_string(),
                ),
            );
        }
        Ok(CheckOutcome::Pass)
    }
}

/// Profanity-tier matches are logged for audit but do not block relay.
pub struct ProfanityAuditCheck {
    pub filter: Arc<WordFilter>,
}

#[async_trait]
impl MessageCheck for ProfanityAuditCheck {
    fn kind(&self) -> CheckKind {
        CheckKind::ProfanityAudit
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if self.filter.has_profanity(&ctx.message.content) {
            self.filter.log_match(
                &ctx.message.content,
                &ctx.message.sender_id,
                &ctx.message.server_id,
                &ctx.hub.id,
            );
        }
        Ok(CheckOutcome::Pass)
    }
}

/// Not a gate: with the hub's `hide_links` setting on, URLs outside the
/// media allowlist are replaced in the relayed copy. The stored original is
/// untouched.
pub struct LinkTransform;

#[async_trait]
impl MessageCheck for LinkTransform {
    fn kind(&self) -> CheckKind {
        CheckKind::HideLinks
    }

    async fn run(&self, ctx: &mut CheckContext<'_>) -> ModerationResult<CheckOutcome> {
        if ctx.hub.settings.hide_links && wordfilter::has_hideable_link(&ctx.relay_content) {
            ctx.relay_content = wordfilter::replace_links(&ctx.relay_content);
        }
        Ok(CheckOutcome::Pass)
    }
}
