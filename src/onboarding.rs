//! Onboarding Gate
//!
//! Two-step confirmation every destination must complete before its first
//! hub join. Modeled as an explicit state machine per channel:
//!
//! ```text
//! NONE -> AWAITING_NEXT -> AWAITING_ACCEPT -> ACCEPTED | CANCELLED | TIMED_OUT
//! ```
//!
//! The marker map is the mutual-exclusion mechanism: `begin` is a
//! test-and-set, so a second concurrent join attempt for the same channel
//! observes the marker and is told "in progress" without touching state.
//! Every terminal transition clears the marker unconditionally — NONE is
//! reachable from every state.
//!
//! The machine is driven either synthetically (`apply`, in tests) or by
//! [`run_onboarding`], which couples it to an injected prompt capability
//! with one timeout per stage.

use crate::model::ChannelId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Result type for onboarding operations
pub type OnboardingResult<T> = Result<T, OnboardingError>;

/// Onboarding errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OnboardingError {
    #[error("onboarding already in progress for channel {0}")]
    InProgress(ChannelId),

    #[error("no onboarding in progress for channel {0}")]
    NotStarted(ChannelId),

    #[error("event {event:?} is not valid in state {state:?}")]
    InvalidEvent {
        state: OnboardingState,
        event: OnboardingEvent,
    },
}

/// Prompt timeouts. The marker TTL is their sum: a marker older than that
/// can only be a leak and is evicted.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    pub intro_timeout: Duration,
    pub rules_timeout: Duration,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            intro_timeout: Duration::from_secs(120),
            rules_timeout: Duration::from_secs(60),
        }
    }
}

impl OnboardingConfig {
    fn marker_ttl(&self) -> Duration {
        self.intro_timeout + self.rules_timeout
    }
}

/// Gate states. The two `Awaiting` states are the only ones ever stored;
/// terminal states are returned, never kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingState {
    AwaitingNext,
    AwaitingAccept,
    Accepted,
    Cancelled,
    TimedOut,
}

impl OnboardingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingNext | Self::AwaitingAccept)
    }
}

/// Events fed into the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingEvent {
    Next,
    Accept,
    Cancel,
    Timeout,
}

/// User's choice at the intro prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntroChoice {
    Next,
    Cancel,
}

/// User's choice at the rules prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesChoice {
    Accept,
    Cancel,
}

/// Prompt capability: presents the two onboarding screens and resolves with
/// the pressed action, or `None` when the prompt was dismissed without a
/// choice. The gate applies the stage timeout around each call.
#[async_trait]
pub trait JoinPrompter: Send + Sync {
    async fn prompt_intro(&self, channel: &ChannelId, hub_name: &str) -> Option<IntroChoice>;
    async fn prompt_rules(&self, channel: &ChannelId, hub_name: &str) -> Option<RulesChoice>;
}

struct Marker {
    state: OnboardingState,
    started_at: Instant,
}

/// The gate: marker map plus timeouts. One instance per process.
pub struct OnboardingGate {
    markers: Mutex<HashMap<ChannelId, Marker>>,
    config: OnboardingConfig,
}

impl OnboardingGate {
    pub fn new(config: OnboardingConfig) -> Self {
        Self {
            markers: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Test-and-set entry: NONE -> AWAITING_NEXT. Fails with `InProgress`
    /// when a live marker exists; a stale marker (older than the TTL) is
    /// evicted first.
    pub fn begin(&self, channel: &ChannelId) -> OnboardingResult<()> {
        let mut markers = self.markers.lock().unwrap();
        if let Some(marker) = markers.get(channel) {
            if marker.started_at.elapsed() <= self.config.marker_ttl() {
                return Err(OnboardingError::InProgress(channel.clone()));
            }
            debug!(channel = %channel, "evicting stale onboarding marker");
        }
        markers.insert(
            channel.clone(),
            Marker {
                state: OnboardingState::AwaitingNext,
                started_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Current non-terminal state, or None when no onboarding is in
    /// progress.
    pub fn state(&self, channel: &ChannelId) -> Option<OnboardingState> {
        self.markers
            .lock()
            .unwrap()
            .get(channel)
            .map(|m| m.state)
    }

    /// Feed one event into the machine. Terminal results clear the marker.
    pub fn apply(
        &self,
        channel: &ChannelId,
        event: OnboardingEvent,
    ) -> OnboardingResult<OnboardingState> {
        let mut markers = self.markers.lock().unwrap();
        let marker = markers
            .get_mut(channel)
            .ok_or_else(|| OnboardingError::NotStarted(channel.clone()))?;

        let next = match (marker.state, event) {
            (OnboardingState::AwaitingNext, OnboardingEvent::Next) => OnboardingState::AwaitingAccept,
            (OnboardingState::AwaitingAccept, OnboardingEvent::Accept) => OnboardingState::Accepted,
            (_, OnboardingEvent::Cancel) => OnboardingState::Cancelled,
            (_, OnboardingEvent::Timeout) => OnboardingState::TimedOut,
            (state, event) => return Err(OnboardingError::InvalidEvent { state, event }),
        };

        if next.is_terminal() {
            markers.remove(channel);
            info!(channel = %channel, outcome = ?next, "onboarding finished");
        } else {
            marker.state = next;
        }
        Ok(next)
    }

    /// Evict markers older than the TTL (safety net for drivers that died
    /// mid-prompt). Returns how many were dropped.
    pub fn evict_stale(&self) -> usize {
        let ttl = self.config.marker_ttl();
        let mut markers = self.markers.lock().unwrap();
        let before = markers.len();
        markers.retain(|_, m| m.started_at.elapsed() <= ttl);
        before - markers.len()
    }

    /// Markers currently held (for assertions)
    pub fn in_progress(&self) -> usize {
        self.markers.lock().unwrap().len()
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }
}

impl Default for OnboardingGate {
    fn default() -> Self {
        Self::new(OnboardingConfig::default())
    }
}

/// Drive a full onboarding round for `channel` against a live prompter.
///
/// Returns the terminal state, or `InProgress` if another round holds the
/// marker. Every exit path clears the marker via a terminal `apply`.
pub async fn run_onboarding<P: JoinPrompter>(
    gate: &OnboardingGate,
    prompter: &P,
    channel: &ChannelId,
    hub_name: &str,
) -> OnboardingResult<OnboardingState> {
    gate.begin(channel)?;
    let config = gate.config().clone();

    // stage 1: intro prompt, Cancel/Next
    let intro = tokio::time::timeout(
        config.intro_timeout,
        prompter.prompt_intro(channel, hub_name),
    )
    .await;
    match intro {
        Err(_) => return gate.apply(channel, OnboardingEvent::Timeout),
        Ok(None) | Ok(Some(IntroChoice::Cancel)) => {
            return gate.apply(channel, OnboardingEvent::Cancel)
        }
        Ok(Some(IntroChoice::Next)) => {
            gate.apply(channel, OnboardingEvent::Next)?;
        }
    }

    // stage 2: rules prompt, Cancel/Accept
    let rules = tokio::time::timeout(
        config.rules_timeout,
        prompter.prompt_rules(channel, hub_name),
    )
    .await;
    match rules {
        Err(_) => gate.apply(channel, OnboardingEvent::Timeout),
        Ok(None) | Ok(Some(RulesChoice::Cancel)) => gate.apply(channel, OnboardingEvent::Cancel),
        Ok(Some(RulesChoice::Accept)) => gate.apply(channel, OnboardingEvent::Accept),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str) -> ChannelId {
        ChannelId(name.to_string())
    }

    #[test]
    fn test_happy_path_next_then_accept() {
        let gate = OnboardingGate::default();
        let ch = channel("c1");

        gate.begin(&ch).unwrap();
        assert_eq!(gate.state(&ch), Some(OnboardingState::AwaitingNext));

        assert_eq!(
            gate.apply(&ch, OnboardingEvent::Next).unwrap(),
            OnboardingState::AwaitingAccept
        );
        assert_eq!(
            gate.apply(&ch, OnboardingEvent::Accept).unwrap(),
            OnboardingState::Accepted
        );

        // terminal transition cleared the marker
        assert_eq!(gate.state(&ch), None);
        assert_eq!(gate.in_progress(), 0);
    }

    #[test]
    fn test_second_begin_is_told_in_progress() {
        let gate = OnboardingGate::default();
        let ch = channel("c1");

        gate.begin(&ch).unwrap();
        assert_eq!(
            gate.begin(&ch).unwrap_err(),
            OnboardingError::InProgress(ch.clone())
        );
        // the first round's state is untouched
        assert_eq!(gate.state(&ch), Some(OnboardingState::AwaitingNext));
        assert_eq!(gate.in_progress(), 1);
    }

    #[test]
    fn test_cancel_and_timeout_clear_marker_at_either_stage() {
        let gate = OnboardingGate::default();

        for event in [OnboardingEvent::Cancel, OnboardingEvent::Timeout] {
            let expected = if event == OnboardingEvent::Cancel {
                OnboardingState::Cancelled
            } else {
                OnboardingState::TimedOut
            };

            // at AWAITING_NEXT
            let ch = channel("stage1");
            gate.begin(&ch).unwrap();
            assert_eq!(gate.apply(&ch, event).unwrap(), expected);
            assert_eq!(gate.state(&ch), None);

            // at AWAITING_ACCEPT
            let ch = channel("stage2");
            gate.begin(&ch).unwrap();
            gate.apply(&ch, OnboardingEvent::Next).unwrap();
            assert_eq!(gate.apply(&ch, event).unwrap(), expected);
            assert_eq!(gate.state(&ch), None);
        }
    }

    #[test]
    fn test_invalid_events_rejected_without_state_change() {
        let gate = OnboardingGate::default();
        let ch = channel("c1");

        gate.begin(&ch).unwrap();
        // Accept is not presentable at the intro stage
        let err = gate.apply(&ch, OnboardingEvent::Accept).unwrap_err();
        assert!(matches!(err, OnboardingError::InvalidEvent { .. }));
        assert_eq!(gate.state(&ch), Some(OnboardingState::AwaitingNext));

        gate.apply(&ch, OnboardingEvent::Next).unwrap();
        let err = gate.apply(&ch, OnboardingEvent::Next).unwrap_err();
        assert!(matches!(err, OnboardingError::InvalidEvent { .. }));
        assert_eq!(gate.state(&ch), Some(OnboardingState::AwaitingAccept));
    }

    #[test]
    fn test_apply_without_begin_errors() {
        let gate = OnboardingGate::default();
        assert_eq!(
            gate.apply(&channel("c1"), OnboardingEvent::Next).unwrap_err(),
            OnboardingError::NotStarted(channel("c1"))
        );
    }

    #[test]
    fn test_after_terminal_a_fresh_round_can_begin() {
        let gate = OnboardingGate::default();
        let ch = channel("c1");

        gate.begin(&ch).unwrap();
        gate.apply(&ch, OnboardingEvent::Cancel).unwrap();
        gate.begin(&ch).unwrap();
        assert_eq!(gate.state(&ch), Some(OnboardingState::AwaitingNext));
    }

    #[test]
    fn test_channels_are_independent() {
        let gate = OnboardingGate::default();
        gate.begin(&channel("c1")).unwrap();
        gate.begin(&channel("c2")).unwrap();

        gate.apply(&channel("c1"), OnboardingEvent::Cancel).unwrap();
        assert_eq!(gate.state(&channel("c1")), None);
        assert_eq!(
            gate.state(&channel("c2")),
            Some(OnboardingState::AwaitingNext)
        );
    }

    #[test]
    fn test_stale_marker_eviction() {
        let gate = OnboardingGate::new(OnboardingConfig {
            intro_timeout: Duration::from_millis(1),
            rules_timeout: Duration::from_millis(1),
        });
        let ch = channel("c1");
        gate.begin(&ch).unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(gate.evict_stale(), 1);
        assert_eq!(gate.in_progress(), 0);

        // and begin itself recovers from a leaked marker
        gate.begin(&ch).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        gate.begin(&ch).unwrap();
    }

    mod driver {
        use super::*;
        use std::sync::Mutex as StdMutex;

        /// Scripted prompter: pops pre-programmed choices; None = hang
        /// until the stage timeout fires.
        struct ScriptedPrompter {
            intro: StdMutex<Vec<Option<IntroChoice>>>,
            rules: StdMutex<Vec<Option<RulesChoice>>>,
        }

        impl ScriptedPrompter {
            fn new(intro: Vec<Option<IntroChoice>>, rules: Vec<Option<RulesChoice>>) -> Self {
                Self {
                    intro: StdMutex::new(intro),
                    rules: StdMutex::new(rules),
                }
            }
        }

        #[async_trait]
        impl JoinPrompter for ScriptedPrompter {
            async fn prompt_intro(&self, _: &ChannelId, _: &str) -> Option<IntroChoice> {
                let next = self.intro.lock().unwrap().pop();
                match next {
                    Some(Some(choice)) => Some(choice),
                    Some(None) | None => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            }

            async fn prompt_rules(&self, _: &ChannelId, _: &str) -> Option<RulesChoice> {
                let next = self.rules.lock().unwrap().pop();
                match next {
                    Some(Some(choice)) => Some(choice),
                    Some(None) | None => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            }
        }

        #[tokio::test]
        async fn test_driver_accepts() {
            let gate = OnboardingGate::default();
            let prompter = ScriptedPrompter::new(
                vec![Some(IntroChoice::Next)],
                vec![Some(RulesChoice::Accept)],
            );

            let outcome = run_onboarding(&gate, &prompter, &channel("c1"), "lounge")
                .await
                .unwrap();
            assert_eq!(outcome, OnboardingState::Accepted);
            assert_eq!(gate.in_progress(), 0);
        }

        #[tokio::test]
        async fn test_driver_cancel_at_rules() {
            let gate = OnboardingGate::default();
            let prompter = ScriptedPrompter::new(
                vec![Some(IntroChoice::Next)],
                vec![Some(RulesChoice::Cancel)],
            );

            let outcome = run_onboarding(&gate, &prompter, &channel("c1"), "lounge")
                .await
                .unwrap();
            assert_eq!(outcome, OnboardingState::Cancelled);
            assert_eq!(gate.in_progress(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_driver_timeout_at_intro() {
            let gate = OnboardingGate::default();
            let prompter = ScriptedPrompter::new(vec![None], vec![]);

            let outcome = run_onboarding(&gate, &prompter, &channel("c1"), "lounge")
                .await
                .unwrap();
            assert_eq!(outcome, OnboardingState::TimedOut);
            assert_eq!(gate.in_progress(), 0);
        }

        #[tokio::test(start_paused = true)]
        async fn test_driver_timeout_at_rules() {
            let gate = OnboardingGate::default();
            let prompter =
                ScriptedPrompter::new(vec![Some(IntroChoice::Next)], vec![None]);

            let outcome = run_onboarding(&gate, &prompter, &channel("c1"), "lounge")
                .await
                .unwrap();
            assert_eq!(outcome, OnboardingState::TimedOut);
            assert_eq!(gate.in_progress(), 0);
        }

        #[tokio::test]
        async fn test_driver_concurrent_round_told_in_progress() {
            let gate = OnboardingGate::default();
            gate.begin(&channel("c1")).unwrap();

            let prompter = ScriptedPrompter::new(
                vec![Some(IntroChoice::Next)],
                vec![Some(RulesChoice::Accept)],
            );
            let err = run_onboarding(&gate, &prompter, &channel("c1"), "lounge")
                .await
                .unwrap_err();
            assert_eq!(err, OnboardingError::InProgress(channel("c1")));
        }
    }
}
