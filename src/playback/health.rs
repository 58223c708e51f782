//! Playback health state machine.
//!
//! Pure: it never touches the player or a clock. Callers feed it player
//! states, timer ticks and errors, and carry out the [`HealthAction`]s it
//! returns. Every recovery goes through [`PlaybackHealthEngine::trigger_recovery`].

use crate::config::{HealthConfig, RetryPolicy};
use crate::player::{PlayerErrorKind, PlayerState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReason {
    BufferingTimeout,
    Error,
    Stuck,
    StreamEnded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Idle,
    Buffering,
    Ready,
    Ended,
    Stuck,
    Errored,
    Recovering,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthAction {
    /// Start the refresh sequence. `hard` allows stop+clear.
    Refresh { reason: RecoveryReason, hard: bool },
    ScheduleRefresh { reason: RecoveryReason, after: Duration },
    /// Re-assert play-when-ready after `after`, without reloading.
    ScheduleResume { after: Duration },
    Resume,
    ArmBufferingWatch,
    DisarmBufferingWatch,
    ArmStuckWatch,
    DisarmStuckWatch,
    HideOverlay,
    GiveUp { message: String },
}

#[derive(Debug, Default)]
struct Session {
    url: String,
    retry_count: u32,
    buffering_started_at: Option<Instant>,
    last_observed_position: Option<Duration>,
    consecutive_stuck_checks: u32,
    /// Between a trigger and the reload it causes.
    in_flight: bool,
    /// An error retry is scheduled and has not come due yet.
    refresh_pending: bool,
    /// Player errors since playback last advanced; drives the retry backoff.
    consecutive_errors: u32,
    /// Overlay shown, waiting for Ready.
    awaiting_ready: bool,
    gave_up: bool,
}

pub struct PlaybackHealthEngine {
    cfg: HealthConfig,
    state: HealthState,
    session: Option<Session>,
}

impl PlaybackHealthEngine {
    pub fn new(cfg: HealthConfig) -> Self {
        Self {
            cfg,
            state: HealthState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    #[cfg(test)]
    pub fn retry_count(&self) -> u32 {
        self.session.as_ref().map_or(0, |s| s.retry_count)
    }

    /// A new channel starts with a clean budget.
    pub fn begin_session(&mut self, url: &str) -> Vec<HealthAction> {
        self.session = Some(Session {
            url: url.to_string(),
            ..Session::default()
        });
        self.state = HealthState::Idle;
        vec![HealthAction::DisarmBufferingWatch, HealthAction::DisarmStuckWatch]
    }

    pub fn on_state(&mut self, player: PlayerState, now: Instant) -> Vec<HealthAction> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        match player {
            PlayerState::Buffering => {
                if session.buffering_started_at.is_none() {
                    session.buffering_started_at = Some(now);
                }
                session.consecutive_stuck_checks = 0;
                session.last_observed_position = None;
                if self.state != HealthState::Recovering {
                    self.state = HealthState::Buffering;
                }
                vec![HealthAction::DisarmStuckWatch, HealthAction::ArmBufferingWatch]
            }
            PlayerState::Ready => {
                session.buffering_started_at = None;
                session.consecutive_stuck_checks = 0;
                session.last_observed_position = None;
                self.state = HealthState::Ready;
                let mut actions = vec![HealthAction::DisarmBufferingWatch, HealthAction::ArmStuckWatch];
                if session.awaiting_ready {
                    session.awaiting_ready = false;
                    info!(retries = session.retry_count, "playback recovered");
                    actions.push(HealthAction::HideOverlay);
                }
                actions
            }
            PlayerState::Ended => {
                self.state = HealthState::Ended;
                self.trigger_recovery(RecoveryReason::StreamEnded)
            }
            PlayerState::Idle => {
                session.buffering_started_at = None;
                if self.state != HealthState::Recovering {
                    self.state = HealthState::Idle;
                }
                vec![HealthAction::DisarmBufferingWatch, HealthAction::DisarmStuckWatch]
            }
        }
    }

    /// Buffering watch tick.
    pub fn poll_buffering(&mut self, now: Instant) -> Vec<HealthAction> {
        let timeout = self.cfg.buffering_timeout();
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let Some(since) = session.buffering_started_at else {
            return Vec::new();
        };
        if now.saturating_duration_since(since) < timeout {
            return Vec::new();
        }
        warn!(
            buffering_ms = now.saturating_duration_since(since).as_millis() as u64,
            "buffering timeout"
        );
        // This window is spent either way; the reload opens the next one.
        session.buffering_started_at = None;
        self.trigger_recovery(RecoveryReason::BufferingTimeout)
    }

    /// Stuck watch tick. Not playing counts as a paused watch, not a miss.
    pub fn sample_position(&mut self, position: Option<Duration>, playing: bool) -> Vec<HealthAction> {
        let min_advance = self.cfg.stuck_min_advance();
        let required = self.cfg.stuck_checks.max(1);
        let ready = self.state == HealthState::Ready;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let (Some(pos), true, true) = (position, playing, ready) else {
            session.consecutive_stuck_checks = 0;
            session.last_observed_position = None;
            return Vec::new();
        };
        let Some(last) = session.last_observed_position else {
            session.last_observed_position = Some(pos);
            return Vec::new();
        };

        let advance = if pos > last { pos - last } else { last - pos };
        if advance > min_advance {
            session.consecutive_stuck_checks = 0;
            session.last_observed_position = Some(pos);
            // Sustained playback refills the budget.
            session.retry_count = 0;
            session.consecutive_errors = 0;
            return Vec::new();
        }

        session.consecutive_stuck_checks += 1;
        debug!(checks = session.consecutive_stuck_checks, required, "position unchanged");
        if session.consecutive_stuck_checks < required {
            return Vec::new();
        }
        self.state = HealthState::Stuck;
        self.trigger_recovery(RecoveryReason::Stuck)
    }

    /// Player-reported error. Reloads always go through a delayed retry
    /// that backs off while the url keeps failing; a player that is Ready
    /// and playing is left alone.
    pub fn on_error(&mut self, kind: PlayerErrorKind, player: PlayerState, playing: bool) -> Vec<HealthAction> {
        let base = match kind {
            PlayerErrorKind::Network => self.cfg.network_retry(),
            _ => self.cfg.error_retry(),
        };
        let cap = self.cfg.error_backoff_max();
        let discontinuity_resume = self.cfg.discontinuity_resume();
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if kind == PlayerErrorKind::AudioDiscontinuity {
            return vec![HealthAction::ScheduleResume {
                after: discontinuity_resume,
            }];
        }
        if player == PlayerState::Ready && playing {
            debug!(?kind, "error reported while playing, no refresh");
            return Vec::new();
        }
        if session.gave_up || session.in_flight || session.refresh_pending {
            debug!(?kind, "recovery already pending");
            return Vec::new();
        }

        let after = backoff(base, session.consecutive_errors, cap);
        session.consecutive_errors = session.consecutive_errors.saturating_add(1);
        session.refresh_pending = true;
        self.state = HealthState::Errored;
        vec![HealthAction::ScheduleRefresh {
            reason: RecoveryReason::Error,
            after,
        }]
    }

    /// A delayed resume came due.
    pub fn on_resume_due(&mut self, player: PlayerState) -> Vec<HealthAction> {
        match player {
            PlayerState::Ready | PlayerState::Buffering => vec![HealthAction::Resume],
            _ => self.trigger_recovery(RecoveryReason::Error),
        }
    }

    /// A delayed refresh came due. Skipped when playback healed meanwhile.
    pub fn on_refresh_due(
        &mut self,
        reason: RecoveryReason,
        player: PlayerState,
        playing: bool,
    ) -> Vec<HealthAction> {
        if let Some(session) = self.session.as_mut() {
            session.refresh_pending = false;
        }
        if player == PlayerState::Ready && playing {
            debug!(?reason, "playing again, refresh skipped");
            if self.state == HealthState::Errored {
                self.state = HealthState::Ready;
            }
            return Vec::new();
        }
        self.trigger_recovery(reason)
    }

    pub fn trigger_recovery(&mut self, reason: RecoveryReason) -> Vec<HealthAction> {
        let policy = self.cfg.retry_policy;
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        if session.gave_up {
            return Vec::new();
        }
        if session.in_flight {
            debug!(?reason, "recovery already in flight");
            return Vec::new();
        }

        let mut actions = vec![HealthAction::DisarmBufferingWatch, HealthAction::DisarmStuckWatch];
        if let RetryPolicy::Bounded { max_attempts } = policy
            && session.retry_count >= max_attempts
        {
            session.gave_up = true;
            self.state = HealthState::Errored;
            warn!(attempts = session.retry_count, "giving up on channel");
            actions.push(HealthAction::GiveUp {
                message: format!("Channel unavailable after {} attempts", session.retry_count),
            });
            return actions;
        }

        session.retry_count += 1;
        session.in_flight = true;
        session.awaiting_ready = true;
        session.buffering_started_at = None;
        session.last_observed_position = None;
        session.consecutive_stuck_checks = 0;
        self.state = HealthState::Recovering;
        info!(?reason, url = %session.url, attempt = session.retry_count, "recovering playback");

        actions.push(HealthAction::Refresh {
            reason,
            hard: reason == RecoveryReason::StreamEnded,
        });
        actions
    }

    /// The refresh sequence re-issued the url; a new buffering window starts.
    pub fn reload_issued(&mut self, now: Instant) -> Vec<HealthAction> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        session.in_flight = false;
        session.buffering_started_at = Some(now);
        vec![HealthAction::ArmBufferingWatch]
    }

    /// Host paused or went away: every watch stops.
    pub fn suspend(&mut self) -> Vec<HealthAction> {
        if let Some(session) = self.session.as_mut() {
            // Pending retry timers are cancelled along with the watches.
            session.refresh_pending = false;
            session.buffering_started_at = None;
            session.last_observed_position = None;
            session.consecutive_stuck_checks = 0;
        }
        vec![HealthAction::DisarmBufferingWatch, HealthAction::DisarmStuckWatch]
    }

    /// Watches come back only if the player is already Ready.
    pub fn resume(&mut self, player: PlayerState) -> Vec<HealthAction> {
        if self.session.is_none() || player != PlayerState::Ready {
            return Vec::new();
        }
        self.state = HealthState::Ready;
        vec![HealthAction::ArmStuckWatch]
    }
}

/// `base` doubled per earlier failure, never above `cap`.
fn backoff(base: Duration, failures: u32, cap: Duration) -> Duration {
    base.saturating_mul(1u32 << failures.min(16)).min(cap.max(base))
}
