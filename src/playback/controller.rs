//! Single owner of the player on the event loop.
//!
//! Nothing here sleeps: settle and refresh delays, retries and watch ticks
//! are spawned timers that post [`ControlEvent`]s back to the loop.

use super::health::{HealthAction, HealthState, PlaybackHealthEngine, RecoveryReason};
use crate::app::events::{ControlEvent, Event, HostEvent};
use crate::app::state::Toast;
use crate::config::{HealthConfig, PlayerConfig};
use crate::player::{Player, PlayerEvent, PlayerState};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub struct PlaybackController {
    player: Box<dyn Player>,
    engine: PlaybackHealthEngine,
    cfg: PlayerConfig,
    health: HealthConfig,
    tx: mpsc::Sender<Event>,

    generation: u64,
    current_url: Option<String>,
    catalog_ready: bool,
    pending_default: Option<String>,
    user_selected: bool,
    overlay: bool,
    suspended: bool,
    /// A reload came due while the host was paused; it runs on resume.
    reload_on_resume: bool,

    buffering_watch: Option<JoinHandle<()>>,
    stuck_watch: Option<JoinHandle<()>>,
    /// Settle and reload steps; these finish a sequence already started.
    sequence_tasks: Vec<JoinHandle<()>>,
    /// Delayed retries and resumes; dropped when the host pauses.
    recovery_tasks: Vec<JoinHandle<()>>,
    notices: Vec<Toast>,
}

impl PlaybackController {
    pub fn new(
        player: Box<dyn Player>,
        cfg: PlayerConfig,
        health: HealthConfig,
        tx: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            player,
            engine: PlaybackHealthEngine::new(health.clone()),
            cfg,
            health,
            tx,
            generation: 0,
            current_url: None,
            catalog_ready: false,
            pending_default: None,
            user_selected: false,
            overlay: false,
            suspended: false,
            reload_on_resume: false,
            buffering_watch: None,
            stuck_watch: None,
            sequence_tasks: Vec::new(),
            recovery_tasks: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn overlay_visible(&self) -> bool {
        self.overlay
    }

    #[cfg(test)]
    pub fn health_state(&self) -> HealthState {
        self.engine.state()
    }

    pub fn player_state(&self) -> PlayerState {
        self.player.state()
    }

    pub fn take_notices(&mut self) -> Vec<Toast> {
        std::mem::take(&mut self.notices)
    }

    /// `immediate` marks an explicit user pick; otherwise this is the
    /// system default, which waits for the catalog and never overrides the user.
    pub async fn play_channel(&mut self, url: &str, immediate: bool) {
        let url = url.trim();
        if url.is_empty() {
            error!("channel url is blank");
            self.notices.push(Toast::error("Channel URL is empty"));
            return;
        }

        if immediate {
            self.user_selected = true;
            self.pending_default = None;
            self.start_load(url).await;
            return;
        }
        if self.user_selected {
            debug!(url, "user selection active, default channel ignored");
            return;
        }
        if !self.catalog_ready {
            info!(url, "catalog still loading, default channel deferred");
            self.pending_default = Some(url.to_string());
            return;
        }
        self.start_load(url).await;
    }

    /// Ingestion reached a terminal state; a deferred default may play now.
    pub async fn mark_catalog_ready(&mut self) {
        if self.catalog_ready {
            return;
        }
        self.catalog_ready = true;
        if let Some(url) = self.pending_default.take()
            && !self.user_selected
        {
            info!(url = %url, "playing deferred default channel");
            self.start_load(&url).await;
        }
    }

    async fn start_load(&mut self, url: &str) {
        self.generation += 1;
        self.reload_on_resume = false;
        abort_all(&mut self.sequence_tasks);
        abort_all(&mut self.recovery_tasks);
        let actions = self.engine.begin_session(url);
        self.apply(actions).await;
        self.overlay = false;
        self.current_url = Some(url.to_string());
        info!(url, generation = self.generation, "switching channel");

        // Full stop first so two streams never overlap.
        let stopped = match self.player.stop().await {
            Ok(()) => self.player.clear().await,
            Err(e) => Err(e),
        };
        if let Err(e) = stopped {
            self.player_failed("stop", e);
            return;
        }
        let generation = self.generation;
        self.schedule_sequence(self.cfg.settle(), ControlEvent::LoadDue { generation });
    }

    async fn load_current(&mut self) {
        let Some(url) = self.current_url.clone() else {
            return;
        };
        if let Err(e) = self.load_url(&url).await {
            self.player_failed("load", e);
        }
    }

    async fn load_url(&mut self, url: &str) -> anyhow::Result<()> {
        self.player.set_url(url).await?;
        self.player.prepare().await?;
        self.player.play().await
    }

    fn player_failed(&mut self, what: &str, e: anyhow::Error) {
        warn!(error = %format!("{e:#}"), "player {what} failed");
        self.notices.push(Toast::error(format!("Channel switch failed: {e:#}")));
    }

    pub async fn on_player_event(&mut self, ev: PlayerEvent) {
        let actions = match ev {
            PlayerEvent::StateChanged(state) => {
                debug!(?state, "player state");
                self.engine.on_state(state, Instant::now())
            }
            PlayerEvent::Error(e) => {
                warn!(kind = ?e.kind, error = %e, "player error");
                self.engine
                    .on_error(e.kind, self.player.state(), self.player.is_playing())
            }
        };
        self.apply(actions).await;
    }

    pub async fn on_control(&mut self, ev: ControlEvent) {
        if ev.generation() != self.generation {
            debug!(?ev, current = self.generation, "stale control event dropped");
            return;
        }
        let actions = match ev {
            ControlEvent::LoadDue { .. } => {
                self.load_current().await;
                Vec::new()
            }
            ControlEvent::ReloadDue { .. } => {
                if self.suspended {
                    info!("host paused, reload held until resume");
                    self.reload_on_resume = true;
                } else {
                    self.load_current().await;
                }
                // Even a failed or held reload closes the in-flight window
                // so the watches can try again.
                self.engine.reload_issued(Instant::now())
            }
            ControlEvent::RefreshDue { reason, .. } => {
                self.engine
                    .on_refresh_due(reason, self.player.state(), self.player.is_playing())
            }
            ControlEvent::ResumeDue { .. } => self.engine.on_resume_due(self.player.state()),
            ControlEvent::BufferingPoll { .. } => {
                if self.buffering_watch.is_none() {
                    return;
                }
                self.engine.poll_buffering(Instant::now())
            }
            ControlEvent::StuckSample { .. } => {
                if self.stuck_watch.is_none() {
                    return;
                }
                self.engine
                    .sample_position(self.player.position(), self.player.is_playing())
            }
        };
        self.apply(actions).await;
    }

    pub async fn on_host(&mut self, ev: HostEvent) {
        match ev {
            HostEvent::Pause => {
                info!("host paused, watches cancelled");
                self.suspended = true;
                abort_all(&mut self.recovery_tasks);
                let actions = self.engine.suspend();
                self.apply(actions).await;
                if let Err(e) = self.player.pause().await {
                    warn!(error = %format!("{e:#}"), "pause failed");
                }
            }
            HostEvent::Resume => {
                info!("host resumed");
                self.suspended = false;
                if std::mem::take(&mut self.reload_on_resume) {
                    self.load_current().await;
                    let actions = self.engine.reload_issued(Instant::now());
                    self.apply(actions).await;
                    return;
                }
                if let Err(e) = self.player.play().await {
                    warn!(error = %format!("{e:#}"), "resume failed");
                }
                let actions = self.engine.resume(self.player.state());
                self.apply(actions).await;
            }
            HostEvent::Shutdown => self.shutdown().await,
        }
    }

    pub async fn shutdown(&mut self) {
        self.generation += 1;
        abort_all(&mut self.sequence_tasks);
        abort_all(&mut self.recovery_tasks);
        disarm(&mut self.buffering_watch);
        disarm(&mut self.stuck_watch);
        if let Err(e) = self.player.stop().await {
            debug!(error = %format!("{e:#}"), "stop on shutdown failed");
        }
    }

    async fn apply(&mut self, actions: Vec<HealthAction>) {
        let generation = self.generation;
        for action in actions {
            match action {
                HealthAction::Refresh { reason, hard } => self.refresh(reason, hard).await,
                HealthAction::ScheduleRefresh { reason, after } => {
                    debug!(?reason, after_ms = after.as_millis() as u64, "refresh scheduled");
                    self.schedule_recovery(after, ControlEvent::RefreshDue { generation, reason });
                }
                HealthAction::ScheduleResume { after } => {
                    self.schedule_recovery(after, ControlEvent::ResumeDue { generation });
                }
                HealthAction::Resume => {
                    if let Err(e) = self.player.play().await {
                        warn!(error = %format!("{e:#}"), "resume after discontinuity failed");
                    }
                }
                HealthAction::ArmBufferingWatch => {
                    if !self.suspended {
                        let ev = ControlEvent::BufferingPoll { generation };
                        arm(&mut self.buffering_watch, &self.tx, self.health.buffering_poll(), ev);
                    }
                }
                HealthAction::ArmStuckWatch => {
                    if !self.suspended {
                        let ev = ControlEvent::StuckSample { generation };
                        arm(&mut self.stuck_watch, &self.tx, self.health.stuck_sample(), ev);
                    }
                }
                HealthAction::DisarmBufferingWatch => disarm(&mut self.buffering_watch),
                HealthAction::DisarmStuckWatch => disarm(&mut self.stuck_watch),
                HealthAction::HideOverlay => self.overlay = false,
                HealthAction::GiveUp { message } => {
                    self.overlay = false;
                    self.notices.push(Toast::error(message));
                }
            }
        }
    }

    /// Keeps the last frame: pause, overlay, short delay, same url again.
    /// Only a stream that ended gets a full stop+clear.
    async fn refresh(&mut self, reason: RecoveryReason, hard: bool) {
        if self.current_url.is_none() {
            return;
        }
        self.overlay = true;
        let result = if hard {
            match self.player.stop().await {
                Ok(()) => self.player.clear().await,
                Err(e) => Err(e),
            }
        } else {
            self.player.pause().await
        };
        if let Err(e) = result {
            warn!(?reason, error = %format!("{e:#}"), "refresh could not halt player");
        }
        let generation = self.generation;
        self.schedule_sequence(self.cfg.refresh_delay(), ControlEvent::ReloadDue { generation });
    }

    fn schedule_sequence(&mut self, after: Duration, ev: ControlEvent) {
        self.sequence_tasks.retain(|h| !h.is_finished());
        self.sequence_tasks.push(post_after(self.tx.clone(), after, ev));
    }

    fn schedule_recovery(&mut self, after: Duration, ev: ControlEvent) {
        self.recovery_tasks.retain(|h| !h.is_finished());
        self.recovery_tasks.push(post_after(self.tx.clone(), after, ev));
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        abort_all(&mut self.sequence_tasks);
        abort_all(&mut self.recovery_tasks);
        disarm(&mut self.buffering_watch);
        disarm(&mut self.stuck_watch);
    }
}

fn post_after(tx: mpsc::Sender<Event>, after: Duration, ev: ControlEvent) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(after).await;
        let _ = tx.send(Event::Control(ev)).await;
    })
}

fn arm(slot: &mut Option<JoinHandle<()>>, tx: &mpsc::Sender<Event>, period: Duration, ev: ControlEvent) {
    if slot.as_ref().is_some_and(|h| !h.is_finished()) {
        return;
    }
    let tx = tx.clone();
    *slot = Some(tokio::spawn(async move {
        let mut ticks = tokio::time::interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            if tx.send(Event::Control(ev)).await.is_err() {
                break;
            }
        }
    }));
}

fn disarm(slot: &mut Option<JoinHandle<()>>) {
    if let Some(h) = slot.take() {
        h.abort();
    }
}

fn abort_all(tasks: &mut Vec<JoinHandle<()>>) {
    for h in tasks.drain(..) {
        h.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakePlayer;

    fn controller() -> (PlaybackController, FakePlayer, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(64);
        let fake = FakePlayer::new();
        let ctl = PlaybackController::new(
            Box::new(fake.clone()),
            PlayerConfig::default(),
            HealthConfig::default(),
            tx,
        );
        (ctl, fake, rx)
    }

    /// Feed the next `n` posted events back into the controller.
    async fn pump(ctl: &mut PlaybackController, rx: &mut mpsc::Receiver<Event>, n: usize) {
        for _ in 0..n {
            match rx.recv().await {
                Some(Event::Control(ev)) => ctl.on_control(ev).await,
                Some(other) => panic!("unexpected event {other:?}"),
                None => return,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_url_only_notifies() {
        let (mut ctl, fake, _rx) = controller();
        ctl.play_channel("", true).await;
        ctl.play_channel("   ", false).await;
        assert!(fake.calls().is_empty());
        let notices = ctl.take_notices();
        assert_eq!(notices.len(), 2);
        assert!(notices[0].message.contains("empty"));
        assert!(ctl.current_url().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_pick_stops_settles_then_loads() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        assert_eq!(fake.calls(), vec!["stop", "clear"]);

        let before = Instant::now();
        pump(&mut ctl, &mut rx, 1).await;
        assert!(Instant::now() - before >= Duration::from_millis(150));
        assert_eq!(
            fake.calls(),
            vec!["stop", "clear", "set_url http://h/live/1.m3u8", "prepare", "play"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_waits_for_catalog() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/default.m3u8", false).await;
        assert!(fake.calls().is_empty());

        ctl.mark_catalog_ready().await;
        pump(&mut ctl, &mut rx, 1).await;
        assert!(fake.calls().contains(&"set_url http://h/live/default.m3u8".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_intent_preempts_default() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/default.m3u8", false).await;
        ctl.play_channel("http://h/live/user.m3u8", true).await;
        ctl.mark_catalog_ready().await;
        ctl.play_channel("http://h/live/default.m3u8", false).await;
        pump(&mut ctl, &mut rx, 1).await;

        let loads: Vec<_> = fake.calls().into_iter().filter(|c| c.starts_with("set_url")).collect();
        assert_eq!(loads, vec!["set_url http://h/live/user.m3u8"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_pick_drops_pending_load() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/a.m3u8", true).await;
        ctl.play_channel("http://h/live/b.m3u8", true).await;
        // the first settle timer was aborted; only one LoadDue arrives
        pump(&mut ctl, &mut rx, 1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());

        let loads: Vec<_> = fake.calls().into_iter().filter(|c| c.starts_with("set_url")).collect();
        assert_eq!(loads, vec!["set_url http://h/live/b.m3u8"]);
        assert_eq!(ctl.current_url(), Some("http://h/live/b.m3u8"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_stream_refreshes_once_without_stop() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Ready, true, Some(Duration::from_secs(42)));
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ready)).await;
        fake.reset_calls();

        // baseline + three misses, then the reload step
        pump(&mut ctl, &mut rx, 4).await;
        assert!(ctl.overlay_visible());
        assert_eq!(fake.calls(), vec!["pause"]);
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(
            fake.calls(),
            vec!["pause", "set_url http://h/live/1.m3u8", "prepare", "play"]
        );

        fake.set(PlayerState::Ready, true, Some(Duration::from_secs(50)));
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ready)).await;
        assert!(!ctl.overlay_visible());
        assert_eq!(ctl.health_state(), HealthState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffering_timeout_refreshes_once() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Buffering, false, None);
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Buffering)).await;
        fake.reset_calls();

        // ten polls reach the timeout, the eleventh event is the reload
        pump(&mut ctl, &mut rx, 10).await;
        assert_eq!(fake.calls(), vec!["pause"]);
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(fake.calls().iter().filter(|c| *c == "pause").count(), 1);
        assert_eq!(fake.calls().last().map(String::as_str), Some("play"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_end_reloads_with_stop_and_clear() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.reset_calls();

        fake.set(PlayerState::Ended, false, None);
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ended)).await;
        assert_eq!(fake.calls(), vec!["stop", "clear"]);
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(fake.calls().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_error_waits_before_refresh() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Idle, false, None);
        fake.reset_calls();

        let start = Instant::now();
        ctl.on_player_event(PlayerEvent::Error(crate::player::PlayerError::new(
            "tcp: Connection refused",
        )))
        .await;
        assert!(fake.calls().is_empty());
        pump(&mut ctl, &mut rx, 1).await;
        assert!(Instant::now() - start >= Duration::from_secs(2));
        assert_eq!(fake.calls(), vec!["pause"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decoder_error_leaves_healthy_stream_alone() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Ready, true, Some(Duration::from_secs(42)));
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ready)).await;
        fake.reset_calls();

        ctl.on_player_event(PlayerEvent::Error(crate::player::PlayerError::new(
            "mpv end-file error: h264: error while decoding MB 3 4",
        )))
        .await;
        assert!(fake.calls().is_empty());
        assert!(!ctl.overlay_visible());
        assert_eq!(ctl.health_state(), HealthState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_burst_reloads_once() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Idle, false, None);
        fake.reset_calls();

        let failed = || PlayerEvent::Error(crate::player::PlayerError::new("mpv end-file error: loading failed"));
        for _ in 0..5 {
            ctl.on_player_event(failed()).await;
        }
        assert!(fake.calls().is_empty());
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(fake.calls(), vec!["pause"]);

        // still failing while the reload is pending
        for _ in 0..3 {
            ctl.on_player_event(failed()).await;
        }
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(
            fake.calls(),
            vec!["pause", "set_url http://h/live/1.m3u8", "prepare", "play"]
        );

        // only buffering polls follow; no second refresh was queued
        tokio::time::sleep(Duration::from_secs(3)).await;
        while let Ok(ev) = rx.try_recv() {
            assert!(matches!(ev, Event::Control(ControlEvent::BufferingPoll { .. })));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_pause_holds_pending_reload() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Ready, true, Some(Duration::from_secs(42)));
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ready)).await;
        fake.reset_calls();

        // frozen: baseline + three misses starts a refresh
        pump(&mut ctl, &mut rx, 4).await;
        assert_eq!(fake.calls(), vec!["pause"]);

        ctl.on_host(HostEvent::Pause).await;
        pump(&mut ctl, &mut rx, 1).await;
        assert_eq!(fake.calls(), vec!["pause", "pause"]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        fake.reset_calls();
        ctl.on_host(HostEvent::Resume).await;
        assert_eq!(
            fake.calls(),
            vec!["set_url http://h/live/1.m3u8", "prepare", "play"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_pause_cancels_watches() {
        let (mut ctl, fake, mut rx) = controller();
        ctl.play_channel("http://h/live/1.m3u8", true).await;
        pump(&mut ctl, &mut rx, 1).await;
        fake.set(PlayerState::Ready, true, Some(Duration::from_secs(1)));
        ctl.on_player_event(PlayerEvent::StateChanged(PlayerState::Ready)).await;

        ctl.on_host(HostEvent::Pause).await;
        fake.set(PlayerState::Ready, false, Some(Duration::from_secs(1)));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());

        fake.reset_calls();
        ctl.on_host(HostEvent::Resume).await;
        assert_eq!(fake.calls(), vec!["play"]);
        // stuck watch is back
        let ev = rx.recv().await;
        assert!(matches!(ev, Some(Event::Control(ControlEvent::StuckSample { .. }))));
    }
}
