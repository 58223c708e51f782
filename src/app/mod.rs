//! The render-affine context.
//!
//! One task owns the playback controller and handles every [`Event`] in
//! order. Catalog work happens on other tasks and only talks to this loop
//! through the channel.

pub mod actions;
pub mod events;
pub mod state;

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::ingest::IngestionCoordinator;
use crate::ingest::state::IngestEvent;
use crate::input;
use crate::playback::PlaybackController;
use crate::player::PlayerState;
use crate::player::mpv::MpvPlayer;
use crate::sidebar::SidebarSelector;
use actions::Action;
use anyhow::Context;
use events::{Event, HostEvent, InputEvent};
use state::{AppState, Toast, ToastKind};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct App {
    cfg: Config,
    state: AppState,
    store: CatalogStore,
    last_status: String,
}

impl App {
    pub fn new(cfg: Config) -> anyhow::Result<Self> {
        let store = CatalogStore::open_with_config(&cfg).context("open catalog")?;
        Ok(Self {
            cfg,
            state: AppState::new(),
            store,
            last_status: String::new(),
        })
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::channel::<Event>(256);

        input::spawn_input_task(tx.clone());
        spawn_host_signals(tx.clone());

        let mpv_log = self.cfg.paths.data_dir.join("mpv.log");
        let player = MpvPlayer::spawn(tx.clone(), &self.cfg.player, Some(&mpv_log))
            .await
            .context("start mpv")?;
        let mut controller = PlaybackController::new(
            Box::new(player),
            self.cfg.player.clone(),
            self.cfg.health.clone(),
            tx.clone(),
        );

        restore_default_channel(&self.store, &mut controller).await;
        self.spawn_ingestion(&tx)?;
        println!("{}", input::HELP);

        while let Some(ev) = rx.recv().await {
            match ev {
                Event::Input(InputEvent::Closed) => info!("stdin closed; ctrl-c to quit"),
                Event::Input(input_ev) => {
                    if let Some(action) = input::map_input_to_action(input_ev) {
                        self.handle_action(action, &mut controller).await;
                    }
                }
                Event::Player(pe) => controller.on_player_event(pe).await,
                Event::Control(ce) => controller.on_control(ce).await,
                Event::Ingest(ie) => self.handle_ingest(ie, &mut controller, &tx).await,
                Event::Host(he) => {
                    controller.on_host(he).await;
                    if he == HostEvent::Shutdown {
                        self.state.should_quit = true;
                    }
                }
                Event::Sidebar(channels) => {
                    self.state.sidebar = channels;
                    self.print_sidebar();
                }
            }

            for toast in controller.take_notices() {
                self.state.toast = Some(toast);
            }
            self.state.overlay = controller.overlay_visible();

            if self.state.should_quit {
                break;
            }
            self.render();
        }

        controller.shutdown().await;
        Ok(())
    }

    fn spawn_ingestion(&self, tx: &mpsc::Sender<Event>) -> anyhow::Result<()> {
        let (itx, mut irx) = mpsc::channel::<IngestEvent>(256);
        let coordinator = IngestionCoordinator::from_config(&self.cfg, self.store.clone(), itx)?;
        tokio::spawn(async move {
            let report = coordinator.run().await;
            info!(full_pass = report.full_pass, final_state = %report.final_state.label(), "ingestion finished");
        });
        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = irx.recv().await {
                if tx.send(Event::Ingest(ev)).await.is_err() {
                    break;
                }
            }
        });
        Ok(())
    }

    async fn handle_ingest(
        &mut self,
        ev: IngestEvent,
        controller: &mut PlaybackController,
        tx: &mpsc::Sender<Event>,
    ) {
        match ev {
            IngestEvent::Progress(loading) => {
                let terminal = loading.is_terminal();
                self.state.loading = loading;
                if terminal {
                    controller.mark_catalog_ready().await;
                }
            }
            IngestEvent::ChannelResolved(channel) => {
                let store = self.store.clone();
                let url = channel.url.clone();
                tokio::spawn(async move {
                    match store.remember_default_channel(&url).await {
                        Ok(true) => info!(url = %url, "default channel saved"),
                        Ok(false) => {}
                        Err(e) => warn!(error = %format!("{e:#}"), "failed to save default channel"),
                    }
                });
                if controller.current_url().is_none() {
                    self.state.now_playing = Some(channel.name.clone());
                }
                controller.play_channel(&channel.url, false).await;
            }
            IngestEvent::Settled => {
                self.state.settled = true;
                let buffering = controller.player_state() == PlayerState::Buffering;
                let delay = SidebarSelector::stabilize_delay(buffering);
                let selector = SidebarSelector::new(self.store.clone(), &self.cfg.catalog);
                let tx = tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let channels = selector.select_for_sidebar().await;
                    let _ = tx.send(Event::Sidebar(channels)).await;
                });
            }
        }
    }

    async fn handle_action(&mut self, action: Action, controller: &mut PlaybackController) {
        match action {
            Action::Quit => {
                self.state.should_quit = true;
            }
            Action::Help => println!("{}", input::HELP),
            Action::List => self.print_sidebar(),
            Action::Select(position) => match self.state.sidebar_entry(position).cloned() {
                Some(channel) => {
                    self.state.now_playing = Some(channel.name.clone());
                    self.state.toast = Some(Toast::success(format!("Tuning {}", channel.name)));
                    controller.play_channel(&channel.url, true).await;
                }
                None => {
                    self.state.toast = Some(Toast::error(format!("No channel at position {position}")));
                }
            },
            Action::PlayUrl(url) => {
                self.state.now_playing = Some(url.clone());
                controller.play_channel(&url, true).await;
            }
            Action::Pause => controller.on_host(HostEvent::Pause).await,
            Action::Resume => controller.on_host(HostEvent::Resume).await,
        }
    }

    fn print_sidebar(&self) {
        if self.state.sidebar.is_empty() {
            if self.state.settled {
                println!("(no channels)");
            } else {
                println!("(catalog still loading)");
            }
            return;
        }
        for (i, c) in self.state.sidebar.iter().enumerate() {
            let group = c.group.as_deref().unwrap_or("-");
            println!("{:2}. {}  [{group}]", i + 1, c.name);
        }
    }

    /// Prints the status line when it changes, and any fresh notice.
    fn render(&mut self) {
        if let Some(toast) = self.state.toast.take() {
            if !toast.is_expired() {
                match toast.kind {
                    ToastKind::Error => {
                        error!(message = %toast.message, "notice");
                        eprintln!("! {}", toast.message);
                    }
                    ToastKind::Success => println!("* {}", toast.message),
                }
            } else {
                warn!(message = %toast.message, "notice expired before display");
            }
        }
        let status = self.state.status_line();
        if status != self.last_status {
            println!("{status}");
            self.last_status = status;
        }
    }
}

/// Queues the default saved by an earlier launch. Like any system default it
/// waits for the catalog and yields to the user.
async fn restore_default_channel(store: &CatalogStore, controller: &mut PlaybackController) {
    if let Some(url) = store.get_default_channel_url().await {
        info!(url = %url, "restoring saved default channel");
        controller.play_channel(&url, false).await;
    }
}

/// SIGINT/SIGTERM shut down; SIGUSR1/SIGUSR2 pause and resume the host.
fn spawn_host_signals(tx: mpsc::Sender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let (Ok(mut term), Ok(mut usr1), Ok(mut usr2)) = (
                signal(SignalKind::terminate()),
                signal(SignalKind::user_defined1()),
                signal(SignalKind::user_defined2()),
            ) else {
                warn!("signal handlers unavailable");
                return;
            };
            loop {
                let ev = tokio::select! {
                    _ = tokio::signal::ctrl_c() => HostEvent::Shutdown,
                    _ = term.recv() => HostEvent::Shutdown,
                    _ = usr1.recv() => HostEvent::Pause,
                    _ = usr2.recv() => HostEvent::Resume,
                };
                if tx.send(Event::Host(ev)).await.is_err() || ev == HostEvent::Shutdown {
                    break;
                }
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(Event::Host(HostEvent::Shutdown)).await;
            }
        }
    });
}
