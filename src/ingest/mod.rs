//! Source-by-source playlist ingestion.
//!
//! Sources run strictly one after another in the configured order. A failing
//! source is logged and skipped; it never aborts the pass.

pub mod fetch;
pub mod state;

use crate::catalog::models::{now_unix, SourceDescriptor};
use crate::catalog::parser::PlaylistStream;
use crate::catalog::{CatalogStore, ChannelRecord, SourceVersionGate};
use crate::config::{CatalogConfig, Config};
use crate::remote::RemoteSource;
use fetch::PlaylistFetcher;
use state::{IngestEvent, LoadingPhase, LoadingState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("remote config has no url for {0}")]
    RemoteUnavailable(String),
    #[error("playlist url must start with http:// or https://: {0}")]
    InvalidUrl(String),
    #[error("playlist download failed: {0}")]
    Transport(String),
    #[error("playlist http error: {0}")]
    HttpStatus(u16),
    #[error("playlist read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("playlist too large: more than {limit} live entries")]
    Oversize { limit: usize },
    #[error("catalog write failed: {0:#}")]
    Storage(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Ingested { source_id: i64, live: usize },
    Reused { source_id: i64, live: usize },
    Skipped { reason: String },
}

impl SourceOutcome {
    fn live(&self) -> usize {
        match self {
            Self::Ingested { live, .. } | Self::Reused { live, .. } => *live,
            Self::Skipped { .. } => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub full_pass: bool,
    pub remote_version: Option<i64>,
    pub sources: Vec<(String, SourceOutcome)>,
    pub resolved: Option<ChannelRecord>,
    pub final_state: LoadingState,
}

pub struct IngestionCoordinator {
    store: CatalogStore,
    gate: SourceVersionGate,
    remote: RemoteSource,
    fetcher: Arc<dyn PlaylistFetcher>,
    source_keys: Vec<String>,
    catalog: CatalogConfig,
    events: mpsc::Sender<IngestEvent>,
}

impl IngestionCoordinator {
    pub fn new(
        store: CatalogStore,
        remote: RemoteSource,
        fetcher: Arc<dyn PlaylistFetcher>,
        source_keys: Vec<String>,
        catalog: CatalogConfig,
        events: mpsc::Sender<IngestEvent>,
    ) -> Self {
        Self {
            gate: SourceVersionGate::new(store.clone()),
            store,
            remote,
            fetcher,
            source_keys,
            catalog,
            events,
        }
    }

    /// Wires the HTTP fetcher and the configured remote document.
    pub fn from_config(
        cfg: &Config,
        store: CatalogStore,
        events: mpsc::Sender<IngestEvent>,
    ) -> anyhow::Result<Self> {
        let remote = RemoteSource::from_config(&cfg.remote, &cfg.fetch.user_agent)?;
        let fetcher = Arc::new(fetch::HttpPlaylistFetcher::new(&cfg.fetch)?);
        Ok(Self::new(
            store,
            remote,
            fetcher,
            cfg.remote.source_keys.clone(),
            cfg.catalog.clone(),
            events,
        ))
    }

    async fn emit(&self, ev: IngestEvent) {
        // The receiver going away only means nobody is watching.
        let _ = self.events.send(ev).await;
    }

    async fn progress(&self, state: LoadingState) -> LoadingState {
        self.emit(IngestEvent::Progress(state.clone())).await;
        state
    }

    async fn resolve(&self, channel: &ChannelRecord, from_cache: bool) -> LoadingState {
        info!(channel = %channel.name, id = channel.id, from_cache, "default channel resolved");
        self.emit(IngestEvent::ChannelResolved(channel.clone())).await;
        let message = if from_cache {
            format!("Channel loaded from cache: {}", channel.name)
        } else {
            format!("Channel loaded: {}", channel.name)
        };
        self.progress(LoadingState::Success { message }).await
    }

    /// Preferred channel, then anything cached.
    async fn cached_default(&self) -> Option<ChannelRecord> {
        match self.store.get_preferred_channel().await {
            Some(c) => Some(c),
            None => self.store.get_first_channel().await,
        }
    }

    pub async fn run(&self) -> IngestReport {
        self.progress(LoadingState::loading(LoadingPhase::Downloading, 0)).await;
        let remote_version = self.remote.get_version_stamp().await;

        if !self.gate.needs_full_ingestion(remote_version).await {
            info!(?remote_version, "catalog up to date, skipping ingestion");
            let resolved = self.cached_default().await;
            let final_state = match &resolved {
                Some(c) => self.resolve(c, true).await,
                None => {
                    self.progress(LoadingState::Error {
                        message: "no live channels found".to_string(),
                    })
                    .await
                }
            };
            self.emit(IngestEvent::Settled).await;
            return IngestReport {
                full_pass: false,
                remote_version,
                sources: Vec::new(),
                resolved,
                final_state,
            };
        }

        let report = self.full_pass(remote_version).await;
        self.emit(IngestEvent::Settled).await;
        report
    }

    async fn full_pass(&self, remote_version: Option<i64>) -> IngestReport {
        let total = self.source_keys.len();
        // Approximate: the real total is unknown until every playlist is parsed.
        let estimate = total as u64 * self.catalog.per_source_estimate;
        let mut processed = 0u64;
        let mut any_success = false;
        let mut resolved: Option<ChannelRecord> = None;
        let mut final_state = None;
        let mut sources = Vec::with_capacity(total);

        for (index, key) in self.source_keys.iter().enumerate() {
            let outcome = match self.ingest_source(key).await {
                Ok(o) => {
                    any_success = true;
                    o
                }
                Err(e) => {
                    warn!(source = %key, error = %e, "source skipped");
                    SourceOutcome::Skipped { reason: e.to_string() }
                }
            };
            let live = outcome.live();
            sources.push((key.clone(), outcome));
            if live == 0 {
                continue;
            }

            processed += live as u64;
            let percent = if estimate > 0 {
                (processed * 100 / estimate).min(100) as u8
            } else {
                ((index + 1) * 100 / total) as u8
            };
            debug!(source = %key, processed, estimate, percent, "ingestion progress");

            // Once a channel is playing, later sources only refresh the catalog.
            if resolved.is_some() {
                continue;
            }
            self.progress(LoadingState::loading(LoadingPhase::Downloading, percent)).await;
            if percent >= 100 || index + 1 == total {
                self.progress(LoadingState::loading(LoadingPhase::Preparing, 100)).await;
            }
            self.progress(LoadingState::loading(LoadingPhase::LoadingFromDevice, 50)).await;
            if let Some(c) = self.store.get_preferred_channel().await {
                self.progress(LoadingState::loading(LoadingPhase::LoadingFromDevice, 100)).await;
                final_state = Some(self.resolve(&c, false).await);
                resolved = Some(c);
            }
        }

        let final_state = match final_state {
            Some(s) => s,
            None => {
                resolved = self.cached_default().await;
                match &resolved {
                    Some(c) => self.resolve(c, true).await,
                    None => {
                        self.progress(LoadingState::Error {
                            message: "no live channels found".to_string(),
                        })
                        .await
                    }
                }
            }
        };

        // Only after resolution; an interrupted pass must retry next launch.
        if any_success && let Some(v) = remote_version {
            match self.gate.mark_applied(v).await {
                Ok(()) => info!(remote_version = v, "catalog version recorded"),
                Err(e) => warn!(error = %format!("{e:#}"), "failed to record catalog version"),
            }
        }

        IngestReport {
            full_pass: true,
            remote_version,
            sources,
            resolved,
            final_state,
        }
    }

    async fn ingest_source(&self, key: &str) -> Result<SourceOutcome, IngestError> {
        let url = self
            .remote
            .get_field(key)
            .await
            .ok_or_else(|| IngestError::RemoteUnavailable(key.to_string()))?;

        let descriptor = self
            .store
            .upsert_source_descriptor(key, &url)
            .await
            .map_err(IngestError::Storage)?;

        if let (Some(source_id), true) = (descriptor.id, descriptor.has_cached_content) {
            let live = self.store.get_channels_by_source(source_id).await.len();
            info!(source = %key, source_id, live, "playlist url unchanged, reusing cached channels");
            return Ok(SourceOutcome::Reused { source_id, live });
        }

        info!(source = %key, "downloading playlist");
        let body = self.fetcher.open(&url).await?;

        // The id must exist before any channel row references it.
        let descriptor = self
            .store
            .commit_source(SourceDescriptor {
                has_cached_content: false,
                ..descriptor
            })
            .await
            .map_err(IngestError::Storage)?;
        let source_id = descriptor
            .id
            .ok_or_else(|| IngestError::Storage(anyhow::anyhow!("source {key} has no id")))?;

        let mut stream = PlaylistStream::new(body, self.catalog.progress_log_every);
        let mut records = Vec::new();
        while let Some(channel) = stream.next_entry().await? {
            if records.len() >= self.catalog.max_channels_per_source {
                return Err(IngestError::Oversize {
                    limit: self.catalog.max_channels_per_source,
                });
            }
            records.push(channel);
        }
        let stats = stream.stats();
        let live = records.len();
        info!(source = %key, lines = stats.lines, entries = stats.entries, live, "playlist parsed");

        // An empty result keeps the previous records for this source.
        if live > 0 {
            self.store
                .replace_channels_for_source(source_id, records)
                .await
                .map_err(IngestError::Storage)?;
        }

        self.store
            .commit_source(SourceDescriptor {
                last_fetched_at: now_unix(),
                has_cached_content: true,
                ..descriptor
            })
            .await
            .map_err(IngestError::Storage)?;

        Ok(SourceOutcome::Ingested { source_id, live })
    }
}
