//! Shared fakes for unit tests.

use crate::config::RemoteConfig;
use crate::ingest::IngestError;
use crate::ingest::fetch::{PlaylistBody, PlaylistFetcher};
use crate::player::{Player, PlayerState};
use crate::remote::{RemoteSource, StaticDocumentClient};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// `live` streaming entries in `group` followed by `vod` movie entries.
pub fn playlist(live: usize, vod: usize, group: &str) -> String {
    let mut out = String::from("#EXTM3U\n");
    for i in 0..live {
        out.push_str(&format!(
            "#EXTINF:-1 tvg-logo=\"http://logos/{i}.png\" group-title=\"{group}\",Live {i}\n\
             http://streams.example/live/{group}/{i}.m3u8\n"
        ));
    }
    for i in 0..vod {
        out.push_str(&format!(
            "#EXTINF:-1 group-title=\"MOVIES\",Feature {i}\nhttp://streams.example/vod/{i}.mp4\n"
        ));
    }
    out
}

pub fn static_remote(fields: &[(&str, &str)]) -> RemoteSource {
    let fields: BTreeMap<String, String> = fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    RemoteSource::new(
        Arc::new(StaticDocumentClient::new(fields)),
        &RemoteConfig::default(),
    )
}

/// Serves in-memory playlists and counts every `open`.
#[derive(Default)]
pub struct CountingFetcher {
    bodies: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl CountingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, body: &str) {
        self.bodies.lock().unwrap().insert(url.to_string(), body.to_string());
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaylistFetcher for CountingFetcher {
    async fn open(&self, url: &str) -> Result<PlaylistBody, IngestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(url) {
            return Err(IngestError::Transport(format!("connection refused: {url}")));
        }
        let body = self
            .bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(IngestError::HttpStatus(404))?;
        Ok(Box::pin(std::io::Cursor::new(body.into_bytes())))
    }
}

#[derive(Debug)]
struct FakeState {
    calls: Vec<String>,
    state: PlayerState,
    playing: bool,
    position: Option<Duration>,
}

/// Records every command; state is whatever the test sets.
#[derive(Debug, Clone)]
pub struct FakePlayer {
    inner: Arc<Mutex<FakeState>>,
}

impl FakePlayer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeState {
                calls: Vec::new(),
                state: PlayerState::Idle,
                playing: false,
                position: None,
            })),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn set(&self, state: PlayerState, playing: bool, position: Option<Duration>) {
        let mut s = self.inner.lock().unwrap();
        s.state = state;
        s.playing = playing;
        s.position = position;
    }

    fn record(&self, call: String) -> anyhow::Result<()> {
        self.inner.lock().unwrap().calls.push(call);
        Ok(())
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn set_url(&mut self, url: &str) -> anyhow::Result<()> {
        self.record(format!("set_url {url}"))
    }
    async fn prepare(&mut self) -> anyhow::Result<()> {
        self.record("prepare".into())
    }
    async fn play(&mut self) -> anyhow::Result<()> {
        self.record("play".into())
    }
    async fn pause(&mut self) -> anyhow::Result<()> {
        self.record("pause".into())
    }
    async fn stop(&mut self) -> anyhow::Result<()> {
        self.record("stop".into())
    }
    async fn clear(&mut self) -> anyhow::Result<()> {
        self.record("clear".into())
    }

    fn state(&self) -> PlayerState {
        self.inner.lock().unwrap().state
    }
    fn position(&self) -> Option<Duration> {
        self.inner.lock().unwrap().position
    }
    fn is_playing(&self) -> bool {
        self.inner.lock().unwrap().playing
    }
}
