use super::{Player, PlayerError, PlayerEvent, PlayerState};
use crate::app::events::Event;
use crate::config::PlayerConfig;
use anyhow::Context;
use async_trait::async_trait;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::UnixStream,
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, warn};

/// What mpv has told us so far, shared with the IPC reader task.
#[derive(Debug, Clone)]
struct Snapshot {
    idle: bool,
    loading: bool,
    paused: bool,
    paused_for_cache: bool,
    ended: bool,
    position: Option<f64>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            idle: true,
            loading: false,
            paused: false,
            paused_for_cache: false,
            ended: false,
            position: None,
        }
    }
}

impl Snapshot {
    fn state(&self) -> PlayerState {
        if self.ended {
            PlayerState::Ended
        } else if self.idle && !self.loading {
            PlayerState::Idle
        } else if self.loading || self.paused_for_cache {
            PlayerState::Buffering
        } else {
            PlayerState::Ready
        }
    }
}

#[derive(Debug)]
pub struct MpvPlayer {
    child: Child,
    socket_path: PathBuf,
    writer: tokio::sync::Mutex<tokio::io::WriteHalf<UnixStream>>,
    request_id: AtomicU64,
    snapshot: Arc<Mutex<Snapshot>>,
    url: Option<String>,
}

impl MpvPlayer {
    pub async fn spawn(
        event_tx: mpsc::Sender<Event>,
        cfg: &PlayerConfig,
        log_file: Option<&std::path::Path>,
    ) -> anyhow::Result<Self> {
        let socket_path = std::env::temp_dir().join(format!("livetv-mpv-{}.sock", std::process::id()));
        let _ = std::fs::remove_file(&socket_path);

        let mut cmd = Command::new(&cfg.mpv_path);
        cmd.args([
            "--idle=yes",
            "--force-window=immediate",
            "--keep-open=no",
            "--input-terminal=no",
            "--really-quiet",
            "--cache=yes",
        ]);
        cmd.arg(format!("--volume={}", cfg.volume.min(100)));
        if let Some(dev) = cfg.audio_device.as_deref() {
            cmd.arg(format!("--audio-device={dev}"));
        }
        if let Some(p) = log_file {
            cmd.arg(format!("--log-file={}", p.display()));
        }
        let child = cmd
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .with_context(|| format!("spawn {}", cfg.mpv_path))?;

        let stream = connect_with_retry(&socket_path).await?;
        let (reader, writer) = tokio::io::split(stream);

        let snapshot = Arc::new(Mutex::new(Snapshot::default()));
        tokio::spawn(read_events_loop(reader, event_tx, snapshot.clone()));

        let this = Self {
            child,
            socket_path,
            writer: tokio::sync::Mutex::new(writer),
            request_id: AtomicU64::new(1),
            snapshot,
            url: None,
        };

        this.command(json!({"command":["request_log_messages", "error"]}))
            .await?;
        this.command(json!({"command":["observe_property", 1, "time-pos"]}))
            .await?;
        this.command(json!({"command":["observe_property", 2, "pause"]}))
            .await?;
        this.command(json!({"command":["observe_property", 3, "paused-for-cache"]}))
            .await?;
        this.command(json!({"command":["observe_property", 4, "idle-active"]}))
            .await?;

        Ok(this)
    }

    fn read(&self) -> Snapshot {
        self.snapshot.lock().map(|s| s.clone()).unwrap_or_default()
    }

    async fn command(&self, mut v: serde_json::Value) -> anyhow::Result<()> {
        // Tag requests so we can get structured errors back on the IPC stream.
        if v.get("request_id").is_none() {
            let id = self.request_id.fetch_add(1, Ordering::Relaxed);
            if let serde_json::Value::Object(ref mut o) = v {
                o.insert("request_id".to_string(), serde_json::Value::from(id));
            }
        }
        let mut w = self.writer.lock().await;
        let mut line = serde_json::to_vec(&v).context("encode mpv json")?;
        line.push(b'\n');
        w.write_all(&line).await.context("write mpv ipc")?;
        w.flush().await.context("flush mpv ipc")?;
        Ok(())
    }
}

#[async_trait]
impl Player for MpvPlayer {
    async fn set_url(&mut self, url: &str) -> anyhow::Result<()> {
        self.url = Some(url.to_string());
        Ok(())
    }

    async fn prepare(&mut self) -> anyhow::Result<()> {
        let url = self.url.clone().context("prepare without a url")?;
        self.command(json!({"command":["loadfile", url, "replace"]})).await
    }

    async fn play(&mut self) -> anyhow::Result<()> {
        self.command(json!({"command":["set_property", "pause", false]}))
            .await
    }

    async fn pause(&mut self) -> anyhow::Result<()> {
        self.command(json!({"command":["set_property", "pause", true]}))
            .await
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.command(json!({"command":["stop"]})).await
    }

    async fn clear(&mut self) -> anyhow::Result<()> {
        self.url = None;
        self.command(json!({"command":["playlist-clear"]})).await
    }

    fn state(&self) -> PlayerState {
        self.read().state()
    }

    fn position(&self) -> Option<Duration> {
        self.read()
            .position
            .filter(|p| p.is_finite() && *p >= 0.0)
            .map(Duration::from_secs_f64)
    }

    fn is_playing(&self) -> bool {
        let s = self.read();
        s.state() == PlayerState::Ready && !s.paused
    }
}

impl Drop for MpvPlayer {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn connect_with_retry(path: &PathBuf) -> anyhow::Result<UnixStream> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        match UnixStream::connect(path).await {
            Ok(s) => return Ok(s),
            Err(e) => {
                if tokio::time::Instant::now() > deadline {
                    return Err(e).with_context(|| format!("connect to mpv ipc {}", path.display()));
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn read_events_loop(
    reader: tokio::io::ReadHalf<UnixStream>,
    event_tx: mpsc::Sender<Event>,
    snapshot: Arc<Mutex<Snapshot>>,
) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(v) = serde_json::from_str::<serde_json::Value>(&line) else {
            continue;
        };
        // mpv command replies: {"request_id":..., "error":"..."}
        if let (Some(_rid), Some(err)) = (v.get("request_id"), v.get("error"))
            && let Some(err_s) = err.as_str()
            && err_s != "success"
        {
            warn!(error = err_s, "mpv ipc command failed");
            continue;
        }

        let folded = match snapshot.lock() {
            Ok(mut snap) => {
                let before = snap.state();
                let error = apply_mpv_event(&mut snap, &v);
                Some((before, snap.state(), error))
            }
            Err(_) => None,
        };
        let Some((before, after, error)) = folded else {
            break;
        };

        if after != before {
            debug!(?before, ?after, "mpv state");
            let _ = event_tx
                .send(Event::Player(PlayerEvent::StateChanged(after)))
                .await;
        }
        if let Some(e) = error {
            let _ = event_tx.send(Event::Player(PlayerEvent::Error(e))).await;
        }
    }
    debug!("mpv ipc closed");
}

/// Folds one mpv message into the snapshot; returns an error worth reporting.
fn apply_mpv_event(snap: &mut Snapshot, v: &serde_json::Value) -> Option<PlayerError> {
    match v.get("event")?.as_str()? {
        "property-change" => {
            let data = v.get("data");
            match v.get("name")?.as_str()? {
                "time-pos" => snap.position = data.and_then(|d| d.as_f64()),
                "pause" => snap.paused = data.and_then(|d| d.as_bool()).unwrap_or(false),
                "paused-for-cache" => {
                    snap.paused_for_cache = data.and_then(|d| d.as_bool()).unwrap_or(false)
                }
                "idle-active" => snap.idle = data.and_then(|d| d.as_bool()).unwrap_or(false),
                _ => {}
            }
            None
        }
        "start-file" => {
            snap.loading = true;
            snap.ended = false;
            snap.position = None;
            None
        }
        "playback-restart" => {
            snap.loading = false;
            None
        }
        "end-file" => {
            snap.loading = false;
            snap.paused_for_cache = false;
            match v.get("reason").and_then(|x| x.as_str()).unwrap_or("") {
                "eof" => {
                    snap.ended = true;
                    None
                }
                "error" => {
                    let err = v
                        .get("file_error")
                        .or_else(|| v.get("error"))
                        .and_then(|x| x.as_str())
                        .unwrap_or("unknown");
                    Some(PlayerError::new(format!("mpv end-file error: {err}")))
                }
                _ => None,
            }
        }
        "log-message" => {
            let level = v.get("level")?.as_str().unwrap_or("info");
            let text = v.get("text")?.as_str().unwrap_or("").trim();
            if text.is_empty() {
                return None;
            }
            // Decoder and demuxer errors are logged but playback goes on;
            // only a fatal message or end-file means the stream is lost.
            if level != "fatal" {
                debug!(level, text, "mpv log");
                return None;
            }
            Some(PlayerError::new(format!("mpv {level}: {text}")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::PlayerErrorKind;

    fn feed(snap: &mut Snapshot, raw: &str) -> Option<PlayerError> {
        apply_mpv_event(snap, &serde_json::from_str(raw).unwrap())
    }

    #[test]
    fn test_state_follows_load_cycle() {
        let mut s = Snapshot::default();
        assert_eq!(s.state(), PlayerState::Idle);

        feed(&mut s, r#"{"event":"start-file","playlist_entry_id":1}"#);
        feed(&mut s, r#"{"event":"property-change","name":"idle-active","data":false}"#);
        assert_eq!(s.state(), PlayerState::Buffering);

        feed(&mut s, r#"{"event":"playback-restart"}"#);
        assert_eq!(s.state(), PlayerState::Ready);

        feed(&mut s, r#"{"event":"property-change","name":"paused-for-cache","data":true}"#);
        assert_eq!(s.state(), PlayerState::Buffering);
        feed(&mut s, r#"{"event":"property-change","name":"paused-for-cache","data":false}"#);

        feed(&mut s, r#"{"event":"end-file","reason":"eof"}"#);
        feed(&mut s, r#"{"event":"property-change","name":"idle-active","data":true}"#);
        assert_eq!(s.state(), PlayerState::Ended);

        feed(&mut s, r#"{"event":"start-file"}"#);
        assert_eq!(s.state(), PlayerState::Buffering);
    }

    #[test]
    fn test_errors_are_classified() {
        let mut s = Snapshot::default();
        let e = feed(&mut s, r#"{"event":"end-file","reason":"error","file_error":"loading failed"}"#)
            .unwrap();
        assert_eq!(e.kind, PlayerErrorKind::Other);

        let e = feed(
            &mut s,
            r#"{"event":"end-file","reason":"error","file_error":"Failed to open tcp: Connection refused"}"#,
        )
        .unwrap();
        assert_eq!(e.kind, PlayerErrorKind::Network);

        let e = feed(
            &mut s,
            r#"{"event":"log-message","prefix":"cplayer","level":"fatal","text":"audio timestamp discontinuity\n"}"#,
        )
        .unwrap();
        assert_eq!(e.kind, PlayerErrorKind::AudioDiscontinuity);
    }

    #[test]
    fn test_recoverable_log_lines_are_not_errors() {
        let mut s = Snapshot::default();
        for raw in [
            r#"{"event":"log-message","prefix":"ffmpeg/video","level":"error","text":"h264: error while decoding MB 3 4, bytestream -5\n"}"#,
            r#"{"event":"log-message","prefix":"ffmpeg","level":"error","text":"tcp: Connection refused\n"}"#,
            r#"{"event":"log-message","level":"warn","text":"Invalid audio PTS: 1.0 -> 9.0"}"#,
            r#"{"event":"log-message","level":"warn","text":"Cache is not responding"}"#,
        ] {
            assert!(feed(&mut s, raw).is_none(), "{raw}");
        }
    }

    #[test]
    fn test_position_tracking() {
        let mut s = Snapshot::default();
        feed(&mut s, r#"{"event":"property-change","name":"time-pos","data":12.5}"#);
        assert_eq!(s.position, Some(12.5));
        feed(&mut s, r#"{"event":"property-change","name":"time-pos"}"#);
        assert_eq!(s.position, None);
    }
}
