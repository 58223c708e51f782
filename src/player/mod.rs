pub mod mpv;

use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerErrorKind {
    /// Timeouts, refused connections, name resolution, failed HTTP opens.
    Network,
    /// Audio timestamp jumps; usually heal by themselves.
    AudioDiscontinuity,
    Other,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct PlayerError {
    pub kind: PlayerErrorKind,
    pub message: String,
}

impl PlayerError {
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: classify_error(&message),
            message,
        }
    }
}

const NETWORK_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection refused",
    "connection reset",
    "could not connect",
    "failed to connect",
    "failed to resolve",
    "name or service not known",
    "unknown host",
    "network is unreachable",
    "http error",
    "failed to open",
    "tcp:",
];

const DISCONTINUITY_MARKERS: &[&str] = &[
    "discontinuity",
    "invalid audio pts",
    "audio pts",
    "audio timestamp",
];

pub fn classify_error(message: &str) -> PlayerErrorKind {
    let lower = message.to_lowercase();
    if DISCONTINUITY_MARKERS.iter().any(|m| lower.contains(m)) {
        PlayerErrorKind::AudioDiscontinuity
    } else if NETWORK_MARKERS.iter().any(|m| lower.contains(m)) {
        PlayerErrorKind::Network
    } else {
        PlayerErrorKind::Other
    }
}

#[derive(Debug, Clone)]
pub enum PlayerEvent {
    StateChanged(PlayerState),
    Error(PlayerError),
}

/// The media engine as the playback controller sees it.
///
/// Commands are fire-and-forget; outcomes arrive later as [`PlayerEvent`]s.
#[async_trait]
pub trait Player: Send {
    async fn set_url(&mut self, url: &str) -> anyhow::Result<()>;
    /// Start loading the url given to [`Player::set_url`].
    async fn prepare(&mut self) -> anyhow::Result<()>;
    /// Play when ready.
    async fn play(&mut self) -> anyhow::Result<()>;
    /// Keeps the last frame on screen.
    async fn pause(&mut self) -> anyhow::Result<()>;
    async fn stop(&mut self) -> anyhow::Result<()>;
    async fn clear(&mut self) -> anyhow::Result<()>;

    fn state(&self) -> PlayerState;
    fn position(&self) -> Option<Duration>;
    fn is_playing(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_mpv_messages() {
        assert_eq!(
            classify_error("ffmpeg: tcp: Connection to tcp://10.0.0.1:80 failed: Connection refused"),
            PlayerErrorKind::Network
        );
        assert_eq!(classify_error("HTTP error 503 Service Unavailable"), PlayerErrorKind::Network);
        assert_eq!(
            classify_error("Failed to open http://cdn.example/live/1.m3u8."),
            PlayerErrorKind::Network
        );
        assert_eq!(classify_error("Invalid audio PTS: 12.0 -> 15.3"), PlayerErrorKind::AudioDiscontinuity);
        assert_eq!(classify_error("loading failed"), PlayerErrorKind::Other);
        assert_eq!(classify_error("unrecognized file format"), PlayerErrorKind::Other);
    }
}
