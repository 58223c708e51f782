use super::IngestError;
use crate::config::FetchConfig;
use async_trait::async_trait;
use futures_util::TryStreamExt;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncBufRead;
use tokio_util::io::StreamReader;
use tracing::info;

pub type PlaylistBody = Pin<Box<dyn AsyncBufRead + Send>>;

#[async_trait]
pub trait PlaylistFetcher: Send + Sync {
    /// Open the playlist as a streamed, buffered body.
    async fn open(&self, url: &str) -> Result<PlaylistBody, IngestError>;
}

pub struct HttpPlaylistFetcher {
    client: reqwest::Client,
}

impl HttpPlaylistFetcher {
    pub fn new(cfg: &FetchConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
            .read_timeout(Duration::from_secs(cfg.read_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PlaylistFetcher for HttpPlaylistFetcher {
    async fn open(&self, url: &str) -> Result<PlaylistBody, IngestError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(IngestError::InvalidUrl(url.to_string()));
        }

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "*/*")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await
            .map_err(|e| IngestError::Transport(format!("{e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::HttpStatus(status.as_u16()));
        }
        info!(content_length = ?response.content_length(), "playlist connected");

        let bytes = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(bytes)))
    }
}
