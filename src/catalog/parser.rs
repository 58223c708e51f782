//! Line-at-a-time M3U reader.
//!
//! Only `#EXTINF:` lines and the url line that follows them are interpreted.
//! The playlist text is never held in memory as a whole; callers feed lines
//! one by one (sync) or pull entries from an `AsyncBufRead` (async).

use super::classify;
use super::models::NewChannel;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

pub const EXTINF_MARKER: &str = "#EXTINF:";

static GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"group-title="([^"]+?)""#).expect("valid group-title regex"));
static LOGO_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"tvg-logo="([^"]+?)""#).expect("valid tvg-logo regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtInf {
    pub name: String,
    pub group: Option<String>,
    pub logo: Option<String>,
}

/// Extract display name (text after the final comma), `group-title` and `tvg-logo`.
pub fn parse_extinf(line: &str) -> ExtInf {
    let name = line
        .rfind(',')
        .map(|i| line[i + 1..].trim().to_string())
        .unwrap_or_default();
    ExtInf {
        name,
        group: capture_attr(&GROUP_RE, line),
        logo: capture_attr(&LOGO_RE, line),
    }
}

fn capture_attr(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: u64,
    pub entries: u64,
    pub live: u64,
}

/// Rolling parse state: the pending `#EXTINF` waiting for its url line.
#[derive(Debug, Default)]
pub struct PlaylistParser {
    pending: Option<ExtInf>,
    stats: ParseStats,
}

impl PlaylistParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line; returns a channel when a url completes a live entry.
    pub fn feed(&mut self, raw: &str) -> Option<NewChannel> {
        self.stats.lines += 1;
        let line = raw.trim();

        if line.starts_with(EXTINF_MARKER) {
            self.pending = Some(parse_extinf(line));
            return None;
        }
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        // url line: pending state is cleared whatever the classification says
        let entry = self.pending.take()?;
        self.stats.entries += 1;
        if !classify::is_live(&entry.name, entry.group.as_deref(), line) {
            return None;
        }
        self.stats.live += 1;
        Some(NewChannel {
            name: entry.name,
            url: line.to_string(),
            group: entry.group,
            logo_url: entry.logo,
        })
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }
}

/// Lazily classify a line iterator.
#[cfg(test)]
pub fn parse<I, S>(lines: I) -> impl Iterator<Item = NewChannel>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut parser = PlaylistParser::new();
    lines.into_iter().filter_map(move |l| parser.feed(l.as_ref()))
}

/// Pull-based async reader over a buffered byte source.
pub struct PlaylistStream<R> {
    lines: Lines<R>,
    parser: PlaylistParser,
    log_every: u64,
}

impl<R: AsyncBufRead + Unpin> PlaylistStream<R> {
    pub fn new(reader: R, log_every: u64) -> Self {
        Self {
            lines: reader.lines(),
            parser: PlaylistParser::new(),
            log_every: log_every.max(1),
        }
    }

    /// Next live entry, or `None` at end of input.
    pub async fn next_entry(&mut self) -> std::io::Result<Option<NewChannel>> {
        while let Some(line) = self.lines.next_line().await? {
            let out = self.parser.feed(&line);
            let stats = self.parser.stats();
            if stats.lines % self.log_every == 0 {
                debug!(lines = stats.lines, live = stats.live, "playlist parse progress");
            }
            if out.is_some() {
                return Ok(out);
            }
        }
        Ok(None)
    }

    pub fn stats(&self) -> ParseStats {
        self.parser.stats()
    }
}
