use crate::catalog::ChannelRecord;
use crate::ingest::state::LoadingState;

#[derive(Debug, Clone)]
pub struct Toast {
    pub message: String,
    pub kind: ToastKind,
    pub created_at: std::time::Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Success,
    Error,
}

impl Toast {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ToastKind::Success,
            created_at: std::time::Instant::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ToastKind::Error,
            created_at: std::time::Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() > std::time::Duration::from_secs(3)
    }
}

#[derive(Debug)]
pub struct AppState {
    pub should_quit: bool,
    pub loading: LoadingState,
    /// All sources processed or skipped.
    pub settled: bool,
    pub sidebar: Vec<ChannelRecord>,
    pub now_playing: Option<String>,
    pub overlay: bool,
    pub toast: Option<Toast>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            should_quit: false,
            loading: LoadingState::Idle,
            settled: false,
            sidebar: Vec::new(),
            now_playing: None,
            overlay: false,
            toast: None,
        }
    }

    /// Sidebar entry by its 1-based position as printed.
    pub fn sidebar_entry(&self, position: usize) -> Option<&ChannelRecord> {
        position.checked_sub(1).and_then(|i| self.sidebar.get(i))
    }

    pub fn status_line(&self) -> String {
        let mut line = self.loading.label();
        if let Some(name) = &self.now_playing {
            line.push_str(&format!(" | playing: {name}"));
        }
        if self.overlay {
            line.push_str(" | reconnecting…");
        }
        line
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidebar_entry_is_one_based() {
        let mut s = AppState::new();
        s.sidebar.push(ChannelRecord {
            id: 7,
            name: "NTN24".into(),
            url: "http://h/live/ntn.m3u8".into(),
            group: None,
            logo_url: None,
            source_id: 1,
            added_at: 0,
        });
        assert!(s.sidebar_entry(0).is_none());
        assert_eq!(s.sidebar_entry(1).map(|c| c.id), Some(7));
        assert!(s.sidebar_entry(2).is_none());
    }

    #[test]
    fn test_status_line() {
        let mut s = AppState::new();
        s.now_playing = Some("Caracol FHD".into());
        s.overlay = true;
        let line = s.status_line();
        assert!(line.contains("Caracol FHD"));
        assert!(line.contains("reconnecting"));
    }
}
