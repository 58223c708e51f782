use crate::catalog::ChannelRecord;
use crate::ingest::state::IngestEvent;
use crate::playback::health::RecoveryReason;
use crate::player::PlayerEvent;

#[derive(Debug, Clone)]
pub enum Event {
    Input(InputEvent),
    Player(PlayerEvent),
    Ingest(IngestEvent),
    Control(ControlEvent),
    Host(HostEvent),
    Sidebar(Vec<ChannelRecord>),
}

#[derive(Debug, Clone)]
pub enum InputEvent {
    Line(String),
    Closed,
}

/// Timer and delayed-step events the playback controller posts to itself.
///
/// Each carries the generation it was scheduled under; a newer channel
/// request bumps the generation and the stale event is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    LoadDue { generation: u64 },
    ReloadDue { generation: u64 },
    RefreshDue { generation: u64, reason: RecoveryReason },
    ResumeDue { generation: u64 },
    BufferingPoll { generation: u64 },
    StuckSample { generation: u64 },
}

impl ControlEvent {
    pub fn generation(&self) -> u64 {
        match *self {
            Self::LoadDue { generation }
            | Self::ReloadDue { generation }
            | Self::RefreshDue { generation, .. }
            | Self::ResumeDue { generation }
            | Self::BufferingPoll { generation }
            | Self::StuckSample { generation } => generation,
        }
    }
}

/// Host lifecycle: the window or terminal going away and coming back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Pause,
    Resume,
    Shutdown,
}
