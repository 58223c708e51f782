use crate::catalog::ChannelRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingPhase {
    /// Playlists are being fetched and written to the catalog.
    Downloading,
    /// Download reached 100% (or the last source).
    Preparing,
    /// Default channel is being read back from the catalog.
    LoadingFromDevice,
}

/// UI feedback only; ingestion never branches on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadingState {
    Idle,
    Loading { phase: LoadingPhase, progress: u8 },
    Success { message: String },
    Error { message: String },
}

impl LoadingState {
    pub fn loading(phase: LoadingPhase, progress: u8) -> Self {
        Self::Loading {
            phase,
            progress: progress.min(100),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Error { .. })
    }

    pub fn label(&self) -> String {
        match self {
            Self::Idle => "idle".to_string(),
            Self::Loading { phase, progress } => {
                let what = match phase {
                    LoadingPhase::Downloading => "Downloading channels",
                    LoadingPhase::Preparing => "Preparing channels",
                    LoadingPhase::LoadingFromDevice => "Loading from device",
                };
                format!("{what}… {progress}%")
            }
            Self::Success { message } => message.clone(),
            Self::Error { message } => format!("error: {message}"),
        }
    }
}

/// What the storage context tells the render-affine context.
#[derive(Debug, Clone)]
pub enum IngestEvent {
    Progress(LoadingState),
    /// First usable default channel of this run. Emitted at most once.
    ChannelResolved(ChannelRecord),
    /// Every configured source was processed or skipped.
    Settled,
}
