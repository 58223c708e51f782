//! Live-channel catalog: classification, playlist parsing, persistence and
//! the remote version gate.

pub mod classify;
pub mod models;
pub mod parser;
pub mod store;
pub mod version;

pub use models::{ChannelRecord, NewChannel, SourceDescriptor};
pub use store::{CatalogStore, PreferredChannel};
pub use version::SourceVersionGate;
