use super::store::CatalogStore;
use tracing::debug;

/// Decision rule for a full re-ingestion.
///
/// An empty catalog always needs one. With records present, a missing remote
/// stamp or a missing stored stamp both keep the current catalog; only two
/// known, different stamps trigger a refresh.
pub fn needs_full_ingestion(has_records: bool, remote: Option<i64>, stored: Option<i64>) -> bool {
    if !has_records {
        return true;
    }
    match (remote, stored) {
        (Some(r), Some(s)) => r != s,
        _ => false,
    }
}

#[derive(Clone)]
pub struct SourceVersionGate {
    store: CatalogStore,
}

impl SourceVersionGate {
    pub fn new(store: CatalogStore) -> Self {
        Self { store }
    }

    pub async fn needs_full_ingestion(&self, remote_version: Option<i64>) -> bool {
        let has_records = self.store.channel_count().await > 0;
        let stored = self.store.get_version_stamp().await.map(|s| s.remote_version);
        let needed = needs_full_ingestion(has_records, remote_version, stored);
        debug!(has_records, ?remote_version, ?stored, needed, "version gate");
        needed
    }

    /// Record the stamp of a completed pass.
    pub async fn mark_applied(&self, remote_version: i64) -> anyhow::Result<()> {
        self.store.save_version_stamp(remote_version).await
    }
}
