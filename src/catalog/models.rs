/// A live channel as persisted in the catalog.
///
/// `id` is assigned by the store; two records may share a name or url when
/// they come from different sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub group: Option<String>,
    pub logo_url: Option<String>,
    pub source_id: i64,
    pub added_at: i64,
}

/// A parsed playlist entry that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub name: String,
    pub url: String,
    pub group: Option<String>,
    pub logo_url: Option<String>,
}

/// One configured remote playlist slot (`urlm3u1`, `urlm3u2`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// `None` until the first insert for this remote key.
    pub id: Option<i64>,
    pub remote_key: String,
    pub url: String,
    pub last_fetched_at: i64,
    pub has_cached_content: bool,
}

impl SourceDescriptor {
    pub fn pending(remote_key: &str, url: &str) -> Self {
        Self {
            id: None,
            remote_key: remote_key.to_string(),
            url: url.to_string(),
            last_fetched_at: 0,
            has_cached_content: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogVersionStamp {
    pub remote_version: i64,
    pub last_applied_at: i64,
}

pub fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
