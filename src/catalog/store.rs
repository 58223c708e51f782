//! Async catalog access for the storage context.
//!
//! Every call runs on the blocking pool so SQLite work never lands on the
//! event loop that drives the player. Reads degrade to empty results on
//! storage failure; writes propagate their error.

use super::models::{now_unix, CatalogVersionStamp, ChannelRecord, NewChannel, SourceDescriptor};
use crate::storage::Storage;
use anyhow::Context;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Fixed first-choice default: a group and a channel name inside it.
#[derive(Debug, Clone)]
pub struct PreferredChannel {
    pub group: String,
    pub name: String,
}

#[derive(Clone)]
pub struct CatalogStore {
    inner: Arc<Mutex<Storage>>,
    preferred: Arc<PreferredChannel>,
}

impl CatalogStore {
    pub fn open_with_config(cfg: &crate::config::Config) -> anyhow::Result<Self> {
        Self::open(
            &cfg.catalog_path(),
            PreferredChannel {
                group: cfg.catalog.preferred_group.clone(),
                name: cfg.catalog.preferred_channel.clone(),
            },
        )
    }

    pub fn open(path: &Path, preferred: PreferredChannel) -> anyhow::Result<Self> {
        Ok(Self::from_storage(Storage::open(path)?, preferred))
    }

    pub fn from_storage(storage: Storage, preferred: PreferredChannel) -> Self {
        Self {
            inner: Arc::new(Mutex::new(storage)),
            preferred: Arc::new(preferred),
        }
    }

    pub fn preferred(&self) -> &PreferredChannel {
        &self.preferred
    }

    async fn with<T, F>(&self, op: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Storage) -> anyhow::Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner
                .lock()
                .map_err(|_| anyhow::anyhow!("catalog storage lock poisoned"))?;
            op(&mut guard)
        })
        .await
        .context("storage task panicked")?
    }

    async fn read<T, F>(&self, what: &'static str, op: F) -> T
    where
        T: Default + Send + 'static,
        F: FnOnce(&mut Storage) -> anyhow::Result<T> + Send + 'static,
    {
        match self.with(op).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "catalog read failed: {what}");
                T::default()
            }
        }
    }

    /// Returns the stored descriptor untouched when `url` is unchanged;
    /// otherwise a descriptor for the new url (not committed), keeping the
    /// existing id so deletion-by-source still reaches the old records.
    pub async fn upsert_source_descriptor(
        &self,
        remote_key: &str,
        url: &str,
    ) -> anyhow::Result<SourceDescriptor> {
        let key = remote_key.to_string();
        let existing = self.with(move |s| s.get_source(&key)).await?;
        Ok(match existing {
            Some(d) if d.url == url => d,
            Some(d) => SourceDescriptor {
                id: d.id,
                url: url.to_string(),
                last_fetched_at: d.last_fetched_at,
                has_cached_content: false,
                remote_key: d.remote_key,
            },
            None => SourceDescriptor::pending(remote_key, url),
        })
    }

    /// Writes the descriptor and returns it with its store-assigned id.
    pub async fn commit_source(&self, mut source: SourceDescriptor) -> anyhow::Result<SourceDescriptor> {
        let row = source.clone();
        let id = self.with(move |s| s.save_source(&row)).await?;
        source.id = Some(id);
        Ok(source)
    }

    pub async fn replace_channels_for_source(
        &self,
        source_id: i64,
        records: Vec<NewChannel>,
    ) -> anyhow::Result<usize> {
        self.with(move |s| s.replace_channels(source_id, &records, now_unix()))
            .await
    }

    pub async fn get_source_descriptor(&self, remote_key: &str) -> Option<SourceDescriptor> {
        let key = remote_key.to_string();
        self.read("source descriptor", move |s| s.get_source(&key)).await
    }

    /// Preferred name inside the preferred group, else the first record of
    /// that group by insertion order, else `None`.
    pub async fn get_preferred_channel(&self) -> Option<ChannelRecord> {
        let pref = self.preferred.clone();
        self.read("preferred channel", move |s| {
            if let Some(c) = s.channel_by_group_and_name(&pref.group, &pref.name)? {
                return Ok(Some(c));
            }
            s.first_channel_in_group(&pref.group)
        })
        .await
    }

    pub async fn get_first_channel(&self) -> Option<ChannelRecord> {
        self.read("first channel", |s| s.first_channel()).await
    }

    pub async fn get_channel_in_group(&self, group: &str, name: &str) -> Option<ChannelRecord> {
        let (group, name) = (group.to_string(), name.to_string());
        self.read("channel by group and name", move |s| {
            s.channel_by_group_and_name(&group, &name)
        })
        .await
    }

    /// Catalog-wide name search: `%name%`, then `name%`, then `%name`.
    pub async fn find_channel_by_name(&self, name: &str) -> Option<ChannelRecord> {
        let name = name.to_string();
        self.read("channel by name", move |s| {
            for pattern in [format!("%{name}%"), format!("{name}%"), format!("%{name}")] {
                if let Some(c) = s.channel_by_name_like(&pattern)? {
                    return Ok(Some(c));
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn get_random_channels(&self, n: usize) -> Vec<ChannelRecord> {
        self.read("random channels", move |s| s.random_channels(n)).await
    }

    pub async fn get_channels_by_source(&self, source_id: i64) -> Vec<ChannelRecord> {
        self.read("channels by source", move |s| s.channels_by_source(source_id))
            .await
    }

    pub async fn get_all_channels_ordered_by_insertion(&self) -> Vec<ChannelRecord> {
        self.read("all channels", |s| s.all_channels()).await
    }

    pub async fn channel_count(&self) -> u64 {
        self.read("channel count", |s| s.channel_count()).await
    }

    pub async fn get_version_stamp(&self) -> Option<CatalogVersionStamp> {
        self.read("version stamp", |s| s.version_stamp()).await
    }

    pub async fn save_version_stamp(&self, remote_version: i64) -> anyhow::Result<()> {
        let stamp = CatalogVersionStamp {
            remote_version,
            last_applied_at: now_unix(),
        };
        self.with(move |s| s.save_version_stamp(&stamp)).await
    }

    /// Default channel url remembered from an earlier launch.
    pub async fn get_default_channel_url(&self) -> Option<String> {
        self.read("default channel", |s| s.default_channel_url()).await
    }

    /// The first resolved default is kept; later calls leave it alone.
    pub async fn remember_default_channel(&self, url: &str) -> anyhow::Result<bool> {
        let url = url.to_string();
        self.with(move |s| s.save_default_channel_url_once(&url)).await
    }
}

#[cfg(test)]
pub(crate) fn test_store() -> CatalogStore {
    CatalogStore::from_storage(
        Storage::open_in_memory().expect("in-memory storage"),
        PreferredChannel {
            group: "COLOMBIA".into(),
            name: "Caracol FHD".into(),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(name: &str, group: Option<&str>) -> NewChannel {
        NewChannel {
            name: name.into(),
            url: format!("http://h/live/{}.m3u8", name.len()),
            group: group.map(str::to_string),
            logo_url: None,
        }
    }

    async fn source(store: &CatalogStore, key: &str) -> i64 {
        let d = store.upsert_source_descriptor(key, "http://list").await.unwrap();
        store.commit_source(d).await.unwrap().id.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_descriptor_unchanged_and_changed() {
        let store = test_store();
        let d = store.upsert_source_descriptor("urlm3u1", "http://a").await.unwrap();
        assert!(d.id.is_none());
        let mut committed = d.clone();
        committed.has_cached_content = true;
        let committed = store.commit_source(committed).await.unwrap();

        let same = store.upsert_source_descriptor("urlm3u1", "http://a").await.unwrap();
        assert_eq!(same, committed);

        let moved = store.upsert_source_descriptor("urlm3u1", "http://b").await.unwrap();
        assert_eq!(moved.id, committed.id);
        assert_eq!(moved.url, "http://b");
        assert!(!moved.has_cached_content);
        // not committed yet
        let again = store.upsert_source_descriptor("urlm3u1", "http://a").await.unwrap();
        assert_eq!(again, committed);
    }

    #[tokio::test]
    async fn test_replace_for_source_leaves_other_sources() {
        let store = test_store();
        let s = source(&store, "urlm3u1").await;
        let t = source(&store, "urlm3u2").await;
        store.replace_channels_for_source(s, vec![ch("A", None), ch("AA", None)]).await.unwrap();
        store.replace_channels_for_source(t, vec![ch("T", None)]).await.unwrap();
        store.replace_channels_for_source(s, vec![ch("B", None)]).await.unwrap();

        let names = |v: Vec<ChannelRecord>| v.into_iter().map(|c| c.name).collect::<Vec<_>>();
        assert_eq!(names(store.get_channels_by_source(s).await), vec!["B"]);
        assert_eq!(names(store.get_channels_by_source(t).await), vec!["T"]);
    }

    #[tokio::test]
    async fn test_preferred_channel_fallbacks() {
        let store = test_store();
        let s = source(&store, "urlm3u1").await;
        assert!(store.get_preferred_channel().await.is_none());

        store
            .replace_channels_for_source(s, vec![ch("ESPN", Some("SPORTS"))])
            .await
            .unwrap();
        assert!(store.get_preferred_channel().await.is_none());

        store
            .replace_channels_for_source(
                s,
                vec![ch("RCN FHD", Some("COLOMBIA")), ch("Canal 1", Some("COLOMBIA"))],
            )
            .await
            .unwrap();
        assert_eq!(store.get_preferred_channel().await.unwrap().name, "RCN FHD");

        store
            .replace_channels_for_source(
                s,
                vec![ch("RCN FHD", Some("COLOMBIA")), ch("Caracol FHD", Some("COLOMBIA"))],
            )
            .await
            .unwrap();
        assert_eq!(store.get_preferred_channel().await.unwrap().name, "Caracol FHD");
    }

    #[tokio::test]
    async fn test_find_by_name_variants() {
        let store = test_store();
        let s = source(&store, "urlm3u1").await;
        store
            .replace_channels_for_source(s, vec![ch("DIRECTV SPORTS 2 CO HD", Some("DEPORTES"))])
            .await
            .unwrap();
        assert!(store.find_channel_by_name("directv sports 2").await.is_some());
        assert!(store.find_channel_by_name("NTN24").await.is_none());
    }

    #[tokio::test]
    async fn test_first_default_channel_is_kept() {
        let store = test_store();
        assert!(store.get_default_channel_url().await.is_none());
        assert!(store.remember_default_channel("http://h/live/caracol.m3u8").await.unwrap());
        assert!(!store.remember_default_channel("http://h/live/rcn.m3u8").await.unwrap());
        assert_eq!(
            store.get_default_channel_url().await.as_deref(),
            Some("http://h/live/caracol.m3u8")
        );
    }
}
