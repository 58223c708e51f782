//! Quick-pick channel list shown next to the player.

use crate::catalog::{CatalogStore, ChannelRecord};
use crate::config::{CatalogConfig, SidebarPick};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info};

/// First random batch; later batches scale with the slots still open.
const FIRST_RANDOM_BATCH: usize = 30;
const SECOND_BATCH_FACTOR: usize = 5;

pub struct SidebarSelector {
    store: CatalogStore,
    picks: Vec<SidebarPick>,
    size: usize,
}

impl SidebarSelector {
    pub fn new(store: CatalogStore, cfg: &CatalogConfig) -> Self {
        Self {
            store,
            picks: cfg.sidebar_picks.clone(),
            size: cfg.sidebar_size,
        }
    }

    /// Wait applied after ingestion settles, before selecting.
    pub fn stabilize_delay(player_buffering: bool) -> Duration {
        if player_buffering {
            Duration::from_secs(3)
        } else {
            Duration::from_secs(1)
        }
    }

    pub async fn select_for_sidebar(&self) -> Vec<ChannelRecord> {
        let mut picked = Picked::new(self.size);

        if let Some(c) = self.store.get_preferred_channel().await {
            picked.push(c);
        }
        for pick in &self.picks {
            if picked.is_full() {
                break;
            }
            match self.resolve_pick(pick).await {
                Some(c) => picked.push(c),
                None => debug!(names = ?pick.names, "sidebar pick not found"),
            }
        }

        if !picked.is_full() {
            for c in self.store.get_random_channels(FIRST_RANDOM_BATCH).await {
                picked.push(c);
            }
        }
        if !picked.is_full() {
            let needed = picked.remaining();
            for c in self.store.get_random_channels(needed * SECOND_BATCH_FACTOR).await {
                picked.push(c);
            }
        }

        let out = picked.into_vec();
        info!(count = out.len(), "sidebar selection ready");
        out
    }

    async fn resolve_pick(&self, pick: &SidebarPick) -> Option<ChannelRecord> {
        if pick.preferred_group_first {
            let group = &self.store.preferred().group;
            for name in &pick.names {
                if let Some(c) = self.store.get_channel_in_group(group, name).await {
                    return Some(c);
                }
            }
        }
        for name in &pick.names {
            if let Some(c) = self.store.find_channel_by_name(name).await {
                return Some(c);
            }
        }
        None
    }
}

struct Picked {
    items: Vec<ChannelRecord>,
    seen: HashSet<i64>,
    cap: usize,
}

impl Picked {
    fn new(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
            seen: HashSet::new(),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.items.len() >= self.cap
    }

    fn remaining(&self) -> usize {
        self.cap.saturating_sub(self.items.len())
    }

    fn push(&mut self, c: ChannelRecord) {
        if !self.is_full() && self.seen.insert(c.id) {
            self.items.push(c);
        }
    }

    fn into_vec(self) -> Vec<ChannelRecord> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::NewChannel;
    use crate::catalog::store::test_store;

    fn ch(name: &str, group: &str) -> NewChannel {
        NewChannel {
            name: name.into(),
            url: format!("http://h/live/{}.m3u8", name.replace(' ', "_")),
            group: Some(group.into()),
            logo_url: None,
        }
    }

    async fn seeded(records: Vec<NewChannel>) -> CatalogStore {
        let store = test_store();
        let d = store.upsert_source_descriptor("urlm3u1", "http://list").await.unwrap();
        let id = store.commit_source(d).await.unwrap().id.unwrap();
        store.replace_channels_for_source(id, records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_preferred_picks_first_then_unique_fill() {
        let mut records = vec![
            ch("Canal Uno", "COLOMBIA"),
            ch("NTN24", "NOTICIAS"),
            ch("Caracol FHD", "COLOMBIA"),
            ch("RCN FHD", "COLOMBIA"),
            ch("DIRECTV SPORTS 2 CO HD", "DEPORTES"),
        ];
        for i in 0..40 {
            records.push(ch(&format!("Filler {i}"), "OTROS"));
        }
        let store = seeded(records).await;
        let selector = SidebarSelector::new(store, &CatalogConfig::default());

        let out = selector.select_for_sidebar().await;
        assert_eq!(out.len(), 10);
        let names: Vec<_> = out.iter().map(|c| c.name.as_str()).collect();
        // Win Sports is absent; its miss does not stop later picks.
        assert_eq!(&names[..4], &["Caracol FHD", "RCN FHD", "NTN24", "DIRECTV SPORTS 2 CO HD"]);

        let ids: HashSet<_> = out.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), out.len());
    }

    #[tokio::test]
    async fn test_small_catalog_returns_everything_once() {
        let store = seeded(vec![ch("A", "X"), ch("B", "Y"), ch("RCN FHD", "COLOMBIA")]).await;
        let selector = SidebarSelector::new(store, &CatalogConfig::default());
        let out = selector.select_for_sidebar().await;
        assert_eq!(out.len(), 3);
        // preferred group fallback: first COLOMBIA record
        assert_eq!(out[0].name, "RCN FHD");
        let ids: HashSet<_> = out.iter().map(|c| c.id).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_empty_catalog_shows_nothing() {
        let selector = SidebarSelector::new(test_store(), &CatalogConfig::default());
        assert!(selector.select_for_sidebar().await.is_empty());
    }

    #[test]
    fn test_stabilize_delay() {
        assert_eq!(SidebarSelector::stabilize_delay(false), Duration::from_secs(1));
        assert_eq!(SidebarSelector::stabilize_delay(true), Duration::from_secs(3));
    }
}
