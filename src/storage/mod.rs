use crate::catalog::models::{CatalogVersionStamp, ChannelRecord, NewChannel, SourceDescriptor};
use anyhow::Context;
use rand::seq::IndexedRandom;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;

pub struct Storage {
    conn: Connection,
}

const CHANNEL_COLUMNS: &str = "id, name, url, group_title, logo_url, source_id, added_at";

impl Storage {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }

        let conn = Connection::open(path).with_context(|| format!("open {}", path.display()))?;
        let s = Self { conn };
        s.init_schema()?;
        Ok(s)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let s = Self {
            conn: Connection::open_in_memory().context("open in-memory db")?,
        };
        s.init_schema()?;
        Ok(s)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        self.conn
            .execute_batch(
                r#"
CREATE TABLE IF NOT EXISTS sources (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  remote_key TEXT NOT NULL UNIQUE,
  url TEXT NOT NULL,
  last_fetched_at INTEGER NOT NULL,
  has_cached_content INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS channels (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  url TEXT NOT NULL,
  group_title TEXT,
  logo_url TEXT,
  source_id INTEGER NOT NULL,
  added_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_channels_source ON channels(source_id);
CREATE INDEX IF NOT EXISTS idx_channels_group_name ON channels(group_title, name);

CREATE TABLE IF NOT EXISTS version_stamp (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  remote_version INTEGER NOT NULL,
  last_applied_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS default_channel (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  url TEXT NOT NULL
);
"#,
            )
            .context("init schema")?;
        Ok(())
    }

    pub fn get_source(&self, remote_key: &str) -> anyhow::Result<Option<SourceDescriptor>> {
        self.conn
            .query_row(
                "SELECT id, remote_key, url, last_fetched_at, has_cached_content FROM sources WHERE remote_key=?1",
                params![remote_key],
                |row| {
                    Ok(SourceDescriptor {
                        id: Some(row.get(0)?),
                        remote_key: row.get(1)?,
                        url: row.get(2)?,
                        last_fetched_at: row.get(3)?,
                        has_cached_content: row.get::<_, i32>(4)? != 0,
                    })
                },
            )
            .optional()
            .context("query source")
    }

    /// Insert or update the descriptor for its remote key; returns the row id.
    pub fn save_source(&self, source: &SourceDescriptor) -> anyhow::Result<i64> {
        self.conn
            .execute(
                r#"
INSERT INTO sources(remote_key, url, last_fetched_at, has_cached_content)
VALUES(?1, ?2, ?3, ?4)
ON CONFLICT(remote_key) DO UPDATE SET
  url=excluded.url,
  last_fetched_at=excluded.last_fetched_at,
  has_cached_content=excluded.has_cached_content
"#,
                params![
                    source.remote_key,
                    source.url,
                    source.last_fetched_at,
                    source.has_cached_content as i32
                ],
            )
            .context("save source")?;
        let id = self
            .conn
            .query_row(
                "SELECT id FROM sources WHERE remote_key=?1",
                params![source.remote_key],
                |row| row.get(0),
            )
            .context("read source id")?;
        Ok(id)
    }

    /// Delete-then-insert inside one transaction so readers never observe an
    /// empty source mid-swap.
    pub fn replace_channels(
        &mut self,
        source_id: i64,
        channels: &[NewChannel],
        now_unix: i64,
    ) -> anyhow::Result<usize> {
        let tx = self.conn.transaction().context("begin replace")?;
        tx.execute("DELETE FROM channels WHERE source_id=?1", params![source_id])
            .context("delete source channels")?;
        {
            let mut stmt = tx
                .prepare(
                    r#"
INSERT INTO channels(name, url, group_title, logo_url, source_id, added_at)
VALUES(?1, ?2, ?3, ?4, ?5, ?6)
"#,
                )
                .context("prepare channel insert")?;
            for c in channels {
                stmt.execute(params![c.name, c.url, c.group, c.logo_url, source_id, now_unix])
                    .context("insert channel")?;
            }
        }
        tx.commit().context("commit replace")?;
        Ok(channels.len())
    }

    pub fn channel_count(&self) -> anyhow::Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM channels", [], |row| row.get(0))
            .context("count channels")?;
        Ok(n as u64)
    }

    pub fn channels_by_source(&self, source_id: i64) -> anyhow::Result<Vec<ChannelRecord>> {
        self.query_channels(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE source_id=?1 ORDER BY id ASC"),
            params![source_id],
        )
    }

    pub fn all_channels(&self) -> anyhow::Result<Vec<ChannelRecord>> {
        self.query_channels(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id ASC"),
            [],
        )
    }

    pub fn first_channel(&self) -> anyhow::Result<Option<ChannelRecord>> {
        Ok(self
            .query_channels(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels ORDER BY id ASC LIMIT 1"),
                [],
            )?
            .into_iter()
            .next())
    }

    pub fn channel_by_group_and_name(
        &self,
        group: &str,
        name: &str,
    ) -> anyhow::Result<Option<ChannelRecord>> {
        Ok(self
            .query_channels(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE group_title=?1 AND name=?2 ORDER BY id ASC LIMIT 1"
                ),
                params![group, name],
            )?
            .into_iter()
            .next())
    }

    pub fn first_channel_in_group(&self, group: &str) -> anyhow::Result<Option<ChannelRecord>> {
        Ok(self
            .query_channels(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE group_title=?1 ORDER BY id ASC LIMIT 1"
                ),
                params![group],
            )?
            .into_iter()
            .next())
    }

    /// `pattern` is a SQL LIKE pattern (ASCII case-insensitive).
    pub fn channel_by_name_like(&self, pattern: &str) -> anyhow::Result<Option<ChannelRecord>> {
        Ok(self
            .query_channels(
                &format!(
                    "SELECT {CHANNEL_COLUMNS} FROM channels WHERE name LIKE ?1 ORDER BY id ASC LIMIT 1"
                ),
                params![pattern],
            )?
            .into_iter()
            .next())
    }

    /// Uniform sample of up to `n` records without replacement.
    pub fn random_channels(&self, n: usize) -> anyhow::Result<Vec<ChannelRecord>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = {
            let mut stmt = self
                .conn
                .prepare("SELECT id FROM channels")
                .context("prepare channel ids")?;
            stmt.query_map([], |row| row.get(0))
                .context("query channel ids")?
                .collect::<Result<_, _>>()
                .context("read channel ids")?
        };
        let picked: Vec<i64> = ids.choose_multiple(&mut rand::rng(), n).copied().collect();
        if picked.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; picked.len()].join(",");
        let mut rows = self.query_channels(
            &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id IN ({placeholders})"),
            params_from_iter(picked.iter()),
        )?;
        // Keep the sampled order rather than id order.
        rows.sort_by_key(|c| picked.iter().position(|id| *id == c.id));
        Ok(rows)
    }

    pub fn version_stamp(&self) -> anyhow::Result<Option<CatalogVersionStamp>> {
        self.conn
            .query_row(
                "SELECT remote_version, last_applied_at FROM version_stamp WHERE id=1",
                [],
                |row| {
                    Ok(CatalogVersionStamp {
                        remote_version: row.get(0)?,
                        last_applied_at: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("query version stamp")
    }

    pub fn save_version_stamp(&self, stamp: &CatalogVersionStamp) -> anyhow::Result<()> {
        self.conn
            .execute(
                r#"
INSERT INTO version_stamp(id, remote_version, last_applied_at)
VALUES(1, ?1, ?2)
ON CONFLICT(id) DO UPDATE SET
  remote_version=excluded.remote_version,
  last_applied_at=excluded.last_applied_at
"#,
                params![stamp.remote_version, stamp.last_applied_at],
            )
            .context("save version stamp")?;
        Ok(())
    }

    pub fn default_channel_url(&self) -> anyhow::Result<Option<String>> {
        self.conn
            .query_row("SELECT url FROM default_channel WHERE id=1", [], |row| row.get(0))
            .optional()
            .context("query default channel")
    }

    /// Stores `url` unless a default is already saved; true when written.
    pub fn save_default_channel_url_once(&self, url: &str) -> anyhow::Result<bool> {
        let n = self
            .conn
            .execute(
                "INSERT INTO default_channel(id, url) VALUES(1, ?1) ON CONFLICT(id) DO NOTHING",
                params![url],
            )
            .context("save default channel")?;
        Ok(n > 0)
    }

    fn query_channels<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> anyhow::Result<Vec<ChannelRecord>> {
        let mut stmt = self.conn.prepare(sql).context("prepare channel query")?;
        let rows = stmt
            .query_map(params, channel_from_row)
            .context("query channels")?
            .collect::<Result<Vec<_>, _>>()
            .context("read channel rows")?;
        Ok(rows)
    }
}

fn channel_from_row(row: &Row<'_>) -> rusqlite::Result<ChannelRecord> {
    Ok(ChannelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        group: row.get(3)?,
        logo_url: row.get(4)?,
        source_id: row.get(5)?,
        added_at: row.get(6)?,
    })
}
