use super::*;

pub fn defaults() -> Config {
    Config::default()
}

fn project_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "livetv", "livetv")
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("livetv"))
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: project_data_dir(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            collection: "UI_CONFIG".to_string(),
            document: "lista_de_canales".to_string(),
            version_field: "fecha_list".to_string(),
            source_keys: ["urlm3u1", "urlm3u2", "urlm3u3", "urlm3u4"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 10,
            static_fields: BTreeMap::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36".to_string(),
            connect_timeout_secs: 20,
            read_timeout_secs: 120,
        }
    }
}

fn pick(names: &[&str], preferred_group_first: bool) -> SidebarPick {
    SidebarPick {
        names: names.iter().map(|s| s.to_string()).collect(),
        preferred_group_first,
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            preferred_group: "COLOMBIA".to_string(),
            preferred_channel: "Caracol FHD".to_string(),
            sidebar_picks: vec![
                pick(&["Win Sports + FHD"], true),
                pick(&["RCN FHD"], true),
                pick(&["NTN24"], true),
                pick(&["DIRECTV SPORTS 2 CO", "DIRECTV SPORTS 2"], false),
            ],
            sidebar_size: 10,
            per_source_estimate: 100,
            progress_log_every: 10_000,
            max_channels_per_source: 200_000,
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            mpv_path: "mpv".to_string(),
            audio_device: None,
            volume: 80,
            settle_ms: 150,
            refresh_delay_ms: 300,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            buffering_timeout_ms: 10_000,
            buffering_poll_ms: 1_000,
            stuck_sample_ms: 1_000,
            stuck_checks: 3,
            stuck_min_advance_ms: 1_000,
            network_retry_ms: 2_000,
            error_retry_ms: 1_000,
            error_backoff_max_ms: 30_000,
            discontinuity_resume_ms: 500,
            retry_policy: RetryPolicy::Unlimited,
        }
    }
}
