//! Live-vs-VOD classification for playlist entries.
//!
//! The rules are intentionally loose: the final branch accepts anything whose
//! url contains `http`, so the live-marker check rarely rejects on its own.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Live,
    Excluded,
}

/// Keywords that mark movies, series, VOD, catch-up and documentaries.
pub const EXCLUDE_KEYWORDS: &[&str] = &[
    "movie",
    "pelicula",
    "película",
    "film",
    "cine",
    "cinema",
    "series",
    "serie",
    "show",
    "tv show",
    "programa",
    "vod",
    "video on demand",
    "on demand",
    "demand",
    "catchup",
    "timeshift",
    "archive",
    "archivo",
    "documental",
    "documentary",
    "docu",
];

pub const VIDEO_FILE_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm"];

pub const LIVE_STREAM_MARKERS: &[&str] = &["m3u8", ".ts", "stream", "live"];

pub fn classify(name: &str, group: Option<&str>, url: &str) -> Classification {
    let name_lower = name.to_lowercase();
    let group_lower = group.map(str::to_lowercase).unwrap_or_default();

    if contains_any(&name_lower, EXCLUDE_KEYWORDS) || contains_any(&group_lower, EXCLUDE_KEYWORDS) {
        return Classification::Excluded;
    }

    // Scheme check is case-sensitive on the raw url.
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Classification::Excluded;
    }

    let url_lower = url.to_lowercase();
    let is_hls = url_lower.contains("m3u8");
    if !is_hls && contains_any(&url_lower, VIDEO_FILE_EXTENSIONS) {
        return Classification::Excluded;
    }

    if !contains_any(&url_lower, LIVE_STREAM_MARKERS) && !url_lower.contains("http") {
        return Classification::Excluded;
    }

    Classification::Live
}

pub fn is_live(name: &str, group: Option<&str>, url: &str) -> bool {
    classify(name, group, url) == Classification::Live
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
