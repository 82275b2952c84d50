//! On-demand catalog served by the Emby media server.
//!
//! Albums (programs) are grouping nodes; episodes are `Audio` items inside an
//! album. Image and stream URLs are not part of the item payload, they are
//! built from the item id and the API key.

use serde::{Deserialize, Serialize};

/// One page of `/emby/Items`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbyResponse {
    #[serde(rename = "Items", default)]
    pub items: Vec<EmbyItem>,
    /// Total matches on the server, when it reports it.
    #[serde(rename = "TotalRecordCount", default)]
    pub total_record_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbyItem {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    /// `MusicAlbum`, `Audio`, `Folder`, ...
    #[serde(rename = "Type", default)]
    pub item_type: String,
    #[serde(rename = "AlbumArtist", default)]
    pub album_artist: Option<String>,
    /// Album name, present on `Audio` items.
    #[serde(rename = "Album", default)]
    pub album: Option<String>,
    #[serde(rename = "ParentId", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "Overview", default)]
    pub overview: Option<String>,
    /// Duration in 100ns ticks.
    #[serde(rename = "RunTimeTicks", default)]
    pub run_time_ticks: Option<u64>,
}

impl EmbyItem {
    pub fn duration_secs(&self) -> Option<f64> {
        self.run_time_ticks.map(|t| t as f64 / 10_000_000.0)
    }
}

/// URL templates for a given server + key.
#[derive(Debug, Clone)]
pub struct EmbyUrls {
    base_url: String,
    api_key: String,
}

impl EmbyUrls {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            api_key: api_key.to_string(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn items_url(&self) -> String {
        format!("{}emby/Items", self.base_url)
    }

    pub fn image_url(&self, item_id: &str) -> String {
        format!(
            "{}emby/Items/{}/Images/Primary?api_key={}",
            self.base_url, item_id, self.api_key
        )
    }

    pub fn stream_url(&self, item_id: &str) -> String {
        format!(
            "{}emby/Audio/{}/stream.mp3?static=true&api_key={}",
            self.base_url, item_id, self.api_key
        )
    }

    /// Everything the player needs to start `episode` from `album`.
    pub fn episode_ref(&self, episode: &EmbyItem, album: &EmbyItem) -> EpisodeRef {
        self.episode_in(episode, &album.id, &album.name)
    }

    /// Like [`episode_ref`](Self::episode_ref) when only the album id is at
    /// hand; the name comes from the episode's own `Album` field.
    pub fn episode_in_album(&self, episode: &EmbyItem, album_id: &str) -> EpisodeRef {
        let album_name = episode.album.clone().unwrap_or_default();
        self.episode_in(episode, album_id, &album_name)
    }

    fn episode_in(&self, episode: &EmbyItem, album_id: &str, album_name: &str) -> EpisodeRef {
        EpisodeRef {
            id: episode.id.clone(),
            name: episode.name.clone(),
            album_name: album_name.to_string(),
            stream_url: self.stream_url(&episode.id),
            cover_url: Some(self.image_url(album_id)),
        }
    }
}

/// A playable episode as handed to the playback coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRef {
    /// Stable media-server id; this is what "same episode" means.
    pub id: String,
    /// Raw episode name (usually starts with `YYYYMMDD`).
    pub name: String,
    pub album_name: String,
    pub stream_url: String,
    #[serde(default)]
    pub cover_url: Option<String>,
}

/// Accumulates the episodes of one album, one fixed-size page at a time.
#[derive(Debug, Clone)]
pub struct EpisodePager {
    album_id: String,
    page_size: u32,
    items: Vec<EmbyItem>,
    total: Option<u32>,
    exhausted: bool,
}

impl EpisodePager {
    pub fn new(album_id: impl Into<String>, page_size: u32) -> Self {
        Self {
            album_id: album_id.into(),
            page_size: page_size.max(1),
            items: Vec::new(),
            total: None,
            exhausted: false,
        }
    }

    pub fn album_id(&self) -> &str {
        &self.album_id
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn items(&self) -> &[EmbyItem] {
        &self.items
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// `StartIndex` of the next page, or `None` once everything is loaded.
    pub fn next_start_index(&self) -> Option<u32> {
        if self.exhausted {
            None
        } else {
            Some(self.items.len() as u32)
        }
    }

    /// Append a fetched page. A short page, or reaching the server's total,
    /// ends the pagination.
    pub fn append(&mut self, page: EmbyResponse) {
        let received = page.items.len() as u32;
        if page.total_record_count.is_some() {
            self.total = page.total_record_count;
        }
        self.items.extend(page.items);
        let reached_total = self
            .total
            .is_some_and(|total| self.items.len() as u32 >= total);
        if received < self.page_size || reached_total {
            self.exhausted = true;
        }
    }
}
