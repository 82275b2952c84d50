use super::{build_client, fetch_json, Result};
use crate::catalog::{EmbyResponse, EmbyUrls, EpisodePager};

const ALBUM_FIELDS: &str = "PrimaryImageAspectRatio,Overview,AlbumArtist";
const EPISODE_FIELDS: &str = "RunTimeTicks,Overview,ParentId";

#[derive(Debug, Clone)]
pub struct EmbyClient {
    http: reqwest::Client,
    urls: EmbyUrls,
    library_id: String,
}

impl EmbyClient {
    /// `accept_invalid_certs` skips TLS verification for servers running on
    /// a self-signed certificate.
    pub fn new(
        base_url: &str,
        api_key: &str,
        library_id: &str,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        if accept_invalid_certs {
            tracing::warn!("TLS certificate verification disabled for {}", base_url);
        }
        Ok(Self {
            http: build_client(accept_invalid_certs)?,
            urls: EmbyUrls::new(base_url, api_key),
            library_id: library_id.to_string(),
        })
    }

    pub fn urls(&self) -> &EmbyUrls {
        &self.urls
    }

    /// Programs (albums) in the podcast library, newest first.
    pub async fn albums(&self, start_index: u32, limit: u32) -> Result<EmbyResponse> {
        let request = self.http.get(self.urls.items_url()).query(&[
            ("ParentId", self.library_id.clone()),
            ("IncludeItemTypes", "MusicAlbum".to_string()),
            ("Recursive", "true".to_string()),
            ("Fields", ALBUM_FIELDS.to_string()),
            ("SortBy", "DateCreated".to_string()),
            ("SortOrder", "Descending".to_string()),
            ("StartIndex", start_index.to_string()),
            ("Limit", limit.to_string()),
            ("api_key", self.urls.api_key().to_string()),
        ]);
        fetch_json(request).await
    }

    /// One page of the episodes in `album_id`.
    pub async fn episodes(
        &self,
        album_id: &str,
        start_index: u32,
        limit: u32,
    ) -> Result<EmbyResponse> {
        let request = self.http.get(self.urls.items_url()).query(&[
            ("ParentId", album_id.to_string()),
            ("IncludeItemTypes", "Audio".to_string()),
            ("Recursive", "true".to_string()),
            ("Fields", EPISODE_FIELDS.to_string()),
            ("SortBy", "SortName".to_string()),
            ("StartIndex", start_index.to_string()),
            ("Limit", limit.to_string()),
            ("api_key", self.urls.api_key().to_string()),
        ]);
        fetch_json(request).await
    }

    /// Fetch the next page into `pager`. Returns how many items arrived;
    /// 0 once the pager is exhausted.
    pub async fn load_next_page(&self, pager: &mut EpisodePager) -> Result<usize> {
        let Some(start) = pager.next_start_index() else {
            return Ok(0);
        };
        let page = self
            .episodes(pager.album_id(), start, pager.page_size())
            .await?;
        let received = page.items.len();
        pager.append(page);
        Ok(received)
    }
}
