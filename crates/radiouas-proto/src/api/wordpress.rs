use super::{build_client, fetch_json, normalize_base, Result};
use crate::news::NewsPost;

#[derive(Debug, Clone)]
pub struct WordPressClient {
    http: reqwest::Client,
    base_url: String,
    category_id: u32,
    per_page: u32,
}

impl WordPressClient {
    pub fn new(base_url: &str, category_id: u32, per_page: u32) -> Result<Self> {
        Ok(Self {
            http: build_client(false)?,
            base_url: normalize_base(base_url),
            category_id,
            per_page,
        })
    }

    /// Latest posts of the configured category, newest first.
    pub async fn posts(&self) -> Result<Vec<NewsPost>> {
        let url = format!("{}wp-json/wp/v2/posts", self.base_url);
        let request = self.http.get(url).query(&[
            ("categories", self.category_id),
            ("per_page", self.per_page),
        ]);
        fetch_json(request).await
    }
}
