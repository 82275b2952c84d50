//! WordPress news posts.

use serde::{Deserialize, Serialize};

/// Wrap width for plain-text rendering; long enough to keep paragraphs intact.
const TEXT_WIDTH: usize = 10_000;

/// Number of words kept in a post summary.
pub const SUMMARY_WORDS: usize = 25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rendered {
    pub rendered: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsPost {
    pub id: u64,
    pub title: Rendered,
    pub content: Rendered,
    #[serde(rename = "jetpack_featured_media_url", default)]
    pub featured_media_url: Option<String>,
}

impl NewsPost {
    pub fn plain_title(&self) -> String {
        html_to_text(&self.title.rendered)
    }

    pub fn plain_body(&self) -> String {
        html_to_text(&self.content.rendered)
    }

    pub fn summary(&self) -> String {
        summarize(&self.plain_body(), SUMMARY_WORDS)
    }

    /// WordPress sends `""` rather than null when a post has no image.
    pub fn image_url(&self) -> Option<&str> {
        self.featured_media_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }
}

/// Reduce HTML to trimmed plain text, decoding entities. Falls back to the raw
/// input when the HTML cannot be parsed.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::debug!("html2text failed, using raw text: {}", e);
            html.trim().to_string()
        }
    }
}

/// First `max_words` words followed by `...`, or the whole text when shorter.
pub fn summarize(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() > max_words {
        format!("{}...", words[..max_words].join(" "))
    } else {
        text.trim().to_string()
    }
}

/// Flattened view handed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct NewsSummary {
    pub id: u64,
    pub title: String,
    pub summary: String,
    pub body: String,
    pub image_url: Option<String>,
}

impl From<&NewsPost> for NewsSummary {
    fn from(post: &NewsPost) -> Self {
        let body = post.plain_body();
        Self {
            id: post.id,
            title: post.plain_title(),
            summary: summarize(&body, SUMMARY_WORDS),
            body,
            image_url: post.image_url().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, content: &str, image: Option<&str>) -> NewsPost {
        NewsPost {
            id: 7,
            title: Rendered {
                rendered: title.into(),
            },
            content: Rendered {
                rendered: content.into(),
            },
            featured_media_url: image.map(String::from),
        }
    }

    #[test]
    fn test_title_entities_are_decoded() {
        let p = post("Concierto &#8220;Sinfon&iacute;a&#8221;", "", None);
        let title = p.plain_title();
        assert!(title.contains("Sinfonía"), "{}", title);
        assert!(!title.contains("&#8220;"));
    }

    #[test]
    fn test_summary_truncates_to_25_words() {
        let words: Vec<String> = (1..=40).map(|i| format!("w{}", i)).collect();
        let p = post("t", &format!("<p>{}</p>", words.join(" ")), None);
        let summary = p.summary();
        assert!(summary.ends_with("w25..."), "{}", summary);
        assert_eq!(summary.split_whitespace().count(), 25);
    }

    #[test]
    fn test_short_body_is_kept_whole() {
        assert_eq!(summarize("  hola mundo ", 25), "hola mundo");
    }

    #[test]
    fn test_empty_image_is_none() {
        assert_eq!(post("t", "c", Some("")).image_url(), None);
        assert_eq!(post("t", "c", Some("https://x/y.jpg")).image_url(), Some("https://x/y.jpg"));
    }

    #[test]
    fn test_wire_format() {
        let json = r#"[{"id":101,"title":{"rendered":"Hola"},"content":{"rendered":"<p>Texto</p>"},
            "jetpack_featured_media_url":"https://radio/img.jpg","slug":"ignored"}]"#;
        let posts: Vec<NewsPost> = serde_json::from_str(json).unwrap();
        let summary = NewsSummary::from(&posts[0]);
        assert_eq!(summary.id, 101);
        assert_eq!(summary.title, "Hola");
        assert_eq!(summary.body, "Texto");
        assert_eq!(summary.image_url.as_deref(), Some("https://radio/img.jpg"));
    }
}
