use serde::{Deserialize, Serialize};

/// One fetched and parsed feed source.
///
/// `url` is the URL the user subscribed to, not whatever the document
/// claims about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub url: String,
    pub title: String,
    pub items: Vec<FeedItem>,
}

/// A single entry of a feed, positional only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub title: String,
    pub link: String,
    pub description: String,
}

impl Feed {
    /// The shape every failed fetch or unparseable document degrades to.
    pub fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            title: String::new(),
            items: Vec::new(),
        }
    }

    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_to_wire_shape() {
        let feed = Feed {
            url: "https://example.com/rss".into(),
            title: "Example".into(),
            items: vec![FeedItem {
                title: "Hello".into(),
                link: "https://example.com/1".into(),
                description: String::new(),
            }],
        };

        let json = serde_json::to_value(&feed).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "url": "https://example.com/rss",
                "title": "Example",
                "items": [
                    {"title": "Hello", "link": "https://example.com/1", "description": ""}
                ]
            })
        );
    }

    #[test]
    fn test_empty_feed_keeps_url() {
        let feed = Feed::empty("https://example.com/rss");
        assert_eq!(feed.url, "https://example.com/rss");
        assert!(feed.title.is_empty());
        assert!(!feed.has_items());
    }
}
