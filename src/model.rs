use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message delivered by a receiver
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    /// Display name or handle of whoever sent the message
    pub sender: String,
}

/// A URL recognized by a provider, plus the category and tags typed after it
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Seed {
    pub url: String,
    pub provider: String,
    pub category: String,
    pub tags: Vec<String>,
}

impl Seed {
    /// Build a seed from one message line of the form `<url> [category] [tags...]`.
    /// A category of `-` means "no category" so that tags can still be given.
    pub fn from_line(url: &str, provider: &str, line: &str) -> Self {
        let mut words = line.split(' ').skip(1);

        let category = match words.next() {
            Some("-") | None => String::new(),
            Some(cat) => cat.to_string(),
        };

        Self {
            url: url.to_string(),
            provider: provider.to_string(),
            category,
            tags: words.map(str::to_string).collect(),
        }
    }
}

/// Normalized content item fetched by a provider.
/// `id` is assigned by the provider and must be stable across fetches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub provider: String,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub author: Author,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<Media>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub screen_name: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub avatar_url: String,
    pub provider: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Photo,
    Video,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Photo => write!(f, "photo"),
            MediaType::Video => write!(f, "video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub url: String,
}
