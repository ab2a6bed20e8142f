//! Twitter/X posts, fetched through an fxtwitter-compatible JSON API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use crate::model::{Author, Media, MediaType, Post};
use crate::plugin::{Plugin, Provider};

const PROVIDER: &str = "twitter";
const HOSTNAMES: &[&str] = &["twitter.com", "x.com"];

pub struct TwitterProvider {
    http: reqwest::Client,
    api_base_url: String,
}

impl TwitterProvider {
    pub fn new(http: reqwest::Client, api_base_url: &str) -> Self {
        Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, screen_name: &str, id: &str) -> Result<Post> {
        let endpoint = format!("{}/{}/status/{}", self.api_base_url, screen_name, id);
        debug!("Fetching {}", endpoint);

        let response: FxResponse = self
            .http
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("Failed to request {}", endpoint))?
            .json()
            .await
            .context("Failed to parse status response")?;

        match response.tweet {
            Some(tweet) if response.code == 200 => tweet.into_post(),
            _ => anyhow::bail!("status {} unavailable: {}", id, response.message),
        }
    }
}

/// `(screen name, status id)` of a status URL on a known host
fn parse_status_url(url: &str) -> Option<(String, String)> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("mobile."))
        .unwrap_or(host);
    if !HOSTNAMES.contains(&host) {
        return None;
    }

    let parts: Vec<&str> = url.path().splitn(4, '/').collect();
    if parts.len() != 4 || parts[2] != "status" || parts[1].is_empty() {
        return None;
    }

    // trailing segments such as /photo/1 point into the same status
    let id = parts[3].split('/').next().unwrap_or_default();
    if id.is_empty() {
        return None;
    }

    Some((parts[1].to_string(), id.to_string()))
}

/// Move a `format` query parameter into the path as an extension and drop the
/// query string, e.g. `.../media/abc?format=jpg&name=small` to `.../media/abc.jpg`.
pub fn fix_photo_url(url: &str) -> Result<String> {
    let mut url = Url::parse(url).with_context(|| format!("Invalid photo URL: {}", url))?;

    let format = url
        .query_pairs()
        .find(|(key, _)| key == "format")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty());

    if let Some(format) = format {
        let has_ext = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .is_some_and(|last| last.contains('.'));
        if !has_ext {
            let path = format!("{}.{}", url.path(), format);
            url.set_path(&path);
        }
    }

    url.set_query(None);
    Ok(url.to_string())
}

/// Last path segment without its extension
fn media_id(url: &str) -> String {
    let name = url
        .split('?')
        .next()
        .and_then(|path| path.rsplit('/').next())
        .unwrap_or_default();
    name.split('.').next().unwrap_or_default().to_string()
}

#[derive(Debug, Deserialize)]
struct FxResponse {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    tweet: Option<FxTweet>,
}

#[derive(Debug, Deserialize)]
struct FxTweet {
    id: String,
    #[serde(default)]
    text: String,
    created_timestamp: i64,
    author: FxAuthor,
    #[serde(default)]
    media: Option<FxMedia>,
}

#[derive(Debug, Deserialize)]
struct FxAuthor {
    id: String,
    screen_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    avatar_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct FxMedia {
    #[serde(default)]
    photos: Vec<FxMediaItem>,
    #[serde(default)]
    videos: Vec<FxMediaItem>,
}

#[derive(Debug, Deserialize)]
struct FxMediaItem {
    url: String,
}

impl FxTweet {
    fn into_post(self) -> Result<Post> {
        let media = self.media.unwrap_or_default();

        let mut items = Vec::with_capacity(media.photos.len() + media.videos.len());
        for photo in media.photos {
            let url = fix_photo_url(&photo.url)?;
            items.push(Media {
                id: media_id(&url),
                media_type: MediaType::Photo,
                url,
            });
        }
        for video in media.videos {
            items.push(Media {
                id: media_id(&video.url),
                media_type: MediaType::Video,
                url: video.url,
            });
        }

        Ok(Post {
            url: format!(
                "https://twitter.com/{}/status/{}",
                self.author.screen_name, self.id
            ),
            timestamp: DateTime::from_timestamp(self.created_timestamp, 0)
                .context("Invalid status timestamp")?,
            content: self.text,
            provider: PROVIDER.to_string(),
            author: Author {
                id: self.author.id,
                screen_name: self.author.screen_name,
                name: self.author.name,
                bio: self.author.description,
                avatar_url: self.author.avatar_url,
                provider: PROVIDER.to_string(),
            },
            media: items,
            id: self.id,
            ..Default::default()
        })
    }
}

#[async_trait]
impl Plugin for TwitterProvider {
    fn name(&self) -> &str {
        PROVIDER
    }
}

#[async_trait]
impl Provider for TwitterProvider {
    fn check(&self, url: &str) -> bool {
        parse_status_url(url).is_some()
    }

    async fn get_post(&self, cancel: CancellationToken, url: &str) -> Result<Post> {
        let (screen_name, id) =
            parse_status_url(url).with_context(|| format!("Not a status URL: {}", url))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => anyhow::bail!("cancelled"),
            post = self.fetch(&screen_name, &id) => post,
        }
    }
}
