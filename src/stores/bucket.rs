//! Directory-bucketing layout for remote file stores.
//!
//! Media land in `<base>/<provider>/<category>/`. Once an author has more than
//! [`BUCKET_THRESHOLD`] files there, they are moved into a folder of their own
//! (`<base>/<provider>/<category>/<screen name>/`) and later media go straight
//! into it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::model::{Media, Post};

/// Files an author may have loose in a category folder
pub const BUCKET_THRESHOLD: usize = 5;

const UNCATEGORIZED: &str = "uncategorized";

/// One page of a folder listing
#[derive(Debug, Default)]
pub struct ListPage {
    pub paths: Vec<String>,
    /// Set while more pages remain
    pub cursor: Option<String>,
}

/// A remote hierarchical file store
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn folder_exists(&self, path: &str) -> Result<bool>;

    /// One page of the files directly under `path`. A missing folder lists
    /// as empty.
    async fn list_page(&self, path: &str, cursor: Option<&str>) -> Result<ListPage>;

    async fn create_folder(&self, path: &str) -> Result<()>;

    /// Atomic rename
    async fn move_file(&self, from: &str, to: &str) -> Result<()>;

    /// Write `data` to `path`, replacing whatever is there
    async fn upload(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Every file directly under `path`, following cursors to the end
    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        let mut page = self.list_page(path, None).await?;
        let mut paths = std::mem::take(&mut page.paths);

        while let Some(cursor) = page.cursor.take() {
            page = self.list_page(path, Some(&cursor)).await?;
            paths.append(&mut page.paths);
        }

        Ok(paths)
    }
}

/// Where media bytes come from
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Write every media item of `post` under `base_dir`, promoting the author to
/// a folder of their own when needed. Posts without media are a no-op.
pub async fn save_bucketed(
    fs: &dyn RemoteFs,
    media: &dyn MediaSource,
    base_dir: &str,
    post: &Post,
) -> Result<()> {
    if post.media.is_empty() {
        debug!("Post {} has no media, nothing to upload", post.id);
        return Ok(());
    }

    let screen_name = post.author.screen_name.to_lowercase();
    let category = if post.category.is_empty() {
        UNCATEGORIZED
    } else {
        post.category.as_str()
    };
    let root = format!(
        "{}/{}/{}",
        base_dir.trim_end_matches('/'),
        post.provider,
        category
    );
    let author_dir = format!("{}/{}", root, screen_name);

    let target = if fs
        .folder_exists(&author_dir)
        .await
        .with_context(|| format!("Failed to check folder {}", author_dir))?
    {
        author_dir
    } else {
        let prefix = format!("{}_", screen_name);
        let existing: Vec<String> = fs
            .list_files(&root)
            .await
            .with_context(|| format!("Failed to list folder {}", root))?
            .into_iter()
            .filter(|path| basename(path).to_lowercase().starts_with(&prefix))
            .collect();

        if existing.len() + post.media.len() > BUCKET_THRESHOLD {
            info!(
                "Moving {} file(s) of {} into {}",
                existing.len(),
                screen_name,
                author_dir
            );
            fs.create_folder(&author_dir)
                .await
                .with_context(|| format!("Failed to create folder {}", author_dir))?;

            for path in &existing {
                let to = format!("{}/{}", author_dir, basename(path));
                fs.move_file(path, &to)
                    .await
                    .with_context(|| format!("Failed to move {} to {}", path, to))?;
            }
            author_dir
        } else {
            root
        }
    };

    for (index, item) in post.media.iter().enumerate() {
        let path = format!("{}/{}", target, media_filename(post, index, item));
        let data = media
            .fetch(&item.url)
            .await
            .with_context(|| format!("Failed to download {}", item.url))?;

        info!("Uploading {} {} ({} bytes)", item.media_type, path, data.len());
        fs.upload(&path, data)
            .await
            .with_context(|| format!("Failed to upload {}", path))?;
    }

    Ok(())
}

/// `<screen name>_<post id>[_<n>].<ext>`, numbered only when the post has
/// more than one media item
pub fn media_filename(post: &Post, index: usize, media: &Media) -> String {
    let stem = if post.media.len() == 1 {
        format!("{}_{}", post.author.screen_name, post.id)
    } else {
        format!("{}_{}_{}", post.author.screen_name, post.id, index + 1)
    };

    match extension(&media.url) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Extension of the last path segment of a URL
fn extension(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.last()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_string())
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}


#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::memory::{MemoryFs, MemoryMedia};
    use super::*;
    use crate::model::{Author, MediaType};

    fn photo(url: &str) -> Media {
        Media {
            id: String::new(),
            media_type: MediaType::Photo,
            url: url.to_string(),
        }
    }

    fn post(media: Vec<Media>) -> Post {
        Post {
            id: "bar".to_string(),
            provider: "twitter".to_string(),
            media,
            author: Author {
                screen_name: "Author".to_string(),
                ..Default::default()
            },
            category: "cat".to_string(),
            ..Default::default()
        }
    }

    fn media_source(bytes: &[u8]) -> MemoryMedia {
        let mut map = HashMap::new();
        map.insert("https://example.com/foo.jpg".to_string(), bytes.to_vec());
        map.insert("https://example.com/clip.mp4".to_string(), b"clip".to_vec());
        map.insert("https://example.com/raw".to_string(), b"raw".to_vec());
        MemoryMedia(map)
    }

    #[tokio::test]
    async fn test_existing_author_dir_is_used() {
        let fs = MemoryFs::new(10);
        fs.add_folder("/foo/twitter/cat/author");

        save_bucketed(&fs, &media_source(b"foo"), "/foo", &post(vec![photo("https://example.com/foo.jpg")]))
            .await
            .unwrap();

        assert_eq!(fs.paths(), vec!["/foo/twitter/cat/author/Author_bar.jpg"]);
        assert_eq!(
            fs.read("/foo/twitter/cat/author/Author_bar.jpg").unwrap(),
            b"foo"
        );
    }

    #[tokio::test]
    async fn test_few_files_stay_in_category_root() {
        let fs = MemoryFs::new(10);
        fs.add_file("/foo/twitter/cat/author_a.jpg", b"a");

        save_bucketed(&fs, &media_source(b"foo"), "/foo/", &post(vec![photo("https://example.com/foo.jpg")]))
            .await
            .unwrap();

        assert_eq!(
            fs.paths(),
            vec!["/foo/twitter/cat/Author_bar.jpg", "/foo/twitter/cat/author_a.jpg"]
        );
        assert!(fs.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_crossing_threshold_promotes_author() {
        let fs = MemoryFs::new(10);
        for i in 1..=5 {
            fs.add_file(&format!("/foo/twitter/cat/author_bar{}.jpg", i), b"old");
        }
        fs.add_file("/foo/twitter/cat/other_1.jpg", b"other");

        save_bucketed(&fs, &media_source(b"foo"), "/foo", &post(vec![photo("https://example.com/foo.jpg")]))
            .await
            .unwrap();

        assert_eq!(*fs.created.lock().unwrap(), vec!["/foo/twitter/cat/author"]);
        let moved: Vec<String> = fs.moved.lock().unwrap().iter().map(|(_, to)| to.clone()).collect();
        assert_eq!(
            moved,
            (1..=5)
                .map(|i| format!("/foo/twitter/cat/author/author_bar{}.jpg", i))
                .collect::<Vec<_>>()
        );
        assert_eq!(
            fs.read("/foo/twitter/cat/author/Author_bar.jpg").unwrap(),
            b"foo"
        );
        assert!(fs.read("/foo/twitter/cat/Author_bar.jpg").is_none());
        assert!(fs.read("/foo/twitter/cat/other_1.jpg").is_some());
    }

    #[tokio::test]
    async fn test_threshold_counts_every_listing_page() {
        let fs = MemoryFs::new(2);
        for i in 1..=4 {
            fs.add_file(&format!("/foo/twitter/cat/AUTHOR_{}.jpg", i), b"old");
        }

        // 4 existing + 2 new crosses the threshold only if all pages are read
        let two = post(vec![
            photo("https://example.com/foo.jpg"),
            photo("https://example.com/clip.mp4"),
        ]);
        save_bucketed(&fs, &media_source(b"foo"), "/foo", &two)
            .await
            .unwrap();

        assert_eq!(fs.moved.lock().unwrap().len(), 4);
        assert!(fs.read("/foo/twitter/cat/author/AUTHOR_3.jpg").is_some());
        assert!(fs.read("/foo/twitter/cat/author/Author_bar_1.jpg").is_some());
        assert!(fs.read("/foo/twitter/cat/author/Author_bar_2.mp4").is_some());
    }

    #[tokio::test]
    async fn test_threshold_not_exceeded_at_five() {
        let fs = MemoryFs::new(10);
        for i in 1..=4 {
            fs.add_file(&format!("/foo/twitter/cat/author_{}.jpg", i), b"old");
        }

        save_bucketed(&fs, &media_source(b"foo"), "/foo", &post(vec![photo("https://example.com/foo.jpg")]))
            .await
            .unwrap();

        assert!(fs.created.lock().unwrap().is_empty());
        assert!(fs.read("/foo/twitter/cat/Author_bar.jpg").is_some());
    }

    #[tokio::test]
    async fn test_prefix_needs_separator() {
        let fs = MemoryFs::new(10);
        for i in 1..=5 {
            fs.add_file(&format!("/foo/twitter/cat/authority_{}.jpg", i), b"x");
        }

        save_bucketed(&fs, &media_source(b"foo"), "/foo", &post(vec![photo("https://example.com/foo.jpg")]))
            .await
            .unwrap();

        assert!(fs.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_saving_twice_keeps_one_file_per_media() {
        let fs = MemoryFs::new(10);
        let p = post(vec![
            photo("https://example.com/foo.jpg"),
            photo("https://example.com/raw"),
        ]);

        save_bucketed(&fs, &media_source(b"v1"), "/foo", &p).await.unwrap();
        save_bucketed(&fs, &media_source(b"v2"), "/foo", &p).await.unwrap();

        assert_eq!(
            fs.paths(),
            vec!["/foo/twitter/cat/Author_bar_1.jpg", "/foo/twitter/cat/Author_bar_2"]
        );
        assert_eq!(fs.read("/foo/twitter/cat/Author_bar_1.jpg").unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_no_media_is_noop() {
        let fs = MemoryFs::new(10);
        save_bucketed(&fs, &media_source(b"foo"), "/foo", &post(vec![]))
            .await
            .unwrap();

        assert_eq!(*fs.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_category_goes_to_uncategorized() {
        let fs = MemoryFs::new(10);
        let mut p = post(vec![photo("https://example.com/foo.jpg")]);
        p.category = String::new();

        save_bucketed(&fs, &media_source(b"foo"), "/foo", &p).await.unwrap();

        assert_eq!(fs.paths(), vec!["/foo/twitter/uncategorized/Author_bar.jpg"]);
    }

    #[tokio::test]
    async fn test_download_failure_is_an_error() {
        let fs = MemoryFs::new(10);
        let p = post(vec![photo("https://example.com/missing.png")]);

        let err = save_bucketed(&fs, &media_source(b"foo"), "/foo", &p)
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("404"));
        assert!(fs.paths().is_empty());
    }

    #[test]
    fn test_media_filename() {
        let single = post(vec![photo("https://example.com/a/b.png?name=orig")]);
        assert_eq!(media_filename(&single, 0, &single.media[0]), "Author_bar.png");

        let multi = post(vec![photo("https://example.com/x.jpg"), photo("https://example.com/y")]);
        assert_eq!(media_filename(&multi, 0, &multi.media[0]), "Author_bar_1.jpg");
        assert_eq!(media_filename(&multi, 1, &multi.media[1]), "Author_bar_2");
    }
}
