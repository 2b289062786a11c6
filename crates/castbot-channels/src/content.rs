//! Folder-backed campaigns.
//!
//! ```text
//! content_databases/
//!   promo/
//!     message.txt      text body (or caption when media is present)
//!     banner.jpg       first photo wins, then video, then gif
//! ```

use async_trait::async_trait;
use castbot_core::{CastError, ContentPayload, ContentSource, MediaKind, Result};
use std::path::{Path, PathBuf};

pub const MESSAGE_FILE: &str = "message.txt";

/// Media lookup order: every photo extension before any video, video before gif.
const MEDIA_PRECEDENCE: &[(MediaKind, &[&str])] = &[
    (MediaKind::Photo, &["jpg", "jpeg", "png"]),
    (MediaKind::Video, &["mp4", "mov", "avi"]),
    (MediaKind::Gif, &["gif"]),
];

pub struct FolderContentSource {
    root: PathBuf,
}

impl FolderContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn campaign_dir(&self, campaign_id: &str) -> Result<PathBuf> {
        // Campaign ids are plain folder names.
        if campaign_id.is_empty() || campaign_id.contains(['/', '\\']) || campaign_id.starts_with('.') {
            return Err(CastError::UnknownCampaign(campaign_id.to_string()));
        }
        let dir = self.root.join(campaign_id);
        if !dir.is_dir() {
            return Err(CastError::UnknownCampaign(campaign_id.to_string()));
        }
        Ok(dir)
    }
}

/// Files in `dir` whose extension matches `ext` (case-insensitive), sorted.
fn files_with_extension(dir: &Path, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn find_media(dir: &Path) -> std::io::Result<Option<(MediaKind, PathBuf)>> {
    for (kind, extensions) in MEDIA_PRECEDENCE {
        for ext in *extensions {
            if let Some(first) = files_with_extension(dir, ext)?.into_iter().next() {
                return Ok(Some((*kind, first)));
            }
        }
    }
    Ok(None)
}

#[async_trait]
impl ContentSource for FolderContentSource {
    async fn resolve(&self, campaign_id: &str) -> Result<ContentPayload> {
        let dir = self.campaign_dir(campaign_id)?;

        let message_path = dir.join(MESSAGE_FILE);
        let text = if message_path.is_file() {
            tokio::fs::read_to_string(&message_path).await?.trim().to_string()
        } else {
            String::new()
        };

        let payload = match find_media(&dir)? {
            Some((kind, path)) => {
                tracing::debug!("🖼️ Campaign '{campaign_id}' uses {kind}: {}", path.display());
                ContentPayload::media(text, kind, path)
            }
            None => ContentPayload::text(text),
        };
        Ok(payload)
    }

    async fn list_campaigns(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            tracing::warn!("⚠️ Content directory not found: {}", self.root.display());
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn campaign(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        for (file, body) in files {
            fs::write(dir.join(file), body).unwrap();
        }
    }

    #[tokio::test]
    async fn test_text_only_campaign() {
        let root = tempfile::tempdir().unwrap();
        campaign(root.path(), "promo", &[("message.txt", "  Big sale today!\n")]);
        let source = FolderContentSource::new(root.path());

        assert_eq!(
            source.resolve("promo").await.unwrap(),
            ContentPayload::text("Big sale today!")
        );
    }

    #[tokio::test]
    async fn test_photo_beats_video_and_gif() {
        let root = tempfile::tempdir().unwrap();
        campaign(
            root.path(),
            "spring",
            &[
                ("message.txt", "caption"),
                ("a.gif", "g"),
                ("b.mp4", "v"),
                ("z.png", "p"),
                ("c.jpg", "j"),
            ],
        );
        let source = FolderContentSource::new(root.path());

        let payload = source.resolve("spring").await.unwrap();
        let dir = root.path().join("spring");
        assert_eq!(payload, ContentPayload::media("caption", MediaKind::Photo, dir.join("c.jpg")));
    }

    #[tokio::test]
    async fn test_video_then_gif() {
        let root = tempfile::tempdir().unwrap();
        campaign(root.path(), "clip", &[("a.gif", "g"), ("b.MOV", "v")]);
        campaign(root.path(), "loop", &[("a.gif", "g")]);
        let source = FolderContentSource::new(root.path());

        let clip = source.resolve("clip").await.unwrap();
        assert_eq!(clip, ContentPayload::media("", MediaKind::Video, root.path().join("clip/b.MOV")));

        let looped = source.resolve("loop").await.unwrap();
        assert_eq!(looped, ContentPayload::media("", MediaKind::Gif, root.path().join("loop/a.gif")));
        assert!(looped.is_deliverable());
    }

    #[tokio::test]
    async fn test_empty_campaign_is_not_deliverable() {
        let root = tempfile::tempdir().unwrap();
        campaign(root.path(), "empty", &[("notes.md", "ignored")]);
        let source = FolderContentSource::new(root.path());

        assert!(!source.resolve("empty").await.unwrap().is_deliverable());
    }

    #[tokio::test]
    async fn test_unknown_campaign() {
        let root = tempfile::tempdir().unwrap();
        campaign(root.path(), "promo", &[("message.txt", "x")]);
        let source = FolderContentSource::new(root.path());

        for id in ["ghost", "", "../promo", ".hidden"] {
            assert!(
                matches!(source.resolve(id).await, Err(CastError::UnknownCampaign(_))),
                "{id:?} should be unknown"
            );
        }
    }

    #[tokio::test]
    async fn test_list_campaigns() {
        let root = tempfile::tempdir().unwrap();
        campaign(root.path(), "spring", &[]);
        campaign(root.path(), "promo", &[]);
        campaign(root.path(), ".trash", &[]);
        fs::write(root.path().join("README.txt"), b"not a campaign").unwrap();

        let source = FolderContentSource::new(root.path());
        assert_eq!(source.list_campaigns().await.unwrap(), vec!["promo", "spring"]);

        let missing = FolderContentSource::new(root.path().join("nope"));
        assert!(missing.list_campaigns().await.unwrap().is_empty());
    }
}
