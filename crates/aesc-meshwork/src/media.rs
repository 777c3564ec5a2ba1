//! Content-addressed media store for signal uploads.
//!
//! Files live under `{data_dir}/media/{blake3}.{ext}` and are served at
//! `{public_base}/media/{key}`.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Largest accepted upload.
pub const MAX_MEDIA_BYTES: usize = 8 * 1024 * 1024;

/// A stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
    /// False when identical bytes were already stored
    pub created: bool,
}

/// File extension for an accepted content type.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/avif" => "avif",
        "image/heic" => "heic",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/webm" => "weba",
        "audio/mp4" | "audio/aac" => "m4a",
        _ => return None,
    };
    Some(ext)
}

/// Local media directory.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    public_base: String,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>, public_base: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base: public_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/media/{key}", self.public_base)
    }

    /// Store bytes of an accepted type.
    pub async fn put(&self, bytes: &[u8], content_type: &str) -> Result<StoredMedia> {
        if bytes.len() > MAX_MEDIA_BYTES {
            return Err(Error::PayloadTooLarge { max: MAX_MEDIA_BYTES });
        }
        if bytes.is_empty() {
            return Err(Error::InvalidInput("media is empty".into()));
        }
        let ext = extension_for(content_type)
            .ok_or_else(|| Error::InvalidInput(format!("unsupported media type: {content_type}")))?;

        let key = format!("{}.{ext}", blake3::hash(bytes).to_hex());
        let path = self.root.join(&key);

        tokio::fs::create_dir_all(&self.root).await?;
        let created = if tokio::fs::try_exists(&path).await? {
            false
        } else {
            let tmp = self.root.join(format!(".{key}.part"));
            tokio::fs::write(&tmp, bytes).await?;
            tokio::fs::rename(&tmp, &path).await?;
            true
        };

        tracing::debug!(key = %key, bytes = bytes.len(), created, "stored media");
        Ok(StoredMedia {
            url: self.url_for(&key),
            key,
            created,
        })
    }

    /// Remove a stored file. Missing files are not an error.
    pub async fn delete(&self, key: &str) -> Result<()> {
        if key.contains('/') || key.contains('\\') || key.starts_with('.') {
            return Err(Error::InvalidInput("invalid media key".into()));
        }
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
