//! Voice attachment records and the metadata service that names them.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A voice message's remote audio resource plus derived metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceAttachment {
    pub remote_url: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub duration_seconds: f64,
}

impl VoiceAttachment {
    /// Builds an attachment from resolved file metadata.
    pub fn from_meta(
        remote_url: impl Into<String>,
        meta: &FileMeta,
        size_bytes: u64,
        duration_seconds: f64,
    ) -> Self {
        Self {
            remote_url: remote_url.into(),
            file_name: meta.name.clone(),
            mime_type: meta.mime_type.clone(),
            size_bytes,
            duration_seconds,
        }
    }

    /// Stable identifier used for playback arbitration and fallback seeding.
    pub fn id(&self) -> &str {
        &self.remote_url
    }
}

/// Per-file metadata as returned by the metadata service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub path: String,
    pub file_type: String,
    pub mime_type: String,
    pub exists: bool,
}

/// Resolves file metadata for a batch of URLs or paths.
#[async_trait]
pub trait FileMetaService: Send + Sync {
    async fn files_meta(&self, urls: &[String]) -> Result<Vec<FileMeta>>;

    /// Resolves a single URL, failing if the service returns nothing for it.
    async fn file_meta(&self, url: &str) -> Result<FileMeta> {
        self.files_meta(&[url.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no metadata returned for {url}"))
    }
}

/// Derives metadata from the URL itself: the decoded last path segment names
/// the file and its extension picks the mime type.
#[derive(Debug, Clone, Default)]
pub struct UrlFileMetaService;

#[async_trait]
impl FileMetaService for UrlFileMetaService {
    async fn files_meta(&self, urls: &[String]) -> Result<Vec<FileMeta>> {
        urls.iter().map(|url| meta_from_url(url)).collect()
    }
}

/// Builds [`FileMeta`] for a single URL or local path.
pub fn meta_from_url(url: &str) -> Result<FileMeta> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    let path_part = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or_default(),
        None => without_query,
    };
    let segment = path_part.rsplit('/').next().unwrap_or_default();
    let decoded = urlencoding::decode(segment)
        .map_err(|e| anyhow!("invalid percent-encoding in {url}: {e}"))?;
    let name = sanitize_file_name(&decoded);
    if name.is_empty() || name.chars().all(|c| c == '.' || c == '_') {
        return Err(anyhow!("cannot derive a file name from {url}"));
    }

    let file_type = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    let mime_type = mime_for_extension(&file_type).to_string();
    let is_remote = url.contains("://");

    Ok(FileMeta {
        name,
        path: url.to_string(),
        exists: !is_remote && Path::new(url).exists(),
        file_type,
        mime_type,
    })
}

/// Replaces anything that could escape the cache directory.
pub fn sanitize_file_name(name: &str) -> String {
    name.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_',
        "_",
    )
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" | "oga" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        "m4a" | "mp4" => "audio/mp4",
        "webm" => "audio/webm",
        "amr" => "audio/amr",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_from_remote_url() {
        let meta = meta_from_url("https://cdn.example.com/voice/voice_1234.mp3?token=abc").unwrap();
        assert_eq!(meta.name, "voice_1234.mp3");
        assert_eq!(meta.file_type, "mp3");
        assert_eq!(meta.mime_type, "audio/mpeg");
        assert!(!meta.exists);
    }

    #[test]
    fn test_meta_decodes_and_sanitizes() {
        let meta = meta_from_url("https://cdn.example.com/a/..%2F..%2Fetc%2Fpasswd.wav").unwrap();
        assert!(!meta.name.contains('/'));
        assert_eq!(meta.mime_type, "audio/wav");
    }

    #[test]
    fn test_meta_rejects_empty_name() {
        assert!(meta_from_url("https://cdn.example.com/").is_err());
    }

    #[test]
    fn test_unknown_extension_is_octet_stream() {
        let meta = meta_from_url("https://cdn.example.com/blob").unwrap();
        assert_eq!(meta.file_type, "");
        assert_eq!(meta.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_attachment_from_meta() {
        let meta = meta_from_url("https://cdn.example.com/v.ogg").unwrap();
        let attachment = VoiceAttachment::from_meta("https://cdn.example.com/v.ogg", &meta, 2048, 3.5);
        assert_eq!(attachment.file_name, "v.ogg");
        assert_eq!(attachment.mime_type, "audio/ogg");
        assert_eq!(attachment.id(), "https://cdn.example.com/v.ogg");
    }
}
