//! Resolution of voice attachments to local bytes.
//!
//! Attachments are cached per user under `{base}/cache/{user}/audio/`. A miss
//! downloads the file once; callers that miss on the same file while that
//! download runs wait for its result instead of starting their own.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::{Mutex, oneshot};
use vmcore::attachment::{FileMeta, FileMetaService};
use vmcore::decode::{CodecSupport, DecoderCodecSupport};
use vmcore::error::{Result, VoiceError};
use vmcore::net::{HttpClient, HttpRequest};
use vmcore::playback::PlaybackSource;

use crate::config::CacheLayout;

/// Mime type assumed when the metadata service cannot name one.
const DEFAULT_MIME: &str = "audio/mpeg";

type DownloadResult = Result<Bytes>;
type Waiters = HashMap<String, Vec<oneshot::Sender<DownloadResult>>>;

/// Result of looking a remote URL up in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFileStatus {
    pub exists: bool,
    pub full_path: PathBuf,
    pub file_meta: FileMeta,
}

/// A cache entry as read from disk. A missing file has an empty buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAudioFile {
    pub file_buffer: Bytes,
    pub full_path: PathBuf,
    pub cache_path: String,
    pub file_exists: bool,
}

pub struct AttachmentCache {
    layout: CacheLayout,
    http_client: Arc<dyn HttpClient>,
    meta_service: Arc<dyn FileMetaService>,
    codecs: Arc<dyn CodecSupport>,
    /// File names with a download in progress, mapped to everyone waiting on it.
    in_flight: Arc<Mutex<Waiters>>,
    last_loaded: Mutex<Option<LocalAudioFile>>,
}

impl AttachmentCache {
    pub fn new(
        layout: CacheLayout,
        http_client: Arc<dyn HttpClient>,
        meta_service: Arc<dyn FileMetaService>,
    ) -> Self {
        Self {
            layout,
            http_client,
            meta_service,
            codecs: Arc::new(DecoderCodecSupport),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            last_loaded: Mutex::new(None),
        }
    }

    pub fn with_codec_support(mut self, codecs: Arc<dyn CodecSupport>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Resolves the URL's file name and checks whether it is cached.
    pub async fn exists_audio_file(&self, url: &str) -> Result<AudioFileStatus> {
        let file_meta = self
            .meta_service
            .file_meta(url)
            .await
            .map_err(|e| VoiceError::Metadata(e.to_string()))?;
        let full_path = self.layout.file_path(&file_meta.name);
        let exists = tokio::fs::try_exists(&full_path).await?;
        Ok(AudioFileStatus {
            exists,
            full_path,
            file_meta,
        })
    }

    pub async fn get_local_audio_file(&self, file_name: &str) -> Result<LocalAudioFile> {
        let full_path = self.layout.file_path(file_name);
        let (file_buffer, file_exists) = match tokio::fs::read(&full_path).await {
            Ok(bytes) => (Bytes::from(bytes), true),
            Err(e) if e.kind() == ErrorKind::NotFound => (Bytes::new(), false),
            Err(e) => return Err(e.into()),
        };
        let entry = LocalAudioFile {
            file_buffer,
            full_path,
            cache_path: self.layout.relative_dir(),
            file_exists,
        };
        *self.last_loaded.lock().await = Some(entry.clone());
        Ok(entry)
    }

    /// Downloads `url` into the cache as `file_name` and returns its bytes.
    pub async fn download_and_cache(&self, url: &str, file_name: &str) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        let leader = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get_mut(file_name) {
                Some(waiters) => {
                    debug!("Joining in-flight download of {file_name}");
                    waiters.push(tx);
                    false
                }
                None => {
                    in_flight.insert(file_name.to_string(), vec![tx]);
                    true
                }
            }
        };

        if leader {
            // Detached so an abandoned caller cannot strand the others.
            let http_client = self.http_client.clone();
            let layout = self.layout.clone();
            let in_flight = self.in_flight.clone();
            let url = url.to_string();
            let file_name = file_name.to_string();
            tokio::spawn(async move {
                let fetch = {
                    let file_name = file_name.clone();
                    tokio::spawn(async move {
                        fetch_and_store(http_client.as_ref(), &layout, &url, &file_name).await
                    })
                };
                // A panicking fetch still has to release its waiters.
                let result = fetch.await.unwrap_or_else(|e| {
                    Err(VoiceError::Network(format!(
                        "download of {file_name} failed: {e}"
                    )))
                });
                let waiters = in_flight.lock().await.remove(&file_name).unwrap_or_default();
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
            });
        }

        rx.await
            .unwrap_or_else(|_| Err(VoiceError::Network(format!("download of {file_name} was dropped"))))
    }

    /// Playback source for a message: cached bytes when present and playable,
    /// otherwise the original URL.
    pub async fn get_audio_url(&self, original_url: &str) -> Result<PlaybackSource> {
        let remote = || PlaybackSource::Remote(original_url.to_string());
        let status = self.exists_audio_file(original_url).await?;
        if !status.exists {
            debug!("Cache miss for {}", status.file_meta.name);
            return Ok(remote());
        }

        let mime_type = match status.file_meta.mime_type.as_str() {
            "" | "application/octet-stream" => DEFAULT_MIME,
            mime => mime,
        };
        if !self.check_audio_support(mime_type) {
            warn!("{mime_type} is not playable locally, streaming {original_url}");
            return Ok(remote());
        }

        let local = self.get_local_audio_file(&status.file_meta.name).await?;
        if !local.file_exists {
            return Ok(remote());
        }
        debug!("Cache hit for {}", status.file_meta.name);
        Ok(PlaybackSource::Local {
            bytes: local.file_buffer,
            mime_type: mime_type.to_string(),
        })
    }

    /// Bytes for waveform extraction: from the cache, downloading on a miss.
    pub async fn load_audio_bytes(&self, url: &str) -> Result<Bytes> {
        let status = self.exists_audio_file(url).await?;
        if status.exists {
            let local = self.get_local_audio_file(&status.file_meta.name).await?;
            if local.file_exists {
                debug!("Cache hit for {}", status.file_meta.name);
                return Ok(local.file_buffer);
            }
        }
        self.download_and_cache(url, &status.file_meta.name).await
    }

    pub fn check_audio_support(&self, mime_type: &str) -> bool {
        self.codecs.supports(mime_type)
    }

    pub async fn last_loaded(&self) -> Option<LocalAudioFile> {
        self.last_loaded.lock().await.clone()
    }

    /// Forgets the last loaded buffer.
    pub async fn cleanup(&self) {
        *self.last_loaded.lock().await = None;
    }
}

async fn fetch_and_store(
    http_client: &dyn HttpClient,
    layout: &CacheLayout,
    url: &str,
    file_name: &str,
) -> Result<Bytes> {
    info!("Downloading voice attachment {file_name}");
    let response = http_client
        .execute(HttpRequest::get(url))
        .await
        .map_err(|e| VoiceError::Network(e.to_string()))?;
    if !response.is_success() {
        return Err(VoiceError::Network(format!(
            "{url} returned status {}",
            response.status_code
        )));
    }

    tokio::fs::create_dir_all(layout.audio_dir()).await?;
    let path = layout.file_path(file_name);
    let partial = layout.file_path(&format!("{file_name}.part"));
    if let Err(e) = tokio::fs::write(&partial, &response.body).await {
        if let Err(remove_err) = tokio::fs::remove_file(&partial).await {
            warn!("Failed to remove partial download {}: {remove_err}", partial.display());
        }
        return Err(e.into());
    }
    tokio::fs::rename(&partial, &path).await?;

    info!(
        "Cached {file_name} ({} bytes) at {}",
        response.body.len(),
        path.display()
    );
    Ok(Bytes::from(response.body))
}
