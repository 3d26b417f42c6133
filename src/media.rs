//! Media relay
//!
//! Inbound: stages session attachments into object storage and hands back
//! a public URL. Outbound: resolves reply media URLs into sendable
//! objects.

use std::io::Write;
use std::path::Path;

use futures::future::try_join_all;
use reqwest::header::CONTENT_TYPE;
use secrecy::ExposeSecret;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::channel::{Channel, MediaRef, SendableMedia};
use crate::config::StorageConfig;
use crate::{Error, Result};

/// A staged inbound attachment: public URL plus the original MIME type
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    /// Public HTTPS URL in object storage
    pub secure_url: String,

    /// MIME type as declared by the messaging platform
    pub mime_type: String,
}

/// Storage upload response
#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: String,
}

/// Client for the object storage provider
#[derive(Clone)]
pub struct MediaStore {
    config: StorageConfig,
    client: reqwest::Client,
}

impl MediaStore {
    /// Create a new media store
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Stage an inbound attachment: download the bytes from the session,
    /// spill them to a uniquely named temporary file, and upload that file
    /// to the inbox folder with automatic resource-type detection.
    ///
    /// The temporary file is removed on every exit path, including upload
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns `Error::Media` on download, filesystem, or upload failure.
    pub async fn upload_inbound(
        &self,
        session: &dyn Channel,
        media: &MediaRef,
    ) -> Result<UploadedMedia> {
        let bytes = session
            .download_media(media)
            .await
            .map_err(|e| Error::Media(format!("attachment download failed: {e}")))?;

        let extension = extension_from_mime(&media.mime_type);
        let mut file = tempfile::Builder::new()
            .prefix(&format!("inbox-{}-", Uuid::new_v4()))
            .suffix(&format!(".{extension}"))
            .tempfile()
            .map_err(|e| Error::Media(format!("temp file creation failed: {e}")))?;
        file.write_all(&bytes)
            .map_err(|e| Error::Media(format!("temp file write failed: {e}")))?;

        let secure_url = self.upload_file(file.path(), &media.mime_type).await?;

        Ok(UploadedMedia {
            secure_url,
            mime_type: media.mime_type.clone(),
        })
    }

    /// Upload one file to the storage provider, returning its public URL
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Media(format!("temp file read failed: {e}")))?;

        let timestamp = chrono::Utc::now().timestamp().to_string();
        let signature = self.sign_params(&[
            ("folder", &self.config.inbox_folder),
            ("timestamp", &timestamp),
        ]);

        let file_name = path
            .file_name()
            .map_or_else(|| "upload.bin".to_string(), |n| n.to_string_lossy().into_owned());
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|e| Error::Media(format!("unusable media type: {e}")))?;

        let form = reqwest::multipart::Form::new()
            .text("api_key", self.config.api_key.clone())
            .text("timestamp", timestamp)
            .text("folder", self.config.inbox_folder.clone())
            .text("signature", signature)
            .part("file", part);

        let url = format!(
            "{}/v1_1/{}/auto/upload",
            self.config.api_base, self.config.cloud_name
        );

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Media(format!("storage upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Media(format!(
                "storage upload failed: {status} - {body}"
            )));
        }

        let upload: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Media(format!("storage upload response: {e}")))?;

        Ok(upload.secure_url)
    }

    /// Hex SHA-256 over the sorted parameter string plus the API secret
    fn sign_params(&self, params: &[(&str, &str)]) -> String {
        let mut sorted = params.to_vec();
        sorted.sort_unstable();

        let joined = sorted
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join("&");

        let mut hasher = Sha256::new();
        hasher.update(joined.as_bytes());
        hasher.update(self.config.api_secret.expose_secret().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Fetch one outbound media URL into a sendable object
    ///
    /// The MIME type comes from the response `Content-Type`; unlisted or
    /// missing types fall back to `application/octet-stream` rather than
    /// being rejected.
    ///
    /// # Errors
    ///
    /// Returns `Error::MediaFetch` if the URL cannot be fetched.
    pub async fn resolve_outbound(&self, url: &str) -> Result<SendableMedia> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::MediaFetch(format!("fetch failed for {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::MediaFetch(format!(
                "{url} returned {}",
                response.status()
            )));
        }

        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map_or_else(
                || "application/octet-stream".to_string(),
                |value| value.split(';').next().unwrap_or(value).trim().to_string(),
            );

        let filename = filename_from_url(url);

        let data = response
            .bytes()
            .await
            .map_err(|e| Error::MediaFetch(format!("read failed for {url}: {e}")))?
            .to_vec();

        Ok(SendableMedia {
            data,
            mime_type,
            filename,
        })
    }

    /// Resolve a batch of outbound URLs concurrently
    ///
    /// The result preserves input order; all items resolve before any is
    /// handed to a send, so a single bad URL fails the whole batch.
    ///
    /// # Errors
    ///
    /// Returns the first `Error::MediaFetch` encountered.
    pub async fn resolve_outbound_many(&self, urls: &[String]) -> Result<Vec<SendableMedia>> {
        try_join_all(urls.iter().map(|url| self.resolve_outbound(url))).await
    }
}

/// File extension from a MIME type, `bin` when unparsable
fn extension_from_mime(mime_type: &str) -> &str {
    mime_type
        .split('/')
        .nth(1)
        .and_then(|subtype| subtype.split(';').next())
        .map(str::trim)
        .filter(|subtype| !subtype.is_empty())
        .unwrap_or("bin")
}

/// Last path segment of a URL, when one exists
fn filename_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw).ok()?;
    parsed
        .path_segments()?
        .next_back()
        .filter(|segment| !segment.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn test_store() -> MediaStore {
        MediaStore::new(StorageConfig {
            api_base: "https://storage.invalid".to_string(),
            cloud_name: "demo".to_string(),
            api_key: "key".to_string(),
            api_secret: SecretString::from("secret".to_string()),
            inbox_folder: "wa-inbox-files".to_string(),
        })
    }

    #[test]
    fn extension_falls_back_to_bin() {
        assert_eq!(extension_from_mime("image/jpeg"), "jpeg");
        assert_eq!(extension_from_mime("audio/ogg; codecs=opus"), "ogg");
        assert_eq!(extension_from_mime("weird"), "bin");
        assert_eq!(extension_from_mime(""), "bin");
        assert_eq!(extension_from_mime("application/"), "bin");
    }

    #[test]
    fn filename_from_url_takes_last_segment() {
        assert_eq!(
            filename_from_url("https://cdn.example/a/b/cat.png"),
            Some("cat.png".to_string())
        );
        assert_eq!(filename_from_url("https://cdn.example/"), None);
        assert_eq!(filename_from_url("not a url"), None);
    }

    #[test]
    fn signature_is_order_independent() {
        let store = test_store();
        let forward = store.sign_params(&[("folder", "wa-inbox-files"), ("timestamp", "1700")]);
        let reverse = store.sign_params(&[("timestamp", "1700"), ("folder", "wa-inbox-files")]);
        assert_eq!(forward, reverse);
        assert_eq!(forward.len(), 64);
    }
}
