//! `WhatsApp` channel adapter
//!
//! Uses the `WhatsApp` Business Cloud API: events arrive through the
//! webhook endpoint and are normalized here; sends and media downloads go
//! through the graph API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::{Channel, InboundMessage, MediaKind, MediaRef, SendableMedia};
use crate::config::SessionConfig;
use crate::{Error, Result};

const GRAPH_API_URL: &str = "https://graph.facebook.com/v18.0";

/// `WhatsApp` channel adapter
pub struct WhatsAppChannel {
    config: SessionConfig,
    client: Client,
    message_tx: Option<mpsc::Sender<InboundMessage>>,
    connected: bool,
}

impl WhatsAppChannel {
    /// Create a new `WhatsApp` channel adapter
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            message_tx: None,
            connected: false,
        }
    }

    /// Create with a message receiver
    ///
    /// Returns the channel and a receiver for normalized inbound messages
    #[must_use]
    pub fn with_receiver(config: SessionConfig) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(100);
        let channel = Self {
            config,
            client: Client::new(),
            message_tx: Some(tx),
            connected: false,
        };
        (channel, rx)
    }

    /// Process an incoming webhook event
    ///
    /// Normalizes each message in the payload and forwards it to the
    /// receiver. Call this from the webhook handler.
    ///
    /// # Errors
    ///
    /// Returns error if message forwarding fails
    pub async fn handle_webhook(&self, payload: &WhatsAppWebhook) -> Result<()> {
        for entry in &payload.entry {
            for change in &entry.changes {
                let to = change
                    .value
                    .metadata
                    .as_ref()
                    .map_or_else(|| self.config.phone_number_id.clone(), |m| {
                        m.display_phone_number
                            .clone()
                            .unwrap_or_else(|| m.phone_number_id.clone())
                    });

                let Some(messages) = &change.value.messages else {
                    continue;
                };

                for msg in messages {
                    let incoming = normalize_message(msg, &to);

                    if incoming.text.is_empty() && incoming.media.is_none() {
                        continue;
                    }

                    if let Some(tx) = &self.message_tx {
                        tx.send(incoming).await.map_err(|e| {
                            Error::Channel(format!("failed to forward message: {e}"))
                        })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// POST a message body to the graph messages endpoint
    async fn post_message(&self, body: &serde_json::Value) -> Result<()> {
        let url = format!("{GRAPH_API_URL}/{}/messages", self.config.phone_number_id);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("WhatsApp API error: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "WhatsApp API error: {status} - {body}"
            )));
        }

        Ok(())
    }

    /// Upload media bytes, returning the platform media ID
    async fn upload_media(&self, media: &SendableMedia) -> Result<String> {
        let url = format!("{GRAPH_API_URL}/{}/media", self.config.phone_number_id);

        let filename = media
            .filename
            .clone()
            .unwrap_or_else(|| "upload.bin".to_string());
        let part = reqwest::multipart::Part::bytes(media.data.clone())
            .file_name(filename)
            .mime_str(&media.mime_type)
            .map_err(|e| Error::Channel(format!("unusable media type: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", media.mime_type.clone())
            .part("file", part);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("media upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Channel(format!(
                "media upload failed: {status} - {body}"
            )));
        }

        let uploaded: MediaId = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("media upload response: {e}")))?;

        Ok(uploaded.id)
    }

    /// Download attachment bytes: resolve the media ID to a URL, then
    /// fetch it (both calls bearer-authenticated)
    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        let lookup_url = format!("{GRAPH_API_URL}/{}", media.id);
        let response = self
            .client
            .get(&lookup_url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("media lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "media lookup failed: {}",
                response.status()
            )));
        }

        let lookup: MediaLookup = response
            .json()
            .await
            .map_err(|e| Error::Channel(format!("media lookup response: {e}")))?;

        let response = self
            .client
            .get(&lookup.url)
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| Error::Channel(format!("media download failed: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Channel(format!(
                "media download failed: {}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Channel(format!("media read failed: {e}")))?;

        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Channel for WhatsAppChannel {
    fn name(&self) -> &'static str {
        "whatsapp"
    }

    fn self_id(&self) -> &str {
        self.config
            .display_number
            .as_deref()
            .unwrap_or(&self.config.phone_number_id)
    }

    async fn connect(&mut self) -> Result<()> {
        // Webhook-driven; "connect" validates the configuration
        if self.config.access_token.is_empty() {
            return Err(Error::Channel("WhatsApp access token required".to_string()));
        }
        if self.config.phone_number_id.is_empty() {
            return Err(Error::Channel(
                "WhatsApp phone number ID required".to_string(),
            ));
        }

        self.connected = true;
        tracing::info!("WhatsApp channel connected");
        Ok(())
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "text",
            "text": { "body": text }
        });

        self.post_message(&body).await?;
        tracing::debug!(to, "WhatsApp text sent");
        Ok(())
    }

    async fn send_media(&self, to: &str, media: &SendableMedia, caption: &str) -> Result<()> {
        let media_id = self.upload_media(media).await?;
        let kind = MediaKind::from_mime(&media.mime_type);

        let mut object = serde_json::json!({ "id": media_id });
        if !caption.is_empty() && kind.supports_caption() {
            object["caption"] = serde_json::Value::from(caption);
        }

        let mut body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": kind.api_name(),
        });
        body[kind.api_name()] = object;

        self.post_message(&body).await?;
        tracing::debug!(to, kind = kind.api_name(), "WhatsApp media sent");
        Ok(())
    }

    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>> {
        self.fetch_media(media).await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Build an [`InboundMessage`] from a raw platform message
fn normalize_message(msg: &WhatsAppMessage, to: &str) -> InboundMessage {
    let mut text = msg
        .text
        .as_ref()
        .map(|t| t.body.clone())
        .unwrap_or_default();

    let mut media = None;

    if let Some(image) = &msg.image {
        let mime = image
            .mime_type
            .clone()
            .unwrap_or_else(|| "image/jpeg".to_string());
        if text.is_empty() {
            text = image.caption.clone().unwrap_or_default();
        }
        media = Some(MediaRef {
            id: image.id.clone(),
            mime_type: mime,
            voice_note: false,
        });
    } else if let Some(audio) = &msg.audio {
        let mime = audio
            .mime_type
            .clone()
            .unwrap_or_else(|| "audio/ogg".to_string());
        media = Some(MediaRef {
            id: audio.id.clone(),
            mime_type: mime,
            voice_note: audio.voice.unwrap_or(false),
        });
    } else if let Some(video) = &msg.video {
        let mime = video
            .mime_type
            .clone()
            .unwrap_or_else(|| "video/mp4".to_string());
        if text.is_empty() {
            text = video.caption.clone().unwrap_or_default();
        }
        media = Some(MediaRef {
            id: video.id.clone(),
            mime_type: mime,
            voice_note: false,
        });
    } else if let Some(doc) = &msg.document {
        let mime = doc
            .mime_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string());
        if text.is_empty() {
            text = doc.caption.clone().unwrap_or_default();
        }
        media = Some(MediaRef {
            id: doc.id.clone(),
            mime_type: mime,
            voice_note: false,
        });
    }

    InboundMessage {
        id: msg.id.clone(),
        from: msg.from.clone(),
        to: to.to_string(),
        text,
        media,
        timestamp: msg.timestamp.parse().unwrap_or_default(),
    }
}

/// Graph media upload response
#[derive(Debug, Deserialize)]
struct MediaId {
    id: String,
}

/// Graph media lookup response
#[derive(Debug, Deserialize)]
struct MediaLookup {
    url: String,
}

/// `WhatsApp` webhook payload from the Cloud API
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhook {
    /// Webhook entries
    pub entry: Vec<WhatsAppWebhookEntry>,
}

/// `WhatsApp` webhook entry
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookEntry {
    /// Changes in this entry
    pub changes: Vec<WhatsAppWebhookChange>,
}

/// `WhatsApp` webhook change
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookChange {
    /// The change value
    pub value: WhatsAppWebhookValue,
}

/// `WhatsApp` webhook value containing messages
#[derive(Debug, Deserialize)]
pub struct WhatsAppWebhookValue {
    /// Receiving phone number metadata
    pub metadata: Option<WhatsAppMetadata>,
    /// Incoming messages (if any)
    pub messages: Option<Vec<WhatsAppMessage>>,
}

/// Receiving phone number metadata
#[derive(Debug, Deserialize)]
pub struct WhatsAppMetadata {
    /// Display phone number of this session
    pub display_phone_number: Option<String>,
    /// Phone number ID of this session
    pub phone_number_id: String,
}

/// `WhatsApp` message
#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    /// Sender phone number
    pub from: String,
    /// Message ID
    pub id: String,
    /// Message timestamp (seconds since the epoch, as a string)
    pub timestamp: String,
    /// Message type
    #[serde(rename = "type")]
    pub message_type: String,
    /// Text content (for text messages)
    pub text: Option<WhatsAppTextContent>,
    /// Image content
    pub image: Option<WhatsAppMedia>,
    /// Audio content (voice notes carry `voice: true`)
    pub audio: Option<WhatsAppAudio>,
    /// Video content
    pub video: Option<WhatsAppMedia>,
    /// Document content
    pub document: Option<WhatsAppMedia>,
}

/// `WhatsApp` media object (image, video, document)
#[derive(Debug, Deserialize)]
pub struct WhatsAppMedia {
    /// Media ID (use to fetch the bytes)
    pub id: String,
    /// MIME type
    pub mime_type: Option<String>,
    /// Caption
    pub caption: Option<String>,
}

/// `WhatsApp` audio object
#[derive(Debug, Deserialize)]
pub struct WhatsAppAudio {
    /// Media ID (use to fetch the bytes)
    pub id: String,
    /// MIME type
    pub mime_type: Option<String>,
    /// Whether this is a voice note
    pub voice: Option<bool>,
}

/// `WhatsApp` text message content
#[derive(Debug, Deserialize)]
pub struct WhatsAppTextContent {
    /// Message body
    pub body: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SessionConfig {
        SessionConfig {
            access_token: "token".to_string(),
            phone_number_id: "100001".to_string(),
            display_number: Some("628111".to_string()),
            verify_token: None,
        }
    }

    fn webhook_json(message: serde_json::Value) -> WhatsAppWebhook {
        serde_json::from_value(serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "metadata": {
                            "display_phone_number": "628111",
                            "phone_number_id": "100001"
                        },
                        "messages": [message]
                    }
                }]
            }]
        }))
        .expect("valid webhook payload")
    }

    #[tokio::test]
    async fn normalizes_text_message() {
        let (channel, mut rx) = WhatsAppChannel::with_receiver(test_config());
        let payload = webhook_json(serde_json::json!({
            "from": "628222",
            "id": "wamid.1",
            "timestamp": "1700000000",
            "type": "text",
            "text": { "body": "hello" }
        }));

        channel.handle_webhook(&payload).await.unwrap();

        let msg = rx.recv().await.expect("message forwarded");
        assert_eq!(msg.from, "628222");
        assert_eq!(msg.to, "628111");
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.timestamp, 1_700_000_000);
        assert!(msg.media.is_none());
    }

    #[tokio::test]
    async fn normalizes_image_caption_and_media() {
        let (channel, mut rx) = WhatsAppChannel::with_receiver(test_config());
        let payload = webhook_json(serde_json::json!({
            "from": "628222",
            "id": "wamid.2",
            "timestamp": "1700000001",
            "type": "image",
            "image": { "id": "media-1", "mime_type": "image/png", "caption": "a photo" }
        }));

        channel.handle_webhook(&payload).await.unwrap();

        let msg = rx.recv().await.expect("message forwarded");
        assert_eq!(msg.text, "a photo");
        let media = msg.media.expect("media attached");
        assert_eq!(media.id, "media-1");
        assert_eq!(media.mime_type, "image/png");
        assert!(!media.voice_note);
    }

    #[tokio::test]
    async fn flags_voice_notes() {
        let (channel, mut rx) = WhatsAppChannel::with_receiver(test_config());
        let payload = webhook_json(serde_json::json!({
            "from": "628222",
            "id": "wamid.3",
            "timestamp": "1700000002",
            "type": "audio",
            "audio": { "id": "media-2", "mime_type": "audio/ogg; codecs=opus", "voice": true }
        }));

        channel.handle_webhook(&payload).await.unwrap();

        let msg = rx.recv().await.expect("message forwarded");
        assert!(msg.text.is_empty());
        let media = msg.media.expect("media attached");
        assert!(media.voice_note);
        assert_eq!(media.mime_type, "audio/ogg; codecs=opus");
    }

    #[test]
    fn self_id_prefers_display_number() {
        let channel = WhatsAppChannel::new(test_config());
        assert_eq!(channel.self_id(), "628111");

        let mut config = test_config();
        config.display_number = None;
        let channel = WhatsAppChannel::new(config);
        assert_eq!(channel.self_id(), "100001");
    }
}
