//! Messaging session adapters
//!
//! The `Channel` trait is the capability both dispatchers depend on; the
//! concrete `WhatsApp` adapter lives in [`whatsapp`].

mod whatsapp;

use async_trait::async_trait;

pub use whatsapp::{WhatsAppChannel, WhatsAppWebhook};

use crate::Result;

/// Kind of media, derived from a MIME type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Image file (JPEG, PNG, GIF, etc.)
    Image,
    /// Audio file, including voice notes
    Audio,
    /// Video file
    Video,
    /// Anything else
    Document,
}

impl MediaKind {
    /// Determine media kind from a MIME type
    #[must_use]
    pub fn from_mime(mime_type: &str) -> Self {
        let lower = mime_type.to_lowercase();
        if lower.starts_with("image/") {
            Self::Image
        } else if lower.starts_with("audio/") {
            Self::Audio
        } else if lower.starts_with("video/") {
            Self::Video
        } else {
            Self::Document
        }
    }

    /// Message type tag used by the send API
    #[must_use]
    pub const fn api_name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    /// Whether the platform accepts a caption for this kind
    #[must_use]
    pub const fn supports_caption(self) -> bool {
        !matches!(self, Self::Audio)
    }
}

/// Reference to an attachment still held by the messaging platform
#[derive(Debug, Clone)]
pub struct MediaRef {
    /// Platform media identifier, used to download the bytes
    pub id: String,

    /// Declared MIME type
    pub mime_type: String,

    /// Whether the attachment is a voice note
    pub voice_note: bool,
}

/// A normalized inbound message from the session
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Message identifier (platform-specific)
    pub id: String,

    /// Sender identifier
    pub from: String,

    /// Recipient identifier (this session)
    pub to: String,

    /// Caption, body, or empty
    pub text: String,

    /// Attachment, if the message carries one
    pub media: Option<MediaRef>,

    /// Platform timestamp, seconds since the epoch
    pub timestamp: i64,
}

/// Media bytes ready to hand to a send operation
#[derive(Debug, Clone)]
pub struct SendableMedia {
    /// Raw content
    pub data: Vec<u8>,

    /// MIME type
    pub mime_type: String,

    /// Original filename, when one is known
    pub filename: Option<String>,
}

/// Trait for messaging session adapters
///
/// The single long-lived session is shared (`Arc<dyn Channel>`) by every
/// concurrent dispatch; implementations serialize their own network
/// operations.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name
    fn name(&self) -> &'static str;

    /// Identity of this session; inbound messages from this sender are
    /// self-originated and must not be relayed
    fn self_id(&self) -> &str;

    /// Connect to the channel
    async fn connect(&mut self) -> Result<()>;

    /// Send a plain text message
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Send a media message; an empty caption means no caption
    async fn send_media(&self, to: &str, media: &SendableMedia, caption: &str) -> Result<()>;

    /// Download the bytes behind an attachment reference
    async fn download_media(&self, media: &MediaRef) -> Result<Vec<u8>>;

    /// Check if connected
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::MediaKind;

    #[test]
    fn media_kind_from_mime_prefix() {
        assert_eq!(MediaKind::from_mime("image/jpeg"), MediaKind::Image);
        assert_eq!(MediaKind::from_mime("IMAGE/PNG"), MediaKind::Image);
        assert_eq!(
            MediaKind::from_mime("audio/ogg; codecs=opus"),
            MediaKind::Audio
        );
        assert_eq!(MediaKind::from_mime("video/mp4"), MediaKind::Video);
        assert_eq!(MediaKind::from_mime("application/pdf"), MediaKind::Document);
        assert_eq!(MediaKind::from_mime(""), MediaKind::Document);
    }

    #[test]
    fn audio_takes_no_caption() {
        assert!(!MediaKind::Audio.supports_caption());
        assert!(MediaKind::Image.supports_caption());
        assert!(MediaKind::Document.supports_caption());
    }
}
