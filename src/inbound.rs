//! Inbound dispatcher
//!
//! Normalized session events become `RelayPayload`s and are delivered to
//! a webhook with test-then-production fallback. Delivery is an explicit
//! two-step pipeline with a typed outcome per step, so the
//! at-least-one-destination guarantee stays auditable.

use std::sync::Arc;

use reqwest::StatusCode;
use serde::Serialize;

use crate::channel::{Channel, InboundMessage};
use crate::config::WebhookConfig;
use crate::media::MediaStore;
use crate::token::TokenProvider;
use crate::{Error, Result};

/// Payload delivered to the webhook for each relayed message
///
/// Built fresh per event and owned by the dispatch that built it. The
/// media trio is present only when the event carried an attachment.
#[derive(Debug, Clone, Serialize)]
pub struct RelayPayload {
    /// Sender identifier
    pub from: String,

    /// Caption, body, or empty
    pub text: String,

    /// Freshly minted bearer token; never reused across events
    pub access_token: String,

    /// Dispatch time (RFC 3339), not the message time
    pub timestamp: String,

    /// Public URL of the staged attachment
    #[serde(rename = "imageUrl", skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// MIME type of the attachment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,

    /// Whether the attachment is a voice note
    #[serde(rename = "isVoiceNote", skip_serializing_if = "Option::is_none")]
    pub is_voice_note: Option<bool>,
}

/// Destination that accepted a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The test webhook took it; production was never called
    Test,
    /// The test webhook failed and production took the fallback
    Production,
}

/// Terminal result of one inbound dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Self-originated message, dropped without side effects
    Ignored,
    /// Payload accepted by a destination
    Delivered(Delivery),
}

/// Result of a single webhook POST
enum StepOutcome {
    Accepted(StatusCode),
    Rejected(StatusCode),
    Unreachable(String),
}

/// Relays inbound session events to the configured webhooks
pub struct InboundDispatcher {
    session: Arc<dyn Channel>,
    tokens: TokenProvider,
    media: MediaStore,
    webhooks: WebhookConfig,
    client: reqwest::Client,
}

impl InboundDispatcher {
    /// Create a new inbound dispatcher
    #[must_use]
    pub fn new(
        session: Arc<dyn Channel>,
        tokens: TokenProvider,
        media: MediaStore,
        webhooks: WebhookConfig,
    ) -> Self {
        Self {
            session,
            tokens,
            media,
            webhooks,
            client: reqwest::Client::new(),
        }
    }

    /// Relay one inbound event
    ///
    /// Terminal on the first accepted delivery or on exhausting both
    /// destinations. Token and media failures abort before any webhook
    /// call is made.
    ///
    /// # Errors
    ///
    /// Returns `Error::Token` or `Error::Media` when payload construction
    /// fails, and `Error::Delivery` when both destinations fail.
    pub async fn dispatch(&self, message: InboundMessage) -> Result<DispatchOutcome> {
        if message.from == self.session.self_id() {
            tracing::debug!(from = %message.from, "ignoring self-originated message");
            return Ok(DispatchOutcome::Ignored);
        }

        let access_token = self.tokens.fetch().await?;

        let mut payload = RelayPayload {
            from: message.from,
            text: message.text,
            access_token,
            timestamp: chrono::Utc::now().to_rfc3339(),
            image_url: None,
            mimetype: None,
            is_voice_note: None,
        };

        if let Some(media) = &message.media {
            let uploaded = self
                .media
                .upload_inbound(self.session.as_ref(), media)
                .await?;
            payload.image_url = Some(uploaded.secure_url);
            payload.mimetype = Some(uploaded.mime_type);
            payload.is_voice_note = Some(media.voice_note);
        }

        self.deliver(&payload).await.map(DispatchOutcome::Delivered)
    }

    /// Two-step delivery: test first; production exactly once when the
    /// test destination rejects the payload or cannot be reached
    async fn deliver(&self, payload: &RelayPayload) -> Result<Delivery> {
        match self.post(&self.webhooks.test_url, payload).await {
            StepOutcome::Accepted(status) => {
                tracing::info!(%status, "payload accepted by test webhook");
                return Ok(Delivery::Test);
            }
            StepOutcome::Rejected(status) => {
                tracing::warn!(%status, "test webhook rejected payload, falling back to production");
            }
            StepOutcome::Unreachable(error) => {
                tracing::warn!(%error, "test webhook unreachable, falling back to production");
            }
        }

        match self.post(&self.webhooks.prod_url, payload).await {
            StepOutcome::Accepted(status) => {
                tracing::info!(%status, "payload accepted by production webhook");
                Ok(Delivery::Production)
            }
            StepOutcome::Rejected(status) => Err(Error::Delivery(format!(
                "production webhook rejected payload: {status}"
            ))),
            StepOutcome::Unreachable(error) => Err(Error::Delivery(format!(
                "production webhook unreachable: {error}"
            ))),
        }
    }

    /// POST the payload as JSON to one destination
    async fn post(&self, url: &str, payload: &RelayPayload) -> StepOutcome {
        match self.client.post(url).json(payload).send().await {
            Ok(response) if response.status().is_success() => {
                StepOutcome::Accepted(response.status())
            }
            Ok(response) => StepOutcome::Rejected(response.status()),
            Err(e) => StepOutcome::Unreachable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RelayPayload;

    fn base_payload() -> RelayPayload {
        RelayPayload {
            from: "628222".to_string(),
            text: "hello".to_string(),
            access_token: "tok".to_string(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            image_url: None,
            mimetype: None,
            is_voice_note: None,
        }
    }

    #[test]
    fn wire_names_match_consumers() {
        let mut payload = base_payload();
        payload.image_url = Some("https://cdn.example/x.jpg".to_string());
        payload.mimetype = Some("image/jpeg".to_string());
        payload.is_voice_note = Some(false);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["from"], "628222");
        assert_eq!(json["access_token"], "tok");
        assert_eq!(json["imageUrl"], "https://cdn.example/x.jpg");
        assert_eq!(json["mimetype"], "image/jpeg");
        assert_eq!(json["isVoiceNote"], false);
    }

    #[test]
    fn media_fields_absent_without_media() {
        let json = serde_json::to_value(base_payload()).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("imageUrl"));
        assert!(!object.contains_key("mimetype"));
        assert!(!object.contains_key("isVoiceNote"));
        assert!(object.contains_key("timestamp"));
    }
}
