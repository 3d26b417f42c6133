//! Reply endpoint
//!
//! Maps a generic reply payload (text and/or one-or-many media URLs) onto
//! session send operations. Callers wrap the payload in several shapes;
//! everything is normalized once at this boundary.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiState;
use crate::{Error, Result};

/// A reply request after normalization
#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    /// Recipient identifier
    pub from: String,

    /// Reply text; doubles as the media caption fallback
    pub reply: Option<String>,

    /// One URL, or an ordered batch of URLs
    #[serde(rename = "imageUrl")]
    pub image_url: Option<ImageUrlField>,

    /// Caption for the (first) media item
    pub caption: Option<String>,
}

/// Raw `imageUrl` field: a plain string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ImageUrlField {
    /// Single media URL
    Single(String),
    /// Ordered batch of media URLs
    Many(Vec<String>),
}

/// Media selection resolved once at the request boundary; a one-element
/// list collapses to `Single`
#[derive(Debug)]
enum ReplyMedia {
    None,
    Single(String),
    Many(Vec<String>),
}

impl ReplyMedia {
    fn from_field(field: Option<ImageUrlField>) -> Self {
        match field {
            None => Self::None,
            Some(ImageUrlField::Single(url)) => Self::Single(url),
            Some(ImageUrlField::Many(mut urls)) => {
                if urls.len() == 1 {
                    Self::Single(urls.remove(0))
                } else {
                    Self::Many(urls)
                }
            }
        }
    }
}

/// Success response
#[derive(Serialize)]
struct ReplySuccess {
    success: bool,
}

/// Error response
#[derive(Serialize)]
struct ReplyError {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Unwrap the accepted request shapes: raw object, JSON-encoded string
/// body, or an object wrapped in a `data` field (itself object or string)
fn normalize(body: Value) -> Result<ReplyRequest> {
    let value = match body {
        Value::String(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::Validation(format!("body is not valid JSON: {e}")))?,
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::String(raw)) => serde_json::from_str(&raw)
                .map_err(|e| Error::Validation(format!("data is not valid JSON: {e}")))?,
            Some(data @ Value::Object(_)) => data,
            Some(_) => {
                return Err(Error::Validation(
                    "data must be an object or a JSON string".to_string(),
                ));
            }
            None => Value::Object(map),
        },
        _ => {
            return Err(Error::Validation(
                "body must be an object or a JSON string".to_string(),
            ));
        }
    };

    let request: ReplyRequest = serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("malformed reply request: {e}")))?;

    if request.reply.is_none() && request.image_url.is_none() {
        return Err(Error::Validation(
            "from and reply/imageUrl are required".to_string(),
        ));
    }

    Ok(request)
}

/// Issue the send operations for one normalized request
async fn dispatch(state: &ApiState, request: ReplyRequest) -> Result<()> {
    let ReplyRequest {
        from,
        reply,
        image_url,
        caption,
    } = request;

    match ReplyMedia::from_field(image_url) {
        ReplyMedia::None => {
            let text = reply
                .ok_or_else(|| Error::Validation("reply text is required".to_string()))?;
            state.session.send_text(&from, &text).await
        }
        ReplyMedia::Single(url) => {
            let media = state.media.resolve_outbound(&url).await?;
            let caption = caption.or(reply).unwrap_or_default();
            state.session.send_media(&from, &media, &caption).await
        }
        ReplyMedia::Many(urls) => {
            // Resolve the whole batch before sending anything, then send
            // strictly in input order; only the first item carries the
            // caption
            let items = state.media.resolve_outbound_many(&urls).await?;
            tracing::info!(count = items.len(), to = %from, "sending media batch");

            let caption = caption.or(reply).unwrap_or_default();
            for (index, media) in items.iter().enumerate() {
                let caption = if index == 0 { caption.as_str() } else { "" };
                state.session.send_media(&from, media, caption).await?;
            }
            Ok(())
        }
    }
}

/// Handle a reply request
async fn reply(State(state): State<Arc<ApiState>>, Json(body): Json<Value>) -> Response {
    let request = match normalize(body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "rejected reply request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ReplyError {
                    error: e.to_string(),
                    detail: None,
                }),
            )
                .into_response();
        }
    };

    match dispatch(&state, request).await {
        Ok(()) => Json(ReplySuccess { success: true }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "reply dispatch failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReplyError {
                    error: "reply failed".to_string(),
                    detail: Some(e.to_string()),
                }),
            )
                .into_response()
        }
    }
}

/// Build the reply router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/reply-pmy", post(reply))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{normalize, ImageUrlField, ReplyMedia};

    #[test]
    fn accepts_raw_object() {
        let request = normalize(json!({"from": "123", "reply": "hi"})).unwrap();
        assert_eq!(request.from, "123");
        assert_eq!(request.reply.as_deref(), Some("hi"));
    }

    #[test]
    fn accepts_data_wrapper() {
        let request = normalize(json!({"data": {"from": "123", "reply": "hi"}})).unwrap();
        assert_eq!(request.from, "123");
    }

    #[test]
    fn accepts_json_string_shapes() {
        let request =
            normalize(json!(r#"{"from":"123","reply":"hi"}"#)).unwrap();
        assert_eq!(request.from, "123");

        let request =
            normalize(json!({"data": r#"{"from":"123","imageUrl":"https://x/y.png"}"#})).unwrap();
        assert!(request.image_url.is_some());
    }

    #[test]
    fn rejects_missing_from() {
        let err = normalize(json!({"reply": "hi"})).unwrap_err();
        assert!(err.to_string().contains("validation"));
    }

    #[test]
    fn rejects_missing_reply_and_image() {
        let err = normalize(json!({"from": "123"})).unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn single_element_list_collapses() {
        let media = ReplyMedia::from_field(Some(ImageUrlField::Many(vec!["a".to_string()])));
        assert!(matches!(media, ReplyMedia::Single(url) if url == "a"));

        let media = ReplyMedia::from_field(Some(ImageUrlField::Many(vec![
            "a".to_string(),
            "b".to_string(),
        ])));
        assert!(matches!(media, ReplyMedia::Many(urls) if urls.len() == 2));

        assert!(matches!(
            ReplyMedia::from_field(None),
            ReplyMedia::None
        ));
    }
}
