//! Parsing of the detection service's response bodies.
//!
//! The service signals failures inside otherwise successful responses with
//! sentinel strings: still-image detection prefixes the body with `error:`,
//! frame processing answers with the bare word `error`. Both conventions are
//! kept literally here and nowhere else; callers only see `Result`s.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Prefix marking a failed `/detect-image` reply.
pub const IMAGE_ERROR_PREFIX: &str = "error:";
/// Whole-body sentinel for a failed `/process-video-frame` reply.
pub const FRAME_ERROR_SENTINEL: &str = "error";

const SWITCH_SUCCESS: &str = "success";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplyError {
    #[error("{0}")]
    Rejected(String),
    #[error("empty reply body")]
    Empty,
    #[error("malformed reply: {0}")]
    Malformed(String),
}

/// Successful still-image detection: a reference to the annotated image,
/// normally a `data:image/jpeg;base64,...` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReply {
    pub src: String,
}

/// Body of `POST /api/models/switch-model`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwitchRequest {
    pub model_name: String,
    pub classes_name: String,
}

/// Reply of `POST /api/models/switch-model`.
#[derive(Debug, Clone, Deserialize)]
pub struct SwitchReply {
    pub status: String,
    #[serde(default)]
    pub message: String,
}

impl SwitchReply {
    pub fn into_result(self) -> Result<String, ReplyError> {
        if self.status == SWITCH_SUCCESS {
            Ok(self.message)
        } else {
            Err(ReplyError::Rejected(self.message))
        }
    }
}

pub fn parse_image_reply(body: &str) -> Result<ImageReply, ReplyError> {
    if let Some(message) = body.strip_prefix(IMAGE_ERROR_PREFIX) {
        return Err(ReplyError::Rejected(message.to_string()));
    }
    if body.trim().is_empty() {
        return Err(ReplyError::Empty);
    }
    Ok(ImageReply {
        src: body.to_string(),
    })
}

/// Decode a frame reply into the annotated JPEG bytes.
pub fn parse_frame_reply(body: &str) -> Result<Vec<u8>, ReplyError> {
    if body == FRAME_ERROR_SENTINEL {
        return Err(ReplyError::Rejected(FRAME_ERROR_SENTINEL.to_string()));
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(ReplyError::Empty);
    }
    STANDARD
        .decode(trimmed)
        .map_err(|e| ReplyError::Malformed(e.to_string()))
}

/// Decode an inline `data:<mime>;base64,<payload>` URL.
///
/// Returns `None` when `src` is not a data URL at all.
pub fn decode_data_url(src: &str) -> Option<Result<Vec<u8>, ReplyError>> {
    let rest = src.strip_prefix("data:")?;
    let Some((meta, payload)) = rest.split_once(',') else {
        return Some(Err(ReplyError::Malformed("data URL without payload".into())));
    };
    if !meta.ends_with(";base64") {
        return Some(Err(ReplyError::Malformed(format!(
            "unsupported data URL encoding: {meta}"
        ))));
    }
    Some(
        STANDARD
            .decode(payload.trim())
            .map_err(|e| ReplyError::Malformed(e.to_string())),
    )
}
