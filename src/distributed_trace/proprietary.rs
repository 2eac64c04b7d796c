//! The proprietary JSON+base64 distributed-trace payload.
//!
//! Grounded in spec.md §4.5, point 3/"Create outbound (proprietary)": a
//! `{"v":[major,minor],"d":{...}}` envelope, optionally base64-encoded (the
//! `newrelic` header carries the base64 form; callers that already decoded
//! JSON, e.g. from a message-queue header, pass it through as-is). Uses
//! `base64`/`serde_json`, the same pair the teacher depends on for
//! `opentelemetry_http`'s header codecs.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

pub const SUPPORTED_MAJOR_VERSION: u8 = 0;
pub const MINOR_VERSION: u8 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Payload {
    pub v: [u8; 2],
    pub d: PayloadData,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PayloadData {
    pub ty: String,
    pub ac: String,
    pub ap: String,
    pub id: Option<String>,
    pub tr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sa: Option<bool>,
    pub ti: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tk: Option<String>,
}

/// Decodes a `newrelic` header value: base64 if it doesn't already look
/// like JSON, otherwise parsed directly (spec.md §4.5, point 3).
pub fn decode(raw: &str) -> Result<Payload, ()> {
    let trimmed = raw.trim();
    let json_bytes: std::borrow::Cow<[u8]> = if trimmed.starts_with('{') {
        std::borrow::Cow::Borrowed(trimmed.as_bytes())
    } else {
        std::borrow::Cow::Owned(BASE64.decode(trimmed).map_err(|_| ())?)
    };
    serde_json::from_slice(&json_bytes).map_err(|_| ())
}

/// Encodes `payload` to its wire (base64-of-JSON) form, ready for the
/// `newrelic` header.
pub fn encode(payload: &Payload) -> String {
    let json = serde_json::to_vec(payload).expect("payload always serializes");
    BASE64.encode(json)
}
