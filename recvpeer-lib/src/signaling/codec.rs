use std::fmt;

use base64::{prelude::BASE64_STANDARD, Engine};
use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

static WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s").expect("whitespace pattern is a valid regex"));

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An offer or an answer as exchanged over the signaling channel.
///
/// The JSON shape matches what browsers produce for
/// `JSON.stringify(pc.localDescription)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn new(sdp_type: SdpType, sdp: String) -> Self {
        Self { sdp_type, sdp }
    }

    pub fn offer(sdp: String) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: String) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    pub fn into_sdp(self) -> String {
        self.sdp
    }
}

/// Base64 text of the JSON form of a [`SessionDescription`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireEnvelope(String);

impl WireEnvelope {
    pub fn new(text: String) -> Self {
        Self(text)
    }

    pub fn from_bytes(bytes: Bytes) -> Result<Self, DecodeError> {
        String::from_utf8(bytes.to_vec())
            .map(Self)
            .map_err(|err| DecodeError::MalformedBase64(err.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_bytes())
    }
}

impl fmt::Display for WireEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("signaling message is not valid base64: {0}")]
    MalformedBase64(String),
    #[error("signaling message is not a JSON object: {0}")]
    MalformedJson(String),
    #[error("session description has no `{0}` field")]
    MissingField(&'static str),
    #[error("unsupported session description type: {0}")]
    UnsupportedType(String),
}

pub fn encode(desc: &SessionDescription) -> WireEnvelope {
    let json = serde_json::to_string(desc)
        .expect("a unit enum and a string always serialize to JSON");
    WireEnvelope(BASE64_STANDARD.encode(json))
}

pub fn decode(envelope: &WireEnvelope) -> Result<SessionDescription, DecodeError> {
    let text = WHITESPACE.replace_all(&envelope.0, "");
    let bytes = BASE64_STANDARD
        .decode(text.as_bytes())
        .map_err(|err| DecodeError::MalformedBase64(err.to_string()))?;
    let json: Value = serde_json::from_slice(&bytes)
        .map_err(|err| DecodeError::MalformedJson(err.to_string()))?;
    let object = match json {
        Value::Object(object) => object,
        other => {
            return Err(DecodeError::MalformedJson(format!(
                "expected an object, got {}",
                other
            )))
        }
    };
    let sdp_type = match string_field(&object, "type")? {
        "offer" => SdpType::Offer,
        "answer" => SdpType::Answer,
        other => return Err(DecodeError::UnsupportedType(other.to_owned())),
    };
    let sdp = string_field(&object, "sdp")?.to_owned();
    Ok(SessionDescription { sdp_type, sdp })
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, DecodeError> {
    object
        .get(key)
        .and_then(|value| value.as_str())
        .ok_or(DecodeError::MissingField(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope_of(json: &str) -> WireEnvelope {
        WireEnvelope::new(BASE64_STANDARD.encode(json))
    }

    #[test]
    fn test_round_trip() {
        let descs = [
            SessionDescription::offer("v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\n".to_owned()),
            SessionDescription::answer("v=0\r\na=ice-ufrag:\"quoted\"\r\n".to_owned()),
            SessionDescription::answer(String::new()),
        ];
        for desc in descs {
            assert_eq!(decode(&encode(&desc)).unwrap(), desc);
        }
    }

    #[test]
    fn test_encode_matches_browser_format() {
        let desc = SessionDescription::answer("v=0...".to_owned());
        assert_eq!(
            encode(&desc),
            envelope_of(r#"{"type":"answer","sdp":"v=0..."}"#)
        );
    }

    #[test]
    fn test_decode_ignores_whitespace_and_extra_fields() {
        let envelope = envelope_of(r#"{"sdp":"v=0...","type":"offer","extra":1}"#);
        let wrapped = envelope
            .as_str()
            .as_bytes()
            .chunks(8)
            .map(|chunk| std::str::from_utf8(chunk).unwrap())
            .collect::<Vec<_>>()
            .join("\n ");
        let desc = decode(&WireEnvelope::new(format!("  {}\n", wrapped))).unwrap();
        assert_eq!(desc, SessionDescription::offer("v=0...".to_owned()));
    }

    #[test]
    fn test_decode_rejects_non_base64() {
        let err = decode(&WireEnvelope::new("not base64!".to_owned())).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedBase64(_)), "{:?}", err);
    }

    #[test]
    fn test_decode_rejects_non_json() {
        let err = decode(&envelope_of("hello world")).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedJson(_)), "{:?}", err);

        let err = decode(&envelope_of(r#"["answer","v=0"]"#)).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedJson(_)), "{:?}", err);
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert_eq!(
            decode(&envelope_of(r#"{"sdp":"v=0"}"#)),
            Err(DecodeError::MissingField("type"))
        );
        assert_eq!(
            decode(&envelope_of(r#"{"type":"answer"}"#)),
            Err(DecodeError::MissingField("sdp"))
        );
        assert_eq!(
            decode(&envelope_of(r#"{"type":"answer","sdp":null}"#)),
            Err(DecodeError::MissingField("sdp"))
        );
    }

    #[test]
    fn test_decode_rejects_unsupported_type() {
        assert_eq!(
            decode(&envelope_of(r#"{"type":"pranswer","sdp":"v=0"}"#)),
            Err(DecodeError::UnsupportedType("pranswer".to_owned()))
        );
    }

    #[test]
    fn test_from_bytes_rejects_non_utf8() {
        let err = WireEnvelope::from_bytes(Bytes::from_static(&[0xff, 0xfe])).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedBase64(_)));
    }
}
