use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Content type attached to every request and reply
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Opaque token tying one request to its one response.
///
/// Minted per call, unique among the caller's outstanding requests, and
/// echoed unchanged by the responder. The reply routing key embeds it, so
/// the broker routes the matching response structurally; the id comparison
/// on the reply queue is a defensive double-check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh correlation id (UUIDv4)
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CorrelationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Structured failure reported by the responder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyError {
    /// Stable machine-readable code, e.g. "HANDLER_ERROR"
    pub code: String,
    /// Human-readable detail
    pub message: String,
}

/// Tagged result carried in every reply body.
///
/// The responder wraps the handler's output in a success envelope, or a
/// structured error when the handler fails, so the caller can tell "not
/// found" from "service error" instead of inferring failure from an empty
/// body. Success data is embedded verbatim ([`RawValue`]), so a handler
/// that echoes its input produces a byte-identical payload on the caller
/// side.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ReplyEnvelope {
    /// Wrap handler output in a success envelope.
    ///
    /// Handler output is expected to be JSON (the wire content type is
    /// `application/json`); output that does not parse as JSON is carried
    /// as a JSON string instead.
    pub fn success(payload: &[u8]) -> Result<Self> {
        let data = match std::str::from_utf8(payload)
            .ok()
            .and_then(|text| RawValue::from_string(text.to_owned()).ok())
        {
            Some(raw) => raw,
            None => {
                let wrapped = serde_json::to_string(&String::from_utf8_lossy(payload))?;
                RawValue::from_string(wrapped)?
            }
        };
        Ok(Self {
            ok: true,
            data: Some(data),
            error: None,
        })
    }

    /// Build a failure envelope
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ReplyError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Serialize the envelope for publishing
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a reply body. An empty body (a responder that sent nothing
    /// useful) is surfaced as [`Error::EmptyReply`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::EmptyReply);
        }
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Unwrap the envelope into the handler's payload bytes, or the
    /// responder's structured error.
    pub fn into_payload(self) -> Result<Vec<u8>> {
        if let Some(err) = self.error {
            return Err(Error::Remote {
                code: err.code,
                message: err.message,
            });
        }
        match self.data {
            Some(data) => Ok(data.get().as_bytes().to_vec()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(CorrelationId::mint(), CorrelationId::mint());
    }

    #[test]
    fn success_payload_survives_verbatim() {
        // Key order must be preserved, not normalized
        let body = br#"{"uuid":"u1","email":"a@b.com"}"#;
        let envelope = ReplyEnvelope::success(body).unwrap();
        let decoded = ReplyEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.into_payload().unwrap(), body.to_vec());
    }

    #[test]
    fn bare_scalar_payload_round_trips() {
        let envelope = ReplyEnvelope::success(b"true").unwrap();
        let decoded = ReplyEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.into_payload().unwrap(), b"true".to_vec());
    }

    #[test]
    fn non_json_output_is_carried_as_a_string() {
        let envelope = ReplyEnvelope::success(b"Bearer abc123").unwrap();
        let decoded = ReplyEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.into_payload().unwrap(), b"\"Bearer abc123\"".to_vec());
    }

    #[test]
    fn failure_surfaces_as_remote_error() {
        let envelope = ReplyEnvelope::failure("HANDLER_ERROR", "row not found");
        let decoded = ReplyEnvelope::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        match decoded.into_payload() {
            Err(Error::Remote { code, message }) => {
                assert_eq!(code, "HANDLER_ERROR");
                assert_eq!(message, "row not found");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[test]
    fn empty_reply_is_distinguishable() {
        assert!(matches!(
            ReplyEnvelope::from_bytes(b""),
            Err(Error::EmptyReply)
        ));
    }
}
