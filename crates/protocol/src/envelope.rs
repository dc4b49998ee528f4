use serde::{Deserialize, Serialize};

use crate::constants::ERR_UNAUTHORIZED;

/// Status flag of a server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stat {
    Ok,
    Fail,
}

/// Errors produced while decoding a server response.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("empty response body")]
    Empty,
}

/// Envelope wrapping every web service response.
///
/// The `result` field is kept as raw JSON so that chunk acknowledgements
/// (which carry arbitrary or no data) and the final upload result share
/// one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    pub stat: Stat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<i32>,
}

/// Result object returned with the last chunk of an upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    #[serde(default)]
    pub image_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub square_src: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ServerEnvelope {
    /// Parses a response body.
    pub fn from_slice(body: &[u8]) -> Result<Self, EnvelopeError> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(EnvelopeError::Empty);
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Creates a successful envelope.
    pub fn ok(result: Option<serde_json::Value>) -> Self {
        Self {
            stat: Stat::Ok,
            result,
            message: None,
            err: None,
        }
    }

    /// Creates a failure envelope with the server's message.
    pub fn fail(err: i32, message: impl Into<String>) -> Self {
        Self {
            stat: Stat::Fail,
            result: None,
            message: Some(message.into()),
            err: Some(err),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.stat == Stat::Ok
    }

    /// True when the server rejected the request because the session expired.
    pub fn is_unauthorized(&self) -> bool {
        self.stat == Stat::Fail && self.err == Some(ERR_UNAUTHORIZED)
    }

    /// Message to surface verbatim on failure.
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "server reported a failure without message".into())
    }

    /// Deserializes `result` as the final upload result.
    pub fn upload_result(&self) -> Result<Option<UploadResult>, serde_json::Error> {
        match &self.result {
            Some(value) if !value.is_null() => Ok(Some(serde_json::from_value(value.clone())?)),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_final_chunk_response() {
        let body = br#"{"stat":"ok","result":{"image_id":1234,"src":"https://x/i.jpg"}}"#;
        let env = ServerEnvelope::from_slice(body).unwrap();
        assert!(env.is_ok());
        let result = env.upload_result().unwrap().unwrap();
        assert_eq!(result.image_id, Some(1234));
        assert_eq!(result.src.as_deref(), Some("https://x/i.jpg"));
    }

    #[test]
    fn parse_acknowledgement_without_result() {
        let env = ServerEnvelope::from_slice(br#"{"stat":"ok","result":null}"#).unwrap();
        assert!(env.is_ok());
        assert!(env.upload_result().unwrap().is_none());
    }

    #[test]
    fn parse_failure_keeps_message_verbatim() {
        let body = br#"{"stat":"fail","err":500,"message":"Disk full on server"}"#;
        let env = ServerEnvelope::from_slice(body).unwrap();
        assert!(!env.is_ok());
        assert!(!env.is_unauthorized());
        assert_eq!(env.failure_message(), "Disk full on server");
    }

    #[test]
    fn unauthorized_error_code() {
        let env = ServerEnvelope::fail(401, "Access denied");
        assert!(env.is_unauthorized());
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(
            ServerEnvelope::from_slice(b"  \n"),
            Err(EnvelopeError::Empty)
        ));
    }

    #[test]
    fn garbage_body_is_rejected() {
        assert!(matches!(
            ServerEnvelope::from_slice(b"<html>502</html>"),
            Err(EnvelopeError::Json(_))
        ));
    }
}
