//! Wire shapes exchanged between the transport layer and the gated
//! function core.
//!
//! The transport (HTTP router, test harness, whatever) builds an
//! [`Invocation`] and gets back a [`Reply`]; everything in between is the
//! core's business. This crate carries no behavior beyond constructing
//! structured error replies.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One inbound call to a named function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Registered function name, e.g. `users.permissions.update`.
    pub function: String,
    /// Request body; `null` when the caller sent nothing.
    #[serde(default)]
    pub body: Value,
    /// Raw bearer credential as extracted by the transport, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Uploaded file attached to the call, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<Upload>,
    /// Correlation id assigned by the transport for log/event stitching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corr_id: Option<String>,
}

impl Invocation {
    pub fn new(function: impl Into<String>, body: Value) -> Self {
        Self {
            function: function.into(),
            body,
            credential: None,
            upload: None,
            corr_id: None,
        }
    }

    pub fn with_credential(mut self, token: impl Into<String>) -> Self {
        self.credential = Some(token.into());
        self
    }

    pub fn with_upload(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.upload = Some(Upload {
            name: name.into(),
            bytes,
        });
        self
    }
}

/// A file attached to an invocation (already buffered by the transport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub name: String,
    #[serde(with = "serde_bytes_base64")]
    pub bytes: Vec<u8>,
}

// Uploads cross the wire as base64; in-process callers never notice.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// What a function produced: a status plus either JSON or raw bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub status: u16,
    pub payload: Payload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Json(Value),
    Bytes {
        content_type: String,
        #[serde(with = "serde_bytes_base64")]
        data: Vec<u8>,
    },
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            payload: Payload::Json(body),
        }
    }

    /// 200 with `{ "data": ... }`, the envelope every data-bearing
    /// function uses.
    pub fn data(body: Value) -> Self {
        Self::json(200, json!({ "data": body }))
    }

    pub fn bytes(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            status: 200,
            payload: Payload::Bytes {
                content_type: content_type.into(),
                data,
            },
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Json(v) => Some(v),
            Payload::Bytes { .. } => None,
        }
    }
}

/// Failure taxonomy every gated invocation can surface.
///
/// Kinds are stable wire identifiers; messages are for humans and may change.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("authentication required")]
    Unauthorized,
    #[error("you need the \"{capability}\" right to access the function \"{function}\"")]
    Forbidden { function: String, capability: String },
    #[error("{0}")]
    InvalidArgument(String),
    #[error("storage failure: {0}")]
    Io(String),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::InvalidArgument(_) => "invalid_argument",
            ApiError::Io(_) => "io",
            ApiError::Internal => "internal",
        }
    }

    /// HTTP-equivalent status the transport should map this to.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::Unauthorized => 401,
            ApiError::Forbidden { .. } => 403,
            ApiError::InvalidArgument(_) => 400,
            ApiError::Io(_) => 500,
            ApiError::Internal => 500,
        }
    }

    /// Structured error reply: `{ "error": { "kind", "message" } }`.
    pub fn to_reply(&self) -> Reply {
        Reply::json(
            self.status(),
            json!({ "error": { "kind": self.kind(), "message": self.to_string() } }),
        )
    }
}

/// Descriptor metadata surfaced by `functions.list`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    pub requires_auth: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<Value>,
}
