//! JSON frames exchanged between the chat client and the assistant backend.
//!
//! The chat query is the only untagged frame; everything else carries a
//! `type` discriminator.

use crate::{Location, Message, ModelConfig, NavigationResult, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const NAVIGATE_TO_LOCATION: &str = "navigate_to_location";
pub const FALLBACK_REPLY: &str = "Response received";

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame decode failed: {0}")]
    Decode(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for HistoryEntry {
    fn from(message: &Message) -> Self {
        Self {
            role: message.sender,
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundQuery {
    pub query: String,
    pub messages: Vec<HistoryEntry>,
    #[serde(rename = "ai_model_config")]
    pub model_config: ModelConfig,
}

impl OutboundQuery {
    /// `history` is the transcript *before* the query; the query is appended
    /// as the final user entry here and nowhere else.
    pub fn build(query: &str, history: &[Message], model_config: &ModelConfig) -> Self {
        let mut messages: Vec<HistoryEntry> = history.iter().map(HistoryEntry::from).collect();
        messages.push(HistoryEntry {
            role: Role::User,
            content: query.to_string(),
        });
        Self {
            query: query.to_string(),
            messages,
            model_config: model_config.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NavigationStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavigationResponse {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub status: NavigationStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl NavigationResponse {
    pub fn from_result(request_id: &str, result: &NavigationResult) -> Self {
        let message = match (&result.error, result.success) {
            (Some(detail), false) if !detail.is_empty() => {
                format!("{}: {detail}", result.message)
            }
            _ => result.message.clone(),
        };
        Self {
            request_id: request_id.to_string(),
            status: if result.success {
                NavigationStatus::Success
            } else {
                NavigationStatus::Error
            },
            message,
            location: result.location.clone(),
        }
    }

    pub fn error(request_id: &str, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: NavigationStatus::Error,
            message: message.into(),
            location: None,
        }
    }
}

/// Tagged frames sent by the client besides the chat query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    TestConnection { config: ModelConfig },
    NavigationResponse(NavigationResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NavigationPayload {
    pub chromosome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromosome_ucsc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chromosome_ensembl: Option<String>,
    pub start: u64,
    pub end: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AiResponseBody {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub tool_results: Vec<Value>,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Frames produced by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    AiResponse {
        response: AiResponseBody,
        #[serde(default)]
        timestamp: String,
    },
    Navigation {
        action: String,
        payload: NavigationPayload,
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(default)]
        timestamp: String,
    },
    TestConnectionResult {
        success: bool,
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationCommand {
    pub request_id: String,
    pub chromosome: String,
    pub chromosome_ucsc: Option<String>,
    pub chromosome_ensembl: Option<String>,
    pub start: u64,
    pub end: u64,
    pub gene_name: Option<String>,
    pub timestamp: Option<String>,
}

/// A decoded backend frame as seen by the client dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    ChatReply { content: String },
    Navigation(NavigationCommand),
    /// A `navigation` frame that could not be honoured as a command.
    InvalidNavigation {
        request_id: Option<String>,
        reason: String,
    },
    ConnectionTestResult {
        success: bool,
        message: Option<String>,
    },
    Unrecognized(Value),
}

impl InboundFrame {
    /// Text to show in a transcript for chat-domain frames.
    pub fn reply_content(&self) -> Option<String> {
        match self {
            InboundFrame::ChatReply { content } => Some(content.clone()),
            InboundFrame::Unrecognized(value) => {
                Some(extract_reply_content(value).unwrap_or_else(|| FALLBACK_REPLY.to_string()))
            }
            _ => None,
        }
    }
}

/// Reply text precedence: `response.content`, `message`, `content`.
pub fn extract_reply_content(value: &Value) -> Option<String> {
    let candidates = [
        value.get("response").and_then(|response| response.get("content")),
        value.get("message"),
        value.get("content"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

pub fn parse_inbound(text: &str) -> Result<InboundFrame, WireError> {
    let value: Value =
        serde_json::from_str(text).map_err(|err| WireError::Decode(err.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default();
    match kind.as_str() {
        "navigation" => Ok(parse_navigation(value)),
        "test_connection_result" => Ok(InboundFrame::ConnectionTestResult {
            success: value.get("success").and_then(Value::as_bool).unwrap_or(false),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        _ => match extract_reply_content(&value) {
            Some(content) => Ok(InboundFrame::ChatReply { content }),
            None => Ok(InboundFrame::Unrecognized(value)),
        },
    }
}

fn parse_navigation(value: Value) -> InboundFrame {
    let request_id = value
        .get("requestId")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string);
    let frame: ServerFrame = match serde_json::from_value(value) {
        Ok(frame) => frame,
        Err(err) => {
            return InboundFrame::InvalidNavigation {
                request_id,
                reason: format!("invalid navigation frame: {err}"),
            }
        }
    };
    let ServerFrame::Navigation {
        action,
        payload,
        request_id,
        timestamp,
    } = frame
    else {
        return InboundFrame::InvalidNavigation {
            request_id,
            reason: "invalid navigation frame".to_string(),
        };
    };
    if action != NAVIGATE_TO_LOCATION {
        return InboundFrame::InvalidNavigation {
            request_id: Some(request_id),
            reason: format!("unsupported navigation action: {action}"),
        };
    }
    InboundFrame::Navigation(NavigationCommand {
        request_id,
        chromosome: payload.chromosome,
        chromosome_ucsc: payload.chromosome_ucsc,
        chromosome_ensembl: payload.chromosome_ensembl,
        start: payload.start,
        end: payload.end,
        gene_name: payload.gene_name,
        timestamp: Some(timestamp).filter(|ts| !ts.is_empty()),
    })
}

pub fn encode<T: Serialize>(frame: &T) -> Result<String, WireError> {
    serde_json::to_string(frame).map_err(|err| WireError::Encode(err.to_string()))
}
