//! Inference module for Memoria
//!
//! `InferenceClient` is the raw transport seam (one prompt in, text out, errors
//! propagated). `Inference` wraps a client with the fail-soft policy used by
//! background maintenance: every call yields an `Inferred` value, either a
//! concrete result or an explicit "no result" with its reason. Nothing in
//! here retries or returns an error to the caller.

mod http;
mod parse;
mod scripted;

pub use http::HttpInferenceClient;
pub use parse::{extract_json_object, parse_json_reply, strip_think_tags};
pub use scripted::{FailingInference, ScriptedInference};

use crate::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One chat message sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A single completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    /// Ask the service for its structured (JSON) output mode
    pub want_json: bool,
    pub timeout: Duration,
}

impl CompletionRequest {
    /// Single user-turn request
    pub fn from_prompt(prompt: &str, want_json: bool, timeout: Duration) -> Self {
        Self {
            messages: vec![ChatMessage::user(prompt)],
            want_json,
            timeout,
        }
    }

    /// Text of the last user message (what scripted clients route on)
    pub fn prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[async_trait]
/// Transport to a text-inference service.
pub trait InferenceClient: Send + Sync {
    /// Send the request and return the raw model text.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

/// Why an inference call produced nothing usable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The call exceeded its timeout
    Timeout,
    /// Connection failure or non-success status
    Transport(String),
    /// Reply was not the JSON shape we asked for
    Malformed(String),
    /// Reply was empty after cleanup
    Empty,
}

impl std::fmt::Display for Unavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Transport(e) => write!(f, "transport failure: {e}"),
            Self::Malformed(e) => write!(f, "malformed reply: {e}"),
            Self::Empty => write!(f, "empty reply"),
        }
    }
}

/// Outcome of an inference-backed decision
#[derive(Debug, Clone, PartialEq)]
pub enum Inferred<T> {
    Ready(T),
    Unavailable(Unavailable),
}

impl<T> Inferred<T> {
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Unavailable(_) => None,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Unavailable(Unavailable::Malformed(_)))
    }
}

impl Inferred<Value> {
    /// Flat-object view: any failure (or a non-object reply) becomes `{}`.
    pub fn into_object(self) -> serde_json::Map<String, Value> {
        match self {
            Self::Ready(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

impl Inferred<String> {
    /// Text view: any failure becomes `""`.
    pub fn into_text(self) -> String {
        self.ok().unwrap_or_default()
    }
}

/// Fail-soft adapter used by consolidation and memory extraction
#[derive(Clone)]
pub struct Inference {
    client: Arc<dyn InferenceClient>,
    timeout: Duration,
}

impl Inference {
    pub fn new(client: Arc<dyn InferenceClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn client(&self) -> Arc<dyn InferenceClient> {
        self.client.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call(&self, prompt: &str, want_json: bool) -> Inferred<String> {
        debug!(
            "inference call (json={}, prompt length: {})",
            want_json,
            prompt.len()
        );
        let request = CompletionRequest::from_prompt(prompt, want_json, self.timeout);

        // The transport has its own timeout; this one bounds any client.
        match tokio::time::timeout(self.timeout, self.client.complete(&request)).await {
            Err(_) => {
                warn!("inference call timed out after {:?}", self.timeout);
                Inferred::Unavailable(Unavailable::Timeout)
            }
            Ok(Err(e)) => {
                warn!("inference call failed: {}", e);
                Inferred::Unavailable(Unavailable::Transport(e.to_string()))
            }
            Ok(Ok(text)) => Inferred::Ready(text),
        }
    }

    /// Ask for a JSON object.
    pub async fn complete_json(&self, prompt: &str) -> Inferred<Value> {
        match self.call(prompt, true).await {
            Inferred::Ready(text) => match parse_json_reply(&text) {
                Ok(value) => Inferred::Ready(value),
                Err(reason) => {
                    warn!("could not parse JSON from model reply: {}", reason);
                    Inferred::Unavailable(Unavailable::Malformed(reason))
                }
            },
            Inferred::Unavailable(reason) => Inferred::Unavailable(reason),
        }
    }

    /// Ask for free text. Think blocks and surrounding whitespace are removed.
    pub async fn complete_text(&self, prompt: &str) -> Inferred<String> {
        match self.call(prompt, false).await {
            Inferred::Ready(text) => {
                let cleaned = strip_think_tags(&text);
                if cleaned.is_empty() {
                    Inferred::Unavailable(Unavailable::Empty)
                } else {
                    Inferred::Ready(cleaned)
                }
            }
            Inferred::Unavailable(reason) => Inferred::Unavailable(reason),
        }
    }

    /// Ask for JSON and decode it into a typed contract. A reply missing the
    /// expected keys counts as malformed.
    pub async fn complete_typed<T: DeserializeOwned>(&self, prompt: &str) -> Inferred<T> {
        decode(self.complete_json(prompt).await)
    }
}

/// Decode an untyped reply into `T`.
pub fn decode<T: DeserializeOwned>(reply: Inferred<Value>) -> Inferred<T> {
    match reply {
        Inferred::Ready(value) => match serde_json::from_value(value) {
            Ok(typed) => Inferred::Ready(typed),
            Err(e) => {
                warn!("model reply missing expected fields: {}", e);
                Inferred::Unavailable(Unavailable::Malformed(e.to_string()))
            }
        },
        Inferred::Unavailable(reason) => Inferred::Unavailable(reason),
    }
}
