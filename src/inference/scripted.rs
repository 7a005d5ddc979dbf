//! Deterministic inference clients for tests and offline runs.

use super::{CompletionRequest, InferenceClient};
use crate::{MemoriaError, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Replies chosen by substring match on the prompt; first matching rule wins.
#[derive(Debug, Default)]
pub struct ScriptedInference {
    rules: Vec<(String, String)>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `reply` to any prompt containing `needle`.
    pub fn reply_to(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), reply.into()));
        self
    }

    /// Reply used when no rule matches (empty by default).
    pub fn otherwise(mut self, reply: impl Into<String>) -> Self {
        self.fallback = reply.into();
        self
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedInference {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let prompt = request.prompt();
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| self.fallback.clone());
        Ok(reply)
    }
}

#[derive(Debug)]
enum FailureMode {
    Transport(String),
    Hang,
}

/// Client that never succeeds.
#[derive(Debug)]
pub struct FailingInference {
    mode: FailureMode,
    calls: Mutex<usize>,
}

impl FailingInference {
    /// Every call fails immediately with a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            mode: FailureMode::Transport(message.into()),
            calls: Mutex::new(0),
        }
    }

    /// Every call blocks until the caller's timeout fires.
    pub fn hang() -> Self {
        Self {
            mode: FailureMode::Hang,
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or_default()
    }
}

#[async_trait]
impl InferenceClient for FailingInference {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        match &self.mode {
            FailureMode::Transport(message) => Err(MemoriaError::Inference(message.clone())),
            FailureMode::Hang => {
                futures::future::pending::<()>().await;
                Err(MemoriaError::Inference("unreachable".to_string()))
            }
        }
    }
}
