//! Conversational assistant conditioned on long-term memories
//!
//! One turn: idle check, context from the store, primary completion, history
//! update, keyword reset, then extraction of new memories from the exchange.

mod session;

pub use session::ChatSession;

use crate::inference::{strip_think_tags, ChatMessage, CompletionRequest, Inference, InferenceClient};
use crate::memory::{Category, ContextBuilder, MemoryStore};
use crate::{MemoriaConfig, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// How memory extraction runs after a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// The turn waits for extraction to finish (debugging, tests)
    Awaited,
    /// Extraction is spawned and the reply returns immediately
    Background,
}

/// Result of one chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// System prompt sent to the model, only in test mode
    pub context_used: Option<String>,
}

pub struct Assistant {
    store: Arc<dyn MemoryStore>,
    client: Arc<dyn InferenceClient>,
    /// Fail-soft helper used for extraction
    inference: Inference,
    chat_timeout: Duration,
    analysis: AnalysisMode,
    session: Mutex<ChatSession>,
}

impl Assistant {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        client: Arc<dyn InferenceClient>,
        config: &MemoriaConfig,
    ) -> Self {
        Self {
            store,
            inference: Inference::new(client.clone(), config.inference.helper_timeout),
            client,
            chat_timeout: config.inference.chat_timeout,
            analysis: config.session.analysis,
            session: Mutex::new(ChatSession::new(&config.session)),
        }
    }

    pub fn with_analysis(mut self, analysis: AnalysisMode) -> Self {
        self.analysis = analysis;
        self
    }

    /// Snapshot of the current short-term history
    pub async fn history(&self) -> Vec<ChatMessage> {
        self.session.lock().await.history().to_vec()
    }

    /// Run one conversational turn.
    ///
    /// Only a failure to read the memory store is returned as an error; a
    /// failed model call becomes the reply text.
    pub async fn chat(&self, input: &str, test_mode: bool) -> Result<ChatReply> {
        // Held for the whole turn so concurrent turns don't interleave history.
        let mut session = self.session.lock().await;
        session.touch(Instant::now());

        let memories = self.store.list_all().await?;
        let system_prompt = ContextBuilder::new(&memories).for_chat();

        let mut messages = Vec::with_capacity(session.history().len() + 2);
        messages.push(ChatMessage::system(system_prompt.clone()));
        messages.extend_from_slice(session.history());
        messages.push(ChatMessage::user(input));

        let response = self.complete_turn(messages).await;

        session.record_turn(input, &response);
        drop(session);

        match self.analysis {
            AnalysisMode::Awaited => {
                extract_memories(self.store.as_ref(), &self.inference, input, &response).await;
            }
            AnalysisMode::Background => {
                let store = self.store.clone();
                let inference = self.inference.clone();
                let user_text = input.to_string();
                let assistant_text = response.clone();
                tokio::spawn(async move {
                    extract_memories(store.as_ref(), &inference, &user_text, &assistant_text)
                        .await;
                });
            }
        }

        Ok(ChatReply {
            response,
            context_used: test_mode.then_some(system_prompt),
        })
    }

    async fn complete_turn(&self, messages: Vec<ChatMessage>) -> String {
        let request = CompletionRequest {
            messages,
            want_json: false,
            timeout: self.chat_timeout,
        };
        debug!("chat turn with {} messages", request.messages.len());

        match tokio::time::timeout(self.chat_timeout, self.client.complete(&request)).await {
            Ok(Ok(text)) => strip_think_tags(&text),
            Ok(Err(e)) => {
                warn!("chat completion failed: {}", e);
                format!("Communication error: {e}")
            }
            Err(_) => {
                warn!("chat completion timed out after {:?}", self.chat_timeout);
                format!("Communication error: timed out after {:?}", self.chat_timeout)
            }
        }
    }
}

/// Ask the model for durable facts in one exchange and store them.
/// Returns how many memories were added.
pub async fn extract_memories(
    store: &dyn MemoryStore,
    inference: &Inference,
    user_text: &str,
    assistant_text: &str,
) -> usize {
    let prompt = ContextBuilder::for_extraction(user_text, assistant_text);
    let reply = inference.complete_json(&prompt).await.into_object();

    let Some(Value::Array(items)) = reply.get("items") else {
        debug!("extraction reply has no items");
        return 0;
    };

    let mut added = 0;
    for item in items {
        let category = item.get("category").and_then(Value::as_str);
        let content = item
            .get("content")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        let Some(category) = category.and_then(Category::from_model_label) else {
            debug!("dropping extracted item with category {:?}", category);
            continue;
        };
        if content.is_empty() {
            continue;
        }
        match store.add(category, content).await {
            Ok(id) => {
                info!("remembered #{} ({}): {}", id, category, content);
                added += 1;
            }
            Err(e) => warn!("could not save extracted memory: {}", e),
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{FailingInference, ScriptedInference};
    use crate::memory::InMemoryStore;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    const EXTRACTION_NEEDLE: &str = "[Conversation]";

    fn config() -> MemoriaConfig {
        MemoriaConfig::new(PathBuf::from("/tmp/memoria-test")).with_analysis(AnalysisMode::Awaited)
    }

    #[tokio::test]
    async fn test_turn_uses_memories_and_extracts() {
        let store = Arc::new(InMemoryStore::new());
        store.add(Category::Attribute, "user is a programmer").await.unwrap();

        let client = Arc::new(
            ScriptedInference::new()
                .reply_to(
                    EXTRACTION_NEEDLE,
                    r#"{"items": [
                        {"category": "goal", "content": "wants to learn Rust"},
                        {"category": "memory", "content": "has a cat named Miso"},
                        {"category": "hobby", "content": "dropped"},
                        {"category": "note", "content": "   "}
                    ]}"#,
                )
                .otherwise("<think>plan</think>Great, let's start with ownership."),
        );
        let assistant = Assistant::new(store.clone(), client.clone(), &config());

        let reply = assistant.chat("I want to learn Rust", true).await.unwrap();
        assert_eq!(reply.response, "Great, let's start with ownership.");
        let context = reply.context_used.unwrap();
        assert!(context.contains(r#"["user is a programmer"]"#));

        let goals = store.list_by_category(Category::Goal).await.unwrap();
        assert_eq!(goals[0].content, "wants to learn Rust");
        let notes = store.list_by_category(Category::Note).await.unwrap();
        assert_eq!(notes[0].content, "has a cat named Miso");
        assert_eq!(store.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_context_hidden_outside_test_mode() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedInference::new().otherwise("ok"));
        let assistant = Assistant::new(store, client, &config());

        let reply = assistant.chat("hi", false).await.unwrap();
        assert_eq!(reply.context_used, None);
        assert_eq!(assistant.history().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_completion_becomes_reply() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(FailingInference::transport("connection refused"));
        let assistant = Assistant::new(store.clone(), client, &config());

        let reply = assistant.chat("hello", false).await.unwrap();
        assert!(reply.response.starts_with("Communication error"));
        assert!(store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keyword_clears_history() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedInference::new().otherwise("どういたしまして"));
        let assistant = Assistant::new(store, client, &config());

        assistant.chat("今日の予定は？", false).await.unwrap();
        assert_eq!(assistant.history().await.len(), 2);
        assistant.chat("ありがとう", false).await.unwrap();
        assert!(assistant.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_history_is_sent_with_next_turn() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedInference::new().otherwise("noted"));
        let assistant = Assistant::new(store, client.clone(), &config());

        assistant.chat("first question", false).await.unwrap();
        assistant.chat("second question", false).await.unwrap();

        // chat, extraction, chat, extraction
        let prompts = client.prompts();
        assert_eq!(prompts.len(), 4);
        assert_eq!(prompts[2], "second question");
    }
}
