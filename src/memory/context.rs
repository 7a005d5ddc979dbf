//! Context builder for assistant LLM interactions

use super::record::{Category, MemoryRecord};

/// Builds prompt text from the user's long-term memories
pub struct ContextBuilder<'a> {
    memories: &'a [MemoryRecord],
}

impl<'a> ContextBuilder<'a> {
    pub fn new(memories: &'a [MemoryRecord]) -> Self {
        Self { memories }
    }

    /// Contents of one category, in store order
    fn contents(&self, category: Category) -> Vec<&'a str> {
        self.memories
            .iter()
            .filter(|m| m.category == category)
            .map(|m| m.content.as_str())
            .collect()
    }

    /// JSON array literal so the model sees exact boundaries between facts
    fn section(&self, category: Category) -> String {
        serde_json::to_string(&self.contents(category)).unwrap_or_else(|_| "[]".to_string())
    }

    /// System prompt for a normal chat turn
    pub fn for_chat(&self) -> String {
        format!(
            r#"You are a capable personal AI secretary.
Respond to the user's input appropriately, taking the information below into account.
Answer naturally, in the same language the user writes in.

[User attributes]
{attributes}

[User goals]
{goals}

[Requests to the assistant]
{requests}

[Other memories]
{notes}
"#,
            attributes = self.section(Category::Attribute),
            goals = self.section(Category::Goal),
            requests = self.section(Category::Request),
            notes = self.section(Category::Note),
        )
    }

    /// Prompt asking the model to pull durable facts out of one exchange
    pub fn for_extraction(user_text: &str, assistant_text: &str) -> String {
        format!(
            r#"From the conversation between the user and the AI below, extract information about the user that is worth keeping long-term (attributes, goals, other memories, requests to the assistant).
If there is nothing worth keeping, return "items": [].
Output JSON only. Do not wrap it in a Markdown code block.

Format:
{{
    "items": [
        {{ "category": "attribute", "content": "The user is a programmer" }},
        {{ "category": "goal", "content": "The user wants to master Python" }},
        {{ "category": "request", "content": "Keep replies short" }}
    ]
}}

Valid categories: attribute, goal, note (general memory), request

[Conversation]
User: {user_text}
AI: {assistant_text}
"#
        )
    }
}
