//! Prompts and reply contracts for the consolidation phases

use crate::memory::{MemoryId, MemoryRecord};
use serde::{Deserialize, Serialize};
use serde_json::json;

pub const GROUP_HEADING: &str = "=== TASK: GROUP DUPLICATE MEMORIES ===";
pub const MERGE_HEADING: &str = "=== TASK: MERGE MEMORIES ===";
pub const CONTRADICTION_HEADING: &str = "=== TASK: FIND CONTRADICTIONS ===";
pub const SHORTEN_HEADING: &str = "=== TASK: SHORTEN MEMORY ===";

/// `{"groups": [[id, id, ...], ...]}`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SimilarityReply {
    pub groups: Vec<Vec<MemoryId>>,
}

/// `{"contradictions": [{"ids": [a, b], "older_id": a, "reason": "..."}]}`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ContradictionReply {
    pub contradictions: Vec<ContradictionReport>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ContradictionReport {
    #[serde(default)]
    pub ids: Vec<MemoryId>,
    #[serde(default)]
    pub older_id: Option<MemoryId>,
    #[serde(default)]
    pub reason: String,
}

fn id_content_list(records: &[MemoryRecord]) -> String {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| json!({ "id": r.id, "content": r.content }))
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

fn id_content_time_list(records: &[MemoryRecord]) -> String {
    let items: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "content": r.content,
                "created_at": r.created_at.to_rfc3339(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

pub fn similarity_prompt(records: &[MemoryRecord]) -> String {
    format!(
        r#"{GROUP_HEADING}
Below is a list of memories about a user. Find memories whose meaning is duplicated or highly overlapping, and group their ids.
Only group memories that say essentially the same thing. Each id may appear in at most one group.
If nothing overlaps, return an empty list.

Memories:
{list}

Respond with JSON only, no Markdown:
{{"groups": [[1, 2], [5, 7, 9]]}}"#,
        list = id_content_list(records)
    )
}

pub fn merge_prompt(records: &[MemoryRecord]) -> String {
    let lines: Vec<String> = records.iter().map(|r| format!("- {}", r.content)).collect();
    format!(
        r#"{MERGE_HEADING}
Combine the following memories about a user into ONE concise sentence that keeps all of their meaning.
Write it in the same language as the memories.
Output only the merged sentence, nothing else.

Memories to merge:
{}"#,
        lines.join("\n")
    )
}

pub fn contradiction_prompt(records: &[MemoryRecord]) -> String {
    format!(
        r#"{CONTRADICTION_HEADING}
Below is a list of memories about a user, each with its creation time.
Find pairs of memories that logically contradict each other (they cannot both be true now).
For each pair, report both ids, the id of the OLDER memory (earlier created_at), and a short reason.
If there are no contradictions, return an empty list.

Memories:
{list}

Respond with JSON only, no Markdown:
{{"contradictions": [{{"ids": [3, 8], "older_id": 3, "reason": "goal changed"}}]}}"#,
        list = id_content_time_list(records)
    )
}

pub fn shorten_prompt(content: &str) -> String {
    format!(
        r#"{SHORTEN_HEADING}
Rewrite the following memory about a user as a shorter sentence with exactly the same meaning.
Write it in the same language. Output only the rewritten sentence, nothing else.

Original: {content}"#
    )
}

/// First non-empty line that is not a lead-in (`Sure, here it is:`), with
/// one pair of wrapping quotes removed.
pub fn clean_sentence(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.ends_with(':') && !l.ends_with('：'))
        .unwrap_or_default();

    for (open, close) in [('"', '"'), ('「', '」'), ('“', '”')] {
        if let Some(inner) = line
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    line.to_string()
}
