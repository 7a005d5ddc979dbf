//! Progress events emitted by a consolidation run

use crate::memory::{Category, MemoryId};
use serde::{Deserialize, Serialize};

/// Milestone kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    /// Run started (store not empty)
    Start,
    /// A non-empty category is about to be processed
    CategoryStart,
    /// A phase is asking the model for a decision
    Process,
    /// A decision was applied to the store
    Action,
    /// Outcome of an applied decision
    Result,
    /// Nothing to do / nothing found
    Info,
    /// Diagnostic: unparseable model reply or failed store write
    Error,
    /// Run finished
    Complete,
}

impl std::fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Start => "start",
            Self::CategoryStart => "category_start",
            Self::Process => "process",
            Self::Action => "action",
            Self::Result => "result",
            Self::Info => "info",
            Self::Error => "error",
            Self::Complete => "complete",
        };
        write!(f, "{label}")
    }
}

/// Machine-readable description of a completed mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetail {
    Merged {
        removed: Vec<MemoryId>,
        created: MemoryId,
        content: String,
    },
    Contradiction {
        removed: MemoryId,
        kept: Option<MemoryId>,
        reason: String,
    },
    Shortened {
        id: MemoryId,
        before: String,
        after: String,
    },
}

/// One observable step of a consolidation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step: ProgressStep,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<EventDetail>,
}

impl ProgressEvent {
    pub fn new(step: ProgressStep, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
            category: None,
            detail: None,
        }
    }

    pub fn in_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Render as a Server-Sent Events `data:` frame.
    pub fn to_sse(&self) -> String {
        let payload = serde_json::to_string(self).unwrap_or_else(|_| {
            serde_json::json!({ "step": self.step, "message": self.message }).to_string()
        });
        format!("data: {payload}\n\n")
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.category {
            Some(category) => write!(f, "[{}] ({}) {}", self.step, category, self.message),
            None => write!(f, "[{}] {}", self.step, self.message),
        }
    }
}

/// Tally of what a run did, built from its events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsolidationSummary {
    /// Groups merged into a single memory
    pub merged_groups: usize,
    /// Original memories removed by merges
    pub merged_away: usize,
    pub contradictions_resolved: usize,
    pub shortened: usize,
    pub errors: usize,
    /// Whether the run reached its terminal event
    pub finished: bool,
}

impl ConsolidationSummary {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a ProgressEvent>) -> Self {
        let mut summary = Self::default();
        for event in events {
            summary.record(event);
        }
        summary
    }

    pub fn record(&mut self, event: &ProgressEvent) {
        match &event.detail {
            Some(EventDetail::Merged { removed, .. }) => {
                self.merged_groups += 1;
                self.merged_away += removed.len();
            }
            Some(EventDetail::Contradiction { .. }) => self.contradictions_resolved += 1,
            Some(EventDetail::Shortened { .. }) => self.shortened += 1,
            None => {}
        }
        match event.step {
            ProgressStep::Error => self.errors += 1,
            ProgressStep::Complete => self.finished = true,
            _ => {}
        }
    }

    pub fn changed_anything(&self) -> bool {
        self.merged_groups + self.contradictions_resolved + self.shortened > 0
    }
}

impl std::fmt::Display for ConsolidationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} merges ({} memories folded), {} contradictions resolved, {} shortened, {} errors",
            self.merged_groups,
            self.merged_away,
            self.contradictions_resolved,
            self.shortened,
            self.errors
        )
    }
}
