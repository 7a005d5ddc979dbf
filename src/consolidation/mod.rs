//! Memory consolidation
//!
//! A run walks the categories in their fixed order and, for every category
//! that has records, performs three phases over a pipeline-owned working copy:
//!   1. Merge groups of near-duplicate memories into one new memory
//!   2. Remove the older side of contradicting memories
//!   3. Shorten memories longer than `SHORTEN_THRESHOLD_CHARS`
//!
//! The run is a lazy stream of `ProgressEvent`s. Nothing happens until the
//! consumer polls, each event describes a mutation that has already been
//! committed, and dropping the stream stops the run where it is.

mod events;
pub mod prompts;

pub use events::{ConsolidationSummary, EventDetail, ProgressEvent, ProgressStep};

use crate::inference::{Inference, Inferred, Unavailable};
use crate::memory::{Category, MemoryId, MemoryRecord, MemoryStore};
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use prompts::{
    clean_sentence, contradiction_prompt, merge_prompt, shorten_prompt, similarity_prompt,
    ContradictionReply, ContradictionReport, SimilarityReply,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Memories longer than this (in chars) are offered for shortening
pub const SHORTEN_THRESHOLD_CHARS: usize = 15;

/// Three-phase consolidation over a memory store
#[derive(Clone)]
pub struct ConsolidationPipeline {
    store: Arc<dyn MemoryStore>,
    inference: Inference,
}

impl ConsolidationPipeline {
    pub fn new(store: Arc<dyn MemoryStore>, inference: Inference) -> Self {
        Self { store, inference }
    }

    /// Start a new run. Every call takes a fresh snapshot of the store.
    pub fn run(&self) -> BoxStream<'static, ProgressEvent> {
        let run = Run::new(self.store.clone(), self.inference.clone());
        stream::unfold(run, |mut run| async move {
            run.next_event().await.map(|event| (event, run))
        })
        .boxed()
    }

    /// Drive a run to its end and collect every event.
    pub async fn run_to_end(&self) -> Vec<ProgressEvent> {
        self.run().collect().await
    }
}

enum Stage {
    Begin,
    NextCategory(usize),
    Merge,
    MergeAsk,
    MergeGroups(VecDeque<Vec<MemoryId>>),
    Contradictions,
    ContradictionsAsk,
    ResolveContradictions(VecDeque<ContradictionReport>),
    Shorten(VecDeque<MemoryId>),
    Finish,
    Done,
}

/// State of one run. Each `advance` performs at most one inference call or
/// one group of related store writes, then queues the events it produced.
struct Run {
    store: Arc<dyn MemoryStore>,
    inference: Inference,
    stage: Stage,
    pending: VecDeque<ProgressEvent>,
    category_index: usize,
    category: Category,
    working: Vec<MemoryRecord>,
    /// Mutations applied by the current phase
    applied: usize,
}

impl Run {
    fn new(store: Arc<dyn MemoryStore>, inference: Inference) -> Self {
        Self {
            store,
            inference,
            stage: Stage::Begin,
            pending: VecDeque::new(),
            category_index: 0,
            category: Category::ALL[0],
            working: Vec::new(),
            applied: 0,
        }
    }

    async fn next_event(&mut self) -> Option<ProgressEvent> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Some(event);
            }
            if matches!(self.stage, Stage::Done) {
                return None;
            }
            self.advance().await;
        }
    }

    fn emit(&mut self, step: ProgressStep, message: impl Into<String>) {
        self.pending.push_back(ProgressEvent::new(step, message));
    }

    fn emit_here(&mut self, step: ProgressStep, message: impl Into<String>) {
        let event = ProgressEvent::new(step, message).in_category(self.category);
        self.pending.push_back(event);
    }

    fn emit_detail(&mut self, step: ProgressStep, message: impl Into<String>, detail: EventDetail) {
        let event = ProgressEvent::new(step, message)
            .in_category(self.category)
            .with_detail(detail);
        self.pending.push_back(event);
    }

    /// Report an inference call that produced nothing. Only malformed
    /// replies are diagnostics; the rest just mean "no action".
    fn emit_unavailable(&mut self, what: &str, reason: &Unavailable) {
        match reason {
            Unavailable::Malformed(detail) => {
                self.emit_here(ProgressStep::Error, format!("Could not parse {what} reply: {detail}"))
            }
            other => self.emit_here(ProgressStep::Info, format!("{what} unavailable ({other})")),
        }
    }

    fn working_record(&self, id: MemoryId) -> Option<&MemoryRecord> {
        self.working.iter().find(|r| r.id == id)
    }

    async fn advance(&mut self) {
        let stage = std::mem::replace(&mut self.stage, Stage::Done);
        self.stage = match stage {
            Stage::Begin => self.begin().await,
            Stage::NextCategory(index) => self.enter_category(index).await,
            Stage::Merge => {
                self.emit_here(ProgressStep::Process, "Looking for similar memories");
                Stage::MergeAsk
            }
            Stage::MergeAsk => self.ask_similarity().await,
            Stage::MergeGroups(queue) => self.merge_next_group(queue).await,
            Stage::Contradictions => {
                if self.working.len() < 2 {
                    self.start_shortening()
                } else {
                    self.emit_here(ProgressStep::Process, "Looking for contradicting memories");
                    Stage::ContradictionsAsk
                }
            }
            Stage::ContradictionsAsk => self.ask_contradictions().await,
            Stage::ResolveContradictions(queue) => self.resolve_next_contradiction(queue).await,
            Stage::Shorten(queue) => self.shorten_next(queue).await,
            Stage::Finish => {
                info!("consolidation complete");
                self.emit(ProgressStep::Complete, "Consolidation complete");
                Stage::Done
            }
            Stage::Done => Stage::Done,
        };
    }

    async fn begin(&mut self) -> Stage {
        match self.store.list_all().await {
            Ok(records) if records.is_empty() => {
                self.emit(ProgressStep::Info, "No memories to consolidate");
                Stage::Done
            }
            Ok(records) => {
                info!("consolidating {} memories", records.len());
                self.emit(
                    ProgressStep::Start,
                    format!("Consolidating {} memories", records.len()),
                );
                Stage::NextCategory(0)
            }
            Err(e) => {
                warn!("could not read memories: {}", e);
                self.emit(ProgressStep::Error, format!("Could not read memories: {e}"));
                Stage::Finish
            }
        }
    }

    async fn enter_category(&mut self, index: usize) -> Stage {
        let Some(&category) = Category::ALL.get(index) else {
            return Stage::Finish;
        };
        self.category_index = index;
        self.category = category;

        match self.store.list_by_category(category).await {
            Ok(records) if records.is_empty() => {
                debug!("category {} is empty, skipping", category);
                Stage::NextCategory(index + 1)
            }
            Ok(records) => {
                self.emit_here(
                    ProgressStep::CategoryStart,
                    format!("Processing {} ({} memories)", category, records.len()),
                );
                self.working = records;
                Stage::Merge
            }
            Err(e) => {
                warn!("could not read {} memories: {}", category, e);
                self.emit_here(ProgressStep::Error, format!("Could not read {category} memories: {e}"));
                Stage::NextCategory(index + 1)
            }
        }
    }

    // ─── Phase 1: merge ─────────────────────────────────────────────

    async fn ask_similarity(&mut self) -> Stage {
        let reply: Inferred<SimilarityReply> = self
            .inference
            .complete_typed(&similarity_prompt(&self.working))
            .await;

        match reply {
            Inferred::Ready(reply) => {
                let groups: VecDeque<Vec<MemoryId>> =
                    reply.groups.into_iter().filter(|g| g.len() >= 2).collect();
                if groups.is_empty() {
                    self.emit_here(ProgressStep::Info, "No similar memories found");
                    return Stage::Contradictions;
                }
                debug!("{} candidate groups in {}", groups.len(), self.category);
                self.applied = 0;
                Stage::MergeGroups(groups)
            }
            Inferred::Unavailable(reason) => {
                self.emit_unavailable("Similarity", &reason);
                Stage::Contradictions
            }
        }
    }

    async fn merge_next_group(&mut self, mut queue: VecDeque<Vec<MemoryId>>) -> Stage {
        let Some(group) = queue.pop_front() else {
            if self.applied == 0 {
                self.emit_here(ProgressStep::Info, "No memories merged");
            }
            return Stage::Contradictions;
        };

        // Ids consumed by an earlier group are no longer in the working copy.
        let mut members: Vec<MemoryRecord> = Vec::new();
        for id in group {
            if members.iter().any(|m| m.id == id) {
                continue;
            }
            if let Some(record) = self.working_record(id) {
                members.push(record.clone());
            }
        }
        if members.len() < 2 {
            debug!("skipping group with {} live members", members.len());
            return Stage::MergeGroups(queue);
        }

        let merged = match self.inference.complete_text(&merge_prompt(&members)).await {
            Inferred::Ready(text) => clean_sentence(&text),
            Inferred::Unavailable(reason) => {
                self.emit_unavailable("Merge", &reason);
                return Stage::MergeGroups(queue);
            }
        };
        if merged.is_empty() {
            return Stage::MergeGroups(queue);
        }

        // Originals are only removed once the merged memory exists.
        let created = match self.store.add(self.category, &merged).await {
            Ok(id) => id,
            Err(e) => {
                warn!("merge insert failed: {}", e);
                self.emit_here(ProgressStep::Error, format!("Could not save merged memory: {e}"));
                return Stage::MergeGroups(queue);
            }
        };

        let mut removed = Vec::new();
        for member in &members {
            match self.store.delete(member.id).await {
                Ok(()) => removed.push(member.id),
                Err(e) => {
                    warn!("merge delete of {} failed: {}", member.id, e);
                    self.emit_here(
                        ProgressStep::Error,
                        format!("Could not remove merged memory #{}: {e}", member.id),
                    );
                }
            }
        }
        self.working.retain(|r| !removed.contains(&r.id));
        self.working.push(MemoryRecord {
            id: created,
            category: self.category,
            content: merged.clone(),
            created_at: Utc::now(),
        });
        self.applied += 1;

        let originals: Vec<&str> = members.iter().map(|m| m.content.as_str()).collect();
        info!("merged {:?} into #{}", removed, created);
        self.emit_here(
            ProgressStep::Action,
            format!("Merged {} memories: {}", members.len(), originals.join(" / ")),
        );
        self.emit_detail(
            ProgressStep::Result,
            format!("Created #{created}: {merged}"),
            EventDetail::Merged {
                removed,
                created,
                content: merged.clone(),
            },
        );
        Stage::MergeGroups(queue)
    }

    // ─── Phase 2: contradictions ────────────────────────────────────

    async fn ask_contradictions(&mut self) -> Stage {
        let reply: Inferred<ContradictionReply> = self
            .inference
            .complete_typed(&contradiction_prompt(&self.working))
            .await;

        match reply {
            Inferred::Ready(reply) if reply.contradictions.is_empty() => {
                self.emit_here(ProgressStep::Info, "No contradictions found");
                self.start_shortening()
            }
            Inferred::Ready(reply) => {
                self.applied = 0;
                Stage::ResolveContradictions(reply.contradictions.into())
            }
            Inferred::Unavailable(reason) => {
                self.emit_unavailable("Contradiction", &reason);
                self.start_shortening()
            }
        }
    }

    /// Pick the record to drop and the one that survives. The older record
    /// by `created_at` always loses; the model's `older_id` only breaks ties
    /// or stands in when its pair cannot be resolved.
    fn choose_stale(&self, report: &ContradictionReport) -> Option<(MemoryRecord, Option<MemoryId>)> {
        let live: Vec<&MemoryRecord> = report
            .ids
            .iter()
            .filter_map(|id| self.working_record(*id))
            .collect();

        if let [a, b] = live.as_slice() {
            if a.id != b.id {
                let (stale, kept) = match a.created_at.cmp(&b.created_at) {
                    std::cmp::Ordering::Less => (*a, *b),
                    std::cmp::Ordering::Greater => (*b, *a),
                    std::cmp::Ordering::Equal => match report.older_id {
                        Some(older) if older == b.id => (*b, *a),
                        Some(older) if older == a.id => (*a, *b),
                        _ if a.id < b.id => (*a, *b),
                        _ => (*b, *a),
                    },
                };
                return Some((stale.clone(), Some(kept.id)));
            }
        }

        let stale = self.working_record(report.older_id?)?.clone();
        let kept = live.iter().map(|r| r.id).find(|id| *id != stale.id);
        Some((stale, kept))
    }

    async fn resolve_next_contradiction(
        &mut self,
        mut queue: VecDeque<ContradictionReport>,
    ) -> Stage {
        let Some(report) = queue.pop_front() else {
            if self.applied == 0 {
                self.emit_here(ProgressStep::Info, "No stale memories removed");
            }
            return self.start_shortening();
        };

        let Some((stale, kept)) = self.choose_stale(&report) else {
            debug!("contradiction {:?} does not resolve to a live memory", report);
            return Stage::ResolveContradictions(queue);
        };

        if let Err(e) = self.store.delete(stale.id).await {
            warn!("contradiction delete of {} failed: {}", stale.id, e);
            self.emit_here(
                ProgressStep::Error,
                format!("Could not remove memory #{}: {e}", stale.id),
            );
            return Stage::ResolveContradictions(queue);
        }
        self.working.retain(|r| r.id != stale.id);
        self.applied += 1;

        info!("removed stale memory #{} ({})", stale.id, report.reason);
        let reason = if report.reason.is_empty() {
            "contradicted by a newer memory".to_string()
        } else {
            report.reason.clone()
        };
        self.emit_detail(
            ProgressStep::Action,
            format!("Removed #{} \"{}\": {}", stale.id, stale.content, reason),
            EventDetail::Contradiction {
                removed: stale.id,
                kept,
                reason,
            },
        );
        Stage::ResolveContradictions(queue)
    }

    // ─── Phase 3: shortening ────────────────────────────────────────

    fn start_shortening(&mut self) -> Stage {
        let queue: VecDeque<MemoryId> = self
            .working
            .iter()
            .filter(|r| r.content_len() > SHORTEN_THRESHOLD_CHARS)
            .map(|r| r.id)
            .collect();
        Stage::Shorten(queue)
    }

    async fn shorten_next(&mut self, mut queue: VecDeque<MemoryId>) -> Stage {
        let Some(id) = queue.pop_front() else {
            self.working.clear();
            return Stage::NextCategory(self.category_index + 1);
        };
        let Some(original) = self.working_record(id).cloned() else {
            return Stage::Shorten(queue);
        };

        let candidate = match self
            .inference
            .complete_text(&shorten_prompt(&original.content))
            .await
        {
            Inferred::Ready(text) => clean_sentence(&text),
            Inferred::Unavailable(reason) => {
                debug!("no shortening for #{}: {}", id, reason);
                return Stage::Shorten(queue);
            }
        };

        if !is_acceptable_rewrite(&original.content, &candidate) {
            debug!("rejected rewrite for #{}: {:?}", id, candidate);
            return Stage::Shorten(queue);
        }

        if let Err(e) = self.store.update(id, &candidate, self.category).await {
            warn!("shortening update of {} failed: {}", id, e);
            self.emit_here(ProgressStep::Error, format!("Could not shorten memory #{id}: {e}"));
            return Stage::Shorten(queue);
        }
        if let Some(record) = self.working.iter_mut().find(|r| r.id == id) {
            record.content = candidate.clone();
        }

        self.emit_detail(
            ProgressStep::Result,
            format!("Shortened #{id}: \"{}\" -> \"{}\"", original.content, candidate),
            EventDetail::Shortened {
                id,
                before: original.content,
                after: candidate,
            },
        );
        Stage::Shorten(queue)
    }
}

/// A rewrite must be non-empty, different, and strictly shorter in chars.
fn is_acceptable_rewrite(original: &str, candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate != original
        && candidate.chars().count() < original.chars().count()
}
