//! Types shared by the matcher, planner, applier and orphan passes.
//!
//! Everything here lives for a single run: it is built from one export
//! snapshot and one live snapshot and thrown away once the report is out.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::extract::ExtractStats;
use crate::model::{Collection, SourceRecord};

// ── Matching ──────────────────────────────────────────────────

/// Which signal decided between several live candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    Pixels,
    FileSize,
    LowestId,
}

/// How a source record resolved against the live snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A single live entity carries the same identity key.
    Exact(String),
    /// Several live entities share the key; the quality order picked one.
    Fuzzy { id: String, rationale: TieBreak },
    /// Nothing in the store carries this key.
    None,
}

impl MatchOutcome {
    /// Live id for `Exact` and `Fuzzy` outcomes.
    #[must_use]
    pub fn live_id(&self) -> Option<&str> {
        match self {
            Self::Exact(id) | Self::Fuzzy { id, .. } => Some(id),
            Self::None => None,
        }
    }
}

/// Matcher output for one source record.
#[derive(Debug, Clone)]
pub struct MatchResult<'a> {
    pub record: &'a SourceRecord,
    /// Identity key the record was matched on.
    pub key: String,
    pub outcome: MatchOutcome,
    /// Same-key live media that lost the quality tie-break.
    pub duplicates: Vec<String>,
    /// Set when the winner could not be told apart from the runner-up.
    pub ambiguity: Option<Ambiguity>,
}

/// A tie-break decided by id alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub key: String,
    pub kept: String,
    pub candidates: Vec<String>,
}

// ── Planning ──────────────────────────────────────────────────

/// Reference to a live entity, or to one the plan will create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Ref {
    Existing(String),
    /// Index of the producing operation in [`SyncPlan::operations`].
    Pending(usize),
}

/// Post fields to create, with references still unresolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedPost {
    pub slug: String,
    pub title: String,
    pub body_html: String,
    pub published_at: i64,
    pub authors: Vec<String>,
    pub categories: Vec<Ref>,
    pub hero: Option<Ref>,
}

/// Media to fetch, upload and register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMedia {
    pub source_url: String,
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_size_bytes: Option<u64>,
}

/// Payload of a `Create`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Planned {
    Category { title: String, slug: String },
    Media(PlannedMedia),
    Post(PlannedPost),
}

/// Source-of-truth fields written on `Update`.
///
/// `hero` is only set when the export resolves one; an unresolved hero
/// leaves the live value alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedUpdate {
    pub title: String,
    pub body_html: String,
    pub categories: Vec<Ref>,
    pub hero: Option<Ref>,
}

/// Why an operation does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Live entity already matches the source.
    Unchanged,
    /// Category or media already present in the store.
    Exists,
    /// An earlier source record carries the same identity key.
    DuplicateInSource,
}

/// One step of a [`SyncPlan`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    Create(Planned),
    Update { id: String, fields: PlannedUpdate },
    Relink { id: String, hero: Ref },
    Skip { reason: SkipReason },
}

/// An operation plus what it is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedOp {
    /// Slug, category title or filename; used in report errors.
    pub identifier: String,
    pub collection: Collection,
    #[serde(flatten)]
    pub op: Operation,
}

impl PlannedOp {
    /// Indices of the operations whose results this one consumes.
    #[must_use]
    pub fn dependencies(&self) -> Vec<usize> {
        let refs: Vec<&Ref> = match &self.op {
            Operation::Create(Planned::Post(post)) => {
                post.categories.iter().chain(post.hero.as_ref()).collect()
            }
            Operation::Update { fields, .. } => {
                fields.categories.iter().chain(fields.hero.as_ref()).collect()
            }
            Operation::Relink { hero, .. } => vec![hero],
            _ => Vec::new(),
        };
        let mut deps: Vec<usize> = refs
            .into_iter()
            .filter_map(|r| match r {
                Ref::Pending(i) => Some(*i),
                Ref::Existing(_) => None,
            })
            .collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }

    /// True for anything other than `Skip`.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        !matches!(self.op, Operation::Skip { .. })
    }
}

/// Why a live entity is a deletion candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// Lost the quality tie-break against a same-key asset.
    Duplicate,
    /// Nothing live reaches it.
    Unreferenced,
    /// No record in the current export maps to it. Advisory only.
    NotInSource,
}

/// A live entity surfaced for human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanCandidate {
    pub collection: Collection,
    pub id: String,
    /// Title, slug or filename.
    pub label: String,
    pub reason: OrphanReason,
    /// For duplicates: the asset that won the tie-break.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept: Option<String>,
}

/// Ordered operations plus everything flagged for review.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub operations: Vec<PlannedOp>,
    pub orphan_candidates: Vec<OrphanCandidate>,
    pub ambiguities: Vec<Ambiguity>,
}

impl SyncPlan {
    /// Number of operations that would change the store.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.operations.iter().filter(|op| op.is_mutation()).count()
    }
}

// ── Applying ──────────────────────────────────────────────────

/// Attempts and linear backoff for one class of call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `backoff_ms * n`.
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// Batching and retry behaviour of the applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyPolicy {
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay_ms: u64,
    /// Live-store calls.
    pub store: RetryPolicy,
    /// Media fetch and blob upload.
    pub upload: RetryPolicy,
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            batch_size: 25,
            batch_delay_ms: 0,
            store: RetryPolicy::default(),
            upload: RetryPolicy {
                max_attempts: 3,
                backoff_ms: 250,
            },
        }
    }
}

/// Cooperative cancellation shared between the trigger and a run.
///
/// The applier checks it between batches; a batch in flight always finishes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Reporting ─────────────────────────────────────────────────

/// A failure tied to one record or operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportError {
    pub identifier: String,
    pub message: String,
}

/// The externally observable outcome of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub started_at: String,
    pub finished_at: String,
    pub dry_run: bool,
    pub cancelled: bool,
    pub created: usize,
    pub updated: usize,
    pub relinked: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Operations never attempted because the run was cancelled.
    pub pending: usize,
    pub errors: Vec<ReportError>,
    pub orphan_candidates: Vec<OrphanCandidate>,
    pub ambiguities: Vec<Ambiguity>,
    /// Data problems found in the live store (e.g. category cycles).
    pub anomalies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<ExtractStats>,
}

impl SyncReport {
    /// Empty report stamped with the current time.
    #[must_use]
    pub fn started() -> Self {
        Self {
            started_at: chrono::Utc::now().to_rfc3339(),
            ..Self::default()
        }
    }

    /// Report for a run that could not start: nothing applied, one error.
    #[must_use]
    pub fn fatal(mut self, err: &Error) -> Self {
        self.created = 0;
        self.updated = 0;
        self.relinked = 0;
        self.skipped = 0;
        self.deleted = 0;
        self.errors = vec![ReportError {
            identifier: "run".to_string(),
            message: err.to_string(),
        }];
        self.finish()
    }

    /// Stamp the finish time.
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.finished_at = chrono::Utc::now().to_rfc3339();
        self
    }

    pub fn record_error(&mut self, identifier: &str, message: impl Into<String>) {
        self.errors.push(ReportError {
            identifier: identifier.to_string(),
            message: message.into(),
        });
    }

    /// Count what a plan would do, without doing it.
    pub fn tally(&mut self, plan: &SyncPlan) {
        for op in &plan.operations {
            match &op.op {
                Operation::Create(_) => self.created += 1,
                Operation::Update { .. } => self.updated += 1,
                Operation::Relink { .. } => self.relinked += 1,
                Operation::Skip { .. } => self.skipped += 1,
            }
        }
    }

    /// Operations that changed (or would change) the store.
    #[must_use]
    pub const fn applied(&self) -> usize {
        self.created + self.updated + self.relinked + self.deleted
    }
}
