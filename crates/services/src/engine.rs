//! # ConsistencyEngine
//!
//! Explicit orchestration of one unit of work per incoming write. What the
//! original product buried in relational triggers runs here as a visible
//! state machine: Received → ReputationApplied → NotificationsGenerated →
//! Committed, with Failed reachable from every non-terminal state.
//!
//! The engine stages the originating write and every derived write into a
//! single [`WriteBatch`]; the store commits the batch atomically, so no
//! event is ever half applied.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use domains::error::{EngineError, Result, StoreError};
use domains::events::{DomainEvent, EventEnvelope};
use domains::models::{Content, ContentKind, ContentRef, Mention, Vote};
use domains::ports::{ConsistencyStore, WriteBatch, WriteOp};

use crate::notifications::NotificationGenerator;
use crate::reaper::OrphanReaper;
use crate::reputation::ReputationCalculator;

/// Progress of one unit of work through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Received,
    ReputationApplied,
    NotificationsGenerated,
    Committed,
    Failed,
}

/// How a committed event was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Derived state written.
    Applied,
    /// Event id already in the ledger; dropped without side effects.
    Replayed,
    /// Unrecognized event type; committed as a no-op, never a failure.
    UnknownKind,
    /// Known event with nothing left to do (target already gone,
    /// answer already accepted).
    AlreadySettled,
}

/// The engine's answer for one envelope. Failures are returned as errors,
/// so a receipt always carries `state == Committed`.
#[derive(Debug, Clone)]
pub struct Receipt {
    pub event_id: Uuid,
    pub state: ProcessState,
    pub disposition: Disposition,
    pub reputation_delta: i64,
    pub notifications_created: usize,
}

impl Receipt {
    fn settled(event_id: Uuid, disposition: Disposition) -> Self {
        Self {
            event_id,
            state: ProcessState::Committed,
            disposition,
            reputation_delta: 0,
            notifications_created: 0,
        }
    }
}

/// Rows resolved while admitting an event, reused by the later stages.
#[derive(Default)]
struct Admitted {
    /// The content the event points at: vote target, parent question,
    /// commented content, accepted answer, mention owner, or deleted row.
    target: Option<Content>,
    /// Mentioned users that exist and are not yet recorded on the content.
    fresh_mentions: Vec<Uuid>,
    /// Transitive children of deleted content, reaped alongside it.
    descendants: Vec<Content>,
    /// Known event with nothing to apply; commits as an empty batch so the
    /// ledger still absorbs replays.
    settled: bool,
}

pub struct ConsistencyEngine {
    store: Arc<dyn ConsistencyStore>,
    /// Serializes units of work per target entity; independent entities
    /// proceed in parallel.
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    retry_backoff: Duration,
}

impl ConsistencyEngine {
    pub fn new(store: Arc<dyn ConsistencyStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            retry_backoff: Duration::from_millis(25),
        }
    }

    /// Backoff before the single retry of a commit that failed with a
    /// retryable store error.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Wraps an in-process event and runs it through [`Self::process`].
    pub async fn submit(&self, event: DomainEvent) -> Result<Receipt> {
        self.process(&EventEnvelope::wrap(&event)).await
    }

    /// Runs one envelope to Committed or Failed.
    pub async fn process(&self, envelope: &EventEnvelope) -> Result<Receipt> {
        let event = match envelope.decode() {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!(event_id = %envelope.id, kind = %envelope.kind,
                    "unknown event type, committing as no-op");
                return Ok(Receipt::settled(envelope.id, Disposition::UnknownKind));
            }
            Err(err) => {
                warn!(event_id = %envelope.id, kind = %envelope.kind, error = %err,
                    "malformed event payload, dropping");
                return Err(EngineError::Validation(format!(
                    "bad {} payload: {err}",
                    envelope.kind
                )));
            }
        };

        let _guard = self.entity_guard(event.entity_key()).await;

        if self.store.was_processed(envelope.id).await? {
            debug!(event_id = %envelope.id, kind = %envelope.kind, "replayed event dropped");
            return Ok(Receipt::settled(envelope.id, Disposition::Replayed));
        }

        debug!(event_id = %envelope.id, kind = %envelope.kind,
            state = ?ProcessState::Received, "event admitted");
        let admitted = match self.receive(&event).await {
            Ok(admitted) => admitted,
            Err(err) => return Err(self.fail(envelope.id, err)),
        };

        let mut batch = WriteBatch::new(envelope.id);
        if admitted.settled {
            self.commit_with_retry(batch)
                .await
                .map_err(|err| self.fail(envelope.id, err))?;
            return Ok(Receipt::settled(envelope.id, Disposition::AlreadySettled));
        }

        Self::stage_originating_write(&event, &admitted, &mut batch);

        let reputation_delta = Self::stage_reputation(&event, &admitted, &mut batch);
        debug!(event_id = %envelope.id, delta = reputation_delta,
            state = ?ProcessState::ReputationApplied, "reputation staged");

        let notifications_created = Self::stage_derived(&event, &admitted, &mut batch);
        debug!(event_id = %envelope.id, notifications = notifications_created,
            state = ?ProcessState::NotificationsGenerated, "derived state staged");

        self.commit_with_retry(batch)
            .await
            .map_err(|err| self.fail(envelope.id, err))?;
        debug!(event_id = %envelope.id, state = ?ProcessState::Committed, "unit of work committed");

        Ok(Receipt {
            event_id: envelope.id,
            state: ProcessState::Committed,
            disposition: Disposition::Applied,
            reputation_delta,
            notifications_created,
        })
    }

    /// Received: validate the event against current store state and resolve
    /// the rows the later stages need.
    async fn receive(&self, event: &DomainEvent) -> Result<Admitted> {
        let mut admitted = Admitted::default();
        match event {
            DomainEvent::QuestionPosted { question_id, author_id, .. } => {
                self.require_user(*author_id).await?;
                if self.store.resolve(ContentRef::question(*question_id)).await?.is_some() {
                    return Err(EngineError::Conflict(format!(
                        "question {question_id} already exists"
                    )));
                }
            }
            DomainEvent::AnswerPosted { question_id, author_id, answer_id, .. } => {
                self.require_user(*author_id).await?;
                if self.store.resolve(ContentRef::answer(*answer_id)).await?.is_some() {
                    return Err(EngineError::Conflict(format!("answer {answer_id} already exists")));
                }
                admitted.target =
                    Some(self.require_content(ContentRef::question(*question_id)).await?);
            }
            DomainEvent::CommentPosted { parent, author_id, comment_id, .. } => {
                self.require_user(*author_id).await?;
                if self.store.resolve(ContentRef::comment(*comment_id)).await?.is_some() {
                    return Err(EngineError::Conflict(format!(
                        "comment {comment_id} already exists"
                    )));
                }
                admitted.target = Some(self.require_content(*parent).await?);
            }
            DomainEvent::VoteCast { voter_id, target, .. } => {
                admitted.target = Some(self.require_content(*target).await?);
                if self.store.find_vote(*voter_id, *target).await?.is_some() {
                    return Err(EngineError::Conflict("already voted".into()));
                }
            }
            DomainEvent::VoteChanged { voter_id, target, from, .. } => {
                admitted.target = Some(self.require_content(*target).await?);
                let vote = self
                    .store
                    .find_vote(*voter_id, *target)
                    .await?
                    .ok_or(EngineError::NotFound("vote", target.id))?;
                if vote.vote_type != *from {
                    return Err(EngineError::Validation(
                        "stored vote does not match the event's original".into(),
                    ));
                }
            }
            DomainEvent::VoteRemoved { voter_id, target, original } => {
                admitted.target = Some(self.require_content(*target).await?);
                let vote = self
                    .store
                    .find_vote(*voter_id, *target)
                    .await?
                    .ok_or(EngineError::NotFound("vote", target.id))?;
                if vote.vote_type != *original {
                    return Err(EngineError::Validation(
                        "stored vote does not match the event's original".into(),
                    ));
                }
            }
            DomainEvent::AnswerAccepted { answer_id, .. } => {
                let answer = self.require_content(ContentRef::answer(*answer_id)).await?;
                if answer.kind != ContentKind::Answer || answer.parent.is_none() {
                    return Err(EngineError::Validation(format!(
                        "accepted target {answer_id} is not an answer under a question"
                    )));
                }
                admitted.settled = answer.is_accepted;
                admitted.target = Some(answer);
            }
            DomainEvent::MentionDetected { content, mentioned_user_ids, .. } => {
                let owner = self.require_content(*content).await?;
                let recorded: Vec<Uuid> = self
                    .store
                    .mentions_of(*content)
                    .await?
                    .into_iter()
                    .map(|m| m.mentioned_user_id)
                    .collect();
                let mut fresh = Vec::new();
                for user_id in mentioned_user_ids {
                    if fresh.contains(user_id) || recorded.contains(user_id) {
                        continue;
                    }
                    if self.store.get_user(*user_id).await?.is_none() {
                        debug!(user_id = %user_id, "mention of unknown user skipped");
                        continue;
                    }
                    fresh.push(*user_id);
                }
                admitted.settled = fresh.is_empty();
                admitted.fresh_mentions = fresh;
                admitted.target = Some(owner);
            }
            DomainEvent::ContentDeleted { target, .. } => {
                // Deleting what is already gone is a benign replay of intent.
                match self.store.resolve(*target).await? {
                    Some(content) => {
                        admitted.descendants = self.collect_descendants(&content).await?;
                        admitted.target = Some(content);
                    }
                    None => admitted.settled = true,
                }
            }
        }
        Ok(admitted)
    }

    /// The triggering write itself rides in the batch with the derived
    /// state, which is what makes "either both happen or neither does" hold.
    fn stage_originating_write(event: &DomainEvent, admitted: &Admitted, batch: &mut WriteBatch) {
        match event {
            DomainEvent::QuestionPosted { question_id, author_id, body } => {
                batch.push(WriteOp::InsertContent(Content {
                    id: *question_id,
                    kind: ContentKind::Question,
                    author_id: *author_id,
                    parent: None,
                    body: body.clone(),
                    upvotes: 0,
                    downvotes: 0,
                    is_accepted: false,
                    accepted_answer_id: None,
                    created_at: Utc::now(),
                }));
            }
            DomainEvent::AnswerPosted { answer_id, question_id, author_id, body } => {
                batch.push(WriteOp::InsertContent(Content {
                    id: *answer_id,
                    kind: ContentKind::Answer,
                    author_id: *author_id,
                    parent: Some(ContentRef::question(*question_id)),
                    body: body.clone(),
                    upvotes: 0,
                    downvotes: 0,
                    is_accepted: false,
                    accepted_answer_id: None,
                    created_at: Utc::now(),
                }));
            }
            DomainEvent::CommentPosted { comment_id, parent, author_id, body } => {
                batch.push(WriteOp::InsertContent(Content {
                    id: *comment_id,
                    kind: ContentKind::Comment,
                    author_id: *author_id,
                    parent: Some(*parent),
                    body: body.clone(),
                    upvotes: 0,
                    downvotes: 0,
                    is_accepted: false,
                    accepted_answer_id: None,
                    created_at: Utc::now(),
                }));
            }
            DomainEvent::VoteCast { voter_id, target, vote } => {
                batch.push(WriteOp::InsertVote(Vote {
                    id: Uuid::now_v7(),
                    voter_id: *voter_id,
                    target: *target,
                    vote_type: *vote,
                    created_at: Utc::now(),
                }));
            }
            DomainEvent::VoteChanged { voter_id, target, to, .. } => {
                batch.push(WriteOp::UpdateVote {
                    voter_id: *voter_id,
                    target: *target,
                    vote: *to,
                });
            }
            DomainEvent::VoteRemoved { voter_id, target, .. } => {
                batch.push(WriteOp::DeleteVote { voter_id: *voter_id, target: *target });
            }
            DomainEvent::AnswerAccepted { answer_id, .. } => {
                if let Some(parent) = admitted.target.as_ref().and_then(|a| a.parent) {
                    batch.push(WriteOp::SetAcceptedAnswer {
                        question_id: parent.id,
                        answer_id: *answer_id,
                    });
                }
            }
            DomainEvent::MentionDetected { content, .. } => {
                for user_id in &admitted.fresh_mentions {
                    batch.push(WriteOp::InsertMention(Mention {
                        id: Uuid::now_v7(),
                        content: *content,
                        mentioned_user_id: *user_id,
                        created_at: Utc::now(),
                    }));
                }
            }
            DomainEvent::ContentDeleted { target, .. } => {
                batch.push(WriteOp::DeleteContent(*target));
            }
        }
    }

    /// ReputationApplied: credit the affected author per the fixed table.
    /// Returns the staged delta (0 when the event is outside the table).
    fn stage_reputation(event: &DomainEvent, admitted: &Admitted, batch: &mut WriteBatch) -> i64 {
        let delta = ReputationCalculator::delta(event);
        if delta == 0 {
            return 0;
        }
        let credited = match event {
            DomainEvent::QuestionPosted { author_id, .. } => Some(*author_id),
            DomainEvent::VoteCast { .. }
            | DomainEvent::VoteChanged { .. }
            | DomainEvent::VoteRemoved { .. }
            | DomainEvent::AnswerAccepted { .. } => {
                admitted.target.as_ref().map(|content| content.author_id)
            }
            _ => None,
        };
        match credited {
            Some(user_id) => {
                batch.push(WriteOp::AdjustReputation { user_id, delta });
                delta
            }
            None => 0,
        }
    }

    /// NotificationsGenerated: notification drafts for additive events, the
    /// reap cascade for deletions. Returns how many notifications were
    /// staged.
    fn stage_derived(event: &DomainEvent, admitted: &Admitted, batch: &mut WriteBatch) -> usize {
        if let DomainEvent::ContentDeleted { .. } = event {
            if let Some(deleted) = admitted.target.as_ref() {
                for op in OrphanReaper::plan(deleted, &admitted.descendants) {
                    batch.push(op);
                }
            }
            return 0;
        }

        let Some(target) = admitted.target.as_ref() else {
            return 0;
        };
        // Mentions already recorded on the content (earlier edits) or
        // pointing at unknown users were filtered out on admission; only
        // the fresh ones may notify.
        let drafts = match event {
            DomainEvent::MentionDetected { content, author_id, .. } => {
                NotificationGenerator::drafts(
                    &DomainEvent::MentionDetected {
                        content: *content,
                        author_id: *author_id,
                        mentioned_user_ids: admitted.fresh_mentions.clone(),
                    },
                    target,
                )
            }
            _ => NotificationGenerator::drafts(event, target),
        };
        let staged = drafts.len();
        for draft in drafts {
            batch.push(WriteOp::InsertNotification(draft.into_notification()));
        }
        staged
    }

    /// Commits the batch, retrying exactly once after a short backoff when
    /// the store reports transient contention.
    async fn commit_with_retry(&self, batch: WriteBatch) -> Result<()> {
        match self.store.commit(batch.clone()).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                warn!(error = %err, backoff_ms = self.retry_backoff.as_millis() as u64,
                    "transient store failure, retrying commit once");
                tokio::time::sleep(self.retry_backoff).await;
                self.store.commit(batch).await.map_err(Self::commit_error)
            }
            Err(err) => Err(Self::commit_error(err)),
        }
    }

    fn commit_error(err: StoreError) -> EngineError {
        match err {
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(entity, id) => EngineError::NotFound(entity, id),
            other => EngineError::Consistency(other.to_string()),
        }
    }

    fn fail(&self, event_id: Uuid, err: EngineError) -> EngineError {
        debug!(event_id = %event_id, state = ?ProcessState::Failed, error = %err,
            "unit of work failed, nothing committed");
        err
    }

    /// Walks the content tree under `root`; order is irrelevant to the
    /// reap plan.
    async fn collect_descendants(&self, root: &Content) -> Result<Vec<Content>> {
        let mut descendants = Vec::new();
        let mut frontier = vec![root.target()];
        while let Some(parent) = frontier.pop() {
            for child in self.store.children_of(parent).await? {
                frontier.push(child.target());
                descendants.push(child);
            }
        }
        Ok(descendants)
    }

    async fn require_user(&self, user_id: Uuid) -> Result<()> {
        self.store
            .get_user(user_id)
            .await?
            .map(|_| ())
            .ok_or(EngineError::NotFound("user", user_id))
    }

    async fn require_content(&self, target: ContentRef) -> Result<Content> {
        self.store
            .resolve(target)
            .await?
            .ok_or(EngineError::NotFound("content", target.id))
    }

    async fn entity_guard(&self, key: Uuid) -> tokio::sync::OwnedMutexGuard<()> {
        let cell = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        cell.lock_owned().await
    }
}
