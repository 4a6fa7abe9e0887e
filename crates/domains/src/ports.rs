//! # Core Ports
//!
//! The storage contract the engine drives. Adapters implement
//! [`ConsistencyStore`]; the engine never issues a bare write: every
//! mutation travels inside a [`WriteBatch`] so the originating write and
//! all derived state commit or roll back together.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Content, ContentRef, Mention, Notification, User, Vote, VoteType};

/// One mutation inside a batch. Deletions are idempotent: deleting rows
/// that are already absent is not an error.
#[derive(Debug, Clone)]
pub enum WriteOp {
    InsertUser(User),
    InsertContent(Content),
    DeleteContent(ContentRef),
    /// Fails the batch with a conflict if (voter, target) already exists.
    InsertVote(Vote),
    UpdateVote {
        voter_id: Uuid,
        target: ContentRef,
        vote: VoteType,
    },
    DeleteVote {
        voter_id: Uuid,
        target: ContentRef,
    },
    DeleteVotesOn(ContentRef),
    /// Applies the delta and stores the tier recomputed from the new total
    /// (`BadgeTier::for_points`) in the same step, so points and tier can
    /// never drift apart.
    AdjustReputation {
        user_id: Uuid,
        delta: i64,
    },
    /// Marks the answer accepted and points its question at it.
    SetAcceptedAnswer {
        question_id: Uuid,
        answer_id: Uuid,
    },
    ClearAcceptedAnswer {
        question_id: Uuid,
    },
    InsertNotification(Notification),
    DeleteNotificationsLinking(ContentRef),
    InsertMention(Mention),
    DeleteMentionsOwnedBy(ContentRef),
}

/// The unit of work handed to [`ConsistencyStore::commit`].
///
/// Carries the id of the triggering event; committing records the id in the
/// processed-event ledger inside the same transaction, which is what makes
/// at-least-once redelivery safe.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    pub event_id: Uuid,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new(event_id: Uuid) -> Self {
        Self { event_id, ops: Vec::new() }
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Data persistence contract for the consistency engine.
///
/// Vote counters on content rows are derived state: implementations adjust
/// them inside the same commit that inserts, updates, or deletes the vote
/// rows, so two concurrent votes are both reflected.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ConsistencyStore: Send + Sync {
    // Reads
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    /// Single capability for the polymorphic (kind, id) address.
    async fn resolve(&self, target: ContentRef) -> Result<Option<Content>, StoreError>;
    /// Direct children: a question's answers and comments, an answer's
    /// comments. Used to walk the subtree when content is deleted.
    async fn children_of(&self, parent: ContentRef) -> Result<Vec<Content>, StoreError>;
    async fn find_vote(
        &self,
        voter_id: Uuid,
        target: ContentRef,
    ) -> Result<Option<Vote>, StoreError>;
    async fn was_processed(&self, event_id: Uuid) -> Result<bool, StoreError>;

    // Derived-state reads, used by the read models and the reap tests
    async fn notifications_for(&self, recipient_id: Uuid)
        -> Result<Vec<Notification>, StoreError>;
    async fn notifications_linking(&self, link: ContentRef)
        -> Result<Vec<Notification>, StoreError>;
    async fn mentions_of(&self, content: ContentRef) -> Result<Vec<Mention>, StoreError>;
    async fn votes_on(&self, target: ContentRef) -> Result<Vec<Vote>, StoreError>;

    // Writes
    /// Applies every op atomically, records `batch.event_id` as processed,
    /// and returns without partial effects on failure.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Recipient-side mutation; marking an already-read row again is a no-op.
    async fn mark_read(&self, notification_id: Uuid) -> Result<(), StoreError>;
    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<(), StoreError>;
}
