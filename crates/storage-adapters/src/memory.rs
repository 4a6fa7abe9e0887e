//! # MemoryStore
//!
//! In-process implementation of `ConsistencyStore`, used by tests, the
//! seed tool, and the event drain when no database is configured. A commit
//! applies the whole batch against a copy of the state and swaps it in
//! under the lock, so a failing op leaves nothing behind.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use domains::error::StoreError;
use domains::models::{
    BadgeTier, Content, ContentRef, Mention, Notification, User, Vote, VoteType,
};
use domains::ports::{ConsistencyStore, WriteBatch, WriteOp};

#[derive(Default, Clone)]
struct State {
    users: HashMap<Uuid, User>,
    content: HashMap<Uuid, Content>,
    votes: HashMap<(Uuid, ContentRef), Vote>,
    notifications: Vec<Notification>,
    mentions: Vec<Mention>,
    processed: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("state lock poisoned".into()))
    }

    fn bump(content: &mut Content, vote: VoteType, by: i64) {
        match vote {
            VoteType::Upvote => content.upvotes += by,
            VoteType::Downvote => content.downvotes += by,
        }
    }

    fn apply(state: &mut State, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::InsertUser(user) => {
                if state.users.contains_key(&user.id) {
                    return Err(StoreError::Conflict(format!("user {} already exists", user.id)));
                }
                if state.users.values().any(|u| u.username == user.username) {
                    return Err(StoreError::Conflict(format!(
                        "username {} already taken",
                        user.username
                    )));
                }
                state.users.insert(user.id, user);
            }
            WriteOp::InsertContent(content) => {
                if state.content.contains_key(&content.id) {
                    return Err(StoreError::Conflict(format!(
                        "content {} already exists",
                        content.id
                    )));
                }
                state.content.insert(content.id, content);
            }
            WriteOp::DeleteContent(target) => {
                if state.content.get(&target.id).is_some_and(|c| c.kind == target.kind) {
                    state.content.remove(&target.id);
                }
            }
            WriteOp::InsertVote(vote) => {
                let key = (vote.voter_id, vote.target);
                if state.votes.contains_key(&key) {
                    return Err(StoreError::Conflict("already voted".into()));
                }
                let content = state
                    .content
                    .get_mut(&vote.target.id)
                    .ok_or(StoreError::NotFound("content", vote.target.id))?;
                Self::bump(content, vote.vote_type, 1);
                state.votes.insert(key, vote);
            }
            WriteOp::UpdateVote { voter_id, target, vote } => {
                let stored = state
                    .votes
                    .get_mut(&(voter_id, target))
                    .ok_or(StoreError::NotFound("vote", target.id))?;
                let previous = stored.vote_type;
                stored.vote_type = vote;
                if previous != vote {
                    if let Some(content) = state.content.get_mut(&target.id) {
                        Self::bump(content, previous, -1);
                        Self::bump(content, vote, 1);
                    }
                }
            }
            WriteOp::DeleteVote { voter_id, target } => {
                if let Some(removed) = state.votes.remove(&(voter_id, target)) {
                    if let Some(content) = state.content.get_mut(&target.id) {
                        Self::bump(content, removed.vote_type, -1);
                    }
                }
            }
            WriteOp::DeleteVotesOn(target) => {
                state.votes.retain(|_, v| v.target != target);
                if let Some(content) = state.content.get_mut(&target.id) {
                    content.upvotes = 0;
                    content.downvotes = 0;
                }
            }
            WriteOp::AdjustReputation { user_id, delta } => {
                let user = state
                    .users
                    .get_mut(&user_id)
                    .ok_or(StoreError::NotFound("user", user_id))?;
                user.reputation_points += delta;
                user.badge_tier = BadgeTier::for_points(user.reputation_points);
            }
            WriteOp::SetAcceptedAnswer { question_id, answer_id } => {
                let question = state
                    .content
                    .get_mut(&question_id)
                    .ok_or(StoreError::NotFound("question", question_id))?;
                let previous = question.accepted_answer_id.replace(answer_id);
                if let Some(previous_id) = previous.filter(|id| *id != answer_id) {
                    if let Some(old) = state.content.get_mut(&previous_id) {
                        old.is_accepted = false;
                    }
                }
                let answer = state
                    .content
                    .get_mut(&answer_id)
                    .ok_or(StoreError::NotFound("answer", answer_id))?;
                answer.is_accepted = true;
            }
            WriteOp::ClearAcceptedAnswer { question_id } => {
                let accepted = state
                    .content
                    .get_mut(&question_id)
                    .and_then(|q| q.accepted_answer_id.take());
                if let Some(answer_id) = accepted {
                    if let Some(answer) = state.content.get_mut(&answer_id) {
                        answer.is_accepted = false;
                    }
                }
            }
            WriteOp::InsertNotification(notification) => {
                state.notifications.push(notification);
            }
            WriteOp::DeleteNotificationsLinking(link) => {
                state.notifications.retain(|n| n.link != link);
            }
            WriteOp::InsertMention(mention) => {
                let exists = state.mentions.iter().any(|m| {
                    m.content == mention.content
                        && m.mentioned_user_id == mention.mentioned_user_id
                });
                if !exists {
                    state.mentions.push(mention);
                }
            }
            WriteOp::DeleteMentionsOwnedBy(target) => {
                state.mentions.retain(|m| m.content != target);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConsistencyStore for MemoryStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.state()?.users.get(&id).cloned())
    }

    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.state()?.users.values().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.state()?.users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn resolve(&self, target: ContentRef) -> Result<Option<Content>, StoreError> {
        Ok(self
            .state()?
            .content
            .get(&target.id)
            .filter(|c| c.kind == target.kind)
            .cloned())
    }

    async fn children_of(&self, parent: ContentRef) -> Result<Vec<Content>, StoreError> {
        Ok(self
            .state()?
            .content
            .values()
            .filter(|c| c.parent == Some(parent))
            .cloned()
            .collect())
    }

    async fn find_vote(
        &self,
        voter_id: Uuid,
        target: ContentRef,
    ) -> Result<Option<Vote>, StoreError> {
        Ok(self.state()?.votes.get(&(voter_id, target)).cloned())
    }

    async fn was_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.state()?.processed.contains(&event_id))
    }

    async fn notifications_for(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<Notification>, StoreError> {
        let mut rows: Vec<Notification> = self
            .state()?
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(rows)
    }

    async fn notifications_linking(
        &self,
        link: ContentRef,
    ) -> Result<Vec<Notification>, StoreError> {
        Ok(self
            .state()?
            .notifications
            .iter()
            .filter(|n| n.link == link)
            .cloned()
            .collect())
    }

    async fn mentions_of(&self, content: ContentRef) -> Result<Vec<Mention>, StoreError> {
        Ok(self
            .state()?
            .mentions
            .iter()
            .filter(|m| m.content == content)
            .cloned()
            .collect())
    }

    async fn votes_on(&self, target: ContentRef) -> Result<Vec<Vote>, StoreError> {
        Ok(self
            .state()?
            .votes
            .values()
            .filter(|v| v.target == target)
            .cloned()
            .collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if state.processed.contains(&batch.event_id) {
            return Ok(());
        }
        // Copy-apply-swap keeps a failing op from leaving partial effects.
        let mut next = state.clone();
        for op in batch.ops {
            Self::apply(&mut next, op)?;
        }
        next.processed.insert(batch.event_id);
        *state = next;
        Ok(())
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == notification_id) {
            n.is_read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.state()?;
        for n in state.notifications.iter_mut().filter(|n| n.recipient_id == recipient_id) {
            n.is_read = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::models::ContentKind;

    fn user(name: &str) -> User {
        User::new(Uuid::now_v7(), name)
    }

    fn question(author_id: Uuid) -> Content {
        Content {
            id: Uuid::now_v7(),
            kind: ContentKind::Question,
            author_id,
            parent: None,
            body: "what is a lifetime?".into(),
            upvotes: 0,
            downvotes: 0,
            is_accepted: false,
            accepted_answer_id: None,
            created_at: Utc::now(),
        }
    }

    fn vote(voter_id: Uuid, target: ContentRef, vote_type: VoteType) -> Vote {
        Vote { id: Uuid::now_v7(), voter_id, target, vote_type, created_at: Utc::now() }
    }

    #[tokio::test]
    async fn commit_applies_all_ops_or_none() {
        let store = MemoryStore::new();
        let ada = user("ada");
        let ada_id = ada.id;

        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::InsertUser(ada));
        // References a user that does not exist, so the batch must fail.
        batch.push(WriteOp::AdjustReputation { user_id: Uuid::now_v7(), delta: 7 });

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound("user", _)));
        // The first op must not have leaked through.
        assert!(store.get_user(ada_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replayed_batch_is_a_no_op() {
        let store = MemoryStore::new();
        let ada = user("ada");
        let ada_id = ada.id;
        let event_id = Uuid::now_v7();

        let mut batch = WriteBatch::new(event_id);
        batch.push(WriteOp::InsertUser(ada));
        batch.push(WriteOp::AdjustReputation { user_id: ada_id, delta: 7 });
        store.commit(batch).await.unwrap();

        // Same event id again: dropped, including the would-conflict insert.
        let mut replay = WriteBatch::new(event_id);
        replay.push(WriteOp::AdjustReputation { user_id: ada_id, delta: 7 });
        store.commit(replay).await.unwrap();

        let stored = store.get_user(ada_id).await.unwrap().unwrap();
        assert_eq!(stored.reputation_points, 7);
    }

    #[tokio::test]
    async fn vote_lifecycle_keeps_counters_consistent() {
        let store = MemoryStore::new();
        let author = user("ada");
        let q = question(author.id);
        let target = q.target();
        let voter = Uuid::now_v7();

        let mut setup = WriteBatch::new(Uuid::now_v7());
        setup.push(WriteOp::InsertUser(author));
        setup.push(WriteOp::InsertContent(q));
        store.commit(setup).await.unwrap();

        let mut cast = WriteBatch::new(Uuid::now_v7());
        cast.push(WriteOp::InsertVote(vote(voter, target, VoteType::Upvote)));
        store.commit(cast).await.unwrap();
        let resolved = store.resolve(target).await.unwrap().unwrap();
        assert_eq!((resolved.upvotes, resolved.downvotes), (1, 0));

        let mut flip = WriteBatch::new(Uuid::now_v7());
        flip.push(WriteOp::UpdateVote { voter_id: voter, target, vote: VoteType::Downvote });
        store.commit(flip).await.unwrap();
        let resolved = store.resolve(target).await.unwrap().unwrap();
        assert_eq!((resolved.upvotes, resolved.downvotes), (0, 1));

        let mut remove = WriteBatch::new(Uuid::now_v7());
        remove.push(WriteOp::DeleteVote { voter_id: voter, target });
        store.commit(remove).await.unwrap();
        let resolved = store.resolve(target).await.unwrap().unwrap();
        assert_eq!((resolved.upvotes, resolved.downvotes), (0, 0));
        assert!(store.find_vote(voter, target).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_vote_conflicts() {
        let store = MemoryStore::new();
        let author = user("ada");
        let q = question(author.id);
        let target = q.target();
        let voter = Uuid::now_v7();

        let mut setup = WriteBatch::new(Uuid::now_v7());
        setup.push(WriteOp::InsertUser(author));
        setup.push(WriteOp::InsertContent(q));
        setup.push(WriteOp::InsertVote(vote(voter, target, VoteType::Upvote)));
        store.commit(setup).await.unwrap();

        let mut dup = WriteBatch::new(Uuid::now_v7());
        dup.push(WriteOp::InsertVote(vote(voter, target, VoteType::Upvote)));
        let err = store.commit(dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn derived_deletes_are_idempotent() {
        let store = MemoryStore::new();
        let gone = ContentRef::answer(Uuid::now_v7());

        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::DeleteNotificationsLinking(gone));
        batch.push(WriteOp::DeleteMentionsOwnedBy(gone));
        batch.push(WriteOp::DeleteVotesOn(gone));
        batch.push(WriteOp::DeleteContent(gone));
        store.commit(batch).await.unwrap();
    }

    #[tokio::test]
    async fn mark_read_is_idempotent_and_scoped() {
        let store = MemoryStore::new();
        let recipient = Uuid::now_v7();
        let n = Notification {
            id: Uuid::now_v7(),
            recipient_id: recipient,
            kind: domains::models::NotificationKind::Answer,
            title: "New answer".into(),
            message: "Your question has a new answer.".into(),
            link: ContentRef::answer(Uuid::now_v7()),
            is_read: false,
            created_at: Utc::now(),
        };
        let n_id = n.id;

        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::InsertNotification(n));
        store.commit(batch).await.unwrap();

        store.mark_read(n_id).await.unwrap();
        store.mark_read(n_id).await.unwrap();
        // Unknown id: still a no-op.
        store.mark_read(Uuid::now_v7()).await.unwrap();

        let rows = store.notifications_for(recipient).await.unwrap();
        assert!(rows.iter().all(|n| n.is_read));
    }
}
