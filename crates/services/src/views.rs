//! # Read models
//!
//! The two surfaces collaborators consume: a user's notification inbox and
//! their reputation snapshot. Pure reads plus the recipient-side mark-read
//! mutations, which are idempotent.

use std::sync::Arc;

use uuid::Uuid;

use domains::error::{EngineError, Result};
use domains::models::{Notification, ReputationSnapshot};
use domains::ports::ConsistencyStore;

pub struct InboxView {
    store: Arc<dyn ConsistencyStore>,
}

impl InboxView {
    pub fn new(store: Arc<dyn ConsistencyStore>) -> Self {
        Self { store }
    }

    /// Notifications for one recipient, most recent first.
    pub async fn notifications(&self, recipient_id: Uuid) -> Result<Vec<Notification>> {
        Ok(self.store.notifications_for(recipient_id).await?)
    }

    pub async fn unread_count(&self, recipient_id: Uuid) -> Result<usize> {
        let notifications = self.store.notifications_for(recipient_id).await?;
        Ok(notifications.iter().filter(|n| !n.is_read).count())
    }

    /// Marking an already-read (or already-reaped) notification is a no-op.
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<()> {
        Ok(self.store.mark_read(notification_id).await?)
    }

    pub async fn mark_all_read(&self, recipient_id: Uuid) -> Result<()> {
        Ok(self.store.mark_all_read(recipient_id).await?)
    }
}

pub struct ReputationView {
    store: Arc<dyn ConsistencyStore>,
}

impl ReputationView {
    pub fn new(store: Arc<dyn ConsistencyStore>) -> Self {
        Self { store }
    }

    /// Current `{points, tier}` for a user.
    pub async fn snapshot(&self, user_id: Uuid) -> Result<ReputationSnapshot> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(EngineError::NotFound("user", user_id))?;
        Ok(ReputationSnapshot {
            points: user.reputation_points,
            tier: user.badge_tier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::models::{BadgeTier, ContentRef, NotificationKind, User};
    use domains::ports::MockConsistencyStore;

    fn notification(recipient_id: Uuid, is_read: bool) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            recipient_id,
            kind: NotificationKind::Vote,
            title: "New vote".into(),
            message: "Your question received an upvote.".into(),
            link: ContentRef::question(Uuid::now_v7()),
            is_read,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn unread_count_ignores_read_rows() {
        let recipient = Uuid::now_v7();
        let mut store = MockConsistencyStore::new();
        store.expect_notifications_for().returning(move |id| {
            Ok(vec![notification(id, false), notification(id, true), notification(id, false)])
        });

        let inbox = InboxView::new(Arc::new(store));
        assert_eq!(inbox.unread_count(recipient).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn snapshot_reports_points_and_tier_together() {
        let mut store = MockConsistencyStore::new();
        store.expect_get_user().returning(|id| {
            let mut user = User::new(id, "grace");
            user.reputation_points = 1200;
            user.badge_tier = BadgeTier::for_points(user.reputation_points);
            Ok(Some(user))
        });

        let view = ReputationView::new(Arc::new(store));
        let snapshot = view.snapshot(Uuid::now_v7()).await.unwrap();
        assert_eq!(snapshot.points, 1200);
        assert_eq!(snapshot.tier, BadgeTier::Master);
    }

    #[tokio::test]
    async fn snapshot_of_unknown_user_is_not_found() {
        let mut store = MockConsistencyStore::new();
        store.expect_get_user().returning(|_| Ok(None));

        let view = ReputationView::new(Arc::new(store));
        let err = view.snapshot(Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound("user", _)));
    }
}
