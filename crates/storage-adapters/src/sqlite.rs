//! # SqliteStore
//!
//! Relational implementation of `ConsistencyStore` over sqlx. Maps the
//! SQLite schema back onto the domain models; every write batch runs in a
//! single transaction, so the originating write and all derived state land
//! together or not at all.

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use domains::error::StoreError;
use domains::models::{
    BadgeTier, Content, ContentKind, ContentRef, Mention, Notification, NotificationKind, User,
    Vote, VoteType,
};
use domains::ports::{ConsistencyStore, WriteBatch, WriteOp};

pub struct SqliteStore {
    pool: SqlitePool,
}

// Helpers for UUID conversion
fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Uuid {
    Uuid::from_slice(blob).unwrap_or_default()
}

fn opt_blob_to_uuid(blob: Option<Vec<u8>>) -> Option<Uuid> {
    blob.map(|b| blob_to_uuid(&b))
}

fn parse_kind(s: &str) -> Result<ContentKind, StoreError> {
    match s {
        "question" => Ok(ContentKind::Question),
        "answer" => Ok(ContentKind::Answer),
        "comment" => Ok(ContentKind::Comment),
        other => Err(StoreError::Backend(format!("unknown content kind {other:?}"))),
    }
}

fn parse_vote_type(s: &str) -> Result<VoteType, StoreError> {
    match s {
        "upvote" => Ok(VoteType::Upvote),
        "downvote" => Ok(VoteType::Downvote),
        other => Err(StoreError::Backend(format!("unknown vote type {other:?}"))),
    }
}

fn vote_type_str(vote: VoteType) -> &'static str {
    match vote {
        VoteType::Upvote => "upvote",
        VoteType::Downvote => "downvote",
    }
}

fn parse_tier(s: &str) -> Result<BadgeTier, StoreError> {
    match s {
        "Newbie" => Ok(BadgeTier::Newbie),
        "Expert" => Ok(BadgeTier::Expert),
        "Master" => Ok(BadgeTier::Master),
        "Legend" => Ok(BadgeTier::Legend),
        other => Err(StoreError::Backend(format!("unknown badge tier {other:?}"))),
    }
}

fn parse_notification_kind(s: &str) -> Result<NotificationKind, StoreError> {
    match s {
        "answer" => Ok(NotificationKind::Answer),
        "comment" => Ok(NotificationKind::Comment),
        "vote" => Ok(NotificationKind::Vote),
        "mention" => Ok(NotificationKind::Mention),
        "system" => Ok(NotificationKind::System),
        "accepted_answer" => Ok(NotificationKind::AcceptedAnswer),
        other => Err(StoreError::Backend(format!("unknown notification kind {other:?}"))),
    }
}

fn notification_kind_str(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Answer => "answer",
        NotificationKind::Comment => "comment",
        NotificationKind::Vote => "vote",
        NotificationKind::Mention => "mention",
        NotificationKind::System => "system",
        NotificationKind::AcceptedAnswer => "accepted_answer",
    }
}

/// SQLite reports lock contention as a database error message rather than a
/// dedicated code through sqlx, so classify by message.
fn map_sqlx_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StoreError::Conflict(db.message().to_string());
        }
        let message = db.message();
        if message.contains("locked") || message.contains("busy") {
            return StoreError::Busy(message.to_string());
        }
    }
    StoreError::Backend(err.to_string())
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        reputation_points INTEGER NOT NULL DEFAULT 0,
        badge_tier TEXT NOT NULL DEFAULT 'Newbie',
        is_banned INTEGER NOT NULL DEFAULT 0,
        is_verified INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS content (
        id BLOB PRIMARY KEY,
        kind TEXT NOT NULL,
        author_id BLOB NOT NULL,
        parent_kind TEXT,
        parent_id BLOB,
        body TEXT NOT NULL,
        upvotes INTEGER NOT NULL DEFAULT 0,
        downvotes INTEGER NOT NULL DEFAULT 0,
        is_accepted INTEGER NOT NULL DEFAULT 0,
        accepted_answer_id BLOB,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS votes (
        id BLOB PRIMARY KEY,
        voter_id BLOB NOT NULL,
        target_kind TEXT NOT NULL,
        target_id BLOB NOT NULL,
        vote_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (voter_id, target_kind, target_id)
    )",
    "CREATE TABLE IF NOT EXISTS notifications (
        id BLOB PRIMARY KEY,
        recipient_id BLOB NOT NULL,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        message TEXT NOT NULL,
        link_kind TEXT NOT NULL,
        link_id BLOB NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS mentions (
        id BLOB PRIMARY KEY,
        content_kind TEXT NOT NULL,
        content_id BLOB NOT NULL,
        mentioned_user_id BLOB NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE (content_kind, content_id, mentioned_user_id)
    )",
    "CREATE TABLE IF NOT EXISTS processed_events (
        event_id BLOB PRIMARY KEY,
        processed_at TEXT NOT NULL
    )",
];

impl SqliteStore {
    /// Connects and installs the schema. `sqlite::memory:` works for tests.
    ///
    /// A single pooled connection: SQLite serializes writers anyway, and it
    /// keeps in-memory databases coherent across calls.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(map_sqlx_err)?;
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await.map_err(map_sqlx_err)?;
        }
        tracing::debug!(url = %url, "sqlite store connected, schema installed");
        Ok(Self { pool })
    }

    fn row_to_user(row: &SqliteRow) -> Result<User, StoreError> {
        Ok(User {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            username: row.get("username"),
            reputation_points: row.get("reputation_points"),
            badge_tier: parse_tier(&row.get::<String, _>("badge_tier"))?,
            is_banned: row.get("is_banned"),
            is_verified: row.get("is_verified"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_content(row: &SqliteRow) -> Result<Content, StoreError> {
        let parent = match (
            row.get::<Option<String>, _>("parent_kind"),
            opt_blob_to_uuid(row.get::<Option<Vec<u8>>, _>("parent_id")),
        ) {
            (Some(kind), Some(id)) => Some(ContentRef { kind: parse_kind(&kind)?, id }),
            _ => None,
        };
        Ok(Content {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            kind: parse_kind(&row.get::<String, _>("kind"))?,
            author_id: blob_to_uuid(row.get::<Vec<u8>, _>("author_id").as_slice()),
            parent,
            body: row.get("body"),
            upvotes: row.get("upvotes"),
            downvotes: row.get("downvotes"),
            is_accepted: row.get("is_accepted"),
            accepted_answer_id: opt_blob_to_uuid(row.get::<Option<Vec<u8>>, _>("accepted_answer_id")),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_vote(row: &SqliteRow) -> Result<Vote, StoreError> {
        Ok(Vote {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            voter_id: blob_to_uuid(row.get::<Vec<u8>, _>("voter_id").as_slice()),
            target: ContentRef {
                kind: parse_kind(&row.get::<String, _>("target_kind"))?,
                id: blob_to_uuid(row.get::<Vec<u8>, _>("target_id").as_slice()),
            },
            vote_type: parse_vote_type(&row.get::<String, _>("vote_type"))?,
            created_at: row.get("created_at"),
        })
    }

    fn row_to_notification(row: &SqliteRow) -> Result<Notification, StoreError> {
        Ok(Notification {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            recipient_id: blob_to_uuid(row.get::<Vec<u8>, _>("recipient_id").as_slice()),
            kind: parse_notification_kind(&row.get::<String, _>("kind"))?,
            title: row.get("title"),
            message: row.get("message"),
            link: ContentRef {
                kind: parse_kind(&row.get::<String, _>("link_kind"))?,
                id: blob_to_uuid(row.get::<Vec<u8>, _>("link_id").as_slice()),
            },
            is_read: row.get("is_read"),
            created_at: row.get("created_at"),
        })
    }

    fn row_to_mention(row: &SqliteRow) -> Result<Mention, StoreError> {
        Ok(Mention {
            id: blob_to_uuid(row.get::<Vec<u8>, _>("id").as_slice()),
            content: ContentRef {
                kind: parse_kind(&row.get::<String, _>("content_kind"))?,
                id: blob_to_uuid(row.get::<Vec<u8>, _>("content_id").as_slice()),
            },
            mentioned_user_id: blob_to_uuid(
                row.get::<Vec<u8>, _>("mentioned_user_id").as_slice(),
            ),
            created_at: row.get("created_at"),
        })
    }

    async fn apply_op(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        op: WriteOp,
    ) -> Result<(), StoreError> {
        match op {
            WriteOp::InsertUser(user) => {
                sqlx::query(
                    "INSERT INTO users (id, username, reputation_points, badge_tier, is_banned, is_verified, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid_to_blob(user.id))
                .bind(user.username)
                .bind(user.reputation_points)
                .bind(user.badge_tier.as_str())
                .bind(user.is_banned)
                .bind(user.is_verified)
                .bind(user.created_at)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::InsertContent(content) => {
                sqlx::query(
                    "INSERT INTO content (id, kind, author_id, parent_kind, parent_id, body, upvotes, downvotes, is_accepted, accepted_answer_id, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid_to_blob(content.id))
                .bind(content.kind.as_str())
                .bind(uuid_to_blob(content.author_id))
                .bind(content.parent.map(|p| p.kind.as_str()))
                .bind(content.parent.map(|p| uuid_to_blob(p.id)))
                .bind(content.body)
                .bind(content.upvotes)
                .bind(content.downvotes)
                .bind(content.is_accepted)
                .bind(content.accepted_answer_id.map(uuid_to_blob))
                .bind(content.created_at)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::DeleteContent(target) => {
                sqlx::query("DELETE FROM content WHERE id = ? AND kind = ?")
                    .bind(uuid_to_blob(target.id))
                    .bind(target.kind.as_str())
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            WriteOp::InsertVote(vote) => {
                sqlx::query(
                    "INSERT INTO votes (id, voter_id, target_kind, target_id, vote_type, created_at)
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid_to_blob(vote.id))
                .bind(uuid_to_blob(vote.voter_id))
                .bind(vote.target.kind.as_str())
                .bind(uuid_to_blob(vote.target.id))
                .bind(vote_type_str(vote.vote_type))
                .bind(vote.created_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| match map_sqlx_err(e) {
                    StoreError::Conflict(_) => StoreError::Conflict("already voted".into()),
                    other => other,
                })?;
                // Counter update is an in-place increment, never read-modify-write.
                let column = match vote.vote_type {
                    VoteType::Upvote => "upvotes",
                    VoteType::Downvote => "downvotes",
                };
                let updated = sqlx::query(&format!(
                    "UPDATE content SET {column} = {column} + 1 WHERE id = ?"
                ))
                .bind(uuid_to_blob(vote.target.id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound("content", vote.target.id));
                }
            }
            WriteOp::UpdateVote { voter_id, target, vote } => {
                let row = sqlx::query(
                    "SELECT vote_type FROM votes WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
                )
                .bind(uuid_to_blob(voter_id))
                .bind(target.kind.as_str())
                .bind(uuid_to_blob(target.id))
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(StoreError::NotFound("vote", target.id))?;
                let previous = parse_vote_type(&row.get::<String, _>("vote_type"))?;
                if previous == vote {
                    return Ok(());
                }
                sqlx::query(
                    "UPDATE votes SET vote_type = ? WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
                )
                .bind(vote_type_str(vote))
                .bind(uuid_to_blob(voter_id))
                .bind(target.kind.as_str())
                .bind(uuid_to_blob(target.id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                let (up, down) = match vote {
                    VoteType::Upvote => (1i64, -1i64),
                    VoteType::Downvote => (-1i64, 1i64),
                };
                sqlx::query(
                    "UPDATE content SET upvotes = upvotes + ?, downvotes = downvotes + ? WHERE id = ?",
                )
                .bind(up)
                .bind(down)
                .bind(uuid_to_blob(target.id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::DeleteVote { voter_id, target } => {
                let row = sqlx::query(
                    "SELECT vote_type FROM votes WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
                )
                .bind(uuid_to_blob(voter_id))
                .bind(target.kind.as_str())
                .bind(uuid_to_blob(target.id))
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                let Some(row) = row else {
                    return Ok(());
                };
                let removed = parse_vote_type(&row.get::<String, _>("vote_type"))?;
                sqlx::query(
                    "DELETE FROM votes WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
                )
                .bind(uuid_to_blob(voter_id))
                .bind(target.kind.as_str())
                .bind(uuid_to_blob(target.id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                let column = match removed {
                    VoteType::Upvote => "upvotes",
                    VoteType::Downvote => "downvotes",
                };
                sqlx::query(&format!(
                    "UPDATE content SET {column} = {column} - 1 WHERE id = ?"
                ))
                .bind(uuid_to_blob(target.id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::DeleteVotesOn(target) => {
                sqlx::query("DELETE FROM votes WHERE target_kind = ? AND target_id = ?")
                    .bind(target.kind.as_str())
                    .bind(uuid_to_blob(target.id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
                sqlx::query("UPDATE content SET upvotes = 0, downvotes = 0 WHERE id = ?")
                    .bind(uuid_to_blob(target.id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            WriteOp::AdjustReputation { user_id, delta } => {
                let updated = sqlx::query(
                    "UPDATE users SET reputation_points = reputation_points + ? WHERE id = ?",
                )
                .bind(delta)
                .bind(uuid_to_blob(user_id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound("user", user_id));
                }
                // Tier rides in the same transaction as the point change.
                let row = sqlx::query("SELECT reputation_points FROM users WHERE id = ?")
                    .bind(uuid_to_blob(user_id))
                    .fetch_one(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
                let points: i64 = row.get("reputation_points");
                sqlx::query("UPDATE users SET badge_tier = ? WHERE id = ?")
                    .bind(BadgeTier::for_points(points).as_str())
                    .bind(uuid_to_blob(user_id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            WriteOp::SetAcceptedAnswer { question_id, answer_id } => {
                sqlx::query(
                    "UPDATE content SET is_accepted = 0
                     WHERE id = (SELECT accepted_answer_id FROM content WHERE id = ?)",
                )
                .bind(uuid_to_blob(question_id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                let updated = sqlx::query(
                    "UPDATE content SET accepted_answer_id = ? WHERE id = ? AND kind = 'question'",
                )
                .bind(uuid_to_blob(answer_id))
                .bind(uuid_to_blob(question_id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound("question", question_id));
                }
                let updated = sqlx::query(
                    "UPDATE content SET is_accepted = 1 WHERE id = ? AND kind = 'answer'",
                )
                .bind(uuid_to_blob(answer_id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                if updated.rows_affected() == 0 {
                    return Err(StoreError::NotFound("answer", answer_id));
                }
            }
            WriteOp::ClearAcceptedAnswer { question_id } => {
                sqlx::query(
                    "UPDATE content SET is_accepted = 0
                     WHERE id = (SELECT accepted_answer_id FROM content WHERE id = ?)",
                )
                .bind(uuid_to_blob(question_id))
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
                sqlx::query("UPDATE content SET accepted_answer_id = NULL WHERE id = ?")
                    .bind(uuid_to_blob(question_id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            WriteOp::InsertNotification(n) => {
                sqlx::query(
                    "INSERT INTO notifications (id, recipient_id, kind, title, message, link_kind, link_id, is_read, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid_to_blob(n.id))
                .bind(uuid_to_blob(n.recipient_id))
                .bind(notification_kind_str(n.kind))
                .bind(n.title)
                .bind(n.message)
                .bind(n.link.kind.as_str())
                .bind(uuid_to_blob(n.link.id))
                .bind(n.is_read)
                .bind(n.created_at)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::DeleteNotificationsLinking(link) => {
                sqlx::query("DELETE FROM notifications WHERE link_kind = ? AND link_id = ?")
                    .bind(link.kind.as_str())
                    .bind(uuid_to_blob(link.id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
            WriteOp::InsertMention(mention) => {
                // The unique constraint enforces the per-content dedup policy.
                sqlx::query(
                    "INSERT OR IGNORE INTO mentions (id, content_kind, content_id, mentioned_user_id, created_at)
                     VALUES (?, ?, ?, ?, ?)",
                )
                .bind(uuid_to_blob(mention.id))
                .bind(mention.content.kind.as_str())
                .bind(uuid_to_blob(mention.content.id))
                .bind(uuid_to_blob(mention.mentioned_user_id))
                .bind(mention.created_at)
                .execute(&mut **tx)
                .await
                .map_err(map_sqlx_err)?;
            }
            WriteOp::DeleteMentionsOwnedBy(target) => {
                sqlx::query("DELETE FROM mentions WHERE content_kind = ? AND content_id = ?")
                    .bind(target.kind.as_str())
                    .bind(uuid_to_blob(target.id))
                    .execute(&mut **tx)
                    .await
                    .map_err(map_sqlx_err)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConsistencyStore for SqliteStore {
    async fn get_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(uuid_to_blob(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    async fn get_user_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| Self::row_to_user(&r)).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY username ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_user).collect()
    }

    async fn resolve(&self, target: ContentRef) -> Result<Option<Content>, StoreError> {
        let row = sqlx::query("SELECT * FROM content WHERE id = ? AND kind = ?")
            .bind(uuid_to_blob(target.id))
            .bind(target.kind.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        row.map(|r| Self::row_to_content(&r)).transpose()
    }

    async fn children_of(&self, parent: ContentRef) -> Result<Vec<Content>, StoreError> {
        let rows = sqlx::query("SELECT * FROM content WHERE parent_kind = ? AND parent_id = ?")
            .bind(parent.kind.as_str())
            .bind(uuid_to_blob(parent.id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_content).collect()
    }

    async fn find_vote(
        &self,
        voter_id: Uuid,
        target: ContentRef,
    ) -> Result<Option<Vote>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM votes WHERE voter_id = ? AND target_kind = ? AND target_id = ?",
        )
        .bind(uuid_to_blob(voter_id))
        .bind(target.kind.as_str())
        .bind(uuid_to_blob(target.id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        row.map(|r| Self::row_to_vote(&r)).transpose()
    }

    async fn was_processed(&self, event_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT event_id FROM processed_events WHERE event_id = ?")
            .bind(uuid_to_blob(event_id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(row.is_some())
    }

    async fn notifications_for(
        &self,
        recipient_id: Uuid,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE recipient_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(uuid_to_blob(recipient_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_notification).collect()
    }

    async fn notifications_linking(
        &self,
        link: ContentRef,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = sqlx::query("SELECT * FROM notifications WHERE link_kind = ? AND link_id = ?")
            .bind(link.kind.as_str())
            .bind(uuid_to_blob(link.id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_notification).collect()
    }

    async fn mentions_of(&self, content: ContentRef) -> Result<Vec<Mention>, StoreError> {
        let rows = sqlx::query("SELECT * FROM mentions WHERE content_kind = ? AND content_id = ?")
            .bind(content.kind.as_str())
            .bind(uuid_to_blob(content.id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_mention).collect()
    }

    async fn votes_on(&self, target: ContentRef) -> Result<Vec<Vote>, StoreError> {
        let rows = sqlx::query("SELECT * FROM votes WHERE target_kind = ? AND target_id = ?")
            .bind(target.kind.as_str())
            .bind(uuid_to_blob(target.id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        rows.iter().map(Self::row_to_vote).collect()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let replayed = sqlx::query("SELECT event_id FROM processed_events WHERE event_id = ?")
            .bind(uuid_to_blob(batch.event_id))
            .fetch_optional(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        if replayed.is_some() {
            return Ok(());
        }

        for op in batch.ops {
            Self::apply_op(&mut tx, op).await?;
        }

        sqlx::query("INSERT INTO processed_events (event_id, processed_at) VALUES (?, ?)")
            .bind(uuid_to_blob(batch.event_id))
            .bind(chrono::Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)
    }

    async fn mark_read(&self, notification_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE id = ?")
            .bind(uuid_to_blob(notification_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn mark_all_read(&self, recipient_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE notifications SET is_read = 1 WHERE recipient_id = ?")
            .bind(uuid_to_blob(recipient_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(name: &str) -> User {
        User::new(Uuid::now_v7(), name)
    }

    fn question(author_id: Uuid) -> Content {
        Content {
            id: Uuid::now_v7(),
            kind: ContentKind::Question,
            author_id,
            parent: None,
            body: "why does this move?".into(),
            upvotes: 0,
            downvotes: 0,
            is_accepted: false,
            accepted_answer_id: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commit_round_trips_users_and_content() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let ada = user("ada");
        let ada_id = ada.id;
        let q = question(ada_id);
        let target = q.target();

        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::InsertUser(ada));
        batch.push(WriteOp::InsertContent(q));
        batch.push(WriteOp::AdjustReputation { user_id: ada_id, delta: 7 });
        store.commit(batch).await.unwrap();

        let stored = store.get_user(ada_id).await.unwrap().unwrap();
        assert_eq!(stored.reputation_points, 7);
        assert_eq!(stored.badge_tier, BadgeTier::Newbie);

        let resolved = store.resolve(target).await.unwrap().unwrap();
        assert_eq!(resolved.author_id, ada_id);
        // Wrong kind must not resolve.
        let miss = ContentRef::answer(target.id);
        assert!(store.resolve(miss).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failing_op_rolls_back_the_whole_batch() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let ada = user("ada");
        let ada_id = ada.id;

        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::InsertUser(ada));
        batch.push(WriteOp::AdjustReputation { user_id: Uuid::now_v7(), delta: 7 });
        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound("user", _)));

        assert!(store.get_user(ada_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_vote_hits_the_unique_constraint() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let ada = user("ada");
        let q = question(ada.id);
        let target = q.target();
        let voter = Uuid::now_v7();

        let mut setup = WriteBatch::new(Uuid::now_v7());
        setup.push(WriteOp::InsertUser(ada));
        setup.push(WriteOp::InsertContent(q));
        setup.push(WriteOp::InsertVote(Vote {
            id: Uuid::now_v7(),
            voter_id: voter,
            target,
            vote_type: VoteType::Upvote,
            created_at: Utc::now(),
        }));
        store.commit(setup).await.unwrap();

        let mut dup = WriteBatch::new(Uuid::now_v7());
        dup.push(WriteOp::InsertVote(Vote {
            id: Uuid::now_v7(),
            voter_id: voter,
            target,
            vote_type: VoteType::Downvote,
            created_at: Utc::now(),
        }));
        let err = store.commit(dup).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(msg) if msg == "already voted"));

        let resolved = store.resolve(target).await.unwrap().unwrap();
        assert_eq!((resolved.upvotes, resolved.downvotes), (1, 0));
    }

    #[tokio::test]
    async fn mention_insert_is_deduplicated_by_constraint() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let ada = user("ada");
        let q = question(ada.id);
        let target = q.target();
        let mentioned = Uuid::now_v7();

        let mut setup = WriteBatch::new(Uuid::now_v7());
        setup.push(WriteOp::InsertUser(ada));
        setup.push(WriteOp::InsertContent(q));
        store.commit(setup).await.unwrap();

        for _ in 0..2 {
            let mut batch = WriteBatch::new(Uuid::now_v7());
            batch.push(WriteOp::InsertMention(Mention {
                id: Uuid::now_v7(),
                content: target,
                mentioned_user_id: mentioned,
                created_at: Utc::now(),
            }));
            store.commit(batch).await.unwrap();
        }

        assert_eq!(store.mentions_of(target).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replayed_event_id_commits_as_a_no_op() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let ada = user("ada");
        let ada_id = ada.id;
        let event_id = Uuid::now_v7();

        let mut batch = WriteBatch::new(event_id);
        batch.push(WriteOp::InsertUser(ada));
        batch.push(WriteOp::AdjustReputation { user_id: ada_id, delta: 7 });
        store.commit(batch).await.unwrap();
        assert!(store.was_processed(event_id).await.unwrap());

        let mut replay = WriteBatch::new(event_id);
        replay.push(WriteOp::AdjustReputation { user_id: ada_id, delta: 7 });
        store.commit(replay).await.unwrap();

        let stored = store.get_user(ada_id).await.unwrap().unwrap();
        assert_eq!(stored.reputation_points, 7);
    }
}
