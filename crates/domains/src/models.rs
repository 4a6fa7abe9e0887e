//! # Domain Models
//!
//! Core entities of the answerboard consistency engine.
//! We use UUID v7 for time-ordered, globally unique identification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse reputation bracket, derived from `reputation_points`.
///
/// Stored denormalized on [`User`] but only ever written together with a
/// reputation recompute, so the stored value always matches the bracket
/// implied by the current points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BadgeTier {
    Newbie,
    Expert,
    Master,
    Legend,
}

impl BadgeTier {
    /// The tier implied by a reputation total. Total over all of `i64`;
    /// negative totals stay in the lowest bracket.
    pub fn for_points(points: i64) -> Self {
        match points {
            i64::MIN..=249 => BadgeTier::Newbie,
            250..=999 => BadgeTier::Expert,
            1000..=4999 => BadgeTier::Master,
            _ => BadgeTier::Legend,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BadgeTier::Newbie => "Newbie",
            BadgeTier::Expert => "Expert",
            BadgeTier::Master => "Master",
            BadgeTier::Legend => "Legend",
        }
    }
}

impl std::fmt::Display for BadgeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered forum member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Running total, explained entirely by recorded domain events.
    pub reputation_points: i64,
    pub badge_tier: BadgeTier,
    pub is_banned: bool,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// A fresh account with zero reputation.
    pub fn new(id: Uuid, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            reputation_points: 0,
            badge_tier: BadgeTier::Newbie,
            is_banned: false,
            is_verified: false,
            created_at: Utc::now(),
        }
    }
}

/// Discriminant of the polymorphic content union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Question,
    Answer,
    Comment,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Question => "question",
            ContentKind::Answer => "answer",
            ContentKind::Comment => "comment",
        }
    }
}

/// Tagged address of a content item: `{Question, Answer, Comment} × id`.
///
/// This is a weak reference: valid for lookup only, carrying no
/// lifetime guarantee over the row it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub kind: ContentKind,
    pub id: Uuid,
}

impl ContentRef {
    pub fn question(id: Uuid) -> Self {
        Self { kind: ContentKind::Question, id }
    }

    pub fn answer(id: Uuid) -> Self {
        Self { kind: ContentKind::Answer, id }
    }

    pub fn comment(id: Uuid) -> Self {
        Self { kind: ContentKind::Comment, id }
    }
}

impl std::fmt::Display for ContentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind.as_str(), self.id)
    }
}

/// A user-authored item: question, answer, or comment.
///
/// Answers carry `is_accepted`; questions carry `accepted_answer_id`. The
/// two are written together so a question never points at an answer that
/// does not consider itself accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub id: Uuid,
    pub kind: ContentKind,
    pub author_id: Uuid,
    /// The question for an answer, the commented content for a comment,
    /// `None` for a question.
    pub parent: Option<ContentRef>,
    pub body: String,
    pub upvotes: i64,
    pub downvotes: i64,
    /// Answers only.
    pub is_accepted: bool,
    /// Questions only: at most one accepted answer.
    pub accepted_answer_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Content {
    pub fn target(&self) -> ContentRef {
        ContentRef { kind: self.kind, id: self.id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteType {
    Upvote,
    Downvote,
}

/// One user's vote on one content item. Unique per (voter, target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub voter_id: Uuid,
    pub target: ContentRef,
    pub vote_type: VoteType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Answer,
    Comment,
    Vote,
    Mention,
    System,
    AcceptedAnswer,
}

/// An inbox entry for exactly one recipient.
///
/// Created by the notification generator, mutated only by the recipient
/// (mark read) or removed by the orphan reaper when `link` stops resolving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Weak reference to the triggering content.
    pub link: ContentRef,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// A parsed `@handle` reference from a content body to a user.
/// Deleted together with its owning content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mention {
    pub id: Uuid,
    pub content: ContentRef,
    pub mentioned_user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Per-user reputation read model exposed to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReputationSnapshot {
    pub points: i64,
    pub tier: BadgeTier,
}
