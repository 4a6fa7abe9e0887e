//! # Domain Events
//!
//! The contract between the write paths (EventSource) and the consistency
//! engine. Events arrive wrapped in an [`EventEnvelope`] carrying a stable
//! event id for replay detection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ContentRef, VoteType};

/// Everything the write paths can tell the engine.
///
/// Field sets are deliberately flat: each variant carries the ids the
/// engine needs to route without a second lookup against the source row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DomainEvent {
    QuestionPosted {
        question_id: Uuid,
        author_id: Uuid,
        body: String,
    },
    AnswerPosted {
        answer_id: Uuid,
        question_id: Uuid,
        author_id: Uuid,
        body: String,
    },
    CommentPosted {
        comment_id: Uuid,
        /// The content being commented on, a question or an answer.
        parent: ContentRef,
        author_id: Uuid,
        body: String,
    },
    VoteCast {
        voter_id: Uuid,
        target: ContentRef,
        vote: VoteType,
    },
    VoteChanged {
        voter_id: Uuid,
        target: ContentRef,
        from: VoteType,
        to: VoteType,
    },
    VoteRemoved {
        voter_id: Uuid,
        target: ContentRef,
        original: VoteType,
    },
    AnswerAccepted {
        answer_id: Uuid,
        /// The question author performing the acceptance.
        accepted_by: Uuid,
    },
    MentionDetected {
        content: ContentRef,
        author_id: Uuid,
        /// May contain duplicates when a user is mentioned several times
        /// in the same text; the generator deduplicates.
        mentioned_user_ids: Vec<Uuid>,
    },
    ContentDeleted {
        target: ContentRef,
        deleted_by: Uuid,
    },
}

impl DomainEvent {
    /// Wire names, matching the envelope `type` field.
    pub const KNOWN_KINDS: &'static [&'static str] = &[
        "question_posted",
        "answer_posted",
        "comment_posted",
        "vote_cast",
        "vote_changed",
        "vote_removed",
        "answer_accepted",
        "mention_detected",
        "content_deleted",
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            DomainEvent::QuestionPosted { .. } => "question_posted",
            DomainEvent::AnswerPosted { .. } => "answer_posted",
            DomainEvent::CommentPosted { .. } => "comment_posted",
            DomainEvent::VoteCast { .. } => "vote_cast",
            DomainEvent::VoteChanged { .. } => "vote_changed",
            DomainEvent::VoteRemoved { .. } => "vote_removed",
            DomainEvent::AnswerAccepted { .. } => "answer_accepted",
            DomainEvent::MentionDetected { .. } => "mention_detected",
            DomainEvent::ContentDeleted { .. } => "content_deleted",
        }
    }

    /// The user who caused the event. Self-notifications are suppressed
    /// against this id.
    pub fn actor(&self) -> Uuid {
        match self {
            DomainEvent::QuestionPosted { author_id, .. } => *author_id,
            DomainEvent::AnswerPosted { author_id, .. } => *author_id,
            DomainEvent::CommentPosted { author_id, .. } => *author_id,
            DomainEvent::VoteCast { voter_id, .. } => *voter_id,
            DomainEvent::VoteChanged { voter_id, .. } => *voter_id,
            DomainEvent::VoteRemoved { voter_id, .. } => *voter_id,
            DomainEvent::AnswerAccepted { accepted_by, .. } => *accepted_by,
            DomainEvent::MentionDetected { author_id, .. } => *author_id,
            DomainEvent::ContentDeleted { deleted_by, .. } => *deleted_by,
        }
    }

    /// The entity this unit of work serializes on. Events touching the same
    /// key are processed one at a time; independent keys run in parallel.
    pub fn entity_key(&self) -> Uuid {
        match self {
            DomainEvent::QuestionPosted { question_id, .. } => *question_id,
            DomainEvent::AnswerPosted { question_id, .. } => *question_id,
            DomainEvent::CommentPosted { parent, .. } => parent.id,
            DomainEvent::VoteCast { target, .. } => target.id,
            DomainEvent::VoteChanged { target, .. } => target.id,
            DomainEvent::VoteRemoved { target, .. } => target.id,
            DomainEvent::AnswerAccepted { answer_id, .. } => *answer_id,
            DomainEvent::MentionDetected { content, .. } => content.id,
            DomainEvent::ContentDeleted { target, .. } => target.id,
        }
    }
}

/// The wire wrapper the EventSource emits: `{"id": …, "type": …, "data": …}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Stable per-event id; replays reuse it.
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self { id: Uuid::now_v7(), kind: kind.into(), data }
    }

    /// Wraps an already-typed event, for in-process emitters.
    pub fn wrap(event: &DomainEvent) -> Self {
        // Serializing a just-constructed event cannot fail; the payload is
        // plain data with no non-string map keys.
        let value = serde_json::to_value(event).unwrap_or_default();
        let data = value.get("data").cloned().unwrap_or_default();
        Self { id: Uuid::now_v7(), kind: event.kind().to_string(), data }
    }

    /// Decodes the payload.
    ///
    /// Returns `Ok(None)` for an unrecognized `type`; the engine treats
    /// those as committed no-ops, never as failures. A malformed payload
    /// for a known type is a validation error.
    pub fn decode(&self) -> Result<Option<DomainEvent>, serde_json::Error> {
        if !DomainEvent::KNOWN_KINDS.contains(&self.kind.as_str()) {
            return Ok(None);
        }
        let tagged = serde_json::json!({ "type": self.kind, "data": self.data });
        serde_json::from_value(tagged).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentKind;

    #[test]
    fn envelope_decodes_known_event() {
        let event = DomainEvent::VoteCast {
            voter_id: Uuid::now_v7(),
            target: ContentRef::question(Uuid::now_v7()),
            vote: VoteType::Upvote,
        };
        let envelope = EventEnvelope::wrap(&event);
        assert_eq!(envelope.kind, "vote_cast");

        let decoded = envelope.decode().unwrap().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn envelope_passes_unknown_kind_through() {
        let envelope = EventEnvelope::new(
            "user_renamed",
            serde_json::json!({ "user_id": Uuid::now_v7() }),
        );
        assert!(envelope.decode().unwrap().is_none());
    }

    #[test]
    fn envelope_rejects_malformed_payload_of_known_kind() {
        let envelope = EventEnvelope::new("vote_cast", serde_json::json!({ "voter_id": 7 }));
        assert!(envelope.decode().is_err());
    }

    #[test]
    fn entity_key_follows_the_target() {
        let question_id = Uuid::now_v7();
        let event = DomainEvent::CommentPosted {
            comment_id: Uuid::now_v7(),
            parent: ContentRef { kind: ContentKind::Question, id: question_id },
            author_id: Uuid::now_v7(),
            body: "nice".into(),
        };
        assert_eq!(event.entity_key(), question_id);
    }
}
