//! # NotificationGenerator
//!
//! Maps qualifying events to notification drafts. Pure with respect to the
//! store: the engine resolves the event's target content and hands it in,
//! the generator decides recipients and wording.

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use domains::events::DomainEvent;
use domains::models::{Content, ContentRef, Notification, NotificationKind, VoteType};

/// A notification before it has an id, a timestamp, or a read flag.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationDraft {
    pub recipient_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: ContentRef,
}

impl NotificationDraft {
    pub fn into_notification(self) -> Notification {
        Notification {
            id: Uuid::now_v7(),
            recipient_id: self.recipient_id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            link: self.link,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

pub struct NotificationGenerator;

impl NotificationGenerator {
    /// Drafts for one event. `target` is the resolved content the event
    /// points at: the voted content for VoteCast, the question for
    /// AnswerPosted, the commented content for CommentPosted, the accepted
    /// answer for AnswerAccepted, the mention-owning content for
    /// MentionDetected.
    ///
    /// The actor never receives a notification for their own action, and a
    /// user mentioned several times in one text is drafted once.
    pub fn drafts(event: &DomainEvent, target: &Content) -> Vec<NotificationDraft> {
        match event {
            DomainEvent::VoteCast { voter_id, vote, .. } => Self::single(
                target.author_id,
                *voter_id,
                NotificationDraft {
                    recipient_id: target.author_id,
                    kind: NotificationKind::Vote,
                    title: "New vote".into(),
                    message: match vote {
                        VoteType::Upvote => {
                            format!("Your {} received an upvote.", target.kind.as_str())
                        }
                        VoteType::Downvote => {
                            format!("Your {} received a downvote.", target.kind.as_str())
                        }
                    },
                    link: target.target(),
                },
            ),
            DomainEvent::AnswerPosted { author_id, answer_id, .. } => Self::single(
                target.author_id,
                *author_id,
                NotificationDraft {
                    recipient_id: target.author_id,
                    kind: NotificationKind::Answer,
                    title: "New answer".into(),
                    message: "Your question has a new answer.".into(),
                    link: ContentRef::answer(*answer_id),
                },
            ),
            // Only the immediate parent author is notified, not the whole
            // thread, to avoid notification storms.
            DomainEvent::CommentPosted { author_id, comment_id, .. } => Self::single(
                target.author_id,
                *author_id,
                NotificationDraft {
                    recipient_id: target.author_id,
                    kind: NotificationKind::Comment,
                    title: "New comment".into(),
                    message: format!("Your {} has a new comment.", target.kind.as_str()),
                    link: ContentRef::comment(*comment_id),
                },
            ),
            DomainEvent::AnswerAccepted { accepted_by, .. } => Self::single(
                target.author_id,
                *accepted_by,
                NotificationDraft {
                    recipient_id: target.author_id,
                    kind: NotificationKind::AcceptedAnswer,
                    title: "Answer accepted".into(),
                    message: "Your answer was accepted.".into(),
                    link: target.target(),
                },
            ),
            DomainEvent::MentionDetected { author_id, mentioned_user_ids, content } => {
                let mut seen = Vec::new();
                let mut drafts = Vec::new();
                for user_id in mentioned_user_ids {
                    if seen.contains(user_id) {
                        continue;
                    }
                    seen.push(*user_id);
                    if user_id == author_id {
                        debug!(user_id = %user_id, "suppressing self-mention");
                        continue;
                    }
                    drafts.push(NotificationDraft {
                        recipient_id: *user_id,
                        kind: NotificationKind::Mention,
                        title: "You were mentioned".into(),
                        message: format!("You were mentioned in a {}.", content.kind.as_str()),
                        link: *content,
                    });
                }
                drafts
            }
            // Posting a question, reversing a vote, and deleting content
            // notify nobody.
            _ => Vec::new(),
        }
    }

    fn single(recipient: Uuid, actor: Uuid, draft: NotificationDraft) -> Vec<NotificationDraft> {
        if recipient == actor {
            debug!(recipient = %recipient, "suppressing self-notification");
            return Vec::new();
        }
        vec![draft]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::models::ContentKind;

    fn question_by(author_id: Uuid) -> Content {
        Content {
            id: Uuid::now_v7(),
            kind: ContentKind::Question,
            author_id,
            parent: None,
            body: "How do I shadow a binding?".into(),
            upvotes: 0,
            downvotes: 0,
            is_accepted: false,
            accepted_answer_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn vote_notifies_the_content_author() {
        let author = Uuid::now_v7();
        let target = question_by(author);
        let event = DomainEvent::VoteCast {
            voter_id: Uuid::now_v7(),
            target: target.target(),
            vote: VoteType::Upvote,
        };

        let drafts = NotificationGenerator::drafts(&event, &target);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].recipient_id, author);
        assert_eq!(drafts[0].kind, NotificationKind::Vote);
        assert_eq!(drafts[0].link, target.target());
    }

    #[test]
    fn self_vote_is_suppressed() {
        let author = Uuid::now_v7();
        let target = question_by(author);
        let event = DomainEvent::VoteCast {
            voter_id: author,
            target: target.target(),
            vote: VoteType::Upvote,
        };
        assert!(NotificationGenerator::drafts(&event, &target).is_empty());
    }

    #[test]
    fn answer_notifies_the_question_author_with_an_answer_link() {
        let question_author = Uuid::now_v7();
        let question = question_by(question_author);
        let answer_id = Uuid::now_v7();
        let event = DomainEvent::AnswerPosted {
            answer_id,
            question_id: question.id,
            author_id: Uuid::now_v7(),
            body: "Use let again.".into(),
        };

        let drafts = NotificationGenerator::drafts(&event, &question);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].kind, NotificationKind::Answer);
        assert_eq!(drafts[0].link, ContentRef::answer(answer_id));
    }

    #[test]
    fn comment_on_own_content_is_suppressed() {
        let author = Uuid::now_v7();
        let target = question_by(author);
        let event = DomainEvent::CommentPosted {
            comment_id: Uuid::now_v7(),
            parent: target.target(),
            author_id: author,
            body: "clarifying my own question".into(),
        };
        assert!(NotificationGenerator::drafts(&event, &target).is_empty());
    }

    #[test]
    fn repeated_mentions_collapse_to_one_draft_per_user() {
        let author = Uuid::now_v7();
        let mentioned = Uuid::now_v7();
        let target = question_by(author);
        let event = DomainEvent::MentionDetected {
            content: target.target(),
            author_id: author,
            // Mentioned twice in the same text, plus a self-mention.
            mentioned_user_ids: vec![mentioned, author, mentioned],
        };

        let drafts = NotificationGenerator::drafts(&event, &target);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].recipient_id, mentioned);
        assert_eq!(drafts[0].kind, NotificationKind::Mention);
    }

    #[test]
    fn question_posted_notifies_nobody() {
        let author = Uuid::now_v7();
        let target = question_by(author);
        let event = DomainEvent::QuestionPosted {
            question_id: target.id,
            author_id: author,
            body: target.body.clone(),
        };
        assert!(NotificationGenerator::drafts(&event, &target).is_empty());
    }
}
