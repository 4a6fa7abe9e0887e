//! # OrphanReaper
//!
//! Cascade planning for ContentDeleted. The reaper never touches the store
//! itself; it produces the derived deletions that ride in the same write
//! batch as the content deletion, so the store can never hold a dangling
//! notification, mention, or vote.

use tracing::debug;

use domains::models::{Content, ContentKind};
use domains::ports::WriteOp;

pub struct OrphanReaper;

impl OrphanReaper {
    /// The synchronous cascade for one deleted content item and its
    /// transitive descendants (a question takes its answers and comments
    /// with it). For every node: notifications linking to it, mentions it
    /// owns, votes on it. Descendant rows are deleted here too; the root's
    /// own deletion is the originating write and stays with the engine.
    /// Every step is idempotent against already-absent rows.
    ///
    /// Reputation earned from the deleted content stays: only explicit
    /// reversal events (VoteRemoved, VoteChanged) carry inverses.
    pub fn plan(root: &Content, descendants: &[Content]) -> Vec<WriteOp> {
        let mut ops = Vec::new();
        for node in std::iter::once(root).chain(descendants.iter()) {
            let target = node.target();
            ops.push(WriteOp::DeleteNotificationsLinking(target));
            ops.push(WriteOp::DeleteMentionsOwnedBy(target));
            ops.push(WriteOp::DeleteVotesOn(target));
        }
        for node in descendants {
            ops.push(WriteOp::DeleteContent(node.target()));
        }

        // A descendant's accepted pointer dies with its question; only the
        // root needs an explicit clear, since its question survives.
        if root.kind == ContentKind::Answer && root.is_accepted {
            if let Some(parent) = root.parent {
                debug!(question_id = %parent.id, answer_id = %root.id,
                    "reaping accepted-answer pointer");
                ops.push(WriteOp::ClearAcceptedAnswer { question_id: parent.id });
            }
        }

        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domains::models::ContentRef;
    use uuid::Uuid;

    fn node(kind: ContentKind, parent: Option<ContentRef>, is_accepted: bool) -> Content {
        Content {
            id: Uuid::now_v7(),
            kind,
            author_id: Uuid::now_v7(),
            parent,
            body: "try rebuilding".into(),
            upvotes: 2,
            downvotes: 0,
            is_accepted,
            accepted_answer_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_covers_notifications_mentions_and_votes() {
        let deleted = node(ContentKind::Answer, Some(ContentRef::question(Uuid::now_v7())), false);
        let ops = OrphanReaper::plan(&deleted, &[]);
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], WriteOp::DeleteNotificationsLinking(t) if t == deleted.target()));
        assert!(matches!(ops[1], WriteOp::DeleteMentionsOwnedBy(t) if t == deleted.target()));
        assert!(matches!(ops[2], WriteOp::DeleteVotesOn(t) if t == deleted.target()));
    }

    #[test]
    fn accepted_answer_also_clears_the_question_pointer() {
        let deleted = node(ContentKind::Answer, Some(ContentRef::question(Uuid::now_v7())), true);
        let question_id = deleted.parent.unwrap().id;
        let ops = OrphanReaper::plan(&deleted, &[]);
        assert_eq!(ops.len(), 4);
        assert!(matches!(
            ops[3],
            WriteOp::ClearAcceptedAnswer { question_id: q } if q == question_id
        ));
    }

    #[test]
    fn question_subtree_reaps_and_deletes_every_descendant() {
        let question = node(ContentKind::Question, None, false);
        let answer = node(ContentKind::Answer, Some(question.target()), true);
        let comment = node(ContentKind::Comment, Some(answer.target()), false);
        let descendants = vec![answer.clone(), comment.clone()];

        let ops = OrphanReaper::plan(&question, &descendants);
        // 3 nodes × 3 reference sweeps + 2 descendant row deletions.
        assert_eq!(ops.len(), 11);
        assert!(ops
            .iter()
            .any(|op| matches!(op, WriteOp::DeleteContent(t) if *t == answer.target())));
        assert!(ops
            .iter()
            .any(|op| matches!(op, WriteOp::DeleteContent(t) if *t == comment.target())));
        // The accepted answer dies with its question: no pointer clear.
        assert!(!ops
            .iter()
            .any(|op| matches!(op, WriteOp::ClearAcceptedAnswer { .. })));
    }
}
