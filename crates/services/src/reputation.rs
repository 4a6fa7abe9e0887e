//! # ReputationCalculator
//!
//! Pure mapping from domain events to reputation deltas and badge tiers.
//! The point table is fixed (constants, not configuration) and the
//! calculator fails closed: anything outside the table is worth 0.

use domains::events::DomainEvent;
use domains::models::{BadgeTier, ContentKind, VoteType};

/// Posting a question.
pub const QUESTION_CREATED: i64 = 7;
/// An upvote on a question, credited to its author.
pub const QUESTION_UPVOTED: i64 = 5;
pub const QUESTION_DOWNVOTED: i64 = -3;
pub const ANSWER_UPVOTED: i64 = 3;
pub const ANSWER_DOWNVOTED: i64 = -1;
/// Acceptance reward, credited to the answer's author.
pub const ANSWER_ACCEPTED: i64 = 10;

pub struct ReputationCalculator;

impl ReputationCalculator {
    /// Delta earned by the *credited* user for this event.
    ///
    /// Stateless and total over the event set. Reversal events apply exact
    /// inverses of the original delta rather than recomputing history: a
    /// flip is inverse-then-new in one step.
    pub fn delta(event: &DomainEvent) -> i64 {
        match event {
            DomainEvent::QuestionPosted { .. } => QUESTION_CREATED,
            DomainEvent::VoteCast { target, vote, .. } => Self::vote_delta(target.kind, *vote),
            DomainEvent::VoteChanged { target, from, to, .. } => {
                -Self::vote_delta(target.kind, *from) + Self::vote_delta(target.kind, *to)
            }
            DomainEvent::VoteRemoved { target, original, .. } => {
                -Self::vote_delta(target.kind, *original)
            }
            DomainEvent::AnswerAccepted { .. } => ANSWER_ACCEPTED,
            // Fails closed: never guess a delta for events outside the table.
            _ => 0,
        }
    }

    /// The table entry for one vote on one kind of content.
    /// Comment votes carry no reputation.
    pub fn vote_delta(kind: ContentKind, vote: VoteType) -> i64 {
        match (kind, vote) {
            (ContentKind::Question, VoteType::Upvote) => QUESTION_UPVOTED,
            (ContentKind::Question, VoteType::Downvote) => QUESTION_DOWNVOTED,
            (ContentKind::Answer, VoteType::Upvote) => ANSWER_UPVOTED,
            (ContentKind::Answer, VoteType::Downvote) => ANSWER_DOWNVOTED,
            (ContentKind::Comment, _) => 0,
        }
    }

    /// Recomputes the tier for a reputation total. Idempotent: calling it
    /// twice with no intervening change yields the same tier.
    pub fn tier_for(points: i64) -> BadgeTier {
        BadgeTier::for_points(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::models::ContentRef;
    use uuid::Uuid;

    fn vote_on_question(vote: VoteType) -> DomainEvent {
        DomainEvent::VoteCast {
            voter_id: Uuid::now_v7(),
            target: ContentRef::question(Uuid::now_v7()),
            vote,
        }
    }

    #[test]
    fn table_matches_the_contract() {
        assert_eq!(ReputationCalculator::delta(&vote_on_question(VoteType::Upvote)), 5);
        assert_eq!(ReputationCalculator::delta(&vote_on_question(VoteType::Downvote)), -3);
        assert_eq!(
            ReputationCalculator::vote_delta(ContentKind::Answer, VoteType::Upvote),
            3
        );
        assert_eq!(
            ReputationCalculator::vote_delta(ContentKind::Answer, VoteType::Downvote),
            -1
        );
    }

    #[test]
    fn flip_is_inverse_then_new() {
        let target = ContentRef::question(Uuid::now_v7());
        let flip = DomainEvent::VoteChanged {
            voter_id: Uuid::now_v7(),
            target,
            from: VoteType::Upvote,
            to: VoteType::Downvote,
        };
        // -(+5) + (-3)
        assert_eq!(ReputationCalculator::delta(&flip), -8);
    }

    #[test]
    fn removal_is_the_exact_inverse() {
        let target = ContentRef::answer(Uuid::now_v7());
        let removal = DomainEvent::VoteRemoved {
            voter_id: Uuid::now_v7(),
            target,
            original: VoteType::Downvote,
        };
        assert_eq!(ReputationCalculator::delta(&removal), 1);
    }

    #[test]
    fn events_outside_the_table_are_worth_zero() {
        let posted = DomainEvent::AnswerPosted {
            answer_id: Uuid::now_v7(),
            question_id: Uuid::now_v7(),
            author_id: Uuid::now_v7(),
            body: "because".into(),
        };
        assert_eq!(ReputationCalculator::delta(&posted), 0);

        let deleted = DomainEvent::ContentDeleted {
            target: ContentRef::comment(Uuid::now_v7()),
            deleted_by: Uuid::now_v7(),
        };
        assert_eq!(ReputationCalculator::delta(&deleted), 0);
    }

    #[test]
    fn comment_votes_carry_no_reputation() {
        assert_eq!(
            ReputationCalculator::vote_delta(ContentKind::Comment, VoteType::Upvote),
            0
        );
    }

    #[test]
    fn tier_brackets_are_closed_and_ordered() {
        assert_eq!(ReputationCalculator::tier_for(0), BadgeTier::Newbie);
        assert_eq!(ReputationCalculator::tier_for(249), BadgeTier::Newbie);
        assert_eq!(ReputationCalculator::tier_for(250), BadgeTier::Expert);
        assert_eq!(ReputationCalculator::tier_for(999), BadgeTier::Expert);
        assert_eq!(ReputationCalculator::tier_for(1000), BadgeTier::Master);
        assert_eq!(ReputationCalculator::tier_for(4999), BadgeTier::Master);
        assert_eq!(ReputationCalculator::tier_for(5000), BadgeTier::Legend);
        // Downvotes can push a total below zero; that stays Newbie.
        assert_eq!(ReputationCalculator::tier_for(-4), BadgeTier::Newbie);
    }

    #[test]
    fn ordered_vote_sequence_sums_per_event_deltas() {
        let target = ContentRef::question(Uuid::now_v7());
        let voter = Uuid::now_v7();
        let events = [
            DomainEvent::VoteCast { voter_id: voter, target, vote: VoteType::Upvote },
            DomainEvent::VoteChanged {
                voter_id: voter,
                target,
                from: VoteType::Upvote,
                to: VoteType::Downvote,
            },
            DomainEvent::VoteRemoved { voter_id: voter, target, original: VoteType::Downvote },
        ];
        let net: i64 = events.iter().map(ReputationCalculator::delta).sum();
        // +5, then -5-3, then +3
        assert_eq!(net, 0);
    }
}
