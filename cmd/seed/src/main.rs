//! # seed
//!
//! Populates a store with a small demo forum by driving the consistency
//! engine the same way the write paths do, then prints the resulting
//! reputation and inbox state. Point it at a file-backed database
//! (`ANSWERBOARD_DATABASE__URL=sqlite:answerboard.db?mode=rwc`) to keep the
//! data around for inspection.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use uuid::Uuid;

use configs::Settings;
use domains::events::DomainEvent;
use domains::models::{ContentRef, User, VoteType};
use domains::ports::{ConsistencyStore, WriteBatch, WriteOp};
use services::{ConsistencyEngine, InboxView};
use storage_adapters::MemoryStore;

#[cfg(feature = "db-sqlite")]
use secrecy::ExposeSecret;
#[cfg(feature = "db-sqlite")]
use storage_adapters::SqliteStore;

async fn build_store(settings: &Settings) -> anyhow::Result<Arc<dyn ConsistencyStore>> {
    #[cfg(feature = "db-sqlite")]
    if let Some(url) = settings.database.url.as_ref() {
        let store = SqliteStore::connect(url.expose_secret())
            .await
            .context("connecting sqlite store")?;
        return Ok(Arc::new(store));
    }
    Ok(Arc::new(MemoryStore::new()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::load().context("loading configuration")?;
    let store = build_store(&settings).await?;
    let engine = ConsistencyEngine::new(store.clone());

    // Accounts arrive from the auth collaborator, not from events, so they
    // are inserted directly.
    let ada = User::new(Uuid::now_v7(), "ada");
    let grace = User::new(Uuid::now_v7(), "grace");
    let linus = User::new(Uuid::now_v7(), "linus");
    let mut accounts = WriteBatch::new(Uuid::now_v7());
    for user in [&ada, &grace, &linus] {
        accounts.push(WriteOp::InsertUser(user.clone()));
    }
    store.commit(accounts).await?;
    info!("seeded 3 accounts");

    // ada asks, grace answers, linus comments and votes.
    let question_id = Uuid::now_v7();
    engine
        .submit(DomainEvent::QuestionPosted {
            question_id,
            author_id: ada.id,
            body: "Why does my iterator adapter not run until collected?".into(),
        })
        .await?;

    let answer_id = Uuid::now_v7();
    let answer_body =
        format!("@{} iterators are lazy; nothing runs before a consumer.", ada.username);
    engine
        .submit(DomainEvent::AnswerPosted {
            answer_id,
            question_id,
            author_id: grace.id,
            body: answer_body.clone(),
        })
        .await?;

    // The write path parses mentions out of the raw text and resolves the
    // handles before emitting the event.
    let mut mentioned_user_ids = Vec::new();
    for handle in services::mentions::extract_handles(&answer_body) {
        if let Some(user) = store.get_user_by_name(&handle).await? {
            mentioned_user_ids.push(user.id);
        }
    }
    engine
        .submit(DomainEvent::MentionDetected {
            content: ContentRef::answer(answer_id),
            author_id: grace.id,
            mentioned_user_ids,
        })
        .await?;

    engine
        .submit(DomainEvent::CommentPosted {
            comment_id: Uuid::now_v7(),
            parent: ContentRef::answer(answer_id),
            author_id: linus.id,
            body: "Worth adding that `for` desugars to a consumer too.".into(),
        })
        .await?;

    engine
        .submit(DomainEvent::VoteCast {
            voter_id: linus.id,
            target: ContentRef::question(question_id),
            vote: VoteType::Upvote,
        })
        .await?;
    engine
        .submit(DomainEvent::VoteCast {
            voter_id: grace.id,
            target: ContentRef::question(question_id),
            vote: VoteType::Upvote,
        })
        .await?;
    engine
        .submit(DomainEvent::VoteCast {
            voter_id: linus.id,
            target: ContentRef::answer(answer_id),
            vote: VoteType::Upvote,
        })
        .await?;

    engine
        .submit(DomainEvent::AnswerAccepted { answer_id, accepted_by: ada.id })
        .await?;

    info!("seeded demo thread");

    let inbox = InboxView::new(store.clone());
    println!("user     points  tier    unread");
    for user in store.list_users().await? {
        let unread = inbox.unread_count(user.id).await?;
        println!(
            "{:<8} {:>6}  {:<7} {:>5}",
            user.username, user.reputation_points, user.badge_tier, unread
        );
    }

    Ok(())
}
