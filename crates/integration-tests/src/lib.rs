//! answerboard/crates/integration-tests/src/lib.rs
//!
//! Shared harness for the end-to-end scenario tests: an in-memory store
//! wired to a real engine, plus account fixtures.

use std::sync::Arc;

use uuid::Uuid;

use domains::models::User;
use domains::ports::{ConsistencyStore, WriteBatch, WriteOp};
use services::{ConsistencyEngine, InboxView, ReputationView};
use storage_adapters::MemoryStore;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: ConsistencyEngine,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let engine = ConsistencyEngine::new(store.clone());
        Self { store, engine }
    }

    /// Registers an account the way the auth collaborator would.
    pub async fn user(&self, name: &str) -> anyhow::Result<User> {
        let user = User::new(Uuid::now_v7(), name);
        let mut batch = WriteBatch::new(Uuid::now_v7());
        batch.push(WriteOp::InsertUser(user.clone()));
        self.store.commit(batch).await?;
        Ok(user)
    }

    pub fn inbox(&self) -> InboxView {
        InboxView::new(self.store.clone() as Arc<dyn ConsistencyStore>)
    }

    pub fn reputation(&self) -> ReputationView {
        ReputationView::new(self.store.clone() as Arc<dyn ConsistencyStore>)
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
