//! answerboard/crates/services/src/lib.rs
//!
//! Business logic of the consistency core: the reputation calculator, the
//! notification generator, the orphan reaper, and the engine that runs them
//! as one unit of work per incoming write.

pub mod engine;
pub mod mentions;
pub mod notifications;
pub mod reaper;
pub mod reputation;
pub mod views;

pub use engine::{ConsistencyEngine, Disposition, ProcessState, Receipt};
pub use notifications::{NotificationDraft, NotificationGenerator};
pub use reaper::OrphanReaper;
pub use reputation::ReputationCalculator;
pub use views::{InboxView, ReputationView};
