//! ============================================================================
//! SANKALPA-CORE: Voice habit logging
//! ============================================================================
//! Everything behind the "say what you did" button:
//! - Utterance -> habit extraction via the Anthropic Messages API
//! - Confidence gate deciding save-now vs ask-first
//! - redb habit log store, scoped by a hashed user key
//! - Weekly summary with streaks and nudges
//! - Client-side session state machine for capture/confirm/complete
//! ============================================================================

pub mod config;
pub mod confidence_gate;
pub mod db;
pub mod extraction;
pub mod identity;
pub mod service;
pub mod session;
pub mod summary;
pub mod types;

// Re-export main types for convenience
pub use types::*;
pub use config::AppConfig;
pub use confidence_gate::ConfidenceGate;
pub use db::{HabitDb, HabitStore};
pub use extraction::{ClaudeExtractor, HabitExtractor};
pub use identity::{Principal, UserKey};
pub use service::{HabitClient, HabitService};
pub use session::{HabitApi, LoggingSession, Phase};
pub use summary::HabitSummary;
