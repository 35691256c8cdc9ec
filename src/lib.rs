//! Loan Conversation Engine
//!
//! Deterministic core of a voice loan-origination assistant:
//! - Extracts names, benefit numbers, amounts, purposes and companions
//!   from Portuguese utterances
//! - Keeps a per-conversation context of confirmed and tentative fields
//! - Recommends the next dialogue stage and drives the conversation machine
//! - Runs the camera verification workflow alongside it
//! - Persists context locally, discarding it when the server run id changes
//!
//! FLOW:
//! UTTERANCE → EXTRACT → MERGE → RECOMMEND → TRANSITION

pub mod api;
pub mod assistant;
pub mod config;
pub mod conversation;
pub mod error;
pub mod extraction;
pub mod models;
pub mod persistence;
pub mod session;
pub mod verification;

pub use error::{EngineError, Result};

// Re-export common types
pub use assistant::{ConversationSession, StageChange, TurnOutcome};
pub use config::EngineConfig;
pub use conversation::{ConversationEvent, ConversationMachine, ConversationState};
pub use extraction::EntityExtractor;
pub use models::*;
pub use persistence::ContextPersistenceService;
pub use session::{SessionContext, StageRecommender};
pub use verification::{VerificationEvent, VerificationMachine, VerificationPhase, VerificationState};
