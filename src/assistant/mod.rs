//! Conversation session
//!
//! Glue for one active conversation: runs each utterance through the
//! extractor, turns the recommendation into conversation events, starts
//! camera verification when the dialogue reaches it, and keeps the camera
//! flag identical in the session context and the conversation machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::conversation::{ConversationEvent, ConversationMachine, ConversationState};
use crate::extraction::EntityExtractor;
use crate::models::{ProcessingResult, Stage};
use crate::persistence::ContextPersistenceService;
use crate::session::{SessionContext, StageRecommender};
use crate::verification::{VerificationEvent, VerificationMachine, VerificationPhase, VerificationState};
use crate::Result;

/// One real stage move. Ignored events are not recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageChange {
    pub from: Stage,
    pub to: Stage,
    pub event: ConversationEvent,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    pub processing: ProcessingResult,
    pub events: Vec<ConversationEvent>,
    pub stage: Stage,
}

pub struct ConversationSession {
    session_id: Uuid,
    extractor: Arc<EntityExtractor>,
    context: SessionContext,
    conversation: ConversationState,
    verification: VerificationState,
    history: Vec<StageChange>,
}

impl ConversationSession {
    pub fn new(extractor: Arc<EntityExtractor>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            extractor,
            context: SessionContext::new(),
            conversation: ConversationMachine::initial_state(),
            verification: VerificationMachine::initial_state(),
            history: Vec::new(),
        }
    }

    // =============================
    // Accessors
    // =============================

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn stage(&self) -> Stage {
        self.conversation.value
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.conversation
    }

    pub fn verification_state(&self) -> &VerificationState {
        &self.verification
    }

    pub fn history(&self) -> &[StageChange] {
        &self.history
    }

    // =============================
    // Turns
    // =============================

    /// Process one user utterance and move the dialogue as far as the
    /// recommendation allows from the current stage.
    pub fn handle_utterance(&mut self, utterance: &str) -> TurnOutcome {
        let processing = self.extractor.process_user_input(&mut self.context, utterance);
        let events = self.events_toward(processing.recommended_state);

        for event in &events {
            self.dispatch(*event);
        }

        TurnOutcome {
            processing,
            events,
            stage: self.stage(),
        }
    }

    /// Apply a conversation event and return the resulting stage.
    pub fn dispatch(&mut self, event: ConversationEvent) -> Stage {
        let before = self.conversation;
        self.conversation = ConversationMachine::transition(before, event);

        if self.conversation == before {
            debug!(session_id = %self.session_id, stage = %before.value, event = %event, "Event ignored");
            return before.value;
        }

        // The machine flag only moves on these two; mirror it into the context.
        match event {
            ConversationEvent::CameraVerified => self.context.set_camera_verified(true),
            ConversationEvent::Reset => self.context.set_camera_verified(false),
            _ => {}
        }

        if self.conversation.value != before.value {
            self.context.set_current_stage(self.conversation.value);
            info!(
                session_id = %self.session_id,
                from = %before.value,
                to = %self.conversation.value,
                event = %event,
                "Stage changed"
            );
            self.history.push(StageChange {
                from: before.value,
                to: self.conversation.value,
                event,
                at: Utc::now(),
            });

            if self.conversation.value == Stage::CameraVerification {
                self.enter_camera_verification();
            }
        }

        self.conversation.value
    }

    /// Feed the verification machine. Reaching `completed` marks the
    /// context verified and sends `CAMERA_VERIFIED` in the same call.
    pub fn apply_verification(&mut self, event: VerificationEvent) -> VerificationPhase {
        self.apply_verification_at(event, Utc::now().timestamp_millis())
    }

    pub fn apply_verification_at(&mut self, event: VerificationEvent, now_millis: i64) -> VerificationPhase {
        let before = self.verification.value;
        self.verification = VerificationMachine::transition_at(self.verification.clone(), event, now_millis);
        let after = self.verification.value;

        if after != before {
            info!(
                session_id = %self.session_id,
                from = ?before,
                to = ?after,
                step = self.verification.context.step,
                "Verification phase changed"
            );
        }

        if after == VerificationPhase::Completed && before != VerificationPhase::Completed {
            self.context.set_camera_verified(true);
            self.dispatch(ConversationEvent::CameraVerified);
        }

        after
    }

    /// Drop everything collected so far and start over.
    pub fn reset(&mut self) {
        self.context.reset();
        self.conversation = ConversationMachine::initial_state();
        self.verification = VerificationMachine::initial_state();
        self.history.clear();
        info!(session_id = %self.session_id, "Session reset");
    }

    // =============================
    // Persistence
    // =============================

    pub async fn save(&self, persistence: &ContextPersistenceService, run_id: Option<&str>) -> Result<()> {
        persistence.save_context(&self.context, run_id).await
    }

    /// Restore the stored context when the run id still matches, then walk
    /// the conversation forward to the stage that context implies.
    pub async fn rehydrate(&mut self, persistence: &ContextPersistenceService) -> Result<bool> {
        let restored = persistence.rehydrate_context(&mut self.context).await?;

        self.context.set_current_stage(Stage::Greeting);
        self.conversation = ConversationMachine::initial_state();
        self.verification = VerificationMachine::initial_state();
        self.history.clear();

        if restored {
            let recommended = StageRecommender::recommend(&self.context, self.context.camera_verified());
            for event in self.events_toward(recommended) {
                self.dispatch(event);
            }
        }

        Ok(restored)
    }

    // =============================
    // Internals
    // =============================

    /// Events that move the machine from its current stage toward `target`.
    /// Most come out as no-ops from stages they do not apply to.
    fn events_toward(&self, target: Stage) -> Vec<ConversationEvent> {
        use ConversationEvent::*;

        let current = self.stage();
        if target == current {
            return Vec::new();
        }

        let benefit = self.context.benefit_number().is_some();
        let amount = self.context.requested_amount().is_some();

        match target {
            Stage::IdentifyNeed => vec![NameDetected],
            Stage::BenefitVerification => match current {
                Stage::Greeting | Stage::IdentifyNeed if benefit => vec![BenefitProvided],
                Stage::Greeting | Stage::IdentifyNeed => vec![ValueProvided],
                _ => Vec::new(),
            },
            Stage::CameraVerification => vec![BenefitProvided, BenefitConfirmed],
            Stage::LoanSimulation if benefit && amount => vec![BenefitAndValueProvided],
            Stage::LoanSimulation => vec![BenefitProvided, BenefitConfirmed],
            Stage::EarlyExit => vec![EarlyExit],
            _ => Vec::new(),
        }
    }

    fn enter_camera_verification(&mut self) {
        if self.context.camera_verified() {
            self.dispatch(ConversationEvent::CameraVerified);
            return;
        }

        if matches!(self.verification.value, VerificationPhase::Idle | VerificationPhase::Failed) {
            self.apply_verification(VerificationEvent::Start);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryKeyValueStore, StaticRunIdSource};

    fn session() -> ConversationSession {
        ConversationSession::new(Arc::new(EntityExtractor::new()))
    }

    fn complete_verification(session: &mut ConversationSession) {
        if session.verification_state().value == VerificationPhase::Idle {
            session.apply_verification_at(VerificationEvent::Start, 100);
        }
        session.apply_verification_at(VerificationEvent::Progress { step: 2 }, 200);
        session.apply_verification_at(VerificationEvent::Progress { step: 3 }, 300);
        session.apply_verification_at(VerificationEvent::Complete, 400);
    }

    #[test]
    fn test_full_utterance_jumps_to_simulation() {
        let mut session = session();
        let outcome = session.handle_utterance(
            "Meu nome é Joao. Meu benefício é 123456. Quero um empréstimo de R$ 50.000 para reforma. Estou com meu filho.",
        );

        assert_eq!(outcome.stage, Stage::LoanSimulation);
        assert_eq!(outcome.events, vec![ConversationEvent::BenefitAndValueProvided]);
        assert_eq!(session.history().len(), 1);
        assert_eq!(session.history()[0].from, Stage::Greeting);
    }

    #[test]
    fn test_camera_gate_then_simulation() {
        let mut session = session();
        assert_eq!(session.handle_utterance("Meu nome é Maria").stage, Stage::IdentifyNeed);

        let outcome = session.handle_utterance("meu benefício é 123456");
        assert_eq!(outcome.stage, Stage::CameraVerification);
        assert_eq!(session.verification_state().value, VerificationPhase::Preparing);

        complete_verification(&mut session);
        assert_eq!(session.stage(), Stage::LoanSimulation);
        assert_eq!(session.context().current_stage(), Stage::LoanSimulation);
        assert!(session.context().camera_verified());
        assert!(session.conversation_state().context.camera_verified);
    }

    #[test]
    fn test_verification_before_benefit_skips_camera_stage() {
        let mut session = session();
        session.handle_utterance("me chamo Antônio");
        complete_verification(&mut session);

        // CAMERA_VERIFIED means nothing in 2_identify_need; the context keeps the flag.
        assert_eq!(session.stage(), Stage::IdentifyNeed);
        assert!(session.context().camera_verified());
        assert!(!session.conversation_state().context.camera_verified);

        let outcome = session.handle_utterance("o número do meu benefício é 123456");
        assert_eq!(outcome.stage, Stage::LoanSimulation);
        assert!(session.conversation_state().context.camera_verified);
    }

    #[test]
    fn test_tentative_benefit_waits_in_verification() {
        let mut session = session();
        let outcome = session.handle_utterance("anota aí 7654321 e quero 20 mil");
        assert_eq!(outcome.stage, Stage::BenefitVerification);
        assert_eq!(outcome.events, vec![ConversationEvent::BenefitProvided]);

        let outcome = session.handle_utterance("sim, está certo");
        assert_eq!(outcome.stage, Stage::LoanSimulation);
    }

    #[test]
    fn test_early_exit_and_reset_event() {
        let mut session = session();
        session.handle_utterance("meu benefício é 123456");
        complete_verification(&mut session);
        assert_eq!(session.stage(), Stage::LoanSimulation);

        assert_eq!(session.handle_utterance("não tenho interesse").stage, Stage::EarlyExit);

        assert_eq!(session.dispatch(ConversationEvent::Reset), Stage::Greeting);
        assert_eq!(session.context().current_stage(), Stage::Greeting);
        assert!(!session.conversation_state().context.camera_verified);
        assert!(!session.context().camera_verified());
    }

    #[test]
    fn test_failed_verification_restarts_on_reentry() {
        let mut session = session();
        session.handle_utterance("meu benefício é 123456");
        session.apply_verification_at(
            VerificationEvent::Error {
                error: crate::verification::VerificationFailure::new(
                    crate::verification::CameraErrorKind::DeviceUnavailable,
                    "no camera",
                ),
            },
            150,
        );
        assert_eq!(session.verification_state().value, VerificationPhase::Failed);
        assert_eq!(session.stage(), Stage::CameraVerification);

        assert_eq!(session.apply_verification(VerificationEvent::Start), VerificationPhase::Preparing);
        complete_verification(&mut session);
        assert_eq!(session.stage(), Stage::LoanSimulation);
    }

    #[test]
    fn test_reset_clears_session() {
        let mut session = session();
        session.handle_utterance("Meu benefício é 123456 e quero R$ 5.000");
        session.reset();

        assert_eq!(session.stage(), Stage::Greeting);
        assert!(session.context().is_empty());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn test_save_and_rehydrate_replays_stage() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let persistence = ContextPersistenceService::new(
            store.clone(),
            Arc::new(StaticRunIdSource("run1".to_string())),
        );

        let mut first = session();
        first.handle_utterance("Meu benefício é 123456 e quero um empréstimo de R$ 10.000");
        first.save(&persistence, Some("run1")).await.unwrap();

        let mut second = session();
        assert!(second.rehydrate(&persistence).await.unwrap());
        assert_eq!(second.context().benefit_number(), Some("123456"));
        assert_eq!(second.stage(), Stage::LoanSimulation);
        assert_eq!(second.context().current_stage(), Stage::LoanSimulation);

        let next_deploy = ContextPersistenceService::new(
            store,
            Arc::new(StaticRunIdSource("run2".to_string())),
        );
        let mut third = session();
        assert!(!third.rehydrate(&next_deploy).await.unwrap());
        assert_eq!(third.stage(), Stage::Greeting);
        assert!(third.context().is_empty());
    }
}
