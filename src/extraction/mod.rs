//! Entity extraction pipeline
//!
//! Turns one free-text utterance into typed fields, merges them into the
//! session context and asks the recommender where the dialogue should go.
//! Deterministic pattern matching only: no model inference, no failures.

pub mod normalize;
pub mod rules;

use chrono::Utc;
use tracing::debug;

use crate::models::{EntityField, ExtractedEntities, ProcessingResult, Stage};
use crate::session::{SessionContext, StageRecommender};
use normalize::NormalizedText;
use rules::{is_affirmation, Certainty, ExtractionRule, DEFAULT_RULES, EARLY_EXIT_PATTERNS};

/// Inputs closer together than this read as one statement split in two.
pub const QUICK_FOLLOW_UP_MILLIS: i64 = 10_000;

/// Ordered rule table evaluated against each utterance.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    rules: Vec<ExtractionRule>,
}

impl EntityExtractor {
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// Appended rules only fire for fields the built-in table left empty.
    pub fn add_rule(&mut self, rule: ExtractionRule) {
        self.rules.push(rule);
    }

    /// Extract fields from an utterance without touching any context.
    pub fn extract(&self, utterance: &str) -> ExtractedEntities {
        let text = NormalizedText::new(utterance);
        let mut entities = ExtractedEntities::default();

        for rule in &self.rules {
            if entities.has(rule.field) {
                continue;
            }

            let Some(value) = rule.apply(&text) else {
                continue;
            };

            assign(&mut entities, rule.field, value);

            if rule.certainty == Certainty::Explicit {
                entities.explicit_fields.insert(rule.field);
                if rule.field == EntityField::CompanionType {
                    entities.explicit_fields.insert(EntityField::HasCompanion);
                }
            }
        }

        entities.early_exit = EARLY_EXIT_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(text.folded()));
        entities.affirmed = is_affirmation(text.folded());

        entities
    }

    /// Extract, merge into `context`, and recommend the next stage.
    ///
    /// The recommendation reads the context after the merge together with
    /// the context's camera flag. Unmatched input leaves the context alone
    /// and returns whatever stage it already implies.
    pub fn process_user_input(&self, context: &mut SessionContext, utterance: &str) -> ProcessingResult {
        self.process_user_input_at(context, utterance, Utc::now().timestamp_millis())
    }

    /// `process_user_input` with the arrival time supplied by the caller.
    pub fn process_user_input_at(
        &self,
        context: &mut SessionContext,
        utterance: &str,
        now_millis: i64,
    ) -> ProcessingResult {
        let entities = self.extract(utterance);
        let benefit_known_before = context.benefit_number().is_some();

        let quick_follow_up = context
            .last_input_time()
            .map_or(true, |last| now_millis - last < QUICK_FOLLOW_UP_MILLIS);
        context.set_last_input_time(now_millis);

        let should_advance_state = should_advance(&entities, quick_follow_up, context.current_stage());
        let conflicting_entities = context.merge(&entities);

        let camera_verified = context.camera_verified();
        let recommended_state = if entities.early_exit {
            Stage::EarlyExit
        } else {
            StageRecommender::recommend(context, camera_verified)
        };

        let confidence = score_confidence(
            recommended_state,
            &entities,
            benefit_known_before,
            camera_verified,
        );

        debug!(
            fields = ?entities.present_fields(),
            recommended = %recommended_state,
            confidence,
            should_advance_state,
            conflicts = ?conflicting_entities,
            "Processed user input"
        );

        ProcessingResult {
            has_multiple_entities: entities.significance() > 1,
            should_advance_state,
            entities,
            recommended_state,
            confidence,
            conflicting_entities,
        }
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn assign(entities: &mut ExtractedEntities, field: EntityField, value: String) {
    match field {
        EntityField::Name => entities.name = Some(value),
        EntityField::PreferredTreatment => entities.preferred_treatment = Some(value),
        EntityField::BenefitNumber => entities.benefit_number = Some(value),
        EntityField::RequestedAmount => entities.requested_amount = Some(value),
        EntityField::Purpose => entities.purpose = Some(value),
        EntityField::HasCompanion => entities.has_companion = Some(value == "true"),
        EntityField::CompanionType => {
            entities.has_companion = Some(true);
            entities.companion_type = Some(value);
        }
    }
}

/// Whether this input justifies skipping ahead rather than one step.
fn should_advance(entities: &ExtractedEntities, quick_follow_up: bool, current: Stage) -> bool {
    let significance = entities.significance();

    significance >= 2
        || (significance >= 1 && quick_follow_up && current.is_early())
        || (entities.benefit_number.is_some() && entities.requested_amount.is_some())
}

/// How sure we are that `stage` is right given what this utterance said.
fn score_confidence(
    stage: Stage,
    entities: &ExtractedEntities,
    benefit_known_before: bool,
    camera_verified: bool,
) -> f32 {
    let benefit_now = entities.benefit_number.is_some();
    let amount_now = entities.requested_amount.is_some();

    match stage {
        Stage::Greeting => 0.0,
        Stage::EarlyExit => 0.9,
        Stage::LoanSimulation if benefit_now && amount_now => 0.9,
        Stage::LoanSimulation if benefit_known_before && amount_now => 0.8,
        Stage::LoanSimulation if camera_verified => 0.7,
        Stage::CameraVerification => 0.85,
        Stage::BenefitVerification => 0.75,
        Stage::IdentifyNeed if entities.purpose.is_some() && !benefit_now => 0.6,
        Stage::IdentifyNeed if entities.name.is_some() || entities.preferred_treatment.is_some() => 0.5,
        _ => 0.3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_PHRASE: &str = "Meu nome é Joao. Meu benefício é 123456. Quero um empréstimo de R$ 50.000 para reforma. Estou com meu filho.";

    #[test]
    fn test_extracts_entities_and_updates_context() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();

        let result = extractor.process_user_input(&mut context, FULL_PHRASE);

        assert_eq!(result.entities.name.as_deref(), Some("Joao"));
        assert_eq!(result.entities.benefit_number.as_deref(), Some("123456"));
        assert_eq!(result.entities.requested_amount.as_deref(), Some("R$ 50.000"));
        assert_eq!(result.entities.purpose.as_deref(), Some("reforma"));
        assert_eq!(result.entities.has_companion, Some(true));
        assert_eq!(result.entities.companion_type.as_deref(), Some("filho(a)"));
        assert_eq!(result.recommended_state, Stage::LoanSimulation);
        assert!(result.has_multiple_entities);

        assert_eq!(context.name(), Some("Joao"));
        assert_eq!(context.benefit_number(), Some("123456"));
        assert_eq!(context.requested_amount(), Some("R$ 50.000"));
        assert_eq!(context.purpose(), Some("reforma"));
        assert_eq!(context.has_companion(), Some(true));
        assert_eq!(context.companion_type(), Some("filho(a)"));
        assert!(context.is_confirmed(EntityField::BenefitNumber));
    }

    #[test]
    fn test_recommends_simulation_when_camera_verified() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        context.set_camera_verified(true);

        let result = extractor.process_user_input(
            &mut context,
            "Meu benefício é 654321 e quero um empréstimo de R$ 10.000",
        );
        assert_eq!(result.recommended_state, Stage::LoanSimulation);
    }

    #[test]
    fn test_context_persists_across_inputs() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();

        extractor.process_user_input(&mut context, "Meu nome é Maria");
        assert_eq!(context.name(), Some("Maria"));
        assert_eq!(context.benefit_number(), None);

        extractor.process_user_input(&mut context, "Número do benefício 111222");
        assert_eq!(context.name(), Some("Maria"));
        assert_eq!(context.benefit_number(), Some("111222"));
    }

    #[test]
    fn test_unmatched_input_is_empty_and_keeps_stage() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();

        let result = extractor.process_user_input(&mut context, "bom dia, tudo bem?");
        assert!(result.entities.is_empty());
        assert_eq!(result.recommended_state, Stage::Greeting);
        assert_eq!(result.confidence, 0.0);

        extractor.process_user_input(&mut context, "me chamo Antônio");
        let result = extractor.process_user_input(&mut context, "hmm, deixa eu pensar");
        assert_eq!(result.recommended_state, Stage::IdentifyNeed);
        assert_eq!(context.name(), Some("Antônio"));
    }

    #[test]
    fn test_tentative_benefit_routes_to_verification_until_affirmed() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();

        let result = extractor.process_user_input(&mut context, "anota aí 7654321 e quero 20 mil");
        assert_eq!(context.benefit_number(), Some("7654321"));
        assert!(!context.is_confirmed(EntityField::BenefitNumber));
        assert_eq!(result.recommended_state, Stage::BenefitVerification);

        let result = extractor.process_user_input(&mut context, "sim, isso mesmo");
        assert!(result.entities.affirmed);
        assert!(context.is_confirmed(EntityField::BenefitNumber));
        assert_eq!(result.recommended_state, Stage::LoanSimulation);
    }

    #[test]
    fn test_early_exit_overrides_recommendation() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        extractor.process_user_input(&mut context, "Meu benefício é 123456 e quero R$ 5.000");

        let result = extractor.process_user_input(&mut context, "Ah, deixa pra lá, não quero mais");
        assert!(result.entities.early_exit);
        assert_eq!(result.recommended_state, Stage::EarlyExit);
        assert_eq!(context.benefit_number(), Some("123456"));
    }

    #[test]
    fn test_amount_completing_stored_benefit_scores_lower() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        extractor.process_user_input(&mut context, "meu benefício é 123456");

        let result = extractor.process_user_input(&mut context, "quero um empréstimo de R$ 8.000");
        assert_eq!(result.recommended_state, Stage::LoanSimulation);
        assert_eq!(result.confidence, 0.8);
    }

    #[test]
    fn test_denial_does_not_confirm_tentative_fields() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        extractor.process_user_input(&mut context, "anota aí 7654321 e quero 20 mil");

        for denial in ["Não, não está certo", "não, isso não é correto"] {
            let result = extractor.process_user_input(&mut context, denial);
            assert!(!result.entities.affirmed, "{}", denial);
            assert!(context.confirmed_entities().is_empty());
            assert_eq!(result.recommended_state, Stage::BenefitVerification);
        }
    }

    #[test]
    fn test_benefit_followed_by_sentence_keeps_its_digits() {
        let extractor = EntityExtractor::new();
        let entities = extractor.extract("Meu benefício é 123456. 20 mil para reforma");
        assert_eq!(entities.benefit_number.as_deref(), Some("123456"));
        assert_eq!(entities.requested_amount.as_deref(), Some("R$ 20.000,00"));
    }

    #[test]
    fn test_advances_on_significant_input() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        context.set_current_stage(Stage::LoanSimulation);
        context.set_last_input_time(0);

        // Benefit alone weighs two, regardless of timing or stage.
        let result = extractor.process_user_input_at(&mut context, "meu benefício é 123456", 60_000);
        assert!(result.should_advance_state);

        let result = extractor.process_user_input_at(&mut context, "é para reforma", 120_000);
        assert!(!result.should_advance_state);
    }

    #[test]
    fn test_advances_on_quick_follow_up_in_early_stage() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();

        // First input counts as a follow-up; purpose weighs one.
        let result = extractor.process_user_input_at(&mut context, "é para reforma", 1_000);
        assert!(result.should_advance_state);
        assert_eq!(context.last_input_time(), Some(1_000));

        let result = extractor.process_user_input_at(&mut context, "é para reforma", 5_000);
        assert!(result.should_advance_state);

        let result = extractor.process_user_input_at(&mut context, "é para reforma", 20_000);
        assert!(!result.should_advance_state);

        context.set_current_stage(Stage::BenefitVerification);
        let result = extractor.process_user_input_at(&mut context, "é para reforma", 21_000);
        assert!(!result.should_advance_state);
    }

    #[test]
    fn test_advances_when_benefit_and_amount_arrive_together() {
        let extractor = EntityExtractor::new();
        let mut context = SessionContext::new();
        context.set_current_stage(Stage::Confirmation);
        context.set_last_input_time(0);

        let result = extractor.process_user_input_at(&mut context, "nb 123456, 20 mil", 90_000);
        assert!(result.entities.benefit_number.is_some());
        assert!(result.entities.requested_amount.is_some());
        assert!(result.should_advance_state);

        let result = extractor.process_user_input_at(&mut context, "bom dia", 200_000);
        assert!(!result.should_advance_state);
    }

    #[test]
    fn test_custom_rule_extends_table() {
        let mut extractor = EntityExtractor::new();
        extractor.add_rule(
            ExtractionRule::new(
                EntityField::Purpose,
                Certainty::Explicit,
                r"\bfor (home repairs)\b",
                |_text, caps| caps.get(1).map(|m| m.as_str().to_string()),
            )
            .unwrap(),
        );

        let entities = extractor.extract("It is for home repairs");
        assert_eq!(entities.purpose.as_deref(), Some("home repairs"));
        assert!(entities.is_explicit(EntityField::Purpose));
    }
}
