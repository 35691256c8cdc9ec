//! Session context
//!
//! Everything the user has told us so far in one conversation, plus which
//! of those fields they explicitly committed to. One instance per active
//! conversation, owned by the caller and passed by `&mut` into the pipeline.

pub mod recommender;

pub use recommender::StageRecommender;

use serde::Serialize;
use std::collections::BTreeSet;

use crate::extraction::rules::whole_reais;
use crate::models::{EntityField, ExtractedEntities, Stage};

/// Fields collected so far. `confirmed_entities` only ever names fields
/// that currently hold a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub(crate) name: Option<String>,
    pub(crate) preferred_treatment: Option<String>,
    pub(crate) benefit_number: Option<String>,
    pub(crate) requested_amount: Option<String>,
    pub(crate) purpose: Option<String>,
    pub(crate) has_companion: Option<bool>,
    pub(crate) companion_type: Option<String>,
    pub(crate) camera_verified: bool,
    pub(crate) confirmed_entities: BTreeSet<EntityField>,
    /// Epoch millis of the previous utterance; runtime only.
    #[serde(skip)]
    pub(crate) last_input_time: Option<i64>,
    /// Stage the conversation machine is in; runtime only.
    #[serde(skip)]
    pub(crate) current_stage: Stage,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    // =============================
    // Accessors
    // =============================

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn preferred_treatment(&self) -> Option<&str> {
        self.preferred_treatment.as_deref()
    }

    pub fn benefit_number(&self) -> Option<&str> {
        self.benefit_number.as_deref()
    }

    pub fn requested_amount(&self) -> Option<&str> {
        self.requested_amount.as_deref()
    }

    pub fn purpose(&self) -> Option<&str> {
        self.purpose.as_deref()
    }

    pub fn has_companion(&self) -> Option<bool> {
        self.has_companion
    }

    pub fn companion_type(&self) -> Option<&str> {
        self.companion_type.as_deref()
    }

    pub fn confirmed_entities(&self) -> &BTreeSet<EntityField> {
        &self.confirmed_entities
    }

    pub fn is_confirmed(&self, field: EntityField) -> bool {
        self.confirmed_entities.contains(&field)
    }

    pub fn camera_verified(&self) -> bool {
        self.camera_verified
    }

    /// Verification flow hook. Callers that also drive a conversation
    /// machine must dispatch `CAMERA_VERIFIED` there in the same step.
    pub fn set_camera_verified(&mut self, verified: bool) {
        self.camera_verified = verified;
    }

    pub fn last_input_time(&self) -> Option<i64> {
        self.last_input_time
    }

    pub fn set_last_input_time(&mut self, now_millis: i64) {
        self.last_input_time = Some(now_millis);
    }

    pub fn current_stage(&self) -> Stage {
        self.current_stage
    }

    /// Kept in step with the conversation machine by whoever drives it.
    pub fn set_current_stage(&mut self, stage: Stage) {
        self.current_stage = stage;
    }

    /// String form of a stored field, `"true"`/`"false"` for the companion flag.
    pub fn value_of(&self, field: EntityField) -> Option<String> {
        match field {
            EntityField::Name => self.name.clone(),
            EntityField::PreferredTreatment => self.preferred_treatment.clone(),
            EntityField::BenefitNumber => self.benefit_number.clone(),
            EntityField::RequestedAmount => self.requested_amount.clone(),
            EntityField::Purpose => self.purpose.clone(),
            EntityField::HasCompanion => self.has_companion.map(|b| b.to_string()),
            EntityField::CompanionType => self.companion_type.clone(),
        }
    }

    pub fn has(&self, field: EntityField) -> bool {
        self.value_of(field).is_some()
    }

    /// No field collected. The camera flag does not count.
    pub fn is_empty(&self) -> bool {
        EntityField::ALL.iter().all(|field| !self.has(*field))
    }

    // =============================
    // Mutation
    // =============================

    /// Merge one utterance's extraction into the context.
    ///
    /// Present fields overwrite stored ones; absent fields never clear
    /// anything. Explicit fields become confirmed, a tentative value that
    /// differs from the stored one drops the confirmation, and an
    /// affirmation confirms whatever benefit/amount is on file.
    ///
    /// Returns the confirmed fields whose stored value was contradicted.
    pub fn merge(&mut self, entities: &ExtractedEntities) -> Vec<EntityField> {
        let mut conflicts = Vec::new();

        for field in entities.present_fields() {
            let incoming = match field {
                EntityField::Name => entities.name.clone(),
                EntityField::PreferredTreatment => entities.preferred_treatment.clone(),
                EntityField::BenefitNumber => entities.benefit_number.clone(),
                EntityField::RequestedAmount => entities.requested_amount.clone(),
                EntityField::Purpose => entities.purpose.clone(),
                EntityField::HasCompanion => entities.has_companion.map(|b| b.to_string()),
                EntityField::CompanionType => entities.companion_type.clone(),
            };
            let Some(incoming) = incoming else {
                continue;
            };

            let changed = self
                .value_of(field)
                .is_some_and(|stored| !same_value(field, &stored, &incoming));

            if changed && self.is_confirmed(field) {
                conflicts.push(field);
            }

            self.store(field, incoming);

            if entities.is_explicit(field) {
                self.confirmed_entities.insert(field);
            } else if changed {
                self.confirmed_entities.remove(&field);
            }
        }

        if entities.affirmed {
            self.confirm(EntityField::BenefitNumber);
            self.confirm(EntityField::RequestedAmount);
        }

        conflicts
    }

    /// Mark a field confirmed. Ignored (returns false) while the field is empty.
    pub fn confirm(&mut self, field: EntityField) -> bool {
        if !self.has(field) {
            return false;
        }
        self.confirmed_entities.insert(field);
        true
    }

    /// Back to the empty state, camera flag included.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn store(&mut self, field: EntityField, value: String) {
        match field {
            EntityField::Name => self.name = Some(value),
            EntityField::PreferredTreatment => self.preferred_treatment = Some(value),
            EntityField::BenefitNumber => self.benefit_number = Some(value),
            EntityField::RequestedAmount => self.requested_amount = Some(value),
            EntityField::Purpose => self.purpose = Some(value),
            EntityField::HasCompanion => self.has_companion = Some(value == "true"),
            EntityField::CompanionType => self.companion_type = Some(value),
        }
    }
}

/// Amounts compare by whole reais so "R$ 20.000" and "R$ 20.000,00" agree.
fn same_value(field: EntityField, stored: &str, incoming: &str) -> bool {
    if field == EntityField::RequestedAmount {
        if let (Some(a), Some(b)) = (whole_reais(stored), whole_reais(incoming)) {
            return a == b;
        }
    }
    stored == incoming
}
