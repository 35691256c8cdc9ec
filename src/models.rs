//! Core data models shared by the extraction pipeline and both state machines

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

//
// ================= Stage =================
//

/// A named phase of the loan-qualification dialogue.
///
/// Identifier `3` does not exist; the numbering is part of the external
/// contract and must not be compacted.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    #[default]
    #[serde(rename = "1_greeting")]
    Greeting,
    #[serde(rename = "2_identify_need")]
    IdentifyNeed,
    #[serde(rename = "4_benefit_verification")]
    BenefitVerification,
    #[serde(rename = "5_camera_verification")]
    CameraVerification,
    #[serde(rename = "6_loan_simulation")]
    LoanSimulation,
    #[serde(rename = "7_understanding_check")]
    UnderstandingCheck,
    #[serde(rename = "8_confirmation")]
    Confirmation,
    #[serde(rename = "9_closing")]
    Closing,
    #[serde(rename = "10_early_exit")]
    EarlyExit,
}

impl Stage {
    /// All stages in dialogue order.
    pub const ALL: [Stage; 9] = [
        Stage::Greeting,
        Stage::IdentifyNeed,
        Stage::BenefitVerification,
        Stage::CameraVerification,
        Stage::LoanSimulation,
        Stage::UnderstandingCheck,
        Stage::Confirmation,
        Stage::Closing,
        Stage::EarlyExit,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Stage::Greeting => "1_greeting",
            Stage::IdentifyNeed => "2_identify_need",
            Stage::BenefitVerification => "4_benefit_verification",
            Stage::CameraVerification => "5_camera_verification",
            Stage::LoanSimulation => "6_loan_simulation",
            Stage::UnderstandingCheck => "7_understanding_check",
            Stage::Confirmation => "8_confirmation",
            Stage::Closing => "9_closing",
            Stage::EarlyExit => "10_early_exit",
        }
    }

    /// `9_closing` and `10_early_exit` only accept `RESET`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Closing | Stage::EarlyExit)
    }

    /// Opening stages, where jumping several steps ahead is expected.
    pub fn is_early(&self) -> bool {
        matches!(self, Stage::Greeting | Stage::IdentifyNeed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Stage {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .iter()
            .copied()
            .find(|stage| stage.id() == s.trim())
            .ok_or_else(|| EngineError::UnknownStage(s.to_string()))
    }
}

//
// ================= Entity fields =================
//

/// Names of the fields a user utterance can fill in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum EntityField {
    Name,
    PreferredTreatment,
    BenefitNumber,
    RequestedAmount,
    Purpose,
    HasCompanion,
    CompanionType,
}

impl EntityField {
    pub const ALL: [EntityField; 7] = [
        EntityField::Name,
        EntityField::PreferredTreatment,
        EntityField::BenefitNumber,
        EntityField::RequestedAmount,
        EntityField::Purpose,
        EntityField::HasCompanion,
        EntityField::CompanionType,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityField::Name => "name",
            EntityField::PreferredTreatment => "preferredTreatment",
            EntityField::BenefitNumber => "benefitNumber",
            EntityField::RequestedAmount => "requestedAmount",
            EntityField::Purpose => "purpose",
            EntityField::HasCompanion => "hasCompanion",
            EntityField::CompanionType => "companionType",
        }
    }

    /// Lenient lookup used at the storage boundary; unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        EntityField::ALL
            .iter()
            .copied()
            .find(|field| field.as_str() == name)
    }
}

impl fmt::Display for EntityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//
// ================= Extraction =================
//

/// Fields found in a single utterance. Absent fields are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedEntities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_treatment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub benefit_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_companion: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub companion_type: Option<String>,
    #[serde(default)]
    pub early_exit: bool,
    /// The utterance contained an affirmation ("sim", "isso mesmo", ...)
    #[serde(default)]
    pub affirmed: bool,
    /// Fields matched by an explicit cue phrase rather than a fallback heuristic
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub explicit_fields: BTreeSet<EntityField>,
}

impl ExtractedEntities {
    /// Fields carrying a value, in declaration order.
    pub fn present_fields(&self) -> Vec<EntityField> {
        EntityField::ALL
            .iter()
            .copied()
            .filter(|field| self.has(*field))
            .collect()
    }

    pub fn has(&self, field: EntityField) -> bool {
        match field {
            EntityField::Name => self.name.is_some(),
            EntityField::PreferredTreatment => self.preferred_treatment.is_some(),
            EntityField::BenefitNumber => self.benefit_number.is_some(),
            EntityField::RequestedAmount => self.requested_amount.is_some(),
            EntityField::Purpose => self.purpose.is_some(),
            EntityField::HasCompanion => self.has_companion.is_some(),
            EntityField::CompanionType => self.companion_type.is_some(),
        }
    }

    pub fn is_explicit(&self, field: EntityField) -> bool {
        self.explicit_fields.contains(&field)
    }

    /// No field and no signal was found.
    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty() && !self.early_exit && !self.affirmed
    }

    /// Weighted count of decision-relevant fields. Benefit and amount
    /// dominate; identity details barely move the needle.
    pub fn significance(&self) -> u32 {
        let mut weight = 0.0_f32;
        if self.benefit_number.is_some() {
            weight += 2.0;
        }
        if self.requested_amount.is_some() {
            weight += 2.0;
        }
        if self.purpose.is_some() {
            weight += 1.0;
        }
        if self.name.is_some() {
            weight += 0.5;
        }
        if self.preferred_treatment.is_some() {
            weight += 0.5;
        }
        if self.has_companion == Some(true) {
            weight += 0.5;
        }
        weight.floor() as u32
    }
}

//
// ================= Processing result =================
//

/// Outcome of feeding one utterance through extract → merge → recommend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingResult {
    pub entities: ExtractedEntities,
    pub has_multiple_entities: bool,
    /// Enough was said to skip ahead instead of moving one step.
    pub should_advance_state: bool,
    pub recommended_state: Stage,
    pub confidence: f32,
    pub conflicting_entities: Vec<EntityField>,
}
