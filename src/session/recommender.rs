//! Next-stage recommendation from what the session already knows

use super::SessionContext;
use crate::models::{EntityField, Stage};

/// Pure mapping from collected fields to the stage the dialogue should be in.
pub struct StageRecommender;

impl StageRecommender {
    /// Rows are checked top to bottom:
    ///
    /// | known | result |
    /// |---|---|
    /// | benefit + amount, camera verified or benefit confirmed | `6_loan_simulation` |
    /// | amount without benefit | `4_benefit_verification` |
    /// | benefit unconfirmed, camera not verified | `4_benefit_verification` |
    /// | benefit, camera verified | `6_loan_simulation` (asks for the amount) |
    /// | benefit confirmed | `5_camera_verification` |
    /// | identity, purpose or companion only | `2_identify_need` |
    /// | nothing | `1_greeting` |
    pub fn recommend(context: &SessionContext, camera_verified: bool) -> Stage {
        let benefit = context.benefit_number().is_some();
        let amount = context.requested_amount().is_some();
        let benefit_confirmed = context.is_confirmed(EntityField::BenefitNumber);

        if benefit && amount && (camera_verified || benefit_confirmed) {
            return Stage::LoanSimulation;
        }

        if benefit || amount {
            return if !benefit || (!benefit_confirmed && !camera_verified) {
                Stage::BenefitVerification
            } else if camera_verified {
                Stage::LoanSimulation
            } else {
                Stage::CameraVerification
            };
        }

        if context.is_empty() {
            Stage::Greeting
        } else {
            Stage::IdentifyNeed
        }
    }
}
