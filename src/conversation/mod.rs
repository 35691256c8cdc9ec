//! Conversation stage machine
//!
//! Stages and their outgoing edges live in one static table. `transition`
//! is a pure lookup over that table: find the stage, find the event, take
//! the first branch whose guard holds, run its action. Anything not in the
//! table leaves the state untouched.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;
use crate::models::Stage;

//
// ================= Events =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationEvent {
    NameDetected,
    PurposeDetected,
    BenefitProvided,
    ValueProvided,
    BenefitAndValueProvided,
    BenefitConfirmed,
    CameraVerified,
    SimulationPresented,
    Understood,
    Confirmed,
    EarlyExit,
    Reset,
}

impl ConversationEvent {
    pub const ALL: [ConversationEvent; 12] = [
        ConversationEvent::NameDetected,
        ConversationEvent::PurposeDetected,
        ConversationEvent::BenefitProvided,
        ConversationEvent::ValueProvided,
        ConversationEvent::BenefitAndValueProvided,
        ConversationEvent::BenefitConfirmed,
        ConversationEvent::CameraVerified,
        ConversationEvent::SimulationPresented,
        ConversationEvent::Understood,
        ConversationEvent::Confirmed,
        ConversationEvent::EarlyExit,
        ConversationEvent::Reset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ConversationEvent::NameDetected => "NAME_DETECTED",
            ConversationEvent::PurposeDetected => "PURPOSE_DETECTED",
            ConversationEvent::BenefitProvided => "BENEFIT_PROVIDED",
            ConversationEvent::ValueProvided => "VALUE_PROVIDED",
            ConversationEvent::BenefitAndValueProvided => "BENEFIT_AND_VALUE_PROVIDED",
            ConversationEvent::BenefitConfirmed => "BENEFIT_CONFIRMED",
            ConversationEvent::CameraVerified => "CAMERA_VERIFIED",
            ConversationEvent::SimulationPresented => "SIMULATION_PRESENTED",
            ConversationEvent::Understood => "UNDERSTOOD",
            ConversationEvent::Confirmed => "CONFIRMED",
            ConversationEvent::EarlyExit => "EARLY_EXIT",
            ConversationEvent::Reset => "RESET",
        }
    }
}

impl fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ConversationEvent {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        ConversationEvent::ALL
            .iter()
            .copied()
            .find(|event| event.name() == wanted)
            .ok_or_else(|| EngineError::ConfigError(format!("unknown conversation event: {}", s)))
    }
}

//
// ================= State =================
//

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub camera_verified: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationState {
    pub value: Stage,
    pub context: ConversationContext,
}

//
// ================= Stage table =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Guard {
    Always,
    CameraVerified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Keep,
    MarkCameraVerified,
    ClearCameraVerified,
}

#[derive(Debug)]
struct Branch {
    guard: Guard,
    target: Stage,
    action: Action,
}

/// One stage with its description and outgoing edges.
#[derive(Debug)]
struct StageDefinition {
    stage: Stage,
    description: &'static str,
    on: &'static [(ConversationEvent, &'static [Branch])],
}

const fn go(target: Stage) -> Branch {
    Branch {
        guard: Guard::Always,
        target,
        action: Action::Keep,
    }
}

const fn when_camera_verified(target: Stage) -> Branch {
    Branch {
        guard: Guard::CameraVerified,
        target,
        action: Action::Keep,
    }
}

const fn go_and(target: Stage, action: Action) -> Branch {
    Branch {
        guard: Guard::Always,
        target,
        action,
    }
}

use ConversationEvent as E;

static STAGES: &[StageDefinition] = &[
    StageDefinition {
        stage: Stage::Greeting,
        description: "Cumprimenta o cliente e começa a entender o que ele precisa.",
        on: &[
            (E::NameDetected, &[go(Stage::IdentifyNeed)]),
            (E::PurposeDetected, &[go(Stage::IdentifyNeed)]),
            (E::BenefitAndValueProvided, &[go(Stage::LoanSimulation)]),
            (E::BenefitProvided, &[go(Stage::BenefitVerification)]),
            (E::ValueProvided, &[go(Stage::BenefitVerification)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::IdentifyNeed,
        description: "Coleta nome, forma de tratamento e finalidade do empréstimo.",
        on: &[
            (E::BenefitAndValueProvided, &[go(Stage::LoanSimulation)]),
            (E::BenefitProvided, &[go(Stage::BenefitVerification)]),
            (E::ValueProvided, &[go(Stage::BenefitVerification)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::BenefitVerification,
        description: "Confirma o número do benefício e consulta a margem disponível.",
        on: &[
            (E::BenefitAndValueProvided, &[go(Stage::LoanSimulation)]),
            (
                E::BenefitConfirmed,
                &[when_camera_verified(Stage::LoanSimulation), go(Stage::CameraVerification)],
            ),
            // Receiving the amount here counts as confirming the benefit.
            (
                E::ValueProvided,
                &[when_camera_verified(Stage::LoanSimulation), go(Stage::CameraVerification)],
            ),
            (E::CameraVerified, &[go_and(Stage::LoanSimulation, Action::MarkCameraVerified)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::CameraVerification,
        description: "Verifica a identidade pela câmera antes de simular valores.",
        on: &[
            (E::CameraVerified, &[go_and(Stage::LoanSimulation, Action::MarkCameraVerified)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::LoanSimulation,
        description: "Apresenta as opções de empréstimo com os dados coletados.",
        on: &[
            (E::SimulationPresented, &[go(Stage::UnderstandingCheck)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::UnderstandingCheck,
        description: "Confere se o cliente entendeu parcelas, prazo e valor total.",
        on: &[
            (E::Understood, &[go(Stage::Confirmation)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::Confirmation,
        description: "Registra a intenção de contratar e gera a documentação.",
        on: &[
            (E::Confirmed, &[go(Stage::Closing)]),
            (E::EarlyExit, &[go(Stage::EarlyExit)]),
        ],
    },
    StageDefinition {
        stage: Stage::Closing,
        description: "Encerra o atendimento de forma cordial.",
        on: &[(E::Reset, &[go_and(Stage::Greeting, Action::ClearCameraVerified)])],
    },
    StageDefinition {
        stage: Stage::EarlyExit,
        description: "Encerra quando o cliente desiste ou não tem interesse.",
        on: &[(E::Reset, &[go_and(Stage::Greeting, Action::ClearCameraVerified)])],
    },
];

//
// ================= Machine =================
//

pub struct ConversationMachine;

impl ConversationMachine {
    pub fn initial_state() -> ConversationState {
        ConversationState {
            value: Stage::Greeting,
            context: ConversationContext::default(),
        }
    }

    /// Apply one event. Guards see the context as it was before this
    /// transition's action runs.
    pub fn transition(state: ConversationState, event: ConversationEvent) -> ConversationState {
        let Some(branches) = Self::definition(state.value)
            .on
            .iter()
            .find(|(on_event, _)| *on_event == event)
            .map(|(_, branches)| *branches)
        else {
            return state;
        };

        let Some(branch) = branches.iter().find(|branch| match branch.guard {
            Guard::Always => true,
            Guard::CameraVerified => state.context.camera_verified,
        }) else {
            return state;
        };

        let mut context = state.context;
        match branch.action {
            Action::Keep => {}
            Action::MarkCameraVerified => context.camera_verified = true,
            Action::ClearCameraVerified => context.camera_verified = false,
        }

        ConversationState {
            value: branch.target,
            context,
        }
    }

    /// Events with an edge out of `stage`, in table order.
    pub fn accepted_events(stage: Stage) -> Vec<ConversationEvent> {
        Self::definition(stage).on.iter().map(|(event, _)| *event).collect()
    }

    pub fn description(stage: Stage) -> &'static str {
        Self::definition(stage).description
    }

    /// `- **<id>** – <description>` per stage, for prompt construction.
    pub fn stage_catalog_markdown() -> String {
        STAGES
            .iter()
            .map(|def| format!("- **{}** – {}", def.stage, def.description))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn definition(stage: Stage) -> &'static StageDefinition {
        // Every Stage variant has exactly one entry, in Stage::ALL order.
        let index = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0);
        &STAGES[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(stage: Stage, camera_verified: bool) -> ConversationState {
        ConversationState {
            value: stage,
            context: ConversationContext { camera_verified },
        }
    }

    #[test]
    fn test_table_covers_every_stage_in_order() {
        let stages: Vec<Stage> = STAGES.iter().map(|def| def.stage).collect();
        assert_eq!(stages, Stage::ALL.to_vec());
    }

    #[test]
    fn test_benefit_and_value_jumps_to_simulation() {
        let next = ConversationMachine::transition(
            ConversationMachine::initial_state(),
            ConversationEvent::BenefitAndValueProvided,
        );
        assert_eq!(next.value, Stage::LoanSimulation);
    }

    #[test]
    fn test_name_detected_moves_to_identify_need() {
        let next = ConversationMachine::transition(
            ConversationMachine::initial_state(),
            ConversationEvent::NameDetected,
        );
        assert_eq!(next.value, Stage::IdentifyNeed);
    }

    #[test]
    fn test_benefit_confirmed_guarded_by_camera() {
        let next = ConversationMachine::transition(
            at(Stage::BenefitVerification, false),
            ConversationEvent::BenefitConfirmed,
        );
        assert_eq!(next.value, Stage::CameraVerification);

        let next = ConversationMachine::transition(
            at(Stage::BenefitVerification, true),
            ConversationEvent::ValueProvided,
        );
        assert_eq!(next.value, Stage::LoanSimulation);
    }

    #[test]
    fn test_camera_verified_sets_flag() {
        let next = ConversationMachine::transition(
            at(Stage::CameraVerification, false),
            ConversationEvent::CameraVerified,
        );
        assert_eq!(next.value, Stage::LoanSimulation);
        assert!(next.context.camera_verified);
    }

    #[test]
    fn test_reset_from_terminal_clears_flag() {
        for terminal in [Stage::Closing, Stage::EarlyExit] {
            let next = ConversationMachine::transition(at(terminal, true), ConversationEvent::Reset);
            assert_eq!(next, ConversationMachine::initial_state());
        }

        // RESET is not an edge out of a live stage.
        let state = at(Stage::LoanSimulation, true);
        assert_eq!(ConversationMachine::transition(state, ConversationEvent::Reset), state);
    }

    #[test]
    fn test_unlisted_events_are_identity() {
        for stage in Stage::ALL {
            for camera_verified in [false, true] {
                let state = at(stage, camera_verified);
                let accepted = ConversationMachine::accepted_events(stage);
                for event in ConversationEvent::ALL.iter().filter(|e| !accepted.contains(*e)) {
                    assert_eq!(ConversationMachine::transition(state, *event), state);
                }
            }
        }
    }

    #[test]
    fn test_camera_flag_never_drops_outside_reset() {
        let mut state = at(Stage::BenefitVerification, false);
        state = ConversationMachine::transition(state, ConversationEvent::CameraVerified);
        for event in [
            ConversationEvent::SimulationPresented,
            ConversationEvent::Understood,
            ConversationEvent::Confirmed,
        ] {
            state = ConversationMachine::transition(state, event);
            assert!(state.context.camera_verified);
        }
        assert_eq!(state.value, Stage::Closing);
    }

    #[test]
    fn test_event_names_round_trip() {
        assert_eq!(
            "benefit_and_value_provided".parse::<ConversationEvent>().unwrap(),
            ConversationEvent::BenefitAndValueProvided
        );
        assert!("JUMP".parse::<ConversationEvent>().is_err());
        assert_eq!(
            serde_json::to_string(&ConversationEvent::CameraVerified).unwrap(),
            r#"{"type":"CAMERA_VERIFIED"}"#
        );
    }

    #[test]
    fn test_catalog_lists_every_stage() {
        let catalog = ConversationMachine::stage_catalog_markdown();
        assert_eq!(catalog.lines().count(), 9);
        assert!(catalog.starts_with("- **1_greeting** – "));
        assert!(!catalog.contains("**3_"));

        for stage in Stage::ALL {
            let description = ConversationMachine::description(stage);
            assert!(!description.is_empty());
            assert!(catalog.contains(&format!("- **{}** – {}", stage, description)));
        }
    }
}
