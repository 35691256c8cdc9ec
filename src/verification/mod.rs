//! Camera verification workflow
//!
//! Externally driven: the capture pipeline reports progress, completion or
//! failure as events, and the machine only records them. There are no
//! timers here; timestamps are wall-clock millis stamped on transition.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ================= Failure payload =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraErrorKind {
    PermissionDenied,
    DeviceUnavailable,
    Timeout,
    Other,
}

/// Error carried into the context by `ERROR`, kept for inspection.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct VerificationFailure {
    pub kind: CameraErrorKind,
    pub message: String,
}

impl VerificationFailure {
    pub fn new(kind: CameraErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

//
// ================= State =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPhase {
    Idle,
    Preparing,
    Analyzing,
    Verifying,
    Completed,
    Failed,
}

impl VerificationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VerificationPhase::Completed | VerificationPhase::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationContext {
    pub step: u32,
    pub start_time: Option<i64>,
    pub completion_time: Option<i64>,
    pub error: Option<VerificationFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationState {
    pub value: VerificationPhase,
    pub context: VerificationContext,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationEvent {
    Start,
    Progress { step: u32 },
    Complete,
    Cancel,
    Error { error: VerificationFailure },
}

//
// ================= Machine =================
//

/// Step recorded on completion.
pub const COMPLETED_STEP: u32 = 4;

pub struct VerificationMachine;

impl VerificationMachine {
    pub fn initial_state() -> VerificationState {
        VerificationState {
            value: VerificationPhase::Idle,
            context: VerificationContext::default(),
        }
    }

    pub fn transition(state: VerificationState, event: VerificationEvent) -> VerificationState {
        Self::transition_at(state, event, Utc::now().timestamp_millis())
    }

    /// Same as `transition` with an explicit clock reading.
    pub fn transition_at(
        state: VerificationState,
        event: VerificationEvent,
        now_millis: i64,
    ) -> VerificationState {
        use VerificationPhase::*;

        let VerificationState { value, mut context } = state;

        let next = match (value, event) {
            (Idle | Failed, VerificationEvent::Start) => {
                context.step = 1;
                context.start_time = Some(now_millis);
                context.error = None;
                Preparing
            }
            (Completed, VerificationEvent::Start) => {
                context.step = 1;
                context.start_time = Some(now_millis);
                context.error = None;
                context.completion_time = None;
                Preparing
            }

            // A stale or repeated report never moves the step backwards.
            (Preparing, VerificationEvent::Progress { step }) => {
                context.step = context.step.max(step);
                Analyzing
            }
            (Analyzing, VerificationEvent::Progress { step }) => {
                context.step = context.step.max(step);
                Verifying
            }

            (Verifying, VerificationEvent::Complete) => {
                context.step = COMPLETED_STEP;
                context.completion_time = Some(now_millis);
                Completed
            }

            (Preparing | Analyzing | Verifying, VerificationEvent::Error { error }) => {
                context.error = Some(error);
                Failed
            }

            (Preparing | Analyzing | Verifying, VerificationEvent::Cancel) => {
                context.step = 0;
                context.start_time = None;
                context.error = None;
                Idle
            }

            (phase, _) => phase,
        };

        VerificationState {
            value: next,
            context,
        }
    }
}
