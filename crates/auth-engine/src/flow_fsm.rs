//! Interactive authorization flow state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐
//! │      Idle       │ (initial)
//! └────────┬────────┘
//!          │ Start
//!          ▼
//! ┌─────────────────┐  BindFailed
//! │    Starting     │ ─────────────────────────────► Failed
//! └────────┬────────┘
//!          │ ListenerReady
//!          ▼
//! ┌─────────────────┐  CallbackRejected
//! │  AwaitingUser   │ ─────────────────────────────► Failed
//! └────────┬────────┘  DeadlineElapsed
//!          │           ────────────────────────────► TimedOut
//!          │ CallbackReceived
//!          ▼
//! ┌─────────────────┐  ExchangeFailed
//! │   Exchanging    │ ─────────────────────────────► Failed
//! └────────┬────────┘
//!          │ ExchangeSucceeded
//!          ▼
//!      Completed
//!
//! Cancel from Starting, AwaitingUser or Exchanging ──► Cancelled
//! ```

use crate::{AuthError, AuthResult};
use rust_fsm::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub flow_machine(Idle)

    Idle => {
        Start => Starting
    },
    Starting => {
        ListenerReady => AwaitingUser,
        BindFailed => Failed,
        Cancel => Cancelled
    },
    AwaitingUser => {
        CallbackReceived => Exchanging,
        // Provider error or malformed redirect
        CallbackRejected => Failed,
        DeadlineElapsed => TimedOut,
        Cancel => Cancelled
    },
    Exchanging => {
        ExchangeSucceeded => Completed,
        ExchangeFailed => Failed,
        Cancel => Cancelled
    }
}

pub use flow_machine::Input as FlowMachineInput;
pub use flow_machine::State as FlowMachineState;
pub use flow_machine::StateMachine as FlowMachine;

/// Serializable view of the flow state for observers and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    Idle,
    Starting,
    AwaitingUser,
    Exchanging,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl FlowState {
    /// No further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowState::Completed | FlowState::Failed | FlowState::TimedOut | FlowState::Cancelled
        )
    }

    /// The attempt holds (or is acquiring) the listening port.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            FlowState::Starting | FlowState::AwaitingUser | FlowState::Exchanging
        )
    }
}

impl From<&FlowMachineState> for FlowState {
    fn from(state: &FlowMachineState) -> Self {
        match state {
            FlowMachineState::Idle => FlowState::Idle,
            FlowMachineState::Starting => FlowState::Starting,
            FlowMachineState::AwaitingUser => FlowState::AwaitingUser,
            FlowMachineState::Exchanging => FlowState::Exchanging,
            FlowMachineState::Completed => FlowState::Completed,
            FlowMachineState::Failed => FlowState::Failed,
            FlowMachineState::TimedOut => FlowState::TimedOut,
            FlowMachineState::Cancelled => FlowState::Cancelled,
        }
    }
}

/// Apply `input`, mapping a rejected transition into `AuthError`.
pub(crate) fn transition(machine: &mut FlowMachine, input: FlowMachineInput) -> AuthResult<FlowState> {
    let old_state = FlowState::from(machine.state());
    machine.consume(&input).map_err(|_| {
        AuthError::InvalidStateTransition(format!(
            "Cannot apply {:?} in state {:?}",
            input, old_state
        ))
    })?;
    let new_state = FlowState::from(machine.state());
    debug!(?old_state, ?new_state, "auth flow transition");
    Ok(new_state)
}
