//! Authentication for Encore.
//!
//! This crate provides:
//! - Browser-mediated authorization via a local HTTP callback listener
//! - Signed token exchange against the music web service
//! - An explicit FSM for each authorization attempt
//! - The session store and its durable record
//! - [`SessionLifecycle`], the façade hosts call

mod api;
mod browser;
mod callback;
mod error;
mod flow_fsm;
mod lifecycle;
mod orchestrator;
mod payload;
mod session;
mod session_store;
pub mod signer;

#[cfg(test)]
mod tests;

pub use api::{MusicApiClient, SessionApi};
pub use browser::{BrowserLauncher, PrintOnly, SystemBrowser};
pub use callback::{CallbackListener, CallbackResult, CALLBACK_PATH, HEALTH_PATH};
pub use error::{AuthError, AuthErrorKind, AuthResult};
pub use flow_fsm::flow_machine;
pub use flow_fsm::{FlowMachine, FlowMachineInput, FlowMachineState, FlowState};
pub use lifecycle::{AuthOptions, SessionLifecycle};
pub use orchestrator::{
    authorization_url, generate_state, AttemptProgress, AuthOrchestrator, AuthOutcome,
    AuthSettings, PendingAuthAttempt,
};
pub use payload::{FailurePayload, LifecyclePayload, SuccessPayload, WarningPayload};
pub use session::{redact, AuthStatus, Session, REDACTED};
pub use session_store::SessionStore;
