//! Scenario tests for the session lifecycle.
//!
//! Every test drives `SessionLifecycle` (or a single `AuthOrchestrator`) over
//! real loopback sockets:
//!
//! - `harness.rs`      - FakeApi, ScriptedBrowser, FailingStorage, TestHarness
//! - `interactive.rs`  - browser flow outcomes: approve, deny, malformed, strict state
//! - `single_flight.rs`- a second attempt cancels the first and reuses its port
//! - `timeout.rs`      - deadline expiry releases the port
//! - `adopt.rs`        - adopting an externally obtained session key
//! - `persistence.rs`  - restore after restart, logout, invalidation, persist failures

pub(crate) mod harness;
mod single_flight;
