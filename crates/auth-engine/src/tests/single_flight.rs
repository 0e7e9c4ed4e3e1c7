//! At most one attempt at a time; a newer attempt wins.

use super::harness::{free_port, port_is_free, wait_for_flow_state, BrowserAction, TestHarness};
use crate::{AuthError, FlowState};
use std::time::Duration;

#[tokio::test]
async fn second_attempt_cancels_first_and_reuses_port() {
    let h = TestHarness::new();
    let port = free_port();
    h.browser.push(BrowserAction::Ignore);
    h.browser.push(BrowserAction::approve("abc123"));

    let lifecycle = h.lifecycle.clone();
    let first = tokio::spawn(async move {
        lifecycle
            .authenticate_interactive(TestHarness::on_port(port))
            .await
    });
    wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser).await;
    assert_eq!(h.lifecycle.pending_attempt().unwrap().listener_port, port);

    let outcome = h
        .lifecycle
        .authenticate_interactive(TestHarness::on_port(port))
        .await
        .unwrap();
    assert_eq!(outcome.session.display_name(), "alice");

    let first = first.await.unwrap();
    assert!(matches!(first, Err(AuthError::Cancelled(_))));

    assert_eq!(h.browser.opened().len(), 2);
    assert_eq!(h.api.exchange_calls(), 1);
    assert!(h.lifecycle.status().authenticated);
}

#[tokio::test]
async fn only_one_pending_attempt_is_visible() {
    let h = TestHarness::new();
    h.browser.push(BrowserAction::Ignore);
    h.browser.push(BrowserAction::Ignore);

    let lifecycle = h.lifecycle.clone();
    let first =
        tokio::spawn(async move { lifecycle.authenticate_interactive(Default::default()).await });
    wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser).await;

    let lifecycle = h.lifecycle.clone();
    let second =
        tokio::spawn(async move { lifecycle.authenticate_interactive(Default::default()).await });

    // The first attempt ends before the second binds.
    let first = tokio::time::timeout(Duration::from_secs(5), first)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(first, Err(AuthError::Cancelled(_))));

    wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser).await;
    let pending = h.lifecycle.pending_attempt().unwrap();
    assert_ne!(pending.csrf_state(), "");

    assert!(h.lifecycle.cancel_attempt().await);
    let second = second.await.unwrap();
    assert!(matches!(second, Err(AuthError::Cancelled(_))));
    assert_eq!(h.lifecycle.flow_state(), FlowState::Idle);
    assert!(!h.lifecycle.cancel_attempt().await);
}

#[tokio::test]
async fn cancelled_attempt_never_touches_store() {
    let h = TestHarness::new();
    h.browser.push(BrowserAction::Ignore);

    let lifecycle = h.lifecycle.clone();
    let attempt =
        tokio::spawn(async move { lifecycle.authenticate_interactive(Default::default()).await });
    wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser).await;

    h.lifecycle.cancel_attempt().await;
    let result = attempt.await.unwrap();
    assert_eq!(result.unwrap_err().kind().as_str(), "cancelled");
    assert!(h.store.get().is_none());
    assert_eq!(h.api.exchange_calls(), 0);
}

#[tokio::test]
async fn dropped_attempt_frees_port_before_next_attempt_binds() {
    let h = TestHarness::new();
    let port = free_port();
    h.browser.push(BrowserAction::Ignore);
    h.browser.push(BrowserAction::approve("abc123"));

    // Abandon the first attempt while it is listening, the way a host-side
    // timeout or select would.
    tokio::select! {
        result = h.lifecycle.authenticate_interactive(TestHarness::on_port(port)) => {
            panic!("first attempt should still be waiting, got {result:?}");
        }
        _ = wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser) => {}
    }

    let outcome = h
        .lifecycle
        .authenticate_interactive(TestHarness::on_port(port))
        .await
        .unwrap();
    assert_eq!(outcome.session.display_name(), "alice");
    assert_eq!(h.browser.opened().len(), 2);
    assert_eq!(h.lifecycle.flow_state(), FlowState::Idle);
    assert!(port_is_free(port));
}

#[tokio::test]
async fn dropped_attempt_reads_as_idle_once_released() {
    let h = TestHarness::new();
    h.browser.push(BrowserAction::Ignore);

    tokio::select! {
        _ = h.lifecycle.authenticate_interactive(Default::default()) => {
            panic!("attempt should still be waiting");
        }
        _ = wait_for_flow_state(&h.lifecycle, FlowState::AwaitingUser) => {}
    }

    wait_for_flow_state(&h.lifecycle, FlowState::Idle).await;
    assert!(h.lifecycle.pending_attempt().is_none());
    assert!(!h.lifecycle.cancel_attempt().await);
}
