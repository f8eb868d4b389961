//! Slot FSM unit tests

use bluegreen::deploy::fsm::{check_invariants, SlotEvent};
use bluegreen::models::slot::{InstanceRef, SlotState, SlotStatus};

fn instance(id: &str) -> InstanceRef {
    InstanceRef {
        id: id.to_string(),
        name: format!("bluegreen-m1-{}", id),
        address: None,
    }
}

fn active(version: &str) -> SlotState {
    let mut state = SlotState::idle();
    state.process(SlotEvent::Deploy).unwrap();
    state
        .process(SlotEvent::Promote {
            version: version.to_string(),
            instance: instance("a"),
        })
        .unwrap();
    state
}

#[test]
fn test_initial_state() {
    let state = SlotState::idle();
    assert_eq!(state.status, SlotStatus::Idle);
    assert!(state.version.is_none());
    assert!(state.instance.is_none());
    assert!(state.deployed_at.is_none());
}

#[test]
fn test_deploy_failure_flow() {
    let mut state = SlotState::idle();

    state.process(SlotEvent::Deploy).unwrap();
    state
        .process(SlotEvent::Fail {
            reason: "image pull failed".to_string(),
            version: Some("v2".to_string()),
            instance: None,
        })
        .unwrap();

    assert_eq!(state.status, SlotStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("image pull failed"));
    assert_eq!(state.version.as_deref(), Some("v2"));

    // A failed slot can be redeployed and forgets the error
    state.process(SlotEvent::Deploy).unwrap();
    assert_eq!(state.status, SlotStatus::Deploying);
    assert!(state.last_error.is_none());
}

#[test]
fn test_redeploy_of_active_slot() {
    let mut state = active("v1");
    let first_deploy = state.deployed_at;

    state.process(SlotEvent::Deploy).unwrap();
    assert_eq!(state.status, SlotStatus::Deploying);

    state
        .process(SlotEvent::Promote {
            version: "v2".to_string(),
            instance: instance("b"),
        })
        .unwrap();
    assert_eq!(state.version.as_deref(), Some("v2"));
    assert!(state.deployed_at >= first_deploy);
}

#[test]
fn test_deploying_slot_cannot_be_deployed_again() {
    let mut state = SlotState::idle();
    state.process(SlotEvent::Deploy).unwrap();

    assert!(state.process(SlotEvent::Deploy).is_err());
    assert_eq!(state.status, SlotStatus::Deploying);
}

#[test]
fn test_restarted_keeps_version_and_deploy_time() {
    let mut state = active("v1");
    let deployed_at = state.deployed_at;

    state
        .process(SlotEvent::Restarted {
            instance: instance("b"),
        })
        .unwrap();

    assert_eq!(state.status, SlotStatus::Active);
    assert_eq!(state.version.as_deref(), Some("v1"));
    assert_eq!(state.deployed_at, deployed_at);
}

#[test]
fn test_restarted_requires_active_slot() {
    let mut state = SlotState::idle();
    let result = state.process(SlotEvent::Restarted {
        instance: instance("a"),
    });
    assert!(result.is_err());
    assert_eq!(state.status, SlotStatus::Idle);
}

#[test]
fn test_restore_returns_previous_state() {
    let previous = active("v1");
    let mut state = previous.clone();

    state.process(SlotEvent::Deploy).unwrap();
    state.process(SlotEvent::Restore(previous.clone())).unwrap();

    assert_eq!(state.status, SlotStatus::Active);
    assert_eq!(state.version, previous.version);
    assert_eq!(state.instance, previous.instance);
}

#[test]
fn test_restore_only_while_deploying() {
    let mut state = active("v1");
    assert!(state.process(SlotEvent::Restore(SlotState::idle())).is_err());
    assert_eq!(state.status, SlotStatus::Active);
}

#[test]
fn test_discover_only_from_idle() {
    let mut state = SlotState::idle();
    state
        .process(SlotEvent::Discover {
            version: "v3".to_string(),
            instance: instance("a"),
        })
        .unwrap();
    assert_eq!(state.status, SlotStatus::Active);
    assert_eq!(state.version.as_deref(), Some("v3"));

    let result = state.process(SlotEvent::Discover {
        version: "v4".to_string(),
        instance: instance("b"),
    });
    assert!(result.is_err());
    assert_eq!(state.version.as_deref(), Some("v3"));
}

#[test]
fn test_active_failure_keeps_reason() {
    let mut state = active("v1");
    state
        .process(SlotEvent::Fail {
            reason: "unhealthy after restart".to_string(),
            version: Some("v1".to_string()),
            instance: Some(instance("a")),
        })
        .unwrap();

    assert_eq!(state.status, SlotStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("unhealthy after restart"));
}

#[test]
fn test_invariants() {
    let mut state = SlotState::idle();
    assert!(check_invariants(&state).is_ok());

    state.status = SlotStatus::Active;
    assert!(check_invariants(&state).is_err());

    state.version = Some("v1".to_string());
    state.instance = Some(instance("a"));
    assert!(check_invariants(&state).is_ok());
}
