//! FSM unit tests

use fleetpush::deploy::fsm::{DeviceEvent, DeviceFsm, DevicePhase};
use fleetpush::errors::DeviceError;

#[test]
fn test_fsm_initial_state() {
    let fsm = DeviceFsm::new();
    assert_eq!(fsm.phase(), DevicePhase::Pending);
    assert!(fsm.error().is_none());
    assert_eq!(fsm.attempts(), 0);
}

#[test]
fn test_fsm_connection_retry_flow() {
    let mut fsm = DeviceFsm::new();
    let refused = DeviceError::Connection("refused".to_string());

    fsm.process(DeviceEvent::Render).unwrap();
    fsm.process(DeviceEvent::Connect).unwrap();
    assert!(fsm.can_retry(&refused, 2));
    assert!(!fsm.can_retry(&refused, 1));

    // Retry
    fsm.process(DeviceEvent::Retry).unwrap();
    assert_eq!(fsm.phase(), DevicePhase::Connecting);
    assert_eq!(fsm.attempts(), 2);
    assert!(!fsm.can_retry(&refused, 2));

    fsm.process(DeviceEvent::Fail(refused.clone())).unwrap();
    assert_eq!(fsm.phase(), DevicePhase::Failed);
    assert_eq!(fsm.reached(), DevicePhase::Connecting);
    assert_eq!(fsm.error(), Some(&refused));
}

#[test]
fn test_fsm_only_connection_errors_retry() {
    let mut fsm = DeviceFsm::new();
    fsm.process(DeviceEvent::Render).unwrap();
    fsm.process(DeviceEvent::Connect).unwrap();

    assert!(!fsm.can_retry(&DeviceError::Authentication("denied".into()), 5));
    assert!(!fsm.can_retry(&DeviceError::Push("exit 1".into()), 5));
    assert!(!fsm.can_retry(&DeviceError::Aborted("panic".into()), 5));

    // Past the connect phase a connection error is final
    fsm.process(DeviceEvent::Authenticate).unwrap();
    assert!(!fsm.can_retry(&DeviceError::Connection("timed out".into()), 5));
}

#[test]
fn test_fsm_invalid_transitions() {
    let mut fsm = DeviceFsm::new();

    // Can't connect before rendering
    assert!(fsm.process(DeviceEvent::Connect).is_err());
    // Can't retry outside the connect phase
    assert!(fsm.process(DeviceEvent::Retry).is_err());

    fsm.process(DeviceEvent::Render).unwrap();
    assert!(fsm.process(DeviceEvent::Push).is_err());
    assert_eq!(fsm.phase(), DevicePhase::Rendering);
}

#[test]
fn test_fsm_applied_is_terminal() {
    let mut fsm = DeviceFsm::new();
    for event in [
        DeviceEvent::Render,
        DeviceEvent::Connect,
        DeviceEvent::Authenticate,
        DeviceEvent::Push,
        DeviceEvent::Apply,
    ] {
        fsm.process(event).unwrap();
    }

    assert!(fsm.phase().is_terminal());
    assert!(fsm
        .process(DeviceEvent::Fail(DeviceError::Push("late".into())))
        .is_err());
    assert_eq!(fsm.phase(), DevicePhase::Applied);
    assert!(fsm.error().is_none());
}

#[test]
fn test_phase_display_matches_serde() {
    for phase in [
        DevicePhase::Pending,
        DevicePhase::Rendering,
        DevicePhase::Connecting,
        DevicePhase::Authenticating,
        DevicePhase::Pushing,
        DevicePhase::Applied,
        DevicePhase::Failed,
    ] {
        let json = serde_json::to_value(phase).unwrap();
        assert_eq!(json, phase.to_string());
    }
}
