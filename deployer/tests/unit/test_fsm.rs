//! Background job FSM tests

use rdeploy::deploy::fsm::{JobEvent, JobFsm, JobState};

#[test]
fn test_fsm_initial_state() {
    let fsm = JobFsm::new();
    assert_eq!(fsm.state(), JobState::Starting);
    assert!(fsm.error().is_none());
    assert!(fsm.ended_in().is_none());
}

#[test]
fn test_fsm_stop_while_tailing() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Launched).unwrap();
    fsm.process(JobEvent::StopRequested).unwrap();
    assert_eq!(fsm.state(), JobState::Stopped);
    assert!(fsm.state().is_terminal());

    fsm.process(JobEvent::Cleanup).unwrap();
    assert_eq!(fsm.ended_in(), Some(JobState::Stopped));
}

#[test]
fn test_fsm_stop_before_launch() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::StopRequested).unwrap();
    fsm.process(JobEvent::Cleanup).unwrap();
    assert_eq!(fsm.ended_in(), Some(JobState::Stopped));
}

#[test]
fn test_fsm_timeouts() {
    let mut idle = JobFsm::new();
    idle.process(JobEvent::Launched).unwrap();
    idle.process(JobEvent::IdleElapsed).unwrap();
    assert_eq!(idle.state(), JobState::IdleTimeout);
    assert!(idle.state().is_timeout());

    let mut hard = JobFsm::new();
    hard.process(JobEvent::Launched).unwrap();
    hard.process(JobEvent::DeadlineElapsed).unwrap();
    assert_eq!(hard.state(), JobState::HardTimeout);
    assert!(hard.state().is_timeout());
    assert!(!JobState::Done.is_timeout());
}

#[test]
fn test_fsm_cleanup_runs_once() {
    let mut fsm = JobFsm::new();

    fsm.process(JobEvent::Launched).unwrap();
    fsm.process(JobEvent::SentinelSeen).unwrap();
    fsm.process(JobEvent::Cleanup).unwrap();

    assert!(fsm.process(JobEvent::Cleanup).is_err());
    assert_eq!(fsm.state(), JobState::CleanedUp);
}

#[test]
fn test_fsm_invalid_transition() {
    let mut fsm = JobFsm::new();

    // Cannot see the done flag before launching
    assert!(fsm.process(JobEvent::SentinelSeen).is_err());
    assert_eq!(fsm.state(), JobState::Starting);

    // Terminal states do not move on except through cleanup
    fsm.process(JobEvent::Launched).unwrap();
    fsm.process(JobEvent::IdleElapsed).unwrap();
    assert!(fsm.process(JobEvent::SentinelSeen).is_err());
    assert!(fsm.process(JobEvent::Failed("late".to_string())).is_err());
}
