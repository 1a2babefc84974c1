mod common;

use common::{PollStep, ScriptedPoller, ScriptedSession};
use psk_server::{
    Error, ErrorClass, HandshakeDriver, HandshakeOptions, HandshakeState, Readiness, SessionError,
};
use std::time::Duration;

fn options() -> HandshakeOptions {
    HandshakeOptions {
        poll_timeout: Duration::from_millis(10),
    }
}

#[test]
fn immediate_success_needs_one_attempt() {
    let mut session = ScriptedSession::blocking_handshake(0, ErrorClass::WantRead);
    let mut poller = ScriptedPoller::new(vec![]);
    let mut driver = HandshakeDriver::new(options());

    driver.drive(&mut session, &mut poller).expect("handshake failed");

    assert_eq!(driver.attempts(), 1);
    assert_eq!(session.accept_calls, 1);
    assert_eq!(poller.waits(), 0);
    assert_eq!(driver.state(), &HandshakeState::Established);
}

#[test]
fn would_block_then_success_needs_n_plus_one_attempts() {
    for n in [1, 3, 7] {
        let mut session = ScriptedSession::blocking_handshake(n, ErrorClass::WantRead);
        let mut poller = ScriptedPoller::new(vec![PollStep::Ready(Readiness::Readable); n]);
        let mut driver = HandshakeDriver::new(options());

        driver.drive(&mut session, &mut poller).expect("handshake failed");

        assert_eq!(driver.attempts(), n + 1);
        assert_eq!(session.accept_calls, n + 1);
        assert_eq!(poller.waits(), n);
    }
}

#[test]
fn would_block_on_write_is_retried() {
    let mut session = ScriptedSession::blocking_handshake(2, ErrorClass::WantWrite);
    let mut poller = ScriptedPoller::new(vec![
        PollStep::Ready(Readiness::Readable),
        PollStep::Ready(Readiness::ErrorPending),
    ]);
    let mut driver = HandshakeDriver::new(options());

    driver.drive(&mut session, &mut poller).expect("handshake failed");

    assert_eq!(driver.attempts(), 3);
}

#[test]
fn poll_timeout_does_not_retry_the_handshake_on_streams() {
    let mut session = ScriptedSession::blocking_handshake(1, ErrorClass::WantWrite);
    let mut poller = ScriptedPoller::new(vec![
        PollStep::Ready(Readiness::TimedOut),
        PollStep::Ready(Readiness::TimedOut),
        PollStep::Ready(Readiness::Readable),
    ]);
    let mut driver = HandshakeDriver::new(options());

    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::WaitingWrite);
    // A timeout is treated as would-block on read.
    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::WaitingRead);
    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::WaitingRead);
    assert_eq!(driver.attempts(), 1);

    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::Handshaking);
    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::Established);
    assert_eq!(driver.attempts(), 2);
    assert_eq!(poller.timeouts, vec![Duration::from_millis(10); 3]);
}

#[test]
fn poll_failure_is_fatal_and_stops_attempts() {
    let mut session = ScriptedSession::blocking_handshake(5, ErrorClass::WantRead);
    let mut poller = ScriptedPoller::new(vec![
        PollStep::Ready(Readiness::Readable),
        PollStep::Fail,
        PollStep::Ready(Readiness::Readable),
    ]);
    let mut driver = HandshakeDriver::new(options());

    let err = driver.drive(&mut session, &mut poller).unwrap_err();

    assert!(matches!(err, Error::TlsHandshake(_)));
    assert!(matches!(driver.state(), HandshakeState::Failed(_)));
    assert_eq!(driver.attempts(), 2);
    assert_eq!(session.accept_calls, 2);
    assert_eq!(poller.waits(), 2);
}

#[test]
fn fatal_classification_fails_without_polling() {
    let mut session = ScriptedSession::new();
    session
        .accept_results
        .push_back(Err(SessionError::fatal("unknown psk identity")));
    let mut poller = ScriptedPoller::new(vec![]);
    let mut driver = HandshakeDriver::new(options());

    let err = driver.drive(&mut session, &mut poller).unwrap_err();

    assert!(err.to_string().contains("unknown psk identity"));
    assert!(err.is_connection_scoped());
    assert_eq!(driver.attempts(), 1);
    assert_eq!(poller.waits(), 0);
}

#[test]
fn peer_close_during_handshake_is_fatal() {
    let mut session = ScriptedSession::new();
    session
        .accept_results
        .push_back(Err(SessionError::new(ErrorClass::ZeroReturn, "closed")));
    let mut poller = ScriptedPoller::new(vec![]);

    let result = HandshakeDriver::new(options()).drive(&mut session, &mut poller);

    assert!(matches!(result, Err(Error::TlsHandshake(_))));
}

#[test]
fn datagram_poll_timeout_is_fatal() {
    let mut session = ScriptedSession::blocking_handshake(1, ErrorClass::WantRead);
    session.datagram = true;
    let mut poller = ScriptedPoller::new(vec![PollStep::Ready(Readiness::TimedOut)]);
    let mut driver = HandshakeDriver::new(options());

    assert!(driver.drive(&mut session, &mut poller).is_err());
    assert_eq!(driver.attempts(), 1);
}

#[test]
fn terminal_states_are_sticky() {
    let mut session = ScriptedSession::blocking_handshake(0, ErrorClass::WantRead);
    let mut poller = ScriptedPoller::new(vec![]);
    let mut driver = HandshakeDriver::new(options());

    driver.drive(&mut session, &mut poller).unwrap();
    assert!(driver.state().is_terminal());
    assert_eq!(driver.step(&mut session, &mut poller), &HandshakeState::Established);
    assert_eq!(driver.attempts(), 1);
}

#[test]
fn options_from_config() {
    let config = common::test_config(&[("handshake_poll_timeout_ms", "250")]);
    assert_eq!(
        HandshakeOptions::from_config(&config, "").poll_timeout,
        Duration::from_millis(250)
    );

    let config = common::test_config(&[]);
    assert_eq!(
        HandshakeOptions::from_config(&config, ""),
        HandshakeOptions::default()
    );
}
