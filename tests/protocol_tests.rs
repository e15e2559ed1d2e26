//! Unit tests for the gate-dial and SIM-unlock state machines.

#[path = "../src/protocol.rs"]
mod protocol;

use protocol::{DialProtocol, PinMonitor, MAX_DIAL_ATTEMPTS};

fn dial() -> DialProtocol {
    DialProtocol::new("+36300000000", "+36301112222")
}

#[test]
fn fresh_procedure_has_budget() {
    let mut d = dial();
    assert!(!d.budget_exhausted(0));
    assert_eq!(d.attempts(), 0);
    assert!(d.failure().is_none());
}

#[test]
fn dial_rejections_exhaust_the_budget() {
    let mut d = dial();
    for i in 0..MAX_DIAL_ATTEMPTS {
        assert!(!d.budget_exhausted(i as u64));
        d.dial_rejected(i as u64, "ERROR");
    }
    assert!(d.budget_exhausted(99));
    let failure = d.failure().unwrap();
    assert!(failure.contains("Unable to call gate"));
    assert!(failure.contains("ERROR"));
}

#[test]
fn non_pickup_outcomes_exhaust_the_budget() {
    let mut d = dial();
    for i in 0..MAX_DIAL_ATTEMPTS {
        assert!(!d.budget_exhausted(i as u64));
        d.no_pickup(i as u64);
    }
    assert!(d.budget_exhausted(99));
}

#[test]
fn ring_timeout_is_terminal_without_consuming_attempts() {
    let mut d = dial();
    d.log_dialing(0);
    d.ring_timeout(1);
    assert_eq!(d.attempts(), 0);
    assert_eq!(d.failure(), Some("Timeout while waiting for first ring"));
}

#[test]
fn pickup_supersedes_earlier_failures() {
    let mut d = dial();
    d.dial_rejected(0, "NO CARRIER");
    assert!(d.failure().is_some());
    d.pickup(1);
    assert!(d.failure().is_none());
}

#[test]
fn log_records_the_procedure() {
    let mut d = dial();
    d.log_dialing(100);
    d.log_ring_wait(200);
    d.log_last_code(300, Some("MO RING"));
    d.pickup(300);

    let log = d.log_lines();
    assert!(log[0].contains("+36300000000"));
    assert!(log[0].contains("+36301112222"));
    assert!(log.iter().any(|l| l.contains("MO RING")));
    assert!(log.iter().any(|l| l.contains("Canceling ringing")));
}

#[test]
fn pickup_codes() {
    assert!(protocol::is_pickup_code("MO RING"));
    assert!(protocol::is_pickup_code("MO CONNECTED"));
    assert!(!protocol::is_pickup_code("BUSY"));
    assert!(!protocol::is_pickup_code("NO CARRIER"));
}

#[test]
fn fail_log_rotation_threshold() {
    assert!(!protocol::fail_log_needs_rotation(0));
    assert!(!protocol::fail_log_needs_rotation(32_000));
    assert!(protocol::fail_log_needs_rotation(32_001));
}

#[test]
fn first_not_ready_ever_unlocks_immediately() {
    let mut pin = PinMonitor::new();
    assert!(pin.on_not_ready());
}

#[test]
fn later_not_ready_unlocks_on_every_third() {
    let mut pin = PinMonitor::new();
    assert!(pin.on_not_ready()); // first ever

    // A ready result ends the streak
    pin.on_ready();

    assert!(!pin.on_not_ready());
    assert!(!pin.on_not_ready());
    assert!(pin.on_not_ready()); // third consecutive

    // Counter restarts after an unlock
    assert!(!pin.on_not_ready());
    assert!(!pin.on_not_ready());
    assert!(pin.on_not_ready());
}

#[test]
fn ready_resets_the_not_ready_streak() {
    let mut pin = PinMonitor::new();
    assert!(pin.on_not_ready());
    assert!(!pin.on_not_ready());
    pin.on_ready();
    assert!(!pin.on_not_ready());
    assert!(!pin.on_not_ready());
    assert!(pin.on_not_ready());
}

#[test]
fn sim_goes_offline_after_more_than_two_timeouts() {
    let mut pin = PinMonitor::new();
    assert!(!pin.on_timeout());
    assert!(!pin.on_timeout());
    assert!(pin.on_timeout());
}

#[test]
fn an_answer_ends_the_timeout_streak() {
    let mut pin = PinMonitor::new();
    assert!(!pin.on_timeout());
    assert!(!pin.on_timeout());
    pin.on_query_answered();
    assert!(!pin.on_timeout());
    assert!(!pin.on_timeout());
    assert!(pin.on_timeout());
}
