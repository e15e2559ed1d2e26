//! Unit tests for the SIM health cycle, driven over a scripted modem link.

#[path = "../src/at.rs"]
mod at;
#[path = "../src/event.rs"]
mod event;
#[path = "../src/health.rs"]
mod health;
#[path = "../src/protocol.rs"]
mod protocol;

use core::future::Future;
use core::pin::pin;
use core::task::{Context, Poll, Waker};
use std::collections::VecDeque;

use embassy_time::Duration;

use event::{CommandResponse, Event, ReadStatus, SimSnapshot};
use health::ModemLink;
use protocol::PinMonitor;

/// Poll a future once with a no-op waker.
fn poll_once<F: Future>(fut: core::pin::Pin<&mut F>) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    fut.poll(&mut cx)
}

/// Scripted link: answers queries from a queue, records what was issued
/// and published. `busy_after` flips the busy flag once that many
/// commands have been issued.
struct FakeLink {
    responses: VecDeque<CommandResponse>,
    commands: Vec<String>,
    published: Vec<&'static str>,
    debugged: Vec<Event>,
    busy_after: Option<usize>,
}

impl FakeLink {
    fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            commands: Vec::new(),
            published: Vec::new(),
            debugged: Vec::new(),
            busy_after: None,
        }
    }

    fn script(&mut self, responses: impl IntoIterator<Item = CommandResponse>) {
        self.responses.extend(responses);
    }
}

impl ModemLink for FakeLink {
    async fn query(
        &mut self,
        command: &str,
        _single_line: bool,
        _timeout: Duration,
    ) -> CommandResponse {
        self.commands.push(command.to_string());
        self.responses.pop_front().unwrap_or_else(timed_out)
    }

    fn busy(&self) -> bool {
        self.busy_after
            .map_or(false, |limit| self.commands.len() >= limit)
    }

    fn sim_pin(&self) -> &str {
        "0000"
    }

    fn publish(&mut self, event: Event) {
        self.published.push(event.tag());
    }

    fn debug(&mut self, event: Event) {
        self.debugged.push(event);
    }

    async fn settle(&mut self, _millis: u64) {}
}

fn ok_line(line: &str) -> CommandResponse {
    let mut l = at::Line::new();
    l.push_str(line).unwrap();
    let mut lines = at::RawLines::new();
    lines.push(l).unwrap();
    CommandResponse {
        read_status: ReadStatus::Ok,
        terminal: at::TerminalStatus::Ok,
        lines,
    }
}

fn timed_out() -> CommandResponse {
    CommandResponse {
        read_status: ReadStatus::Timeout,
        terminal: at::TerminalStatus::Unknown,
        lines: at::RawLines::new(),
    }
}

fn diagnostics() -> [CommandResponse; 4] {
    [
        ok_line("+COPS: 0,0,\"vodafone IT\""),
        ok_line("+CSQ: 18,99"),
        ok_line("SIM800 R14.18"),
        ok_line("Revision:1418B05SIM800L24"),
    ]
}

fn run_cycle(link: &mut FakeLink, pin: &mut PinMonitor, state: &mut SimSnapshot) {
    let mut cycle = pin!(health::query_state(link, pin, state));
    assert!(poll_once(cycle.as_mut()).is_ready());
}

#[test]
fn pin_query_timeout_does_not_abort_the_diagnostics() {
    let mut link = FakeLink::new();
    link.script([timed_out()]);
    link.script(diagnostics());

    let mut pin = PinMonitor::new();
    let mut state = SimSnapshot::default();
    run_cycle(&mut link, &mut pin, &mut state);

    assert_eq!(
        link.commands,
        ["AT+CPIN?", "AT+COPS?", "AT+CSQ", "ATI", "AT+GSV"]
    );
    // A single timeout is not an offline verdict
    assert!(link.published.is_empty());
    assert_eq!(state.network.as_deref(), Some("+COPS: 0,0,\"vodafone IT\""));
    assert_eq!(state.signal_friendly, Some(at::SignalLevel::Good));

    // The snapshot still went out at the end of the cycle
    match link.debugged.last() {
        Some(Event::StateSnapshot(snapshot)) => {
            assert_eq!(snapshot.network.as_deref(), Some("+COPS: 0,0,\"vodafone IT\""));
        }
        other => panic!("expected a state snapshot, got {:?}", other),
    }
}

#[test]
fn persistent_timeouts_report_offline_but_keep_polling() {
    let mut link = FakeLink::new();
    let mut pin = PinMonitor::new();
    let mut state = SimSnapshot::default();

    for _ in 0..3 {
        link.script([timed_out()]);
        link.script(diagnostics());
        run_cycle(&mut link, &mut pin, &mut state);
    }

    assert_eq!(link.published, ["sim-offline"]);
    // Five commands per cycle: the offline verdict never shortened one
    assert_eq!(link.commands.len(), 15);
}

#[test]
fn ready_cycle_publishes_initialized_and_a_snapshot() {
    let mut link = FakeLink::new();
    link.script([ok_line("+CPIN: READY")]);
    link.script(diagnostics());

    let mut pin = PinMonitor::new();
    let mut state = SimSnapshot::default();
    run_cycle(&mut link, &mut pin, &mut state);

    assert_eq!(link.published, ["initialized"]);
    assert_eq!(state.pin_status.as_deref(), Some("+CPIN: READY"));
    assert_eq!(link.debugged.len(), 1);
}

#[test]
fn busy_line_aborts_the_rest_of_the_cycle() {
    let mut link = FakeLink::new();
    link.script([ok_line("+CPIN: READY")]);
    link.script(diagnostics());
    link.busy_after = Some(2);

    let mut pin = PinMonitor::new();
    let mut state = SimSnapshot::default();
    run_cycle(&mut link, &mut pin, &mut state);

    assert_eq!(link.commands, ["AT+CPIN?", "AT+COPS?"]);
    // No snapshot for an aborted cycle
    assert!(link.debugged.is_empty());
}

#[test]
fn not_ready_runs_unlock_then_backs_off_until_the_third_poll() {
    let mut link = FakeLink::new();
    let mut pin = PinMonitor::new();
    let mut state = SimSnapshot::default();

    // First not-ready ever: the unlock sequence runs and confirms ready.
    link.script([
        ok_line("+CPIN: SIM PIN"),
        ok_line("OK"),              // AT
        ok_line("OK"),              // init string
        ok_line("OK"),              // PIN entry
        ok_line("+CPIN: READY"),    // confirmation query
    ]);
    link.script(diagnostics());
    run_cycle(&mut link, &mut pin, &mut state);

    assert_eq!(
        link.commands,
        [
            "AT+CPIN?",
            "AT",
            at::INIT_COMMAND,
            "AT+CPIN=0000",
            "AT+CPIN?",
            "AT+COPS?",
            "AT+CSQ",
            "ATI",
            "AT+GSV",
        ]
    );
    assert_eq!(link.published, ["initializing", "initialized"]);
    assert_eq!(state.pin_status.as_deref(), Some("+CPIN: READY"));

    // Two more not-ready polls back off, but the diagnostics still run.
    for _ in 0..2 {
        link.script([ok_line("+CPIN: SIM PIN")]);
        link.script(diagnostics());
        run_cycle(&mut link, &mut pin, &mut state);
    }
    assert_eq!(link.published, ["initializing", "initialized"]);
    assert!(!link.commands.iter().skip(9).any(|c| c == "AT"));

    // Third consecutive not-ready: unlock again.
    link.script([
        ok_line("+CPIN: SIM PIN"),
        ok_line("OK"),
        ok_line("OK"),
        ok_line("OK"),
        ok_line("+CPIN: SIM PIN"),
    ]);
    link.script(diagnostics());
    run_cycle(&mut link, &mut pin, &mut state);

    assert_eq!(link.published, ["initializing", "initialized", "initializing"]);
    assert_eq!(state.pin_status.as_deref(), Some("+CPIN: SIM PIN"));
}

#[test]
fn stored_snapshot_round_trips_to_the_status_page() {
    let mut state = SimSnapshot::default();
    state.network = Some({
        let mut l = at::Line::new();
        l.push_str("+COPS: 0,0,\"vodafone IT\"").unwrap();
        l
    });
    health::store_snapshot(&state);
    assert_eq!(
        health::snapshot().network.as_deref(),
        Some("+COPS: 0,0,\"vodafone IT\"")
    );
}
