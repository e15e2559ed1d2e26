//! Event model shared between the modem driver and the orchestrator.
//!
//! Events are created by the classifier and the call/health handlers,
//! pushed to the device or debug queue, and consumed by the orchestrator.
//! They are never mutated after creation.

use crate::at::{Command, Line, PhoneNumber, RawLines, SignalLevel, TerminalStatus};

/// How a response frame was read off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Ok,
    /// A URC arrived while the frame was accumulating. Framing survived,
    /// but the interruption is recorded.
    Interrupted,
    /// The response wait expired; the frame was synthesized from whatever
    /// lines had accumulated.
    Timeout,
}

/// Shaped result of one correlated AT command.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    pub read_status: ReadStatus,
    pub terminal: TerminalStatus,
    /// Shaped payload lines. For single-line commands this holds at most
    /// one entry.
    pub lines: RawLines,
}

impl CommandResponse {
    pub fn timed_out(&self) -> bool {
        self.read_status == ReadStatus::Timeout
    }

    /// Payload of a single-line response, if one arrived.
    pub fn single(&self) -> Option<&str> {
        self.lines.first().map(|l| l.as_str())
    }
}

/// Diagnostic fields accumulated by the SIM health monitor.
#[derive(Debug, Clone, Default)]
pub struct SimSnapshot {
    pub pin_status: Option<Line>,
    pub network: Option<Line>,
    pub signal: Option<Line>,
    pub signal_friendly: Option<SignalLevel>,
    pub product: Option<Line>,
    pub product_details: Option<Line>,
}

/// Tagged event published to the device/debug queues.
#[derive(Debug, Clone)]
pub enum Event {
    /// Telemetry: some incoming activity started (call or SMS).
    Incoming,
    /// Telemetry: some outgoing activity started (dial or SMS send).
    Outgoing,
    Initializing,
    Initialized,
    SimOffline,
    IncomingCall { caller: PhoneNumber },
    IncomingSms { index: u32, message: CommandResponse },
    CallEnded { code: Line, number: PhoneNumber },
    OutgoingRinging { code: Line, number: PhoneNumber },
    VoltageWarning { code: Line },
    PowerDown { code: Line },
    Error { msg: &'static str, command: Command },
    StateSnapshot(SimSnapshot),
}

impl Event {
    /// Short tag for the status page log.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::Incoming => "incoming-event",
            Event::Outgoing => "outgoing-event",
            Event::Initializing => "initializing",
            Event::Initialized => "initialized",
            Event::SimOffline => "sim-offline",
            Event::IncomingCall { .. } => "incoming-call",
            Event::IncomingSms { .. } => "incoming-sms",
            Event::CallEnded { .. } => "call-end",
            Event::OutgoingRinging { .. } => "outgoing-ringing",
            Event::VoltageWarning { .. } => "voltage-warning",
            Event::PowerDown { .. } => "power-down",
            Event::Error { .. } => "error",
            Event::StateSnapshot(_) => "state",
        }
    }
}
