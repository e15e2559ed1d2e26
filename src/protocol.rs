//! Pure state machines behind the gate-dial procedure and the SIM health
//! monitor. The async tasks in `call.rs`/`health.rs` drive these; keeping
//! the bookkeeping here keeps it testable on the host.

use core::fmt::Write;

use heapless::{String, Vec};

/// Dial-command failures and non-pickup outcomes are retried this often.
pub const MAX_DIAL_ATTEMPTS: u8 = 3;
/// Waiting for the gate's first ring gives up after this long, and that
/// failure is terminal for the whole procedure.
pub const FIRST_RING_TIMEOUT_SECS: u64 = 30;
/// The on-device failure log is deleted and restarted beyond this size.
pub const FAIL_LOG_MAX_BYTES: usize = 32_000;

pub type LogLine = String<96>;
pub type DialLog = Vec<LogLine, 16>;

/// One run of the bounded-retry gate dial procedure.
///
/// Tracks the attempt budget, the per-attempt timestamped log and the
/// failure message that ends up in the failure SMS. The budget governs only
/// dial-command failures and non-pickup ring outcomes; a ring-wait timeout
/// ends the procedure immediately.
pub struct DialProtocol {
    attempts: u8,
    failure: Option<LogLine>,
    log: DialLog,
}

impl DialProtocol {
    pub fn new(number: &str, caller: &str) -> Self {
        let mut dial = Self {
            attempts: 0,
            failure: None,
            log: Vec::new(),
        };
        let mut line = LogLine::new();
        let _ = write!(line, "Starting gate {} call procedure for {}", number, caller);
        let _ = dial.log.push(line);
        dial
    }

    fn push_log(&mut self, now_ms: u64, msg: &str) {
        let mut line = LogLine::new();
        let _ = write!(line, "{} {}", now_ms, msg);
        if self.log.is_full() {
            self.log.remove(0);
        }
        let _ = self.log.push(line);
    }

    /// True once the retry budget is spent. Log the terminal line when it is.
    pub fn budget_exhausted(&mut self, now_ms: u64) -> bool {
        if self.attempts >= MAX_DIAL_ATTEMPTS {
            self.push_log(now_ms, "Reached retry limit. Calling failed");
            true
        } else {
            false
        }
    }

    pub fn log_dialing(&mut self, now_ms: u64) {
        self.push_log(now_ms, "Calling gate");
    }

    /// The `ATD` command itself came back non-OK. Consumes one attempt.
    pub fn dial_rejected(&mut self, now_ms: u64, status: &str) {
        self.attempts += 1;
        let mut msg = LogLine::new();
        let _ = write!(msg, "Unable to call gate. Reason: {}", status);
        self.failure = Some(msg.clone());
        let mut line = LogLine::new();
        let _ = write!(line, "{} Calling failed: {}", now_ms, msg);
        if self.log.is_full() {
            self.log.remove(0);
        }
        let _ = self.log.push(line);
    }

    pub fn log_ring_wait(&mut self, now_ms: u64) {
        self.push_log(now_ms, "Waiting for first ring");
    }

    pub fn log_last_code(&mut self, now_ms: u64, code: Option<&str>) {
        let mut line = LogLine::new();
        let _ = write!(line, "{} Last URC: {}", now_ms, code.unwrap_or("none"));
        if self.log.is_full() {
            self.log.remove(0);
        }
        let _ = self.log.push(line);
    }

    /// No first ring within the timeout. Terminal failure, no retry.
    pub fn ring_timeout(&mut self, now_ms: u64) {
        self.push_log(now_ms, "Timeout while waiting for first ring");
        let mut msg = LogLine::new();
        let _ = msg.push_str("Timeout while waiting for first ring");
        self.failure = Some(msg);
    }

    /// The gate picked up. The procedure is done and any earlier failure is
    /// superseded.
    pub fn pickup(&mut self, now_ms: u64) {
        self.push_log(now_ms, "Gate response is OK. Canceling ringing");
        self.failure = None;
    }

    /// Ring outcome was not a pickup code. Consumes one attempt.
    pub fn no_pickup(&mut self, now_ms: u64) {
        self.attempts += 1;
        self.push_log(now_ms, "Gate response is invalid. Retrying");
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    /// Failure message for the SMS to the original caller, if the run failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn log_lines(&self) -> &DialLog {
        &self.log
    }
}

/// Progress codes that mean the gate answered. The answer is the open
/// signal, so the call is hung up immediately.
pub fn is_pickup_code(code: &str) -> bool {
    code == "MO RING" || code == "MO CONNECTED"
}

/// Failure log rotation rule: delete and start fresh once the log exceeds
/// the threshold, before the next append.
pub fn fail_log_needs_rotation(current_len: usize) -> bool {
    current_len > FAIL_LOG_MAX_BYTES
}

/// PIN-readiness bookkeeping for the health monitor.
///
/// The unlock sequence runs on the first not-ready result ever observed,
/// and after that on every third consecutive not-ready result. Repeated
/// query timeouts mark the SIM offline.
#[derive(Default)]
pub struct PinMonitor {
    unlocked_once: bool,
    not_ready_count: u8,
    timeout_count: u8,
}

impl PinMonitor {
    pub const fn new() -> Self {
        Self {
            unlocked_once: false,
            not_ready_count: 0,
            timeout_count: 0,
        }
    }

    /// The query answered (any result): the timeout streak is over.
    pub fn on_query_answered(&mut self) {
        self.timeout_count = 0;
    }

    /// The SIM reports ready.
    pub fn on_ready(&mut self) {
        self.not_ready_count = 0;
    }

    /// The SIM reports not ready. Returns true when the unlock sequence
    /// should run now.
    pub fn on_not_ready(&mut self) -> bool {
        self.not_ready_count += 1;
        if !self.unlocked_once || self.not_ready_count >= 3 {
            self.unlocked_once = true;
            self.not_ready_count = 0;
            true
        } else {
            false
        }
    }

    /// The query timed out. Returns true once the SIM should be reported
    /// offline (more than two consecutive timeouts).
    pub fn on_timeout(&mut self) -> bool {
        self.timeout_count += 1;
        self.timeout_count > 2
    }
}
