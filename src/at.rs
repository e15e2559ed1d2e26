//! AT line classification and response-frame shaping.
//!
//! One byte stream carries both solicited command responses and unsolicited
//! result codes (URCs). A line is classified by its leading colon-delimited
//! code against a fixed URC table, with two context-sensitive exceptions:
//! the hangup/termination family is a *solicited* answer while `ATH` is the
//! last issued command, and `+CPIN` is solicited while `AT+CPIN?` is. The
//! modem emits identical text in both roles, so the table alone is not
//! enough.
//!
//! Everything in this module is hardware-free so the host test crate can
//! compile it directly.

use heapless::{String, Vec};

/// One raw response line.
pub const LINE_LEN: usize = 128;
/// Outbound command text, sized for an SMS body plus Ctrl-Z.
pub const COMMAND_LEN: usize = 192;
pub const PHONE_LEN: usize = 20;
/// Lines accumulated per response frame (multi-line `AT+CMGR` bodies).
pub const MAX_LINES: usize = 8;

pub type Line = String<LINE_LEN>;
pub type Command = String<COMMAND_LEN>;
pub type PhoneNumber = String<PHONE_LEN>;
pub type RawLines = Vec<Line, MAX_LINES>;

/// One-shot init string: quiet URC presentation, caller ID, call-state
/// reporting, ring indication, text-mode SMS, fixed baud.
pub const INIT_COMMAND: &str =
    "AT+CIURC=0;+CCWA=0;+CLIP=1;+CDRIND=1;+MORING=1;+CMGF=1;+IPR=115200";

/// Codes the modem emits asynchronously.
const URC_CODES: &[&str] = &[
    "+CLIP",
    "+CPIN",
    "SMS Ready",
    "Call Ready",
    "+CMTI",
    "+CDRIND",
    "RING",
    "MO RING",
    "MO CONNECTED",
    "BUSY",
    "NO CARRIER",
    "NO DIALTONE",
    "NO ANSWER",
    "NORMAL POWER DOWN",
    "UNDER-VOLTAGE POWER DOWN",
    "UNDER-VOLTAGE WARNING",
    "OVER-VOLTAGE POWER DOWN",
    "OVER-VOLTAGE WARNING",
    "CHARGE-ONLY MODE",
    "RDY",
];

/// Routine noise that is never forwarded to the dispatcher.
const IGNORED_URC_CODES: &[&str] = &[
    "RING",
    "+CPIN",
    "SMS Ready",
    "Call Ready",
    "CHARGE-ONLY MODE",
    "RDY",
];

/// Codes that double as the direct answer to a hangup command.
const HANGUP_FAMILY: &[&str] = &["+CDRIND", "BUSY", "NO CARRIER", "NO ANSWER", "NO DIALTONE"];

/// Leading colon-delimited code of a line (`"+CLIP: ..."` -> `"+CLIP"`).
pub fn urc_code(line: &str) -> &str {
    line.split(':').next().unwrap_or(line)
}

/// Payload after the code, if any (`"+CMTI: \"SM\",4"` -> `"\"SM\",4"`).
pub fn urc_data(line: &str) -> Option<&str> {
    line.split_once(':').map(|(_, rest)| rest)
}

/// Classify a line as unsolicited, given the last issued command.
pub fn is_unsolicited(line: &str, last_command: &str) -> bool {
    let code = urc_code(line);

    if HANGUP_FAMILY.contains(&code) && last_command == "ATH" {
        return false;
    }

    if code == "+CPIN" && last_command == "AT+CPIN?" {
        return false;
    }

    URC_CODES.contains(&code)
}

pub fn is_ignored_urc(line: &str) -> bool {
    IGNORED_URC_CODES.contains(&urc_code(line))
}

/// A terminal line ends the response frame.
pub fn is_terminal(line: &str) -> bool {
    line == "OK" || line == "ERROR" || line.contains("+CME ERROR") || line.contains("+CMS ERROR")
}

/// Terminal status of a shaped response. Callers branch on this for
/// protocol-level success; `ERROR`/CME/CMS is data, not an error path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    Ok,
    Error,
    /// Frame ended without any status line (e.g. synthesized on timeout).
    Unknown,
    /// Literal modem status text (CME/CMS errors and friends).
    Other(Line),
}

impl TerminalStatus {
    fn from_line(line: Line) -> Self {
        match line.as_str() {
            "OK" => TerminalStatus::Ok,
            "ERROR" => TerminalStatus::Error,
            _ => TerminalStatus::Other(line),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, TerminalStatus::Ok)
    }

    pub fn as_str(&self) -> &str {
        match self {
            TerminalStatus::Ok => "OK",
            TerminalStatus::Error => "ERROR",
            TerminalStatus::Unknown => "UNKNOWN",
            TerminalStatus::Other(line) => line.as_str(),
        }
    }
}

/// Shape a raw response frame: drop the modem's command echo if present,
/// pop the last line as the terminal status, and optionally collapse the
/// remainder to its single last line.
///
/// The echo check is a content heuristic: it breaks if the modem's echo
/// setting diverges from the init string. Keep it an explicit step here
/// rather than re-deriving it per call site.
pub fn shape_response(command: &str, mut lines: RawLines, single_line: bool) -> (TerminalStatus, RawLines) {
    if lines.first().map(|l| l.as_str()) == Some(command) {
        lines.remove(0);
    }

    let status = match lines.pop() {
        Some(last) => TerminalStatus::from_line(last),
        None => TerminalStatus::Unknown,
    };

    if single_line {
        let last = lines.pop();
        lines.clear();
        if let Some(line) = last {
            // Capacity for one element is always available after clear
            let _ = lines.push(line);
        }
    }

    (status, lines)
}

/// Extract the caller number from `+CLIP` payload: quoted first
/// comma-separated field.
pub fn clip_caller(data: &str) -> PhoneNumber {
    let field = data.split(',').next().unwrap_or("");
    let mut number = PhoneNumber::new();
    for c in field.trim().trim_matches('"').chars() {
        if number.push(c).is_err() {
            break;
        }
    }
    number
}

/// Extract the sender number from a `+CMGR` status line: quoted second
/// comma-separated field.
pub fn cmgr_sender(line: &str) -> PhoneNumber {
    let field = line.splitn(3, ',').nth(1).unwrap_or("");
    let mut number = PhoneNumber::new();
    for c in field.trim().trim_matches('"').chars() {
        if number.push(c).is_err() {
            break;
        }
    }
    number
}

/// Extract the message index from `+CMTI` payload: last comma-separated
/// field.
pub fn cmti_index(data: &str) -> Option<u32> {
    data.rsplit(',').next()?.trim().parse().ok()
}

/// Parse the signal level out of a `+CSQ: <rssi>,<ber>` line. Unparseable
/// input is level 99, which buckets to unknown.
pub fn csq_level(result: &str) -> u32 {
    result
        .rsplit(':')
        .next()
        .and_then(|fields| fields.split(',').next())
        .and_then(|level| level.trim().parse().ok())
        .unwrap_or(99)
}

/// Power/voltage URCs: every shutdown notice ends with `POWER DOWN`,
/// warnings carry `WARNING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerSignal {
    ShutDown,
    Warning,
}

pub fn power_signal(code: &str) -> Option<PowerSignal> {
    if code.ends_with("POWER DOWN") {
        Some(PowerSignal::ShutDown)
    } else if code.contains("WARNING") {
        Some(PowerSignal::Warning)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalLevel {
    Low,
    Ok,
    Good,
    Excellent,
    Unknown,
}

impl SignalLevel {
    pub fn bucket(level: u32) -> Self {
        match level {
            0..=9 => SignalLevel::Low,
            10..=14 => SignalLevel::Ok,
            15..=19 => SignalLevel::Good,
            20..=31 => SignalLevel::Excellent,
            _ => SignalLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalLevel::Low => "low",
            SignalLevel::Ok => "ok",
            SignalLevel::Good => "good",
            SignalLevel::Excellent => "excellent",
            SignalLevel::Unknown => "unknown",
        }
    }
}
