//! Unit tests for AT line classification and response shaping.

#[path = "../src/at.rs"]
mod at;

use at::{Line, RawLines, SignalLevel, TerminalStatus};

fn line(s: &str) -> Line {
    let mut l = Line::new();
    l.push_str(s).unwrap();
    l
}

fn lines(items: &[&str]) -> RawLines {
    let mut v = RawLines::new();
    for item in items {
        v.push(line(item)).unwrap();
    }
    v
}

#[test]
fn urc_code_splits_on_colon() {
    assert_eq!(at::urc_code("+CLIP: \"+36301112222\",145"), "+CLIP");
    assert_eq!(at::urc_code("NO CARRIER"), "NO CARRIER");
    assert_eq!(at::urc_data("+CMTI: \"SM\",4"), Some(" \"SM\",4"));
    assert_eq!(at::urc_data("OK"), None);
}

#[test]
fn known_codes_are_unsolicited() {
    assert!(at::is_unsolicited("+CLIP: \"+3630\",145", "AT+CSQ"));
    assert!(at::is_unsolicited("+CMTI: \"SM\",4", "AT+CSQ"));
    assert!(at::is_unsolicited("RING", "AT+CSQ"));
    assert!(at::is_unsolicited("NORMAL POWER DOWN", "AT"));
    assert!(!at::is_unsolicited("+CSQ: 18,99", "AT+CSQ"));
    assert!(!at::is_unsolicited("OK", "AT"));
}

#[test]
fn hangup_family_is_solicited_after_ath() {
    for code in ["+CDRIND: 1", "BUSY", "NO CARRIER", "NO ANSWER", "NO DIALTONE"] {
        assert!(!at::is_unsolicited(code, "ATH"), "{code} after ATH");
        assert!(at::is_unsolicited(code, "AT+CSQ"), "{code} after AT+CSQ");
    }
}

#[test]
fn cpin_is_solicited_after_pin_query() {
    assert!(!at::is_unsolicited("+CPIN: READY", "AT+CPIN?"));
    assert!(at::is_unsolicited("+CPIN: READY", "AT+CSQ"));
    // Unsolicited +CPIN is boot noise and must not reach the dispatcher
    assert!(at::is_ignored_urc("+CPIN: READY"));
}

#[test]
fn ignored_urcs() {
    for code in ["RING", "SMS Ready", "Call Ready", "RDY", "CHARGE-ONLY MODE"] {
        assert!(at::is_ignored_urc(code), "{code}");
    }
    assert!(!at::is_ignored_urc("+CLIP: \"+3630\",145"));
    assert!(!at::is_ignored_urc("+CMTI: \"SM\",4"));
}

#[test]
fn terminal_lines() {
    assert!(at::is_terminal("OK"));
    assert!(at::is_terminal("ERROR"));
    assert!(at::is_terminal("+CME ERROR: 100"));
    assert!(at::is_terminal("+CMS ERROR: 500"));
    assert!(!at::is_terminal("+CSQ: 18,99"));
    assert!(!at::is_terminal("AT+CSQ"));
}

#[test]
fn shape_single_line_response_with_echo() {
    let raw = lines(&["AT+CSQ", "+CSQ: 18,99", "OK"]);
    let (status, shaped) = at::shape_response("AT+CSQ", raw, true);
    assert!(status.is_ok());
    assert_eq!(shaped.len(), 1);
    assert_eq!(shaped[0].as_str(), "+CSQ: 18,99");
}

#[test]
fn shape_collapses_to_last_remaining_line() {
    let raw = lines(&["first", "second", "third", "OK"]);
    let (status, shaped) = at::shape_response("AT+COPS?", raw, true);
    assert!(status.is_ok());
    assert_eq!(shaped.len(), 1);
    assert_eq!(shaped[0].as_str(), "third");
}

#[test]
fn shape_multi_line_keeps_payload() {
    let raw = lines(&[
        "AT+CMGR=4",
        "+CMGR: \"REC UNREAD\",\"+36301112222\",\"\",\"24/05/01\"",
        "hello",
        "world",
        "OK",
    ]);
    let (status, shaped) = at::shape_response("AT+CMGR=4", raw, false);
    assert!(status.is_ok());
    assert_eq!(shaped.len(), 3);
    assert_eq!(shaped[1].as_str(), "hello");
    assert_eq!(shaped[2].as_str(), "world");
}

#[test]
fn shape_empty_frame_is_unknown() {
    let (status, shaped) = at::shape_response("AT", RawLines::new(), true);
    assert_eq!(status, TerminalStatus::Unknown);
    assert!(shaped.is_empty());
}

#[test]
fn shape_preserves_modem_error_text() {
    let raw = lines(&["AT+CMGS=\"+3630\"", "+CMS ERROR: 500"]);
    let (status, _) = at::shape_response("AT+CMGS=\"+3630\"", raw, true);
    assert!(!status.is_ok());
    assert_eq!(status.as_str(), "+CMS ERROR: 500");
}

#[test]
fn clip_caller_takes_quoted_first_field() {
    let caller = at::clip_caller(" \"+36301112222\",145,\"\",0,\"\",0");
    assert_eq!(caller.as_str(), "+36301112222");
}

#[test]
fn cmgr_sender_takes_quoted_second_field() {
    let sender =
        at::cmgr_sender("+CMGR: \"REC UNREAD\",\"+36301112222\",\"\",\"24/05/01,10:00:00\"");
    assert_eq!(sender.as_str(), "+36301112222");
}

#[test]
fn cmti_index_takes_last_field() {
    assert_eq!(at::cmti_index(" \"SM\",4"), Some(4));
    assert_eq!(at::cmti_index(" \"SM\",17"), Some(17));
    assert_eq!(at::cmti_index(" \"SM\",garbage"), None);
}

#[test]
fn csq_level_parses_rssi() {
    assert_eq!(at::csq_level("+CSQ: 18,99"), 18);
    assert_eq!(at::csq_level("+CSQ: 0,0"), 0);
    assert_eq!(at::csq_level("garbage"), 99);
}

#[test]
fn every_power_down_variant_is_a_shutdown() {
    use at::PowerSignal;

    assert_eq!(at::power_signal("NORMAL POWER DOWN"), Some(PowerSignal::ShutDown));
    assert_eq!(
        at::power_signal("UNDER-VOLTAGE POWER DOWN"),
        Some(PowerSignal::ShutDown)
    );
    assert_eq!(
        at::power_signal("OVER-VOLTAGE POWER DOWN"),
        Some(PowerSignal::ShutDown)
    );
    assert_eq!(
        at::power_signal("UNDER-VOLTAGE WARNING"),
        Some(PowerSignal::Warning)
    );
    assert_eq!(
        at::power_signal("OVER-VOLTAGE WARNING"),
        Some(PowerSignal::Warning)
    );
    assert_eq!(at::power_signal("CHARGE-ONLY MODE"), None);
}

#[test]
fn signal_buckets() {
    assert_eq!(SignalLevel::bucket(0), SignalLevel::Low);
    assert_eq!(SignalLevel::bucket(9), SignalLevel::Low);
    assert_eq!(SignalLevel::bucket(10), SignalLevel::Ok);
    assert_eq!(SignalLevel::bucket(14), SignalLevel::Ok);
    assert_eq!(SignalLevel::bucket(15), SignalLevel::Good);
    assert_eq!(SignalLevel::bucket(19), SignalLevel::Good);
    assert_eq!(SignalLevel::bucket(20), SignalLevel::Excellent);
    assert_eq!(SignalLevel::bucket(31), SignalLevel::Excellent);
    assert_eq!(SignalLevel::bucket(32), SignalLevel::Unknown);
    assert_eq!(SignalLevel::bucket(99), SignalLevel::Unknown);
}
