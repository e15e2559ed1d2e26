//! Call and SMS state machines.
//!
//! At most one incoming and one outgoing call session exist at a time, and
//! they are mutually exclusive in practice because every multi-step flow
//! runs under the transaction lock. Incoming-call handling acquires the
//! lock and stashes the guard; `open_gate`/`decline_call` take it back and
//! release it when the call is resolved.

use core::fmt::Write;

use embassy_time::{with_timeout, Duration, Instant, Timer};

use crate::at::{self, Command, Line, PhoneNumber};
use crate::event::Event;
use crate::modem::{
    debug_event, device_event, send, send_no_wait, send_opts, stash_call_guard, take_call_guard,
    with_state, FIRST_RING, SLEEP_MS, TRANSACTION_LOCK,
};
use crate::protocol::{is_pickup_code, DialProtocol, FIRST_RING_TIMEOUT_SECS};
use crate::queue::EvictingChannel;

/// Operator credit-info number.
const CREDIT_NUMBER: &str = "333";
/// SMS text body terminator.
const CTRL_Z: char = '\u{1a}';

/// Long-running operations requested by the orchestrator. A single worker
/// task runs them one at a time so the orchestrator loop never blocks on a
/// dial procedure or an SMS send.
pub enum CallOp {
    OpenGate { gate: PhoneNumber, caller: PhoneNumber },
    Decline,
    SendSms { to: PhoneNumber, message: SmsText },
    RelaySms { to: PhoneNumber, message: SmsText, index: u32 },
    DeleteSms { index: u32, delete_all: bool },
    CheckCredit,
}

pub type SmsText = heapless::String<160>;

pub static OP_QUEUE: EvictingChannel<CallOp, 4> = EvictingChannel::new();

#[embassy_executor::task]
pub async fn op_worker_task() {
    loop {
        match OP_QUEUE.pop().await {
            CallOp::OpenGate { gate, caller } => open_gate(&gate, &caller).await,
            CallOp::Decline => decline_call().await,
            CallOp::SendSms { to, message } => send_sms_with_lock(&to, &message).await,
            CallOp::RelaySms { to, message, index } => relay_sms(&to, &message, index).await,
            CallOp::DeleteSms { index, delete_all } => delete_sms_locked(index, delete_all).await,
            CallOp::CheckCredit => check_credit().await,
        }
    }
}

/// Route one classified URC to its handler.
pub async fn dispatch_urc(line: &Line) {
    let code = at::urc_code(line);
    let data = at::urc_data(line).unwrap_or("");

    match code {
        "+CLIP" => handle_incoming_call(data).await,
        "+CMTI" => handle_incoming_sms(data).await,
        "+CDRIND" => handle_call_ending(code).await,
        "MO RING" | "MO CONNECTED" | "BUSY" | "NO CARRIER" | "NO DIALTONE" | "NO ANSWER" => {
            handle_call_in_progress(code).await
        }
        _ if code.contains("POWER") || code.contains("VOLTAGE") => {
            handle_voltage_signal(code).await
        }
        _ => embassy_futures::yield_now().await,
    }
}

/// Caller-ID URC. Marks the incoming session, takes the transaction lock
/// and hands the guard off; whoever answers or declines releases it.
async fn handle_incoming_call(data: &str) {
    if with_state(|s| s.incoming_call.is_some()) {
        return;
    }

    device_event(Event::Incoming);

    let caller = at::clip_caller(data);
    with_state(|s| s.incoming_call = Some(caller.clone()));

    let guard = TRANSACTION_LOCK.lock().await;
    stash_call_guard(guard);

    device_event(Event::IncomingCall { caller });
    Timer::after_millis(SLEEP_MS).await;
}

/// Message-indication URC: fetch the message under the transaction lock
/// and publish the full shaped body.
async fn handle_incoming_sms(data: &str) {
    device_event(Event::Incoming);

    let Some(index) = at::cmti_index(data) else {
        log::warn!("call: unparseable +CMTI payload: {}", data);
        return;
    };

    let _guard = TRANSACTION_LOCK.lock().await;
    with_state(|s| s.op_in_progress = true);

    send("AT+CMGF=1").await;
    let mut cmd = Command::new();
    let _ = write!(cmd, "AT+CMGR={}", index);
    let message = send_opts(&cmd, false, Duration::from_secs(1)).await;

    device_event(Event::IncomingSms { index, message });
    with_state(|s| s.op_in_progress = false);
}

/// Termination URC or explicit hangup. Which session flag is set decides
/// which direction just ended.
async fn handle_call_ending(code: &str) {
    let ended = with_state(|s| {
        s.incoming_call
            .take()
            .or_else(|| s.outgoing_call.take())
    });

    if let Some(number) = ended {
        let mut code_line = Line::new();
        let _ = code_line.push_str(code);
        device_event(Event::CallEnded {
            code: code_line,
            number,
        });
    }
    Timer::after_millis(SLEEP_MS).await;
}

/// Ring/progress URC during an outgoing dial. Drives pickup detection for
/// the gate dial procedure.
async fn handle_call_in_progress(code: &str) {
    FIRST_RING.signal(());

    let mut code_line = Line::new();
    let _ = code_line.push_str(code);

    let number = with_state(|s| {
        s.gate_last_code = Some(code_line.clone());
        if is_pickup_code(code) {
            s.gate_ring_ok = true;
        }
        s.outgoing_call.clone().unwrap_or_default()
    });

    device_event(Event::OutgoingRinging {
        code: code_line,
        number,
    });
    Timer::after_millis(SLEEP_MS).await;
}

async fn handle_voltage_signal(code: &str) {
    let mut code_line = Line::new();
    let _ = code_line.push_str(code);

    match at::power_signal(code) {
        Some(at::PowerSignal::ShutDown) => device_event(Event::PowerDown { code: code_line }),
        Some(at::PowerSignal::Warning) => debug_event(Event::VoltageWarning { code: code_line }),
        None => {}
    }
    Timer::after_millis(SLEEP_MS).await;
}

/// Answer path: hang up the caller (the incoming call itself is only a
/// trigger), then run the gate dial procedure. Call-triggered opens take
/// the guard stashed by the incoming-call handler; web-triggered opens
/// have no call in flight and acquire the transaction lock here, inside
/// the worker, so the orchestrator loop never parks on a held lock.
/// Holding the guard is what keeps the health monitor and other flows off
/// the line for the duration.
pub async fn open_gate(gate: &str, caller: &str) {
    let guard = match take_call_guard() {
        Some(guard) => guard,
        None => TRANSACTION_LOCK.lock().await,
    };

    with_state(|s| s.op_in_progress = true);

    let _ = send_opts("ATH", false, Duration::from_secs(5)).await;
    handle_call_ending("ATH").await;
    Timer::after_millis(500).await;

    call_gate(gate, caller).await;

    Timer::after_millis(1000).await;
    with_state(|s| s.op_in_progress = false);
    // Guard drops here: the transaction lock is released exactly once
    drop(guard);
}

/// Decline path for callers that are not on the allowed list.
pub async fn decline_call() {
    let guard = take_call_guard();
    if guard.is_none() {
        log::error!("call: decline without a stashed transaction guard");
    }

    let _ = send_opts("ATH", false, Duration::from_secs(5)).await;
    handle_call_ending("ATH").await;
    Timer::after_millis(1000).await;
    drop(guard);
}

/// The bounded-retry gate dial procedure. A pickup code means the gate
/// answered, and the answer *is* the open signal: hang up immediately and
/// finish. Dial failures and non-pickup outcomes consume the retry budget;
/// a ring-wait timeout is terminal.
pub async fn call_gate(number: &str, caller: &str) {
    FIRST_RING.reset();

    let mut callee = PhoneNumber::new();
    let _ = callee.push_str(number);
    with_state(|s| {
        s.outgoing_call = Some(callee);
        s.gate_ring_ok = false;
        s.gate_last_code = None;
    });

    let mut dial = DialProtocol::new(number, caller);

    loop {
        if dial.budget_exhausted(now_ms()) {
            break;
        }

        device_event(Event::Outgoing);
        dial.log_dialing(now_ms());

        let mut cmd = Command::new();
        let _ = write!(cmd, "ATD{};", number);
        let response = send(&cmd).await;

        if !response.terminal.is_ok() {
            dial.dial_rejected(now_ms(), response.terminal.as_str());
            FIRST_RING.signal(());
            Timer::after_millis(SLEEP_MS).await;
            continue;
        }

        dial.log_ring_wait(now_ms());
        let ring_wait = Duration::from_secs(FIRST_RING_TIMEOUT_SECS);
        if with_timeout(ring_wait, FIRST_RING.wait()).await.is_err() {
            dial.ring_timeout(now_ms());
            FIRST_RING.signal(());
            debug_event(Event::Error {
                msg: "Timeout while waiting for first ring",
                command: cmd,
            });
            break;
        }
        Timer::after_millis(500).await;

        let (ring_ok, last_code) = with_state(|s| (s.gate_ring_ok, s.gate_last_code.clone()));
        dial.log_last_code(now_ms(), last_code.as_deref());

        if ring_ok {
            dial.pickup(now_ms());
            log::info!("call: gate answered, canceling ringing");
            let _ = send_opts("ATH", false, Duration::from_secs(2)).await;
            handle_call_ending("ATH").await;
            with_state(|s| s.gate_ring_ok = false);
            break;
        }

        dial.no_pickup(now_ms());
        log::info!("call: gate response invalid, retrying");
    }

    with_state(|s| s.outgoing_call = None);

    if let Some(failure) = dial.failure() {
        crate::storage::append_fail_log(dial.log_lines());
        let mut message = SmsText::new();
        let _ = message.push_str(failure);
        send_sms(caller, &message).await;
    }
}

/// Send a text-mode SMS: mode select, addressed prompt (fire-and-forget),
/// then the body terminated by Ctrl-Z with a long response timeout.
pub async fn send_sms(number: &str, message: &str) {
    log::info!("call: sending sms to {}", number);

    send("AT+CMGF=1").await;

    let mut cmd = Command::new();
    let _ = write!(cmd, "AT+CMGS=\"{}\"", number);
    send_no_wait(&cmd).await;

    let mut body = Command::new();
    let _ = write!(body, "{}\r\n{}", message, CTRL_Z);
    let _ = send_opts(&body, true, Duration::from_secs(30)).await;
}

pub async fn send_sms_with_lock(number: &str, message: &str) {
    device_event(Event::Outgoing);
    let _guard = TRANSACTION_LOCK.lock().await;
    send_sms(number, message).await;
}

/// Delete one stored message (flag 0) or all (flag 4).
pub async fn delete_sms(index: u32, delete_all: bool) {
    let flag = if delete_all { 4 } else { 0 };
    let mut cmd = Command::new();
    let _ = write!(cmd, "AT+CMGD={},{}", index, flag);
    send(&cmd).await;
}

pub async fn delete_sms_locked(index: u32, delete_all: bool) {
    let _guard = TRANSACTION_LOCK.lock().await;
    delete_sms(index, delete_all).await;
}

/// Forward a foreign SMS to the owner, deleting the original first.
pub async fn relay_sms(number: &str, message: &str, index: u32) {
    log::info!("call: relaying sms {} to {}", index, number);
    let _guard = TRANSACTION_LOCK.lock().await;
    with_state(|s| s.op_in_progress = true);
    delete_sms(index, false).await;
    send_sms(number, message).await;
    with_state(|s| s.op_in_progress = false);
}

/// Dial the operator's credit-info number; the answer arrives later as
/// ordinary SMS traffic.
pub async fn check_credit() {
    Timer::after_millis(1000).await;
    let _guard = TRANSACTION_LOCK.lock().await;
    with_state(|s| s.op_in_progress = true);
    log::info!("call: dialing credit info number");
    let mut cmd = Command::new();
    let _ = write!(cmd, "ATD{};", CREDIT_NUMBER);
    send(&cmd).await;
    with_state(|s| s.op_in_progress = false);
}

fn now_ms() -> u64 {
    Instant::now().as_millis()
}
