//! Orchestrator: the single consumer of the device and debug queues.
//!
//! Routes incoming calls to the gate-opening flow or a decline, parses
//! owner SMS commands, relays foreign SMS traffic, drives the status LEDs
//! and the SIM reset line, and keeps the status-page log ring fed.

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::gpio::Output;
use heapless::{Deque, String};

use crate::at;
use crate::call::{CallOp, SmsText, OP_QUEUE};
use crate::event::Event;
use crate::led::{LedPattern, GREEN_LED, RED_LED};
use crate::modem::{DEBUG_EVENTS, DEVICE_EVENTS};
use crate::storage::{Settings, SettingsStore};

const LOOP_SLEEP_MS: u64 = 50;
const RESET_SIM_COOLDOWN: Duration = Duration::from_secs(30);
const RELAY_PULSE_MS: u64 = 50;
const SIM_RESET_PULSE_MS: u64 = 200;
/// Credit-info fragments quiet for this long are flushed to the owner.
const CREDIT_FLUSH: Duration = Duration::from_secs(10);

const HELP_TEXT: &str = "help:\nget:credit\ndelete:sms\nreset:sim\nallow:<number>\ndeny:<number>";

/// Signaled by the status page's open button.
pub static GATE_REQUEST: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub type WebLogLine = (u64, String<96>);

/// Recent events for the status page, newest last.
static WEB_LOG: Mutex<CriticalSectionRawMutex, RefCell<Deque<WebLogLine, 16>>> =
    Mutex::new(RefCell::new(Deque::new()));

pub fn web_log(message: &str) {
    let mut line = String::new();
    let _ = line.push_str(message);
    WEB_LOG.lock(|cell| {
        let mut log = cell.borrow_mut();
        if log.is_full() {
            log.pop_front();
        }
        let _ = log.push_back((Instant::now().as_secs(), line));
    });
}

pub fn web_logs() -> heapless::Vec<WebLogLine, 16> {
    WEB_LOG.lock(|cell| cell.borrow().iter().cloned().collect())
}

struct CreditAggregator {
    buffer: SmsText,
    last_fragment: Option<Instant>,
}

impl CreditAggregator {
    const fn new() -> Self {
        Self {
            buffer: SmsText::new(),
            last_fragment: None,
        }
    }

    fn push(&mut self, fragment: &str) {
        let _ = self.buffer.push_str(fragment);
        self.last_fragment = Some(Instant::now());
    }

    /// Flush once the operator has been quiet long enough.
    fn take_if_settled(&mut self) -> Option<SmsText> {
        let last = self.last_fragment?;
        if Instant::now() - last < CREDIT_FLUSH {
            return None;
        }
        self.last_fragment = None;
        let message = self.buffer.clone();
        self.buffer.clear();
        Some(message)
    }
}

#[embassy_executor::task]
pub async fn orchestrator_task(mut relay: Output<'static>, mut sim_reset: Output<'static>) {
    let mut store = SettingsStore::new();
    let mut credit = CreditAggregator::new();
    let mut last_sim_reset: Option<Instant> = None;

    sim_reset.set_high();
    relay.set_low();

    loop {
        crate::feed_watchdog();

        if let Some(message) = credit.take_if_settled() {
            let to = store.get().owner_number.clone();
            if !to.is_empty() {
                OP_QUEUE.push(CallOp::SendSms { to, message });
            }
        }

        if GATE_REQUEST.try_take().is_some() {
            web_log("web-open");
            open_from_web(&mut relay, store.get()).await;
        }

        while let Some(event) = DEVICE_EVENTS.try_pop() {
            handle_device_event(
                event,
                &mut store,
                &mut credit,
                &mut relay,
                &mut sim_reset,
                &mut last_sim_reset,
            )
            .await;
        }

        while let Some(event) = DEBUG_EVENTS.try_pop() {
            log::debug!("debug event: {}", event.tag());
            web_log(event.tag());
        }

        Timer::after_millis(LOOP_SLEEP_MS).await;
    }
}

async fn handle_device_event(
    event: Event,
    store: &mut SettingsStore,
    credit: &mut CreditAggregator,
    relay: &mut Output<'static>,
    sim_reset: &mut Output<'static>,
    last_sim_reset: &mut Option<Instant>,
) {
    match &event {
        Event::Incoming => {
            GREEN_LED.signal(LedPattern::Blink {
                period_ms: 100,
                duration_ms: Some(1000),
            });
            return;
        }
        Event::Outgoing => {
            GREEN_LED.signal(LedPattern::Blink {
                period_ms: 100,
                duration_ms: Some(3000),
            });
            return;
        }
        Event::Initializing => {
            RED_LED.signal(LedPattern::Blink {
                period_ms: 500,
                duration_ms: None,
            });
            return;
        }
        Event::Initialized => {
            RED_LED.signal(LedPattern::Off);
            return;
        }
        Event::SimOffline => {
            log::warn!("control: sim offline");
            RED_LED.signal(LedPattern::On);
            web_log(event.tag());
            reset_sim(sim_reset, last_sim_reset, false).await;
            return;
        }
        _ => {}
    }

    web_log(event.tag());

    match event {
        Event::IncomingCall { caller } => {
            if store.get().is_allowed(&caller) {
                log::info!("control: opening gate for {}", caller);
                pulse_relay(relay).await;
                OP_QUEUE.push(CallOp::OpenGate {
                    gate: store.get().gate_number.clone(),
                    caller,
                });
            } else {
                log::info!("control: declining call from {}", caller);
                OP_QUEUE.push(CallOp::Decline);
            }
        }
        Event::IncomingSms { index, message } => {
            handle_sms(index, &message.lines, store, credit, sim_reset, last_sim_reset).await;
        }
        Event::CallEnded { code, number } => {
            log::info!("control: call with {} ended ({})", number, code);
        }
        Event::OutgoingRinging { code, number } => {
            log::info!("control: outgoing call to {}: {}", number, code);
        }
        Event::PowerDown { code } => {
            log::warn!("control: modem power down: {}", code);
            RED_LED.signal(LedPattern::On);
        }
        Event::Error { msg, command } => {
            log::warn!("control: driver error: {} ({})", msg, command);
        }
        _ => {}
    }
}

/// Classify one stored SMS by its `+CMGR` status line and act on it.
/// Owner messages carry commands; operator credit-info fragments are
/// aggregated; anything else is forwarded to the owner.
async fn handle_sms(
    index: u32,
    lines: &at::RawLines,
    store: &mut SettingsStore,
    credit: &mut CreditAggregator,
    sim_reset: &mut Output<'static>,
    last_sim_reset: &mut Option<Instant>,
) {
    let Some(status_line) = lines.first() else {
        return;
    };
    let sender = at::cmgr_sender(status_line);
    let from_owner = store.get().is_owner(&sender);
    let from_credit_info = lines.iter().any(|l| l.contains("Credit Info"));

    let mut body = SmsText::new();
    for line in lines.iter().skip(1) {
        if !body.is_empty() {
            let _ = body.push('\n');
        }
        let _ = body.push_str(line);
    }

    if from_owner {
        let command = normalized(&body);
        owner_command(&command, index, store, sim_reset, last_sim_reset).await;
    } else if from_credit_info {
        credit.push(&body);
        OP_QUEUE.push(CallOp::DeleteSms {
            index,
            delete_all: false,
        });
    } else {
        let owner = store.get().owner_number.clone();
        if owner.is_empty() {
            return;
        }
        let mut message = SmsText::new();
        let _ = write!(message, "From {}:\n{}", sender, body);
        OP_QUEUE.push(CallOp::RelaySms {
            to: owner,
            message,
            index,
        });
    }
}

async fn owner_command(
    command: &str,
    index: u32,
    store: &mut SettingsStore,
    sim_reset: &mut Output<'static>,
    last_sim_reset: &mut Option<Instant>,
) {
    let owner = store.get().owner_number.clone();

    if command == "help:" {
        let mut message = SmsText::new();
        let _ = message.push_str(HELP_TEXT);
        OP_QUEUE.push(CallOp::SendSms { to: owner, message });
    } else if command == "get:credit" {
        OP_QUEUE.push(CallOp::DeleteSms {
            index,
            delete_all: false,
        });
        OP_QUEUE.push(CallOp::CheckCredit);
    } else if command == "delete:sms" {
        OP_QUEUE.push(CallOp::DeleteSms {
            index: 0,
            delete_all: true,
        });
    } else if command == "reset:sim" {
        log::info!("control: sim reset requested over sms");
        reset_sim(sim_reset, last_sim_reset, true).await;
    } else if let Some(number) = command.strip_prefix("allow:") {
        let number = number.trim();
        let mut settings = store.get().clone();
        let changed = settings.allow(number);
        if changed {
            store.save(settings);
        }
        confirm(&owner, index, changed, "allowed");
    } else if let Some(number) = command.strip_prefix("deny:") {
        let number = number.trim();
        let mut settings = store.get().clone();
        let changed = settings.deny(number);
        if changed {
            store.save(settings);
        }
        confirm(&owner, index, changed, "denied");
    } else {
        log::info!("control: unknown owner command: {}", command);
    }
}

fn confirm(owner: &str, index: u32, changed: bool, verb: &str) {
    OP_QUEUE.push(CallOp::DeleteSms {
        index,
        delete_all: false,
    });
    let mut message = SmsText::new();
    if changed {
        let _ = write!(message, "Caller {}", verb);
    } else {
        let _ = message.push_str("No change");
    }
    let mut to = crate::at::PhoneNumber::new();
    let _ = to.push_str(owner);
    OP_QUEUE.push(CallOp::SendSms { to, message });
}

/// Open requested from the status page. Only queues the operation: the
/// gate-opening flow acquires the transaction lock inside the worker, so
/// this loop, the sole watchdog feeder, never parks on a held lock.
async fn open_from_web(relay: &mut Output<'static>, settings: &Settings) {
    pulse_relay(relay).await;
    OP_QUEUE.push(CallOp::OpenGate {
        gate: settings.gate_number.clone(),
        caller: settings.owner_number.clone(),
    });
}

/// Hard-wired backup open line.
async fn pulse_relay(relay: &mut Output<'static>) {
    relay.set_high();
    Timer::after_millis(RELAY_PULSE_MS).await;
    relay.set_low();
}

/// Pulse the SIM module's reset line. Automatic resets honor a cooldown;
/// owner-requested ones do not.
async fn reset_sim(
    sim_reset: &mut Output<'static>,
    last_reset: &mut Option<Instant>,
    force: bool,
) {
    if !force {
        if let Some(last) = *last_reset {
            if Instant::now() - last < RESET_SIM_COOLDOWN {
                return;
            }
        }
    }

    log::info!("control: resetting sim module");
    sim_reset.set_low();
    Timer::after_millis(SIM_RESET_PULSE_MS).await;
    sim_reset.set_high();
    *last_reset = Some(Instant::now());
    web_log("sim-reset");
}

fn normalized(body: &str) -> SmsText {
    let mut out = SmsText::new();
    for c in body.trim().chars() {
        let _ = out.push(c.to_ascii_lowercase());
    }
    out
}
