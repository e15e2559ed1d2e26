//! Modem driver context: channels, locks, the command/response correlator
//! and the reader/writer/dispatcher tasks.
//!
//! Ordering guarantees on the shared half-duplex line:
//! - outbound commands are written strictly FIFO by the writer task;
//! - exactly one AT command awaits a response at a time (`COMMAND_LOCK`);
//! - exactly one multi-step transaction (call, SMS, diagnostic step) is in
//!   flight at a time (`TRANSACTION_LOCK`).
//!
//! The incoming-call handler acquires the transaction lock and stashes the
//! guard; releasing it is the job of whichever operation answers or
//! declines the call (`call::open_gate` / `call::decline_call`). The guard
//! hand-off is explicit so a release can neither happen twice nor be
//! forgotten silently.

use core::cell::RefCell;

use embassy_futures::yield_now;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration, Timer};
use esp_hal::uart::{UartRx, UartTx};
use esp_hal::Async;

use crate::at::{self, Command, Line, RawLines};
use crate::event::{CommandResponse, Event, ReadStatus};
use crate::queue::{EvictingChannel, GuardStash, WriteGate};
use crate::transport::LineReader;

/// Cooperative settle delay between protocol steps.
pub const SLEEP_MS: u64 = 50;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Events for the orchestrator (freshness over completeness).
pub static DEVICE_EVENTS: EvictingChannel<Event, 12> = EvictingChannel::new();
/// Diagnostics and errors for the status page / log.
pub static DEBUG_EVENTS: EvictingChannel<Event, 12> = EvictingChannel::new();

static WRITE_QUEUE: EvictingChannel<Command, 8> = EvictingChannel::new();
static READ_QUEUE: EvictingChannel<Frame, 4> = EvictingChannel::new();
static URC_QUEUE: EvictingChannel<Line, 16> = EvictingChannel::new();

/// Serializes `send` callers: one command awaits its response at a time.
static COMMAND_LOCK: Mutex<CriticalSectionRawMutex, ()> = Mutex::new(());
/// Serializes multi-step call/SMS/diagnostic transactions.
pub static TRANSACTION_LOCK: Mutex<CriticalSectionRawMutex, ()> = Mutex::new(());
static WRITE_GATE: WriteGate = WriteGate::new();

/// Set by call-in-progress handling when the gate side starts ringing.
pub static FIRST_RING: Signal<CriticalSectionRawMutex, ()> = Signal::new();

pub type TransactionGuard = MutexGuard<'static, CriticalSectionRawMutex, ()>;

/// Transaction guard stashed by the incoming-call handler until the
/// orchestrator answers or declines.
static CALL_GUARD: GuardStash<TransactionGuard> = GuardStash::new();

pub fn stash_call_guard(guard: TransactionGuard) {
    if CALL_GUARD.stash(guard).is_some() {
        log::error!("modem: replaced a stashed transaction guard");
    }
}

pub fn take_call_guard() -> Option<TransactionGuard> {
    CALL_GUARD.take()
}

/// Response frame as delivered by the reader: raw lines plus read status.
struct Frame {
    read_status: ReadStatus,
    lines: RawLines,
}

/// Mutable driver state, consolidated behind one blocking mutex and only
/// touched through `with_state`.
pub struct ModemState {
    last_command: Command,
    line_buffer: RawLines,
    read_status: ReadStatus,
    pub incoming_call: Option<at::PhoneNumber>,
    pub outgoing_call: Option<at::PhoneNumber>,
    pub op_in_progress: bool,
    pub gate_ring_ok: bool,
    pub gate_last_code: Option<Line>,
    debug_mode: bool,
}

static STATE: BlockingMutex<CriticalSectionRawMutex, RefCell<ModemState>> =
    BlockingMutex::new(RefCell::new(ModemState {
        last_command: Command::new(),
        line_buffer: RawLines::new(),
        read_status: ReadStatus::Ok,
        incoming_call: None,
        outgoing_call: None,
        op_in_progress: false,
        gate_ring_ok: false,
        gate_last_code: None,
        debug_mode: false,
    }));

pub fn with_state<R>(f: impl FnOnce(&mut ModemState) -> R) -> R {
    STATE.lock(|cell| f(&mut cell.borrow_mut()))
}

/// A call, SMS fetch or outgoing operation is in flight.
pub fn is_busy() -> bool {
    with_state(|s| s.incoming_call.is_some() || s.outgoing_call.is_some() || s.op_in_progress)
}

/// Passive listen mode: raw lines are echoed to the log and the health
/// monitor stands down.
pub fn set_debug_mode(enabled: bool) {
    with_state(|s| s.debug_mode = enabled);
}

pub fn debug_mode() -> bool {
    with_state(|s| s.debug_mode)
}

pub fn device_event(event: Event) {
    log::debug!("modem: device event {}", event.tag());
    DEVICE_EVENTS.push(event);
}

pub fn debug_event(event: Event) {
    DEBUG_EVENTS.push(event);
}

/// Issue one AT command and await its shaped response (single-line shape,
/// default timeout).
pub async fn send(command: &str) -> CommandResponse {
    send_inner(command, true, DEFAULT_TIMEOUT, false).await
}

/// Issue one AT command with explicit response shape and timeout.
pub async fn send_opts(command: &str, single_line: bool, timeout: Duration) -> CommandResponse {
    send_inner(command, single_line, timeout, false).await
}

/// Fire-and-forget: enqueue without awaiting any response. Used for
/// multi-line payload sends (the `AT+CMGS` prompt stage).
pub async fn send_no_wait(command: &str) {
    let _ = send_inner(command, true, DEFAULT_TIMEOUT, true).await;
}

async fn send_inner(
    command: &str,
    single_line: bool,
    timeout: Duration,
    no_wait: bool,
) -> CommandResponse {
    let _serialized = COMMAND_LOCK.lock().await;

    // The classifier needs the last issued command to resolve the
    // solicited/unsolicited ambiguities.
    with_state(|s| {
        s.last_command.clear();
        let _ = s.last_command.push_str(command);
    });

    let mut outbound = Command::new();
    let _ = outbound.push_str(command);
    WRITE_QUEUE.push(outbound);

    if no_wait {
        yield_now().await;
        return CommandResponse {
            read_status: ReadStatus::Ok,
            terminal: at::TerminalStatus::Unknown,
            lines: RawLines::new(),
        };
    }

    let frame = match with_timeout(timeout, READ_QUEUE.pop()).await {
        Ok(frame) => frame,
        Err(_) => {
            // No terminal line within the timeout: synthesize a frame from
            // whatever accumulated, and reset the buffer for the next
            // command.
            let partial = with_state(|s| {
                let lines = s.line_buffer.clone();
                s.line_buffer.clear();
                s.read_status = ReadStatus::Ok;
                lines
            });
            let mut failed = Command::new();
            let _ = failed.push_str(command);
            debug_event(Event::Error {
                msg: "Timeout error",
                command: failed,
            });
            Frame {
                read_status: ReadStatus::Timeout,
                lines: partial,
            }
        }
    };

    let (terminal, lines) = at::shape_response(command, frame.lines, single_line);

    Timer::after_millis(SLEEP_MS).await;

    if frame.read_status == ReadStatus::Timeout {
        // The writer may still be stuck mid-write on a response that will
        // never complete framing. `release` is a no-op if the gate is free.
        if WRITE_GATE.release() {
            log::warn!("modem: released write gate after response timeout");
        }
    }

    CommandResponse {
        read_status: frame.read_status,
        terminal,
        lines,
    }
}

/// Drains the outbound queue onto the UART, strictly FIFO.
#[embassy_executor::task]
pub async fn writer_task(mut tx: UartTx<'static, Async>) {
    use embedded_io_async::Write;

    loop {
        let command = WRITE_QUEUE.pop().await;
        WRITE_GATE.acquire().await;
        let result = async {
            tx.write_all(command.as_bytes()).await?;
            tx.write_all(b"\r\n").await?;
            tx.flush().await
        }
        .await;
        if let Err(e) = result {
            log::error!("modem: uart write failed: {:?}", e);
        }
        let _ = WRITE_GATE.release();
    }
}

/// Reads lines off the UART and classifies each one.
#[embassy_executor::task]
pub async fn reader_task(rx: UartRx<'static, Async>) {
    let mut reader = LineReader::new(rx);
    loop {
        if let Some(line) = reader.read_line(crate::transport::READ_TIMEOUT).await {
            process_line(&line);
        }
    }
}

fn process_line(line: &Line) {
    if line.is_empty() {
        return;
    }

    let (debug_mode, last_command) = with_state(|s| (s.debug_mode, s.last_command.clone()));
    if debug_mode {
        log::info!("modem: {}", line);
        return;
    }

    if at::is_unsolicited(line, &last_command) {
        if !at::is_ignored_urc(line) {
            // A URC mid-response does not corrupt framing, but it is
            // recorded on the in-progress frame.
            with_state(|s| s.read_status = ReadStatus::Interrupted);
            URC_QUEUE.push(line.clone());
        }
        return;
    }

    let frame = with_state(|s| {
        if s.line_buffer.is_full() {
            s.line_buffer.remove(0);
        }
        let _ = s.line_buffer.push(line.clone());

        if at::is_terminal(line) {
            let frame = Frame {
                read_status: s.read_status,
                lines: s.line_buffer.clone(),
            };
            // The buffer is cleared exactly on terminal delivery; no frame
            // is ever partially delivered.
            s.line_buffer.clear();
            s.read_status = ReadStatus::Ok;
            Some(frame)
        } else {
            None
        }
    });

    if let Some(frame) = frame {
        READ_QUEUE.push(frame);
        let _ = WRITE_GATE.release();
    }
}

/// Consumes classified URCs one at a time, strict FIFO. No concurrent
/// dispatch: call/SMS state transitions keep their arrival order.
#[embassy_executor::task]
pub async fn urc_task() {
    loop {
        let line = URC_QUEUE.pop().await;
        log::debug!("modem: urc {}", line);
        crate::call::dispatch_urc(&line).await;
        Timer::after_millis(SLEEP_MS).await;
    }
}

/// Raw AT command injection for the maintenance path.
pub async fn send_raw(command: &str) {
    log::info!("modem: raw command {}", command);
    let _guard = TRANSACTION_LOCK.lock().await;
    send_no_wait(command).await;
}
