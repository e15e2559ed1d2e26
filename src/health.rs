//! SIM health monitor.
//!
//! A periodic cycle keeps the modem registered: it polls PIN status,
//! re-initializes and unlocks the SIM when it falls out of readiness, and
//! collects network/signal diagnostics for the status page. The
//! diagnostic steps are best-effort: a failed or timed-out step never
//! aborts the rest of the cycle, only a busy line does, so the snapshot
//! stays fresh even while the SIM is down.
//!
//! The cycle drives the modem through `ModemLink`, so the host test crate
//! can run it against a scripted link.

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Duration;

use crate::at::{self, Command, Line, SignalLevel, INIT_COMMAND};
use crate::event::{CommandResponse, Event, ReadStatus, SimSnapshot};
use crate::protocol::PinMonitor;

/// Latest diagnostics, read by the status page.
static SNAPSHOT: Mutex<CriticalSectionRawMutex, RefCell<SimSnapshot>> =
    Mutex::new(RefCell::new(SimSnapshot {
        pin_status: None,
        network: None,
        signal: None,
        signal_friendly: None,
        product: None,
        product_details: None,
    }));

pub fn snapshot() -> SimSnapshot {
    SNAPSHOT.lock(|cell| cell.borrow().clone())
}

pub(crate) fn store_snapshot(state: &SimSnapshot) {
    SNAPSHOT.lock(|cell| *cell.borrow_mut() = state.clone());
}

/// What the health cycle needs from the modem driver.
pub trait ModemLink {
    /// Issue one AT command and await its shaped response.
    async fn query(
        &mut self,
        command: &str,
        single_line: bool,
        timeout: Duration,
    ) -> CommandResponse;
    /// A call, SMS fetch or outgoing operation is in flight.
    fn busy(&self) -> bool;
    fn sim_pin(&self) -> &str;
    fn publish(&mut self, event: Event);
    fn debug(&mut self, event: Event);
    /// Settle delay between unlock steps.
    async fn settle(&mut self, millis: u64);
}

/// One full health cycle. The PIN stage classifies readiness and may run
/// the unlock sequence; the diagnostic stages after it always run unless
/// the line gets busy, and the accumulated snapshot is published at the
/// end of the cycle.
pub async fn query_state<L: ModemLink>(
    link: &mut L,
    pin: &mut PinMonitor,
    state: &mut SimSnapshot,
) {
    let response = link.query("AT+CPIN?", true, Duration::from_secs(2)).await;
    if response.read_status == ReadStatus::Timeout {
        if pin.on_timeout() {
            link.publish(Event::SimOffline);
        }
    } else {
        pin.on_query_answered();
        let status = response.single().unwrap_or("");
        state.pin_status = line_of(status);

        if status == "+CPIN: READY" {
            pin.on_ready();
            link.publish(Event::Initialized);
        } else if pin.on_not_ready() {
            unlock_sim(link, pin, state).await;
        }
    }

    if link.busy() {
        return;
    }
    let network = link.query("AT+COPS?", true, Duration::from_secs(1)).await;
    if network.read_status == ReadStatus::Ok {
        state.network = network.single().and_then(line_of);
    }

    if link.busy() {
        return;
    }
    let signal = link.query("AT+CSQ", true, Duration::from_secs(1)).await;
    if signal.read_status == ReadStatus::Ok {
        if let Some(result) = signal.single() {
            let level = at::csq_level(result);
            state.signal = line_of(result);
            state.signal_friendly = Some(SignalLevel::bucket(level));
        }
    }

    if link.busy() {
        return;
    }
    let product = link.query("ATI", true, Duration::from_secs(1)).await;
    if product.read_status == ReadStatus::Ok {
        state.product = product.single().and_then(line_of);
    }

    if link.busy() {
        return;
    }
    let details = link.query("AT+GSV", false, Duration::from_secs(1)).await;
    if details.read_status == ReadStatus::Ok {
        state.product_details = details.lines.first().cloned();
    }

    link.debug(Event::StateSnapshot(state.clone()));
}

/// Re-initialize the modem and enter the SIM PIN, then confirm readiness.
/// Failure here is not terminal for the cycle; the diagnostics still run.
async fn unlock_sim<L: ModemLink>(link: &mut L, pin: &mut PinMonitor, state: &mut SimSnapshot) {
    log::info!("health: sim not ready, unlocking");

    let _ = link.query("AT", true, Duration::from_secs(1)).await;
    if link.busy() {
        return;
    }
    link.publish(Event::Initializing);
    let _ = link.query(INIT_COMMAND, false, Duration::from_secs(5)).await;
    if link.busy() {
        return;
    }

    if !link.sim_pin().is_empty() {
        let mut cmd = Command::new();
        let _ = write!(cmd, "AT+CPIN={}", link.sim_pin());
        let _ = link.query(&cmd, true, Duration::from_secs(5)).await;
    }
    link.settle(5000).await;

    let response = link.query("AT+CPIN?", true, Duration::from_secs(2)).await;
    if response.read_status != ReadStatus::Timeout {
        pin.on_query_answered();
    }
    if response.single() == Some("+CPIN: READY") {
        pin.on_ready();
        state.pin_status = line_of("+CPIN: READY");
        link.publish(Event::Initialized);
    } else {
        state.pin_status = response.single().and_then(line_of);
    }
}

fn line_of(s: &str) -> Option<Line> {
    let mut line = Line::new();
    line.push_str(s).ok()?;
    Some(line)
}

#[cfg(feature = "esp32")]
pub use driver::monitor_task;

#[cfg(feature = "esp32")]
mod driver {
    use embassy_time::{Duration, Timer};

    use crate::event::{CommandResponse, Event, SimSnapshot};
    use crate::modem::{self, is_busy, send_opts, TRANSACTION_LOCK};
    use crate::protocol::PinMonitor;
    use crate::storage;

    use super::{query_state, store_snapshot, ModemLink};

    const QUERY_INTERVAL_MS: u64 = 1000;

    struct Modem;

    impl ModemLink for Modem {
        async fn query(
            &mut self,
            command: &str,
            single_line: bool,
            timeout: Duration,
        ) -> CommandResponse {
            send_opts(command, single_line, timeout).await
        }

        fn busy(&self) -> bool {
            is_busy()
        }

        fn sim_pin(&self) -> &str {
            storage::config().sim_pin
        }

        fn publish(&mut self, event: Event) {
            modem::device_event(event);
        }

        fn debug(&mut self, event: Event) {
            modem::debug_event(event);
        }

        async fn settle(&mut self, millis: u64) {
            Timer::after_millis(millis).await;
        }
    }

    #[embassy_executor::task]
    pub async fn monitor_task() {
        let mut link = Modem;
        let mut pin = PinMonitor::new();
        let mut state = SimSnapshot::default();
        loop {
            Timer::after_millis(QUERY_INTERVAL_MS).await;
            if modem::debug_mode() || is_busy() {
                continue;
            }
            let _guard = TRANSACTION_LOCK.lock().await;
            query_state(&mut link, &mut pin, &mut state).await;
            store_snapshot(&state);
        }
    }
}
