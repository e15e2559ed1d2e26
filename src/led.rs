//! Status LED driver.
//!
//! Two LEDs (red for SIM/modem state, green for call activity), each
//! driven by its own task instance. Patterns are replaced by signaling the
//! LED's slot; a blink pattern with a duration falls back to off when it
//! expires.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::gpio::Output;

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    On,
    Blink {
        period_ms: u64,
        duration_ms: Option<u64>,
    },
}

pub static RED_LED: Signal<CriticalSectionRawMutex, LedPattern> = Signal::new();
pub static GREEN_LED: Signal<CriticalSectionRawMutex, LedPattern> = Signal::new();

#[embassy_executor::task(pool_size = 2)]
pub async fn led_task(
    mut pin: Output<'static>,
    patterns: &'static Signal<CriticalSectionRawMutex, LedPattern>,
) {
    let mut pattern = LedPattern::Off;
    loop {
        match pattern {
            LedPattern::Off => {
                pin.set_low();
                pattern = patterns.wait().await;
            }
            LedPattern::On => {
                pin.set_high();
                pattern = patterns.wait().await;
            }
            LedPattern::Blink {
                period_ms,
                duration_ms,
            } => {
                let deadline = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
                loop {
                    pin.toggle();
                    match select(
                        patterns.wait(),
                        Timer::after_millis(period_ms),
                    )
                    .await
                    {
                        Either::First(next) => {
                            pattern = next;
                            break;
                        }
                        Either::Second(()) => {}
                    }
                    if let Some(deadline) = deadline {
                        if Instant::now() >= deadline {
                            pattern = LedPattern::Off;
                            break;
                        }
                    }
                }
            }
        }
    }
}
