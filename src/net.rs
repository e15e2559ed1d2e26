//! WiFi connection management with automatic reconnection.

use core::sync::atomic::{AtomicBool, Ordering};

use embassy_net::Runner;
use embassy_time::{Duration, Instant, Timer};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice};

use crate::storage::Config;

const WIFI_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WIFI_MAX_RETRIES_BEFORE_RESET: u8 = 3;
const WIFI_RESET_COOLDOWN: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

static CONNECTED: AtomicBool = AtomicBool::new(false);

/// Link state for the status page.
pub fn is_connected() -> bool {
    CONNECTED.load(Ordering::Relaxed)
}

#[embassy_executor::task]
pub async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

/// WiFi connection state machine. Connection attempts time out; repeated
/// failures power-cycle the radio and back off before trying again.
#[embassy_executor::task]
pub async fn connection_task(mut controller: WifiController<'static>, config: Config) {
    loop {
        if connect(&mut controller, &config).await {
            CONNECTED.store(true, Ordering::Relaxed);
            log::info!("wifi: connected");

            while controller.is_connected().unwrap_or(false) {
                Timer::after(POLL_INTERVAL).await;
            }

            log::warn!("wifi: disconnected, will power-cycle radio");
            CONNECTED.store(false, Ordering::Relaxed);
            power_cycle(&mut controller).await;
        }
    }
}

/// One connection attempt. Returns true on success; on repeated timeouts
/// power-cycles the radio and waits out the cooldown.
async fn connect(controller: &mut WifiController<'static>, config: &Config) -> bool {
    use alloc::string::ToString;

    let mut retry_count: u8 = 0;

    loop {
        log::info!("wifi: connecting to {}", config.ssid);

        // Ensure WiFi is stopped before (re)configuring to avoid ESP-IDF errors
        let _ = controller.stop();
        Timer::after_millis(10).await;

        let client_config = ClientConfig::default()
            .with_ssid(config.ssid.to_string())
            .with_password(config.password.to_string());
        if let Err(e) = controller.set_config(&ModeConfig::Client(client_config)) {
            log::error!("wifi: set_config failed: {:?}", e);
        }
        if let Err(e) = controller.start() {
            log::error!("wifi: start failed: {:?}", e);
        }
        if let Err(e) = controller.connect() {
            log::error!("wifi: connect failed: {:?}", e);
        }

        let started = Instant::now();
        loop {
            if controller.is_connected().unwrap_or(false) {
                return true;
            }
            if Instant::now() - started > WIFI_CONNECT_TIMEOUT {
                break;
            }
            Timer::after(POLL_INTERVAL).await;
        }

        retry_count = retry_count.saturating_add(1);
        log::warn!(
            "wifi: connection timeout (attempt {}/{})",
            retry_count,
            WIFI_MAX_RETRIES_BEFORE_RESET
        );

        if retry_count >= WIFI_MAX_RETRIES_BEFORE_RESET {
            log::warn!("wifi: power-cycling radio after {} failures", retry_count);
            power_cycle(controller).await;
            retry_count = 0;
        }
    }
}

async fn power_cycle(controller: &mut WifiController<'static>) {
    if let Err(e) = controller.disconnect() {
        log::warn!("wifi: disconnect failed: {:?}", e);
    }
    if let Err(e) = controller.stop() {
        log::warn!("wifi: stop failed: {:?}", e);
    }
    crate::feed_watchdog();
    Timer::after(WIFI_RESET_COOLDOWN).await;
}
