//! GSM gate opener - ESP32 firmware driving a SIM800L module.
//!
//! Architecture:
//! - `modem`/`transport`: UART line reader, writer and the
//!   command/response correlator for the shared half-duplex AT line
//! - `call`/`health`: call, SMS and SIM-health state machines
//! - `control`: the orchestrator consuming the device/debug event queues
//! - `net`/`http`: WiFi connection management and the status page
//!
//! Everything runs as embassy tasks on a single core.

#![no_std]
#![no_main]

use esp_bootloader_esp_idf::esp_app_desc;
esp_app_desc!();

mod at;
mod call;
mod control;
mod event;
mod health;
mod http;
mod led;
mod modem;
mod net;
mod protocol;
mod queue;
mod request;
mod storage;
mod transport;

extern crate alloc;

use alloc::boxed::Box;
use core::cell::RefCell;
use core::mem::MaybeUninit;
use critical_section::Mutex;
use embassy_net::StackResources;
use esp_alloc as _;
use esp_hal::{
    clock::CpuClock,
    gpio::{Level, Output, OutputConfig},
    main,
    rng::Rng,
    time::Duration,
    timer::timg::{TimerGroup, Wdt},
    uart::{Config as UartConfig, Uart},
};
use esp_println::logger::init_logger;
use esp_radio::wifi::Config as WifiConfig;
use static_cell::StaticCell;

// Watchdog timer, fed by the orchestrator loop
pub(crate) static WATCHDOG: Mutex<RefCell<Option<Wdt<esp_hal::peripherals::TIMG1>>>> =
    Mutex::new(RefCell::new(None));

/// Feed the watchdog timer. This should be called during long-running
/// operations to prevent watchdog reset.
pub fn feed_watchdog() {
    critical_section::with(|cs| {
        if let Some(ref mut wdt) = *WATCHDOG.borrow_ref_mut(cs) {
            wdt.feed();
        }
    });
}

/// Disable the watchdog timer temporarily.
/// SAFETY: Only use this around operations that stall the CPU (like flash
/// writes). Must be paired with `enable_watchdog()`.
pub fn disable_watchdog() {
    critical_section::with(|cs| {
        if let Some(ref mut wdt) = *WATCHDOG.borrow_ref_mut(cs) {
            wdt.disable();
        }
    });
}

/// Re-enable the watchdog timer after it was disabled.
/// Must be paired with a previous `disable_watchdog()` call.
pub fn enable_watchdog() {
    critical_section::with(|cs| {
        if let Some(ref mut wdt) = *WATCHDOG.borrow_ref_mut(cs) {
            wdt.enable();
        }
    });
}

#[main]
fn main() -> ! {
    // Initialize logging
    init_logger(log::LevelFilter::Info);
    log::info!("Gate opener starting...");

    // Initialize heap
    const HEAP_SIZE: usize = 72 * 1024;
    static mut HEAP: MaybeUninit<[u8; HEAP_SIZE]> = MaybeUninit::uninit();
    unsafe {
        esp_alloc::HEAP.add_region(esp_alloc::HeapRegion::new(
            HEAP.as_mut_ptr() as *mut u8,
            HEAP_SIZE,
            esp_alloc::MemoryCapability::Internal.into(),
        ));
    }

    // Hardware init
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Initialize timer for esp-rtos scheduler
    let timg0 = TimerGroup::new(peripherals.TIMG0);

    // Start the esp-rtos scheduler (required before esp_radio::init)
    esp_rtos::start(timg0.timer0);

    // Initialize esp-radio
    let esp_radio_ctrl = match esp_radio::init() {
        Ok(ctrl) => ctrl,
        Err(e) => panic!("esp-radio init failed: {:?}", e),
    };

    // Create WiFi device and controller with station mode config
    let wifi_config = WifiConfig::default();
    let (wifi_controller, interfaces) =
        match esp_radio::wifi::new(&esp_radio_ctrl, peripherals.WIFI, wifi_config) {
            Ok(pair) => pair,
            Err(e) => panic!("wifi init failed: {:?}", e),
        };

    // SAFETY: wifi_device and wifi_controller borrow from esp_radio_ctrl.
    // We leak esp_radio_ctrl to 'static below, making these borrows valid
    // for 'static.
    let wifi_device: esp_radio::wifi::WifiDevice<'static> =
        unsafe { core::mem::transmute(interfaces.sta) };
    let wifi_controller: esp_radio::wifi::WifiController<'static> =
        unsafe { core::mem::transmute(wifi_controller) };

    // Keep esp_radio_ctrl alive (it owns the WiFi state)
    let _esp_radio_ctrl: &'static _ = Box::leak(Box::new(unsafe {
        core::mem::transmute::<_, esp_radio::Controller<'static>>(esp_radio_ctrl)
    }));

    // Initialize watchdog timer on TIMG1 (TIMG0 is used by WiFi)
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let mut wdt = timg1.wdt;
    wdt.enable();
    wdt.set_timeout(
        esp_hal::timer::timg::MwdtStage::Stage0,
        Duration::from_secs(30),
    );
    critical_section::with(|cs| {
        WATCHDOG
            .borrow_ref_mut(cs)
            .replace(unsafe { core::mem::transmute(wdt) });
    });

    // SIM800L on UART1: TX=GPIO17, RX=GPIO16
    let uart_config = UartConfig::default().with_baudrate(transport::BAUD_RATE);
    let uart = match Uart::new(peripherals.UART1, uart_config) {
        Ok(uart) => uart
            .with_tx(peripherals.GPIO17)
            .with_rx(peripherals.GPIO16)
            .into_async(),
        Err(e) => panic!("uart init failed: {:?}", e),
    };
    let (uart_rx, uart_tx) = uart.split();

    // Gate relay (GPIO25), SIM reset line (GPIO4, active low), status LEDs
    let relay = Output::new(peripherals.GPIO25, Level::Low, OutputConfig::default());
    let sim_reset = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let red_led = Output::new(peripherals.GPIO32, Level::Low, OutputConfig::default());
    let green_led = Output::new(peripherals.GPIO33, Level::Low, OutputConfig::default());

    // Network stack with DHCP
    let mut rng = Rng::new();
    let seed = (rng.random() as u64) << 32 | rng.random() as u64;
    static RESOURCES: StaticCell<StackResources<8>> = StaticCell::new();
    let (stack, runner) = embassy_net::new(
        wifi_device,
        embassy_net::Config::dhcpv4(Default::default()),
        RESOURCES.init(StackResources::new()),
        seed,
    );

    let config = storage::config();
    log::info!("config: ssid={}, gate={}", config.ssid, config.gate_number);

    static EXECUTOR: StaticCell<esp_rtos::embassy::Executor> = StaticCell::new();
    let executor = EXECUTOR.init(esp_rtos::embassy::Executor::new());
    executor.run(|spawner| {
        spawner.must_spawn(modem::writer_task(uart_tx));
        spawner.must_spawn(modem::reader_task(uart_rx));
        spawner.must_spawn(modem::urc_task());
        spawner.must_spawn(call::op_worker_task());
        spawner.must_spawn(health::monitor_task());
        spawner.must_spawn(control::orchestrator_task(relay, sim_reset));
        spawner.must_spawn(led::led_task(red_led, &led::RED_LED));
        spawner.must_spawn(led::led_task(green_led, &led::GREEN_LED));
        spawner.must_spawn(net::connection_task(wifi_controller, config));
        spawner.must_spawn(net::net_task(runner));
        spawner.must_spawn(http::server_task(stack));
    })
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    critical_section::with(|_| {
        log::error!("PANIC: {}", info);
    });

    // Spin without feeding the watchdog. The 30s timeout will trigger a
    // full system reset.
    loop {
        core::hint::spin_loop();
    }
}
