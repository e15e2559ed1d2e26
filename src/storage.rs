//! Settings and failure-log storage with flash persistence.
//!
//! Caller settings use A/B double-buffering for atomic updates. A power
//! loss during a write never corrupts data - the previous valid slot
//! remains intact.
//!
//! Storage layout: Two slots at different offsets, each containing:
//!   [4 bytes: magic] [4 bytes: sequence] [4 bytes: CRC32]
//!   [4 bytes: gate_len] [gate_len bytes: gate number]
//!   [4 bytes: owner_len] [owner_len bytes: owner number]
//!   [4 bytes: caller_count] [caller_count * (4 bytes: len + bytes)]
//!
//! On write: Always write to the slot with the lower sequence number.
//! On read: Use the slot with the higher sequence number that has valid CRC.
//!
//! The failure log lives in its own region: [magic] [4 bytes: len]
//! followed by `len` bytes of text. Appends past the size cap restart the
//! log from empty.
//!
//! Network credentials and the default numbers are embedded at compile
//! time via environment variables (GATE_SSID, GATE_PASSWORD, GATE_NUMBER,
//! OWNER_NUMBER, ALLOWED_CALLERS, SIM_PIN).

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Instant;
use embedded_storage::{ReadStorage, Storage as EmbeddedStorage};
use heapless::Vec;

use crate::at::PhoneNumber;
use crate::protocol::{fail_log_needs_rotation, DialLog};

const STORAGE_MAGIC: u32 = 0x47415445; // "GATE"
const FAIL_LOG_MAGIC: u32 = 0x4641494C; // "FAIL"

// Flash storage offsets (in data partition, after app)
// Two 32KB slots within the reserved 64KB region for A/B double-buffering,
// then a 32KB failure-log region.
const STORAGE_SLOT_A: u32 = 0x3D_0000;
const STORAGE_SLOT_B: u32 = 0x3D_8000;
const SLOT_SIZE: usize = 0x8000;
const FAIL_LOG_OFFSET: u32 = 0x3E_0000;

pub const MAX_ALLOWED: usize = 16;

/// Compile-time configuration.
#[derive(Clone)]
pub struct Config {
    pub ssid: &'static str,
    pub password: &'static str,
    pub gate_number: &'static str,
    pub owner_number: &'static str,
    pub allowed_callers: &'static str,
    pub sim_pin: &'static str,
}

pub fn config() -> Config {
    Config {
        ssid: option_env!("GATE_SSID").unwrap_or("unconfigured"),
        password: option_env!("GATE_PASSWORD").unwrap_or(""),
        gate_number: option_env!("GATE_NUMBER").unwrap_or(""),
        owner_number: option_env!("OWNER_NUMBER").unwrap_or(""),
        allowed_callers: option_env!("ALLOWED_CALLERS").unwrap_or(""),
        sim_pin: option_env!("SIM_PIN").unwrap_or(""),
    }
}

/// Runtime-editable settings. Seeded from the compile-time defaults and
/// persisted once the owner edits them over SMS.
#[derive(Clone, Default)]
pub struct Settings {
    pub gate_number: PhoneNumber,
    pub owner_number: PhoneNumber,
    pub allowed: Vec<PhoneNumber, MAX_ALLOWED>,
}

impl Settings {
    /// Defaults from the compile-time environment. ALLOWED_CALLERS is a
    /// comma-separated list.
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self::default();
        let _ = settings.gate_number.push_str(config.gate_number);
        let _ = settings.owner_number.push_str(config.owner_number);
        for entry in config.allowed_callers.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let mut number = PhoneNumber::new();
            if number.push_str(entry).is_ok() {
                let _ = settings.allowed.push(number);
            }
        }
        settings
    }

    pub fn is_owner(&self, number: &str) -> bool {
        !self.owner_number.is_empty() && self.owner_number.as_str() == number
    }

    pub fn is_allowed(&self, number: &str) -> bool {
        self.is_owner(number) || self.allowed.iter().any(|n| n.as_str() == number)
    }

    pub fn allow(&mut self, number: &str) -> bool {
        if self.is_allowed(number) {
            return true;
        }
        let mut entry = PhoneNumber::new();
        if entry.push_str(number).is_err() {
            return false;
        }
        self.allowed.push(entry).is_ok()
    }

    pub fn deny(&mut self, number: &str) -> bool {
        let before = self.allowed.len();
        self.allowed.retain(|n| n.as_str() != number);
        self.allowed.len() != before
    }
}

/// Latest settings, readable by the status page without going through the
/// owning task.
static SETTINGS: Mutex<CriticalSectionRawMutex, RefCell<Settings>> = Mutex::new(RefCell::new(
    Settings {
        gate_number: PhoneNumber::new(),
        owner_number: PhoneNumber::new(),
        allowed: Vec::new(),
    },
));

pub fn settings() -> Settings {
    SETTINGS.lock(|cell| cell.borrow().clone())
}

fn publish_settings(settings: &Settings) {
    SETTINGS.lock(|cell| *cell.borrow_mut() = settings.clone());
}

/// Compute CRC32 for data validation.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0xEDB8_8320
            } else {
                crc >> 1
            };
        }
    }
    !crc
}

/// Settings persistence with A/B double-buffering.
pub struct SettingsStore {
    settings: Settings,
    sequence: u32,
}

impl SettingsStore {
    /// Load persisted settings, falling back to the compile-time defaults
    /// when no valid slot exists.
    pub fn new() -> Self {
        let mut store = Self {
            settings: Settings::from_config(&config()),
            sequence: 0,
        };
        store.load_from_flash();
        publish_settings(&store.settings);
        store
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings and persist them.
    pub fn save(&mut self, settings: Settings) -> bool {
        self.settings = settings;
        publish_settings(&self.settings);
        self.save_to_flash()
    }

    /// Read and validate a single slot.
    #[cfg(feature = "esp32")]
    fn read_slot(offset: u32) -> Option<(u32, Settings)> {
        use alloc::vec;
        use esp_storage::FlashStorage;

        let mut buf = vec![0u8; SLOT_SIZE];
        let mut flash = FlashStorage::new();

        if flash.read(offset, &mut buf).is_err() {
            return None;
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        if magic != STORAGE_MAGIC {
            return None;
        }

        let sequence = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let stored_crc = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut cursor = 12usize;
        let mut settings = Settings::default();

        let gate = read_field(&buf, &mut cursor)?;
        settings.gate_number.push_str(gate).ok()?;
        let owner = read_field(&buf, &mut cursor)?;
        settings.owner_number.push_str(owner).ok()?;

        if cursor + 4 > SLOT_SIZE {
            return None;
        }
        let count =
            u32::from_le_bytes([buf[cursor], buf[cursor + 1], buf[cursor + 2], buf[cursor + 3]])
                as usize;
        cursor += 4;
        if count > MAX_ALLOWED {
            return None;
        }
        for _ in 0..count {
            let entry = read_field(&buf, &mut cursor)?;
            let mut number = PhoneNumber::new();
            number.push_str(entry).ok()?;
            let _ = settings.allowed.push(number);
        }

        let data_crc = crc32(&buf[12..cursor]);
        if data_crc != stored_crc {
            log::warn!(
                "storage: slot at 0x{:X} CRC mismatch (stored={:08X}, computed={:08X})",
                offset,
                stored_crc,
                data_crc
            );
            return None;
        }

        Some((sequence, settings))
    }

    /// Load settings from flash using A/B double-buffering. Reads both
    /// slots and uses the one with the higher valid sequence number.
    fn load_from_flash(&mut self) {
        #[cfg(feature = "esp32")]
        {
            let slot_a = Self::read_slot(STORAGE_SLOT_A);
            let slot_b = Self::read_slot(STORAGE_SLOT_B);

            let chosen = match (&slot_a, &slot_b) {
                (Some((seq_a, _)), Some((seq_b, _))) => {
                    if seq_b > seq_a {
                        log::info!("storage: using slot B (seq={})", seq_b);
                        slot_b
                    } else {
                        log::info!("storage: using slot A (seq={})", seq_a);
                        slot_a
                    }
                }
                (Some((seq, _)), None) => {
                    log::info!("storage: using slot A (seq={}), slot B invalid", seq);
                    slot_a
                }
                (None, Some((seq, _))) => {
                    log::info!("storage: using slot B (seq={}), slot A invalid", seq);
                    slot_b
                }
                (None, None) => {
                    log::info!("storage: no valid settings in flash, using defaults");
                    None
                }
            };

            if let Some((sequence, settings)) = chosen {
                self.sequence = sequence;
                self.settings = settings;
                log::info!(
                    "storage: loaded settings with {} allowed callers",
                    self.settings.allowed.len()
                );
            }
        }

        #[cfg(not(feature = "esp32"))]
        {
            log::warn!("storage: flash not available on this platform");
        }
    }

    /// Read just the sequence number from a slot header (magic + seq).
    #[cfg(feature = "esp32")]
    fn read_slot_sequence(offset: u32) -> Option<u32> {
        use esp_storage::FlashStorage;

        let mut header = [0u8; 8];
        let mut flash = FlashStorage::new();

        if flash.read(offset, &mut header).is_err() {
            return None;
        }

        let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if magic != STORAGE_MAGIC {
            return None;
        }
        Some(u32::from_le_bytes([header[4], header[5], header[6], header[7]]))
    }

    /// Save settings to flash, writing to the slot with the lower sequence
    /// number (the older one).
    fn save_to_flash(&mut self) -> bool {
        #[cfg(feature = "esp32")]
        {
            use alloc::vec;
            use esp_storage::FlashStorage;

            crate::feed_watchdog();

            let slot_a_seq = Self::read_slot_sequence(STORAGE_SLOT_A);
            let slot_b_seq = Self::read_slot_sequence(STORAGE_SLOT_B);

            let (target_offset, slot_name) = match (slot_a_seq, slot_b_seq) {
                (Some(a), Some(b)) if b < a => (STORAGE_SLOT_B, "B"),
                (Some(a), Some(b)) if a < b => (STORAGE_SLOT_A, "A"),
                (Some(_), Some(_)) => (STORAGE_SLOT_A, "A"),
                (None, Some(_)) => (STORAGE_SLOT_A, "A"),
                (Some(_), None) => (STORAGE_SLOT_B, "B"),
                (None, None) => (STORAGE_SLOT_A, "A"),
            };

            self.sequence = self.sequence.saturating_add(1);

            let mut buf = vec![0u8; SLOT_SIZE.min(1024)];
            buf[0..4].copy_from_slice(&STORAGE_MAGIC.to_le_bytes());
            buf[4..8].copy_from_slice(&self.sequence.to_le_bytes());

            let mut cursor = 12usize;
            write_field(&mut buf, &mut cursor, self.settings.gate_number.as_bytes());
            write_field(&mut buf, &mut cursor, self.settings.owner_number.as_bytes());
            buf[cursor..cursor + 4]
                .copy_from_slice(&(self.settings.allowed.len() as u32).to_le_bytes());
            cursor += 4;
            for number in &self.settings.allowed {
                write_field(&mut buf, &mut cursor, number.as_bytes());
            }

            let data_crc = crc32(&buf[12..cursor]);
            buf[8..12].copy_from_slice(&data_crc.to_le_bytes());

            // Flash operations disable the CPU cache; the watchdog cannot
            // be fed during the blocking write.
            crate::disable_watchdog();
            let mut flash = FlashStorage::new();
            let write_result = flash.write(target_offset, &buf[..cursor]);
            crate::enable_watchdog();
            crate::feed_watchdog();

            match write_result {
                Ok(_) => {
                    log::info!(
                        "storage: saved settings to slot {} (seq={})",
                        slot_name,
                        self.sequence
                    );
                    true
                }
                Err(e) => {
                    log::error!("storage: flash write to slot {} failed: {:?}", slot_name, e);
                    self.sequence = self.sequence.saturating_sub(1);
                    false
                }
            }
        }

        #[cfg(not(feature = "esp32"))]
        {
            log::warn!("storage: flash not available on this platform");
            false
        }
    }
}

#[cfg(feature = "esp32")]
fn read_field<'a>(buf: &'a [u8], cursor: &mut usize) -> Option<&'a str> {
    if *cursor + 4 > buf.len() {
        return None;
    }
    let len = u32::from_le_bytes([
        buf[*cursor],
        buf[*cursor + 1],
        buf[*cursor + 2],
        buf[*cursor + 3],
    ]) as usize;
    *cursor += 4;
    if len > 64 || *cursor + len > buf.len() {
        return None;
    }
    let field = core::str::from_utf8(&buf[*cursor..*cursor + len]).ok()?;
    *cursor += len;
    Some(field)
}

#[cfg(feature = "esp32")]
fn write_field(buf: &mut [u8], cursor: &mut usize, field: &[u8]) {
    buf[*cursor..*cursor + 4].copy_from_slice(&(field.len() as u32).to_le_bytes());
    *cursor += 4;
    buf[*cursor..*cursor + field.len()].copy_from_slice(field);
    *cursor += field.len();
}

/// Append one dial-procedure log to the failure-log region. When the log
/// outgrows the size cap it is deleted and restarted.
pub fn append_fail_log(lines: &DialLog) {
    #[cfg(feature = "esp32")]
    {
        use alloc::vec;
        use esp_storage::FlashStorage;

        crate::feed_watchdog();

        let mut flash = FlashStorage::new();
        let mut header = [0u8; 8];
        let mut len = 0usize;
        if flash.read(FAIL_LOG_OFFSET, &mut header).is_ok() {
            let magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            if magic == FAIL_LOG_MAGIC {
                len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
            }
        }
        if fail_log_needs_rotation(len) || len > SLOT_SIZE - 8 {
            log::info!("storage: failure log full, restarting");
            len = 0;
        }

        let mut entry: alloc::vec::Vec<u8> = vec![];
        let uptime = Instant::now().as_secs();
        entry.extend_from_slice(b"--- uptime ");
        let mut secs = heapless::String::<16>::new();
        let _ = core::fmt::write(&mut secs, format_args!("{}s ---\n", uptime));
        entry.extend_from_slice(secs.as_bytes());
        for line in lines {
            entry.extend_from_slice(line.as_bytes());
            entry.push(b'\n');
        }
        entry.push(b'\n');

        if len + entry.len() > SLOT_SIZE - 8 {
            len = 0;
        }

        let new_len = len + entry.len();
        header[0..4].copy_from_slice(&FAIL_LOG_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&(new_len as u32).to_le_bytes());

        crate::disable_watchdog();
        let mut result = flash.write(FAIL_LOG_OFFSET + 8 + len as u32, &entry);
        if result.is_ok() {
            result = flash.write(FAIL_LOG_OFFSET, &header);
        }
        crate::enable_watchdog();
        crate::feed_watchdog();

        match result {
            Ok(_) => log::info!("storage: failure log now {} bytes", new_len),
            Err(e) => log::error!("storage: failure log write failed: {:?}", e),
        }
    }

    #[cfg(not(feature = "esp32"))]
    {
        for line in lines {
            log::warn!("fail-log: {}", line);
        }
    }
}
