//! Line-delimited transport binding.
//!
//! The driver only requires a byte source with a per-read timeout; the
//! UART itself (baud, parity, pins) is configured by `main`. `LineReader`
//! is generic over `embedded_io_async::Read` so nothing below `main` names
//! the HAL type.

use embassy_time::{with_timeout, Duration};
use embedded_io_async::Read;
use heapless::Vec;

use crate::at::{Line, LINE_LEN};

pub const BAUD_RATE: u32 = 115_200;
/// Per-read timeout. The SMS prompt (`> `) never gets a line terminator,
/// so an idle timeout with a non-empty buffer flushes the partial line.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

pub struct LineReader<R> {
    rx: R,
    partial: Vec<u8, LINE_LEN>,
}

impl<R: Read> LineReader<R> {
    pub fn new(rx: R) -> Self {
        Self {
            rx,
            partial: Vec::new(),
        }
    }

    /// Read one line, stripping the CR/LF terminator. Returns `None` when
    /// nothing (and no partial line) arrived within the timeout.
    pub async fn read_line(&mut self, timeout: Duration) -> Option<Line> {
        loop {
            let mut byte = [0u8; 1];
            let read = match with_timeout(timeout, self.rx.read(&mut byte)).await {
                Ok(Ok(n)) => n,
                Ok(Err(_)) => return None,
                Err(_) => {
                    // Idle: deliver a partial line if one accumulated
                    if self.partial.is_empty() {
                        return None;
                    }
                    return Some(self.take_line());
                }
            };
            if read == 0 {
                continue;
            }

            match byte[0] {
                b'\n' => return Some(self.take_line()),
                b'\r' => {}
                b => {
                    if self.partial.push(b).is_err() {
                        // Overflow: drop the runaway line
                        self.partial.clear();
                    }
                }
            }
        }
    }

    fn take_line(&mut self) -> Line {
        let mut line = Line::new();
        if let Ok(text) = core::str::from_utf8(&self.partial) {
            let _ = line.push_str(text.trim());
        }
        self.partial.clear();
        line
    }
}
