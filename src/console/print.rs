//! Console print macros.
//!
//! Output goes to a writer function installed by the platform. Until one is
//! installed, printing is silently dropped.

use core::fmt::{self, Write};

use crate::hal::Mutex;

static CONSOLE_WRITER: Mutex<Option<fn(&str)>> = Mutex::new(None);

/// Buffer size for formatting output before handing it to the writer.
const PRINT_BUFFER_SIZE: usize = 512;

/// Installs the function that puts characters on the console.
pub fn set_writer(writer: fn(&str)) {
    *CONSOLE_WRITER.lock() = Some(writer);
}

/// A printer that formats into a fixed-size buffer, then outputs atomically.
struct BufferedPrinter {
    writer: fn(&str),
    buffer: [u8; PRINT_BUFFER_SIZE],
    pos: usize,
}

impl BufferedPrinter {
    const fn new(writer: fn(&str)) -> Self {
        Self {
            writer,
            buffer: [0; PRINT_BUFFER_SIZE],
            pos: 0,
        }
    }

    fn flush(&mut self) {
        if self.pos > 0 {
            // Only whole `str`s are copied in, and a full buffer is flushed
            // before a partial character could be split.
            if let Ok(s) = core::str::from_utf8(&self.buffer[..self.pos]) {
                (self.writer)(s);
            }
            self.pos = 0;
        }
    }
}

impl Write for BufferedPrinter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.pos + s.len() > PRINT_BUFFER_SIZE {
            self.flush();
        }
        if s.len() > PRINT_BUFFER_SIZE {
            (self.writer)(s);
            return Ok(());
        }
        self.buffer[self.pos..self.pos + s.len()].copy_from_slice(s.as_bytes());
        self.pos += s.len();
        Ok(())
    }
}

impl Drop for BufferedPrinter {
    fn drop(&mut self) {
        self.flush();
    }
}

pub fn _print(args: fmt::Arguments) {
    // Hold the writer lock for the whole line so CPUs don't interleave.
    let guard = CONSOLE_WRITER.lock();
    let Some(writer) = *guard else {
        return;
    };

    let mut printer = BufferedPrinter::new(writer);
    // Ignore write errors - printing should not panic
    let _ = printer.write_fmt(args);
}

/// Simple console print operation.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        $crate::console::print::_print(format_args!($($arg)*))
    });
}

/// Simple console print operation with newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}
