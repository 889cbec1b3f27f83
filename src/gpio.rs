//! Digital I/O capability (button input, indicator LED output).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

/// Pin access used directly from the async button loop on every poll.
/// Implementations must return within microseconds; a backend that can stall
/// (network expander, slow bus) belongs behind `spawn_blocking`.
pub trait DigitalIo: Send + Sync {
    fn read_pin(&self, pin: u32) -> bool;
    fn write_pin(&self, pin: u32, level: bool);
}

/// Linux sysfs GPIO (`/sys/class/gpio`), BCM pin numbering.
///
/// Reads and writes are blocking `std::fs` calls. sysfs value files are
/// served from kernel memory, so one read per poll and one write per LED
/// change stay well below a millisecond.
#[derive(Debug)]
pub struct SysfsGpio {
    root: PathBuf,
    last_written: Mutex<HashMap<u32, bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl SysfsGpio {
    pub fn new() -> Self {
        Self::with_root("/sys/class/gpio")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_written: Mutex::new(HashMap::new()),
        }
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    /// Export `pin` (if needed) and set its direction.
    pub fn setup(&self, pin: u32, direction: Direction) -> io::Result<()> {
        if !self.pin_dir(pin).exists() {
            fs::write(self.root.join("export"), pin.to_string())?;
        }
        let dir = match direction {
            Direction::In => "in",
            Direction::Out => "out",
        };
        fs::write(self.pin_dir(pin).join("direction"), dir)?;
        debug!(pin, dir, "gpio configured");
        Ok(())
    }
}

impl Default for SysfsGpio {
    fn default() -> Self {
        Self::new()
    }
}

impl DigitalIo for SysfsGpio {
    fn read_pin(&self, pin: u32) -> bool {
        match fs::read_to_string(self.pin_dir(pin).join("value")) {
            Ok(v) => v.trim() == "1",
            Err(err) => {
                warn!(?err, pin, "gpio read failed");
                // idle level of a pull-up input
                true
            }
        }
    }

    fn write_pin(&self, pin: u32, level: bool) {
        // skip redundant writes; the LED is written on every poll
        if let Ok(mut last) = self.last_written.lock() {
            if last.get(&pin) == Some(&level) {
                return;
            }
            last.insert(pin, level);
        }
        if let Err(err) = fs::write(self.pin_dir(pin).join("value"), if level { "1" } else { "0" }) {
            warn!(?err, pin, "gpio write failed");
        }
    }
}

/// I/O for hosts without a button: reads return `idle_level`, writes are dropped.
#[derive(Debug, Clone, Copy)]
pub struct NullIo {
    pub idle_level: bool,
}

impl DigitalIo for NullIo {
    fn read_pin(&self, _pin: u32) -> bool {
        self.idle_level
    }

    fn write_pin(&self, _pin: u32, _level: bool) {}
}
