//! Sources of the monitored value.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

use crate::error::{TrackerError, TrackerResult};

/// Default location of Linux power-supply class devices.
pub const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Reads the current value of the monitored metric on demand.
pub trait SampleSource: Send + Sync {
    /// Read the current value.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::SourceUnavailable`] when no reading can be taken.
    fn read(&self) -> TrackerResult<i64>;
}

/// Battery charge percentage from a Linux `power_supply` device.
#[derive(Debug, Clone)]
pub struct PowerSupplySource {
    capacity_path: PathBuf,
}

impl PowerSupplySource {
    /// Use the `capacity` attribute of a specific device directory.
    pub fn new(device_dir: impl AsRef<Path>) -> Self {
        Self {
            capacity_path: device_dir.as_ref().join("capacity"),
        }
    }

    /// Find the first battery under `root` that exposes a capacity.
    pub fn discover(root: impl AsRef<Path>) -> TrackerResult<Self> {
        let root = root.as_ref();
        let entries = fs::read_dir(root).map_err(|e| TrackerError::SourceUnavailable {
            message: format!("Cannot list {}: {e}", root.display()),
        })?;

        let mut devices: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        devices.sort();

        devices
            .into_iter()
            .find(|dir| {
                let is_battery = fs::read_to_string(dir.join("type"))
                    .map(|t| t.trim().eq_ignore_ascii_case("battery"))
                    .unwrap_or(false);
                is_battery && dir.join("capacity").is_file()
            })
            .map(|dir| {
                debug!(device = %dir.display(), "Using battery device");
                Self::new(dir)
            })
            .ok_or_else(|| TrackerError::SourceUnavailable {
                message: format!("No battery found under {}", root.display()),
            })
    }

    pub fn capacity_path(&self) -> &Path {
        &self.capacity_path
    }
}

impl SampleSource for PowerSupplySource {
    fn read(&self) -> TrackerResult<i64> {
        let raw = fs::read_to_string(&self.capacity_path).map_err(|e| {
            TrackerError::SourceUnavailable {
                message: format!("Cannot read {}: {e}", self.capacity_path.display()),
            }
        })?;

        let value: i64 = raw
            .trim()
            .parse()
            .map_err(|e| TrackerError::SourceUnavailable {
                message: format!("Unparseable capacity {:?}: {e}", raw.trim()),
            })?;

        check_percentage(value)
    }
}

/// A source that reports whatever value was last set.
#[derive(Debug)]
pub struct FixedSource {
    value: AtomicI64,
}

impl FixedSource {
    pub fn new(value: i64) -> Self {
        Self {
            value: AtomicI64::new(value),
        }
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }
}

impl SampleSource for FixedSource {
    fn read(&self) -> TrackerResult<i64> {
        check_percentage(self.value.load(Ordering::SeqCst))
    }
}

fn check_percentage(value: i64) -> TrackerResult<i64> {
    if (0..=100).contains(&value) {
        Ok(value)
    } else {
        Err(TrackerError::SourceUnavailable {
            message: format!("Reading {value} outside 0..=100"),
        })
    }
}
