//! Scoped log suppression around noisy engine calls.

use log::LevelFilter;

/// Silences the `log` facade while alive, restoring the previous max level on drop.
///
/// Inactive guards are no-ops, so callers can write
/// `QuietLogs::new(verbosity <= 1)` unconditionally. Guards nest in LIFO order.
#[derive(Debug)]
#[must_use = "logs are restored as soon as the guard is dropped"]
pub struct QuietLogs {
    previous: Option<LevelFilter>,
}

impl QuietLogs {
    /// Silence logging if `active`.
    pub fn new(active: bool) -> Self {
        if !active {
            return Self { previous: None };
        }
        let previous = log::max_level();
        log::set_max_level(LevelFilter::Off);
        Self { previous: Some(previous) }
    }

    /// Whether this guard is currently suppressing output.
    pub fn is_active(&self) -> bool {
        self.previous.is_some()
    }

    /// Restore logging now instead of at drop.
    pub fn clear(&mut self) {
        if let Some(previous) = self.previous.take() {
            log::set_max_level(previous);
        }
    }
}

impl Drop for QuietLogs {
    fn drop(&mut self) {
        self.clear();
    }
}
