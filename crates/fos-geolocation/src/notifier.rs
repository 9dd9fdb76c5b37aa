//! Outstanding request records
//!
//! A `GeoNotifier` represents one outstanding `get_current_position` or
//! `watch_position` request: its callbacks, options and optional fatal
//! error. Records are arena-owned by the engine; the owning collections
//! store `NotifierId` handles only. A notifier's timer lives in the
//! engine's timer queue (armed = present there) and retirement is
//! removal from the arena.

use crate::position::{Geoposition, PositionError, PositionOptions};

slotmap::new_key_type! {
    /// Handle to an arena-owned notifier record.
    pub struct NotifierId;
}

/// Success callback invoked with a delivered position.
pub type SuccessCallback = Box<dyn FnMut(&Geoposition)>;

/// Error callback invoked with a delivered error. Optional; errors for
/// requests registered without one are silently dropped.
pub type ErrorCallback = Box<dyn FnMut(&PositionError)>;

/// Outcome of a timer firing, acted on by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TimerFired {
    /// The recorded fatal error was delivered; retire the notifier.
    FatalDelivered,
    /// The notifier wants its cached-position delivery now.
    UseCachedPosition,
    /// Plain timeout was delivered; one-shots retire, watchers stay.
    TimedOut,
}

pub struct GeoNotifier {
    success: SuccessCallback,
    error: Option<ErrorCallback>,
    options: PositionOptions,
    fatal_error: Option<PositionError>,
    use_cached_position: bool,
}

impl GeoNotifier {
    pub fn new(
        success: SuccessCallback,
        error: Option<ErrorCallback>,
        options: PositionOptions,
    ) -> Self {
        Self {
            success,
            error,
            options,
            fatal_error: None,
            use_cached_position: false,
        }
    }

    pub fn options(&self) -> &PositionOptions {
        &self.options
    }

    /// Whether the request asked for a zero timeout ("whatever is
    /// available right now").
    pub fn has_zero_timeout(&self) -> bool {
        self.options.timeout.is_some_and(|t| t.is_zero())
    }

    pub fn fatal_error(&self) -> Option<&PositionError> {
        self.fatal_error.as_ref()
    }

    /// Record a fatal error. The first writer wins: later calls are
    /// no-ops so the original error survives concurrent error paths.
    /// Returns true if the error was recorded.
    pub fn set_fatal_error(&mut self, error: PositionError) -> bool {
        if self.fatal_error.is_some() {
            return false;
        }
        self.fatal_error = Some(error);
        true
    }

    pub fn use_cached_position(&self) -> bool {
        self.use_cached_position
    }

    pub fn set_use_cached_position(&mut self) {
        self.use_cached_position = true;
    }

    pub fn clear_use_cached_position(&mut self) {
        self.use_cached_position = false;
    }

    pub fn run_success_callback(&mut self, position: &Geoposition) {
        (self.success)(position);
    }

    pub fn run_error_callback(&mut self, error: &PositionError) {
        if let Some(callback) = self.error.as_mut() {
            callback(error);
        }
    }

    /// Resolve a timer firing. Evaluated strictly in order: a recorded
    /// fatal error beats cached delivery, which beats a plain timeout.
    /// Callbacks are invoked here; set removal is the engine's job.
    pub fn timer_fired(&mut self) -> TimerFired {
        if let Some(error) = self.fatal_error.clone() {
            self.run_error_callback(&error);
            return TimerFired::FatalDelivered;
        }

        if self.use_cached_position {
            // Cleared so a surviving watcher won't spuriously re-enter
            // this path on its next firing.
            self.use_cached_position = false;
            return TimerFired::UseCachedPosition;
        }

        let error = PositionError::timeout();
        self.run_error_callback(&error);
        TimerFired::TimedOut
    }
}
