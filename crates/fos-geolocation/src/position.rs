//! Position and error value types
//!
//! Immutable values exchanged between the platform position service,
//! the engine and registered callbacks.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Geographic coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Accuracy radius in meters
    pub accuracy: f64,
    pub altitude: Option<f64>,
    pub altitude_accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
        }
    }
}

/// A position fix: coordinates plus the time it was obtained.
///
/// Immutable once constructed from a platform position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geoposition {
    pub coords: Coordinates,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl Geoposition {
    pub fn new(coords: Coordinates, timestamp_ms: u64) -> Self {
        Self { coords, timestamp_ms }
    }

    /// Build a position stamped with the current wall-clock time.
    pub fn at_current_time(coords: Coordinates) -> Self {
        Self::new(coords, wall_clock_ms())
    }
}

/// Error codes reported to position callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionErrorCode {
    PermissionDenied,
    PositionUnavailable,
    Timeout,
}

impl std::fmt::Display for PositionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "PERMISSION_DENIED"),
            Self::PositionUnavailable => write!(f, "POSITION_UNAVAILABLE"),
            Self::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// Error delivered to a request's error callback.
///
/// A fatal error ends a notifier's participation entirely; a non-fatal
/// error on a watcher is reported and the watch continues.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PositionError {
    pub code: PositionErrorCode,
    pub message: String,
    pub is_fatal: bool,
}

impl PositionError {
    pub fn new(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            is_fatal: false,
        }
    }

    pub fn fatal(code: PositionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            is_fatal: true,
        }
    }

    pub(crate) fn permission_denied() -> Self {
        Self::fatal(PositionErrorCode::PermissionDenied, "User denied Geolocation")
    }

    pub(crate) fn service_failed() -> Self {
        Self::fatal(
            PositionErrorCode::PositionUnavailable,
            "Failed to start Geolocation service",
        )
    }

    pub(crate) fn timeout() -> Self {
        Self::new(PositionErrorCode::Timeout, "Timeout expired")
    }

    pub(crate) fn page_inactive() -> Self {
        Self::fatal(
            PositionErrorCode::PositionUnavailable,
            "Page is no longer active",
        )
    }
}

/// Per-request options, mirroring the W3C PositionOptions dictionary.
///
/// `maximum_age` has three distinct meanings: absent accepts a cached
/// position of any age, zero rejects the cache outright, and a positive
/// value accepts a cached position no older than that.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Option<Duration>,
    pub maximum_age: Option<Duration>,
}

impl PositionOptions {
    pub fn high_accuracy() -> Self {
        Self {
            enable_high_accuracy: true,
            ..Self::default()
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PositionError::new(PositionErrorCode::Timeout, "Timeout expired");
        assert_eq!(err.to_string(), "TIMEOUT: Timeout expired");
        assert!(!err.is_fatal);
    }

    #[test]
    fn test_fatal_constructor() {
        let err = PositionError::permission_denied();
        assert_eq!(err.code, PositionErrorCode::PermissionDenied);
        assert!(err.is_fatal);
    }

    #[test]
    fn test_default_options() {
        let opts = PositionOptions::default();
        assert!(!opts.enable_high_accuracy);
        assert!(opts.timeout.is_none());
        assert!(opts.maximum_age.is_none());
    }
}
