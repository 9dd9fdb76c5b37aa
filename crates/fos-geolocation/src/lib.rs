//! fOS Geolocation - permission and position-notification engine
//!
//! Coordinates asynchronous permission grants, cached-position reuse,
//! per-request timeouts and fan-out of success/error callbacks for
//! one-shot (`get_current_position`) and continuous (`watch_position`)
//! requests. The platform supplies a [`PositionService`] and a
//! [`PermissionBroker`]; the host's event loop pumps the engine so
//! every callback is delivered asynchronously to its registration.

mod cache;
mod engine;
mod notifier;
mod position;
mod service;
mod timers;
mod watchers;

pub use cache::PositionCache;
pub use engine::{EngineConfig, Geolocation, PermissionState};
pub use notifier::{ErrorCallback, GeoNotifier, NotifierId, SuccessCallback, TimerFired};
pub use position::{Coordinates, Geoposition, PositionError, PositionErrorCode, PositionOptions};
pub use service::{NullPermissionBroker, NullPositionService, PermissionBroker, PositionService};
pub use timers::TimerQueue;
pub use watchers::{WatchId, Watchers};
