//! Platform collaborator interfaces
//!
//! The engine talks to the platform through two narrow traits: a
//! position service that can be started and stopped, and a permission
//! broker that asks the host to decide. Both are injected at
//! construction; position/error events and the permission decision
//! flow back through the engine's own entry points
//! (`position_changed`, `position_error`, `set_permission`), driven by
//! the host's event loop.

use crate::position::PositionOptions;

/// Platform positioning session (GPS, network positioning, ...).
///
/// One shared session per engine instance: started when the first
/// notifier needs live updates, stopped when none does.
pub trait PositionService {
    /// Begin delivering position updates. Returns true if the session
    /// started or was already running. The high-accuracy hint is
    /// forwarded through `options`.
    fn start_updating(&mut self, options: &PositionOptions) -> bool;

    /// End the positioning session. Idempotent from the engine's side:
    /// only called while a session is running.
    fn stop_updating(&mut self);
}

/// Host-side permission prompt.
///
/// `request_permission` is fire-and-forget; the host answers later by
/// calling `Geolocation::set_permission`.
pub trait PermissionBroker {
    fn request_permission(&mut self);
}

/// Service for hosts without a positioning backend: starts successfully
/// and never reports anything.
#[derive(Debug, Default)]
pub struct NullPositionService;

impl PositionService for NullPositionService {
    fn start_updating(&mut self, _options: &PositionOptions) -> bool {
        true
    }

    fn stop_updating(&mut self) {}
}

/// Broker that never answers; permission stays in progress until the
/// host calls `set_permission` itself.
#[derive(Debug, Default)]
pub struct NullPermissionBroker;

impl PermissionBroker for NullPermissionBroker {
    fn request_permission(&mut self) {}
}
