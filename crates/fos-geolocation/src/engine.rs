//! Geolocation engine
//!
//! Owns the outstanding one-shot and watch requests, the permission
//! state and the cached position, and orchestrates admission, timeout,
//! permission resolution and position/error fan-out. Single-threaded:
//! all entry points run on one logical task queue and every callback is
//! delivered asynchronously relative to the call that registered it.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use slotmap::SlotMap;

use crate::cache::PositionCache;
use crate::notifier::{ErrorCallback, GeoNotifier, NotifierId, SuccessCallback, TimerFired};
use crate::position::{wall_clock_ms, Geoposition, PositionError, PositionOptions};
use crate::service::{PermissionBroker, PositionService};
use crate::timers::TimerQueue;
use crate::watchers::{WatchId, Watchers};

/// Host permission decision state.
///
/// Monotonic within a session: `InProgress` is entered once by
/// `request_permission` and a decision does not revert to `Unknown`
/// until the engine is disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionState {
    Unknown,
    InProgress,
    Granted,
    Denied,
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Ask the permission broker before starting the position service.
    /// When false, the service is started first and permission is
    /// requested once a position actually arrives.
    pub preemptive_permission: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preemptive_permission: true,
        }
    }
}

/// The permission and position-notification engine.
///
/// Created per requesting context; `disconnect` cancels everything and
/// ends the session when that context goes away.
pub struct Geolocation {
    notifiers: SlotMap<NotifierId, GeoNotifier>,
    one_shots: HashSet<NotifierId>,
    watchers: Watchers,
    pending_for_permission: HashSet<NotifierId>,
    awaiting_cached_position: HashSet<NotifierId>,
    timers: TimerQueue,
    cache: PositionCache,
    last_position: Option<Geoposition>,
    permission: PermissionState,
    next_watch_id: WatchId,
    updating: bool,
    service: Box<dyn PositionService>,
    broker: Box<dyn PermissionBroker>,
    config: EngineConfig,
}

impl Geolocation {
    pub fn new(
        service: Box<dyn PositionService>,
        broker: Box<dyn PermissionBroker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            notifiers: SlotMap::with_key(),
            one_shots: HashSet::new(),
            watchers: Watchers::new(),
            pending_for_permission: HashSet::new(),
            awaiting_cached_position: HashSet::new(),
            timers: TimerQueue::new(),
            cache: PositionCache::new(),
            last_position: None,
            permission: PermissionState::Unknown,
            next_watch_id: 1,
            updating: false,
            service,
            broker,
            config,
        }
    }

    /// Register a one-shot request. The success callback fires at most
    /// once; delivery is always asynchronous to this call.
    pub fn get_current_position(
        &mut self,
        success: SuccessCallback,
        error: Option<ErrorCallback>,
        options: PositionOptions,
    ) {
        let id = self.notifiers.insert(GeoNotifier::new(success, error, options));
        self.one_shots.insert(id);
        self.start_request(id);
    }

    /// Register a continuous watch. The returned id cancels it via
    /// `clear_watch`.
    pub fn watch_position(
        &mut self,
        success: SuccessCallback,
        error: Option<ErrorCallback>,
        options: PositionOptions,
    ) -> WatchId {
        let id = self.notifiers.insert(GeoNotifier::new(success, error, options));
        let watch_id = self.allocate_watch_id();
        self.watchers.add(watch_id, id);
        self.start_request(id);
        watch_id
    }

    /// Cancel a watch. No callback is invoked; removal is synchronous
    /// and any armed timer for the watch is stopped with it.
    pub fn clear_watch(&mut self, id: WatchId) {
        if id == 0 {
            return;
        }
        let Some(notifier) = self.watchers.remove_by_id(id) else {
            return;
        };
        self.forget(notifier);
        self.stop_updating_if_empty();
        tracing::debug!(watch_id = id, "watch cleared");
    }

    /// Host's answer to a permission request.
    ///
    /// A repeated call that flips an already-made decision is a
    /// protocol oddity upstream; the new value is applied (a flip to
    /// denied runs the full denial fan-out) and logged.
    pub fn set_permission(&mut self, granted: bool) {
        let new_state = if granted {
            PermissionState::Granted
        } else {
            PermissionState::Denied
        };
        match (self.permission, new_state) {
            (PermissionState::Granted, PermissionState::Denied)
            | (PermissionState::Denied, PermissionState::Granted) => {
                tracing::warn!(
                    ?new_state,
                    "permission flipped after a decision was already made"
                );
            }
            _ => {}
        }
        self.permission = new_state;
        tracing::debug!(?new_state, "permission set");

        // Requests parked specifically on this decision resolve first.
        let pending: Vec<NotifierId> = self.pending_for_permission.drain().collect();
        for id in pending {
            if granted {
                let Some(options) = self.notifiers.get(id).map(|n| n.options().clone()) else {
                    continue;
                };
                if self.service.start_updating(&options) {
                    self.updating = true;
                    self.start_timer_if_needed(id);
                } else {
                    self.set_notifier_fatal_error(id, PositionError::service_failed());
                }
            } else {
                self.set_notifier_fatal_error(id, PositionError::permission_denied());
            }
        }

        if !granted {
            let ids: Vec<NotifierId> = self.all_notifier_ids();
            for id in ids {
                self.set_notifier_fatal_error(id, PositionError::permission_denied());
            }
            self.awaiting_cached_position.clear();
        } else if self.last_position.is_some() {
            self.make_success_callbacks();
        } else {
            self.make_cached_position_callbacks();
        }
    }

    /// Authoritative position from the platform service.
    pub fn position_changed(&mut self, position: Geoposition) {
        self.cache.set_cached_position(position.clone());
        self.last_position = Some(position);

        // A real position supersedes any pending timeout or cached
        // delivery; fatal errors keep their timers.
        self.stop_timers();

        if self.permission != PermissionState::Granted {
            self.request_permission();
            return;
        }
        self.make_success_callbacks();
    }

    /// Error from the platform service.
    pub fn position_error(&mut self, error: PositionError) {
        let one_shots: Vec<NotifierId> = self.one_shots.iter().copied().collect();
        let watchers = self.watchers.notifiers();

        for id in one_shots {
            // A notifier mid-flight toward a cached-position delivery
            // is set aside; its timer still fires normally.
            if self.awaiting_cached(id) {
                continue;
            }
            if self.deliver_error(id, &error) {
                self.forget(id);
            }
        }
        for id in watchers {
            if self.awaiting_cached(id) {
                continue;
            }
            if self.deliver_error(id, &error) && error.is_fatal {
                self.forget(id);
            }
        }
        self.stop_updating_if_empty();
    }

    /// Cancel every outstanding request with a fatal error, stop the
    /// position service and end the session. Idempotent.
    pub fn disconnect(&mut self) {
        let ids = self.all_notifier_ids();
        for id in &ids {
            self.set_notifier_fatal_error(*id, PositionError::page_inactive());
        }
        if self.updating {
            self.service.stop_updating();
            self.updating = false;
        }
        self.one_shots.clear();
        self.watchers.clear();
        self.pending_for_permission.clear();
        self.awaiting_cached_position.clear();
        self.permission = PermissionState::Unknown;
        if !ids.is_empty() {
            tracing::debug!(cancelled = ids.len(), "geolocation disconnected");
        }
    }

    /// Fire every timer due at `now`. Timers armed during this pass
    /// (zero-delay fatal deliveries and the like) run on the next call.
    pub fn run_due_timers(&mut self, now: Instant) {
        for id in self.timers.take_due(now) {
            self.timer_fired(id);
        }
    }

    /// Drain due timers against the wall clock, including zero-delay
    /// timers armed while draining.
    pub fn pump(&mut self) {
        loop {
            let due = self.timers.take_due(Instant::now());
            if due.is_empty() {
                return;
            }
            for id in due {
                self.timer_fired(id);
            }
        }
    }

    pub fn has_pending_timers(&self) -> bool {
        self.timers.has_pending()
    }

    pub fn time_until_next_timer(&self) -> Option<Duration> {
        self.timers.time_until_next(Instant::now())
    }

    /// Whether any one-shot or watch request is still registered.
    pub fn has_listeners(&self) -> bool {
        !self.one_shots.is_empty() || !self.watchers.is_empty()
    }

    pub fn permission_state(&self) -> PermissionState {
        self.permission
    }

    pub fn last_position(&self) -> Option<&Geoposition> {
        self.last_position.as_ref()
    }

    // --- admission ---

    /// The admission decision tree, evaluated in priority order:
    /// denied permission, suitable cache, zero timeout, undecided
    /// permission (preemptive mode), live service.
    fn start_request(&mut self, id: NotifierId) {
        let Some(options) = self.notifiers.get(id).map(|n| n.options().clone()) else {
            return;
        };

        if self.permission == PermissionState::Denied {
            self.set_notifier_fatal_error(id, PositionError::permission_denied());
        } else if self.cache.is_suitable(&options, wall_clock_ms()) {
            if let Some(notifier) = self.notifiers.get_mut(id) {
                notifier.set_use_cached_position();
            }
            self.arm_timer(id, Duration::ZERO);
        } else if options.timeout.is_some_and(|t| t.is_zero()) {
            // "Give me whatever is available right now": the timer
            // fires straight into the TIMEOUT path.
            self.start_timer_if_needed(id);
        } else if self.permission != PermissionState::Granted && self.config.preemptive_permission {
            self.pending_for_permission.insert(id);
            self.request_permission();
        } else if self.service.start_updating(&options) {
            self.updating = true;
            self.start_timer_if_needed(id);
        } else {
            self.set_notifier_fatal_error(id, PositionError::service_failed());
        }
    }

    fn allocate_watch_id(&mut self) -> WatchId {
        let id = self.next_watch_id;
        // Wrap past the maximum back to 1; ids stay strictly positive.
        self.next_watch_id = self.next_watch_id.checked_add(1).unwrap_or(1);
        id
    }

    // --- permission ---

    fn request_permission(&mut self) {
        if self.permission != PermissionState::Unknown {
            return;
        }
        self.permission = PermissionState::InProgress;
        tracing::debug!("requesting geolocation permission from host");
        self.broker.request_permission();
    }

    // --- timers ---

    fn timer_fired(&mut self, id: NotifierId) {
        // Stale firings for retired notifiers are dropped.
        let Some(notifier) = self.notifiers.get_mut(id) else {
            return;
        };
        match notifier.timer_fired() {
            TimerFired::FatalDelivered => self.fatal_error_occurred(id),
            TimerFired::UseCachedPosition => self.request_uses_cached_position(id),
            TimerFired::TimedOut => self.request_timed_out(id),
        }
    }

    fn start_timer_if_needed(&mut self, id: NotifierId) {
        let Some(timeout) = self.notifiers.get(id).and_then(|n| n.options().timeout) else {
            return;
        };
        self.arm_timer(id, timeout);
    }

    fn arm_timer(&mut self, id: NotifierId, delay: Duration) {
        self.timers.arm(id, delay, Instant::now());
    }

    /// Stop every armed timer except those carrying a fatal error;
    /// a recorded fatal error must still be delivered.
    fn stop_timers(&mut self) {
        for id in self.all_notifier_ids() {
            let fatal = self
                .notifiers
                .get(id)
                .is_some_and(|n| n.fatal_error().is_some());
            if !fatal {
                self.timers.stop(id);
            }
        }
    }

    // --- notifier resolution ---

    fn set_notifier_fatal_error(&mut self, id: NotifierId, error: PositionError) {
        let recorded = match self.notifiers.get_mut(id) {
            Some(notifier) => notifier.set_fatal_error(error),
            None => return,
        };
        if recorded {
            self.arm_timer(id, Duration::ZERO);
        }
    }

    fn fatal_error_occurred(&mut self, id: NotifierId) {
        self.forget(id);
        self.stop_updating_if_empty();
    }

    fn request_timed_out(&mut self, id: NotifierId) {
        if self.one_shots.contains(&id) {
            // Timeout ends a one-shot; a watch stays registered.
            self.forget(id);
        }
        self.stop_updating_if_empty();
    }

    fn request_uses_cached_position(&mut self, id: NotifierId) {
        self.awaiting_cached_position.insert(id);
        self.pending_for_permission.remove(&id);
        if self.permission == PermissionState::Granted {
            self.make_cached_position_callbacks();
        } else {
            self.request_permission();
        }
    }

    fn make_cached_position_callbacks(&mut self) {
        let Some(cached) = self.cache.cached_position().cloned() else {
            self.awaiting_cached_position.clear();
            return;
        };
        let awaiting: Vec<NotifierId> = self.awaiting_cached_position.drain().collect();
        for id in awaiting {
            if !self.deliver_position(id, &cached) {
                continue;
            }
            if self.one_shots.contains(&id) {
                self.forget(id);
            } else if self.watchers.contains(id) {
                // The cache satisfied this watcher once; for further
                // updates it needs either its zero-timeout firing or a
                // live service session.
                let Some(notifier) = self.notifiers.get(id) else {
                    continue;
                };
                let zero_timeout = notifier.has_zero_timeout();
                let options = notifier.options().clone();
                if zero_timeout {
                    self.start_timer_if_needed(id);
                } else if self.service.start_updating(&options) {
                    self.updating = true;
                    self.start_timer_if_needed(id);
                } else {
                    self.set_notifier_fatal_error(id, PositionError::service_failed());
                }
            }
        }
        self.stop_updating_if_empty();
    }

    fn make_success_callbacks(&mut self) {
        let Some(position) = self.last_position.clone() else {
            return;
        };
        let one_shots: Vec<NotifierId> = self.one_shots.iter().copied().collect();
        let watchers = self.watchers.notifiers();
        for id in one_shots {
            if self.deliver_position(id, &position) {
                self.forget(id);
            }
        }
        for id in watchers {
            self.deliver_position(id, &position);
        }
        self.stop_updating_if_empty();
    }

    /// Deliver a position to one notifier. Returns false if the
    /// notifier is gone or a fatal error owns it; a fatal error, once
    /// set, is the only thing that notifier will ever receive.
    fn deliver_position(&mut self, id: NotifierId, position: &Geoposition) -> bool {
        match self.notifiers.get(id) {
            Some(notifier) if notifier.fatal_error().is_none() => {}
            _ => return false,
        }
        self.timers.stop(id);
        self.awaiting_cached_position.remove(&id);
        if let Some(notifier) = self.notifiers.get_mut(id) {
            notifier.clear_use_cached_position();
            notifier.run_success_callback(position);
        }
        true
    }

    fn deliver_error(&mut self, id: NotifierId, error: &PositionError) -> bool {
        match self.notifiers.get_mut(id) {
            Some(notifier) if notifier.fatal_error().is_none() => {
                notifier.run_error_callback(error);
                true
            }
            _ => false,
        }
    }

    fn awaiting_cached(&self, id: NotifierId) -> bool {
        self.awaiting_cached_position.contains(&id)
            || self.notifiers.get(id).is_some_and(|n| n.use_cached_position())
    }

    // --- bookkeeping ---

    fn all_notifier_ids(&self) -> Vec<NotifierId> {
        self.one_shots
            .iter()
            .copied()
            .chain(self.watchers.notifiers())
            .collect()
    }

    /// Remove a notifier from every owning collection and drop it.
    fn forget(&mut self, id: NotifierId) {
        self.timers.stop(id);
        self.one_shots.remove(&id);
        self.watchers.remove(id);
        self.pending_for_permission.remove(&id);
        self.awaiting_cached_position.remove(&id);
        self.notifiers.remove(id);
    }

    fn stop_updating_if_empty(&mut self) {
        if self.updating && !self.has_listeners() {
            self.service.stop_updating();
            self.updating = false;
            tracing::debug!("position service stopped, no listeners remain");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{Coordinates, PositionErrorCode};
    use crate::service::{NullPermissionBroker, NullPositionService};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn engine() -> Geolocation {
        Geolocation::new(
            Box::new(NullPositionService),
            Box::new(NullPermissionBroker),
            EngineConfig::default(),
        )
    }

    fn position() -> Geoposition {
        Geoposition::at_current_time(Coordinates::new(59.33, 18.07, 15.0))
    }

    #[test]
    fn test_watch_ids_monotonic_from_one() {
        let mut geo = engine();
        let a = geo.watch_position(Box::new(|_| {}), None, PositionOptions::default());
        let b = geo.watch_position(Box::new(|_| {}), None, PositionOptions::default());
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn test_watch_id_wraps_past_max_to_one() {
        let mut geo = engine();
        geo.next_watch_id = WatchId::MAX;
        let a = geo.watch_position(Box::new(|_| {}), None, PositionOptions::default());
        let b = geo.watch_position(Box::new(|_| {}), None, PositionOptions::default());
        assert_eq!(a, WatchId::MAX);
        assert_eq!(b, 1);
    }

    #[test]
    fn test_clear_watch_unknown_id_is_noop() {
        let mut geo = engine();
        geo.clear_watch(0);
        geo.clear_watch(999);
        assert!(!geo.has_listeners());
    }

    #[test]
    fn test_denied_admission_beats_suitable_cache() {
        // Step 1 of the admission tree outranks step 2: a denied
        // permission fails the request even with a fresh cache.
        let mut geo = engine();
        geo.set_permission(true);
        geo.position_changed(position());
        geo.set_permission(false);

        let errors: Rc<RefCell<Vec<PositionError>>> = Rc::default();
        let errors2 = errors.clone();
        geo.get_current_position(
            Box::new(|_| panic!("success must not fire")),
            Some(Box::new(move |e| errors2.borrow_mut().push(e.clone()))),
            PositionOptions::default(),
        );
        geo.pump();
        assert_eq!(errors.borrow().len(), 1);
        assert_eq!(errors.borrow()[0].code, PositionErrorCode::PermissionDenied);
        assert!(!geo.has_listeners());
    }

    #[test]
    fn test_denied_delivery_is_asynchronous() {
        let mut geo = engine();
        geo.set_permission(false);
        let fired = Rc::new(RefCell::new(false));
        let fired2 = fired.clone();
        geo.get_current_position(
            Box::new(|_| {}),
            Some(Box::new(move |_| *fired2.borrow_mut() = true)),
            PositionOptions::default(),
        );
        // Not before the registration call returns.
        assert!(!*fired.borrow());
        geo.pump();
        assert!(*fired.borrow());
    }

    #[test]
    fn test_permission_request_not_reentered() {
        struct CountingBroker(Rc<RefCell<u32>>);
        impl PermissionBroker for CountingBroker {
            fn request_permission(&mut self) {
                *self.0.borrow_mut() += 1;
            }
        }
        let asks: Rc<RefCell<u32>> = Rc::default();
        let mut geo = Geolocation::new(
            Box::new(NullPositionService),
            Box::new(CountingBroker(asks.clone())),
            EngineConfig::default(),
        );
        geo.get_current_position(Box::new(|_| {}), None, PositionOptions::default());
        geo.get_current_position(Box::new(|_| {}), None, PositionOptions::default());
        // Second request finds the decision already in progress.
        assert_eq!(*asks.borrow(), 1);
        assert_eq!(geo.permission_state(), PermissionState::InProgress);
    }

    #[test]
    fn test_disconnect_resets_permission_session() {
        let mut geo = engine();
        geo.set_permission(true);
        geo.disconnect();
        assert_eq!(geo.permission_state(), PermissionState::Unknown);
    }

    #[test]
    fn test_stale_timer_fire_for_retired_notifier() {
        let mut geo = engine();
        geo.set_permission(false);
        geo.get_current_position(Box::new(|_| {}), None, PositionOptions::default());
        geo.pump();
        // Everything retired; further pumps find nothing to do.
        geo.pump();
        assert!(!geo.has_pending_timers());
    }
}
