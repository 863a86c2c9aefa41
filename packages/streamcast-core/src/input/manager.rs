//! Controller manager: flat device-path dispatch, 1ms tick cadence, and the
//! cursor replication grace policy.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use streamcast_engines::{CursorBitmap, EventValue};

use super::controller::Controller;
use super::event::split_controller_path;
use crate::error::StreamResult;

/// Cursor (or position) changes are resent for up to this many ticks after
/// any change, to survive a single packet loss.
pub const CURSOR_UPDATE_COUNTER_MAX: u8 = 3;

/// Dispatches input events to registered controllers by device path, drives
/// the cursor replication grace counter, and propagates disconnect to every
/// registered controller.
pub struct ControllerManager {
    controllers: RwLock<HashMap<String, Arc<dyn Controller>>>,
    cursor: RwLock<Option<CursorBitmap>>,
    cursor_resend_counter: AtomicU8,
}

impl ControllerManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            controllers: RwLock::new(HashMap::new()),
            cursor: RwLock::new(None),
            cursor_resend_counter: AtomicU8::new(0),
        }
    }

    /// Registers a controller under a device path (e.g. `"/mouse"`,
    /// `"/gamepad/0"`). Registering under an already-used path replaces the
    /// previous controller.
    pub fn register(&self, device_path: impl Into<String>, controller: Arc<dyn Controller>) {
        self.controllers.write().insert(device_path.into(), controller);
    }

    /// Dispatches one batch of events. A path that doesn't resolve to a
    /// registered controller, or that the controller rejects, is logged and
    /// skipped rather than aborting the batch.
    pub fn dispatch_batch(&self, events: &[(String, EventValue)]) {
        for (path, value) in events {
            if let Err(e) = self.dispatch_one(path, value) {
                log::warn!("controller dispatch failed for {path}: {e}");
            }
        }
    }

    fn dispatch_one(&self, path: &str, value: &EventValue) -> StreamResult<()> {
        let (device, event_path) = split_controller_path(path)
            .ok_or_else(|| crate::error::StreamError::InvalidArg(format!("malformed controller path {path}")))?;

        let controller = {
            let controllers = self.controllers.read();
            controllers.get(device).cloned()
        };

        match controller {
            Some(controller) => controller.handle(event_path, value),
            None => Err(crate::error::StreamError::InvalidArg(format!("no controller registered at {device}"))),
        }
    }

    /// Updates the replicated cursor state, resetting the resend counter so
    /// the new state survives a single packet loss over the next few ticks.
    pub fn set_cursor(&self, cursor: Option<CursorBitmap>) {
        *self.cursor.write() = cursor;
        self.cursor_resend_counter.store(CURSOR_UPDATE_COUNTER_MAX, Ordering::Relaxed);
    }

    /// Called on the 1ms tick cadence. Returns the cursor state to
    /// (re)send this tick, if the grace window is still open, decrementing
    /// the counter.
    pub fn tick(&self) -> Option<CursorBitmap> {
        let remaining = self.cursor_resend_counter.load(Ordering::Relaxed);
        if remaining == 0 {
            return None;
        }
        self.cursor_resend_counter.store(remaining - 1, Ordering::Relaxed);
        self.cursor.read().clone()
    }

    /// Propagates a session disconnect to every registered controller, so
    /// e.g. the keyboard controller releases all held keys.
    pub fn on_disconnect(&self) {
        for controller in self.controllers.read().values() {
            controller.on_disconnect();
        }
    }
}

impl Default for ControllerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::controller::MouseController;
    use streamcast_engines::RecordingInputInjector;

    fn cursor() -> CursorBitmap {
        CursorBitmap {
            cursor_type: streamcast_engines::CursorType::Color,
            width: 1,
            height: 1,
            hotspot_x: 0,
            hotspot_y: 0,
            server_resolution: (1920, 1080),
            pixels: vec![0; 4],
        }
    }

    #[test]
    fn unregistered_device_is_logged_and_skipped_not_panicked() {
        let manager = ControllerManager::new();
        manager.dispatch_batch(&[("/mouse/in/pos".to_string(), EventValue::FloatPoint2D(1.0, 2.0))]);
    }

    #[test]
    fn dispatches_to_registered_controller() {
        let manager = ControllerManager::new();
        let injector = Arc::new(RecordingInputInjector::new());
        manager.register("/mouse", Arc::new(MouseController::new(injector.clone())));

        manager.dispatch_batch(&[("/mouse/in/pos".to_string(), EventValue::FloatPoint2D(1.0, 2.0))]);
        assert_eq!(injector.recorded().len(), 1);
    }

    #[test]
    fn cursor_resends_for_exactly_three_ticks_after_a_change() {
        let manager = ControllerManager::new();
        manager.set_cursor(Some(cursor()));

        assert!(manager.tick().is_some());
        assert!(manager.tick().is_some());
        assert!(manager.tick().is_some());
        assert!(manager.tick().is_none());
    }

    #[test]
    fn disconnect_propagates_to_all_controllers() {
        let manager = ControllerManager::new();
        let injector = Arc::new(RecordingInputInjector::new());
        manager.register(
            "/keyboard",
            Arc::new(crate::input::controller::KeyboardController::new(injector.clone())),
        );
        manager.dispatch_batch(&[("/keyboard/in/key".to_string(), EventValue::Int64(65))]);
        manager.on_disconnect();

        let recorded = injector.recorded();
        assert!(recorded.iter().any(|(path, _)| path == "/in/key/release"));
    }
}
