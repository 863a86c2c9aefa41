//! Per-device controllers: mouse, keyboard, and up to four game controller
//! slots, each wrapping an [`InputInjector`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use streamcast_engines::{EventValue, InputInjector};

use crate::error::{StreamError, StreamResult};

/// A controller that accepts events addressed to its device-relative event
/// path (the segment after the device prefix has been stripped).
pub trait Controller: Send + Sync {
    /// Handles one event. Returns `InvalidArg` for an event path the
    /// controller does not recognize, rather than panicking - the manager
    /// logs and continues to the next event in a batch.
    fn handle(&self, event_path: &str, value: &EventValue) -> StreamResult<()>;

    /// Called when the owning session disconnects, so the controller can
    /// release any held state (e.g. pressed keys).
    fn on_disconnect(&self) {}
}

/// Mouse controller: position, wheel, button events in; cursor/position
/// effects out.
pub struct MouseController {
    injector: Arc<dyn InputInjector>,
}

impl MouseController {
    #[must_use]
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self { injector }
    }
}

impl Controller for MouseController {
    fn handle(&self, event_path: &str, value: &EventValue) -> StreamResult<()> {
        match event_path {
            "/in/pos" | "/in/wheel" | "/in/button" => {
                self.injector.inject(event_path, value)?;
                Ok(())
            }
            other => Err(StreamError::InvalidArg(format!("unknown mouse event path {other}"))),
        }
    }
}

/// Keyboard controller: tracks the key-down set so that on disconnect every
/// pressed key is released in a separate pass.
pub struct KeyboardController {
    injector: Arc<dyn InputInjector>,
    pressed: Mutex<HashSet<i64>>,
}

impl KeyboardController {
    #[must_use]
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self {
            injector,
            pressed: Mutex::new(HashSet::new()),
        }
    }
}

impl Controller for KeyboardController {
    fn handle(&self, event_path: &str, value: &EventValue) -> StreamResult<()> {
        match (event_path, value) {
            ("/in/key", EventValue::Int64(key)) => {
                self.pressed.lock().insert(*key);
                self.injector.inject(event_path, value)?;
                Ok(())
            }
            ("/in/keydown", EventValue::Bool(false)) => {
                // Release notifications don't carry the key id on this
                // path; callers release via "/in/key" with a 0 value by
                // convention. Accepted here as a recognized no-op path.
                Ok(())
            }
            (other, _) => Err(StreamError::InvalidArg(format!("unknown keyboard event path {other}"))),
        }
    }

    fn on_disconnect(&self) {
        let mut pressed = self.pressed.lock();
        for key in pressed.drain() {
            let _ = self.injector.inject("/in/key/release", &EventValue::Int64(key));
        }
    }
}

/// One of up to four game controller slots (`"/gamepad/0"`..`"/gamepad/3"`).
pub struct GameController {
    injector: Arc<dyn InputInjector>,
    #[allow(dead_code)]
    slot: u8,
}

impl GameController {
    #[must_use]
    pub fn new(slot: u8, injector: Arc<dyn InputInjector>) -> Self {
        Self { injector, slot }
    }
}

impl Controller for GameController {
    fn handle(&self, event_path: &str, value: &EventValue) -> StreamResult<()> {
        match event_path {
            "/in/button" | "/in/trigger" | "/in/thumbstick" | "/out/haptic" => {
                self.injector.inject(event_path, value)?;
                Ok(())
            }
            other => Err(StreamError::InvalidArg(format!("unknown gamepad event path {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamcast_engines::RecordingInputInjector;

    #[test]
    fn mouse_rejects_unknown_path() {
        let injector = Arc::new(RecordingInputInjector::new());
        let mouse = MouseController::new(injector);
        assert!(mouse.handle("/in/nonsense", &EventValue::Bool(true)).is_err());
    }

    #[test]
    fn keyboard_releases_all_pressed_keys_on_disconnect() {
        let injector = Arc::new(RecordingInputInjector::new());
        let keyboard = KeyboardController::new(injector.clone());
        keyboard.handle("/in/key", &EventValue::Int64(65)).unwrap();
        keyboard.handle("/in/key", &EventValue::Int64(66)).unwrap();

        keyboard.on_disconnect();

        let recorded = injector.recorded();
        let releases: Vec<_> = recorded.iter().filter(|(path, _)| path == "/in/key/release").collect();
        assert_eq!(releases.len(), 2);
    }

    #[test]
    fn gamepad_accepts_known_paths() {
        let injector = Arc::new(RecordingInputInjector::new());
        let pad = GameController::new(0, injector);
        assert!(pad.handle("/in/button", &EventValue::Int64(1)).is_ok());
    }
}
