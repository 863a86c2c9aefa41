//! Input injector trait seam: the server-side sink that turns a decoded
//! input event back into an OS-level action.

use crate::types::EventValue;
use crate::error::EngineResult;
use parking_lot::Mutex;

/// Injects an input event addressed by controller path (e.g.
/// `"mouse/position"`, `"keyboard/key"`) into the local OS input layer.
pub trait InputInjector: Send + Sync {
    fn inject(&self, path: &str, value: &EventValue) -> EngineResult<()>;
}

/// Discards every event. Used where input injection is disabled or
/// unavailable on the current platform.
pub struct NoopInputInjector;

impl InputInjector for NoopInputInjector {
    fn inject(&self, _path: &str, _value: &EventValue) -> EngineResult<()> {
        Ok(())
    }
}

/// Records every injected event instead of acting on it. Used by tests that
/// need to assert on what the input pipeline dispatched.
pub struct RecordingInputInjector {
    events: Mutex<Vec<(String, EventValue)>>,
}

impl RecordingInputInjector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Returns a snapshot of every event recorded so far, in order.
    #[must_use]
    pub fn recorded(&self) -> Vec<(String, EventValue)> {
        self.events.lock().clone()
    }
}

impl Default for RecordingInputInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl InputInjector for RecordingInputInjector {
    fn inject(&self, path: &str, value: &EventValue) -> EngineResult<()> {
        self.events.lock().push((path.to_string(), value.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_always_succeeds() {
        let injector = NoopInputInjector;
        assert!(injector.inject("mouse/position", &EventValue::FloatPoint2D(1.0, 2.0)).is_ok());
    }

    #[test]
    fn recording_injector_preserves_order() {
        let injector = RecordingInputInjector::new();
        injector.inject("keyboard/key", &EventValue::Int64(65)).unwrap();
        injector.inject("mouse/button", &EventValue::Bool(true)).unwrap();
        let recorded = injector.recorded();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].0, "keyboard/key");
        assert_eq!(recorded[1].0, "mouse/button");
    }
}
