//! Controller-ID path routing and the static event-type table.

use streamcast_engines::EventValue;

/// Splits a hierarchical controller-ID path into its device segment and
/// event segment, e.g. `"/mouse/in/pos"` -> `("/mouse", "/in/pos")`.
///
/// Returns `None` if the path has no event segment (just a bare device
/// path).
#[must_use]
pub fn split_controller_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let mut parts = rest.splitn(2, '/');
    let device = parts.next()?;
    let event = parts.next()?;
    if device.is_empty() || event.is_empty() {
        return None;
    }
    // +1 to re-include the leading slash stripped above, so the returned
    // segments are directly usable as further path components.
    Some((&path[..device.len() + 1], &path[device.len() + 1..]))
}

/// The expected [`EventValue`] variant for a known event path, used by the
/// transport to deserialize a wire payload without guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventValueKind {
    Bool,
    Int64,
    Float,
    FloatPoint2D,
    FloatPoint3D,
    Interface,
}

/// Static table mapping a known event path (device-relative, e.g.
/// `"/in/pos"` under `"/mouse"`) to its expected value kind. Unknown paths
/// return `None`, and the caller deserializes the event as
/// `EventValue::Empty`.
#[must_use]
pub fn event_value_kind(device: &str, event_path: &str) -> Option<EventValueKind> {
    match (device, event_path) {
        ("/mouse", "/in/pos") => Some(EventValueKind::FloatPoint2D),
        ("/mouse", "/in/wheel") => Some(EventValueKind::Float),
        ("/mouse", "/in/button") => Some(EventValueKind::Int64),
        ("/mouse", "/out/cursor") => Some(EventValueKind::Interface),
        ("/mouse", "/out/pos") => Some(EventValueKind::FloatPoint2D),
        ("/keyboard", "/in/key") => Some(EventValueKind::Int64),
        ("/keyboard", "/in/keydown") => Some(EventValueKind::Bool),
        _ if device.starts_with("/gamepad/") => match event_path {
            "/in/button" => Some(EventValueKind::Int64),
            "/in/trigger" => Some(EventValueKind::Float),
            "/in/thumbstick" => Some(EventValueKind::FloatPoint2D),
            "/out/haptic" => Some(EventValueKind::FloatPoint3D),
            _ => None,
        },
        _ => None,
    }
}

/// Validates that a decoded [`EventValue`] matches the expected kind for
/// its path, used to reject malformed client input before it reaches a
/// controller.
#[must_use]
pub fn matches_kind(value: &EventValue, kind: EventValueKind) -> bool {
    matches!(
        (value, kind),
        (EventValue::Bool(_), EventValueKind::Bool)
            | (EventValue::Int64(_), EventValueKind::Int64)
            | (EventValue::Float(_), EventValueKind::Float)
            | (EventValue::FloatPoint2D(..), EventValueKind::FloatPoint2D)
            | (EventValue::FloatPoint3D(..), EventValueKind::FloatPoint3D)
            | (EventValue::Interface(_), EventValueKind::Interface)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_device_and_event_segments() {
        let (device, event) = split_controller_path("/mouse/in/pos").unwrap();
        assert_eq!(device, "/mouse");
        assert_eq!(event, "/in/pos");
    }

    #[test]
    fn bare_device_path_has_no_event_segment() {
        assert!(split_controller_path("/mouse").is_none());
    }

    #[test]
    fn up_to_four_gamepad_slots_resolve() {
        for i in 0..4 {
            let path = format!("/gamepad/{i}");
            assert_eq!(event_value_kind(&path, "/in/button"), Some(EventValueKind::Int64));
        }
    }

    #[test]
    fn unknown_path_has_no_kind() {
        assert_eq!(event_value_kind("/nonexistent", "/in/pos"), None);
    }

    #[test]
    fn matches_kind_checks_variant_not_value() {
        assert!(matches_kind(&EventValue::Bool(true), EventValueKind::Bool));
        assert!(!matches_kind(&EventValue::Bool(true), EventValueKind::Int64));
    }
}
