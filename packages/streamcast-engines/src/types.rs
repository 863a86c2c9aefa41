//! Primitive wire/data types shared across the engine traits.
//!
//! These are deliberately kept in the lowest-level crate of the workspace so
//! both `streamcast-engines` and `streamcast-core` can reference them without
//! a dependency cycle; `streamcast-core` re-exports them at its root.

use serde::{Deserialize, Serialize};

/// Integer tag grouping frames of one logical media stream.
///
/// `StreamId(0)` is always registered (`DEFAULT_STREAM`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u32);

impl StreamId {
    /// The stream ID every session registers by default.
    pub const DEFAULT: StreamId = StreamId(0);
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic integer issued by a sender on every codec reinit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InitId(pub u64);

impl InitId {
    /// Sentinel meaning "no init has ever been accepted."
    pub const NONE: InitId = InitId(0);

    /// Returns the next InitID in sequence.
    #[must_use]
    pub fn next(self) -> InitId {
        InitId(self.0 + 1)
    }
}

impl std::fmt::Display for InitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a coded video subframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubframeType {
    /// Instantaneous decoder refresh - allows recovery without prior state.
    Idr,
    /// Intra-coded picture.
    I,
    /// Predicted picture.
    P,
    /// Bi-predicted picture.
    B,
    /// Could not be classified.
    Unknown,
}

impl SubframeType {
    /// True for frame types a decoder can restart clean from.
    #[must_use]
    pub fn is_key_frame(self) -> bool {
        matches!(self, SubframeType::Idr)
    }
}

/// A decode-side pixel format, selected from the negotiated bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit 4:2:0, the common case.
    Nv12,
    /// 10-bit 4:2:0, used for HDR streams.
    P010,
    /// 8-bit RGBA, presenter-side format for SDR content.
    Rgba,
    /// Half-float RGBA, presenter-side format for HDR content.
    RgbaF16,
}

/// Color range as reported by the decode engine per frame.
///
/// Drives the converter's color-profile reconfiguration in the video
/// receiver pipeline (`Full_709` vs `709`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorRange {
    /// Studio/limited range (16-235).
    Limited709,
    /// Full range (0-255).
    Full709,
}

/// Cropping viewport within the decoded resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Viewport {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Cursor shape classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorType {
    Color,
    Monochrome,
    MaskedColor,
}

/// Bitmap cursor image plus the hotspot and server display resolution it was
/// captured against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorBitmap {
    pub cursor_type: CursorType,
    pub width: u32,
    pub height: u32,
    pub hotspot_x: i32,
    pub hotspot_y: i32,
    pub server_resolution: (u32, u32),
    pub pixels: Vec<u8>,
}

/// A typed input-event value.
///
/// The static event-path table (`streamcast-core::input::event_value_kind`)
/// maps a controller-ID path to one of these variants so the transport can
/// deserialize the wire payload without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "v", rename_all = "camelCase")]
pub enum EventValue {
    Bool(bool),
    Int64(i64),
    Float(f32),
    FloatPoint2D(f32, f32),
    FloatPoint3D(f32, f32, f32),
    /// Opaque structured payload (e.g. haptic waveform parameters).
    Interface(serde_json::Value),
    /// Path was unrecognized by the static event table.
    Empty,
}
