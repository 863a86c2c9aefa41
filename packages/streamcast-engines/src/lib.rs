//! Trait seams for streamcast's external collaborators.
//!
//! The streaming core (`streamcast-core`) never talks to a real hardware
//! codec, capture driver, graphics presenter or OS input layer directly.
//! Instead it depends on the traits defined here, and production wiring
//! supplies real implementations at the process boundary. This crate also
//! ships `Noop`/in-memory implementations of every trait so the core can be
//! exercised in tests without any platform dependency.
//!
//! This mirrors how `streamcast-core` itself decouples from its own runtime
//! via traits like `TaskSpawner` — the same idiom, one layer further out.

#![warn(clippy::all)]

pub mod audio;
pub mod capture;
pub mod error;
pub mod input_injector;
pub mod presenter;
pub mod types;
pub mod video;

pub use audio::{AudioCodec, AudioCodecEngine, AudioFormat, DecodedAudioBuffer, MockAudioCodecEngine};
pub use capture::{CaptureSource, CapturedFrame, MockCaptureSource};
pub use error::{EngineError, EngineResult, EngineStatus};
pub use input_injector::{InputInjector, NoopInputInjector, RecordingInputInjector};
pub use presenter::{AudioPresenter, MockAudioPresenter, MockVideoPresenter, PresenterFormat, VideoPresenter};
pub use types::{ColorRange, CursorBitmap, CursorType, EventValue, InitId, PixelFormat, StreamId, SubframeType, Viewport};
pub use video::{
    DecodedVideoFrame, MockVideoDecodeEngine, VideoCodec, VideoDecodeEngine, VideoEncodeEngine,
    VideoInitParams,
};
