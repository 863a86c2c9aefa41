//! Presenter trait seams: the client-side sinks that turn decoded media into
//! what the user actually sees and hears.

use crate::types::{ColorRange, CursorBitmap, PixelFormat};
use crate::error::EngineResult;
use crate::audio::AudioFormat;

/// Surface format negotiated between a `VideoPresenter` and its decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub color_range: ColorRange,
}

/// Sink for decoded video surfaces and cursor updates.
pub trait VideoPresenter: Send {
    /// Called whenever the decoded surface format changes (resolution,
    /// pixel format or color range).
    fn reconfigure(&mut self, format: PresenterFormat) -> EngineResult<()>;

    /// Presents one decoded frame. `data` is in the format from the last
    /// `reconfigure` call.
    fn present(&mut self, data: &[u8], pts: i64) -> EngineResult<()>;

    /// Updates the cursor overlay. `None` hides the cursor.
    fn set_cursor(&mut self, cursor: Option<&CursorBitmap>) -> EngineResult<()>;
}

/// Sink for decoded PCM audio.
pub trait AudioPresenter: Send {
    fn reconfigure(&mut self, format: AudioFormat) -> EngineResult<()>;
    fn present(&mut self, samples: &[u8], pts: i64) -> EngineResult<()>;
}

/// In-memory video presenter used by tests: records every call it receives.
pub struct MockVideoPresenter {
    pub format: Option<PresenterFormat>,
    pub frames: Vec<(Vec<u8>, i64)>,
    pub cursor_updates: usize,
    pub last_cursor: Option<CursorBitmap>,
}

impl MockVideoPresenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: None,
            frames: Vec::new(),
            cursor_updates: 0,
            last_cursor: None,
        }
    }
}

impl Default for MockVideoPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoPresenter for MockVideoPresenter {
    fn reconfigure(&mut self, format: PresenterFormat) -> EngineResult<()> {
        self.format = Some(format);
        Ok(())
    }

    fn present(&mut self, data: &[u8], pts: i64) -> EngineResult<()> {
        if self.format.is_none() {
            return Err(crate::error::EngineError::NotInitialized);
        }
        self.frames.push((data.to_vec(), pts));
        Ok(())
    }

    fn set_cursor(&mut self, cursor: Option<&CursorBitmap>) -> EngineResult<()> {
        self.cursor_updates += 1;
        self.last_cursor = cursor.cloned();
        Ok(())
    }
}

/// In-memory audio presenter used by tests: records every presented buffer.
pub struct MockAudioPresenter {
    pub format: Option<AudioFormat>,
    pub buffers: Vec<(Vec<u8>, i64)>,
}

impl MockAudioPresenter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            format: None,
            buffers: Vec::new(),
        }
    }
}

impl Default for MockAudioPresenter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPresenter for MockAudioPresenter {
    fn reconfigure(&mut self, format: AudioFormat) -> EngineResult<()> {
        self.format = Some(format);
        Ok(())
    }

    fn present(&mut self, samples: &[u8], pts: i64) -> EngineResult<()> {
        if self.format.is_none() {
            return Err(crate::error::EngineError::NotInitialized);
        }
        self.buffers.push((samples.to_vec(), pts));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CursorType, ColorRange};

    fn format() -> PresenterFormat {
        PresenterFormat {
            width: 1920,
            height: 1080,
            pixel_format: PixelFormat::Rgba,
            color_range: ColorRange::Full709,
        }
    }

    #[test]
    fn present_before_reconfigure_fails() {
        let mut presenter = MockVideoPresenter::new();
        assert!(presenter.present(&[1], 0).is_err());
    }

    #[test]
    fn tracks_frames_and_cursor_updates() {
        let mut presenter = MockVideoPresenter::new();
        presenter.reconfigure(format()).unwrap();
        presenter.present(&[1, 2], 100).unwrap();
        presenter.present(&[3, 4], 200).unwrap();
        assert_eq!(presenter.frames.len(), 2);

        let cursor = CursorBitmap {
            cursor_type: CursorType::Color,
            width: 16,
            height: 16,
            hotspot_x: 0,
            hotspot_y: 0,
            server_resolution: (1920, 1080),
            pixels: vec![0; 16 * 16 * 4],
        };
        for _ in 0..3 {
            presenter.set_cursor(Some(&cursor)).unwrap();
        }
        assert_eq!(presenter.cursor_updates, 3);
        assert!(presenter.last_cursor.is_some());
    }
}
