//! Video decode/encode engine trait seam.
//!
//! A real implementation wraps a hardware codec (AMF, NVDEC/NVENC, VideoToolbox,
//! ...). It is invoked as a black box: elementary-stream fragments in, raw
//! surfaces out (decode), or the reverse (encode). None of that is
//! implemented here - only the seam and a mock good enough to drive the
//! video receiver pipeline in tests.

use crate::error::{EngineResult, EngineStatus};
use crate::types::{ColorRange, PixelFormat, SubframeType, Viewport};

/// Video codec identifier, as named on the wire in a video init message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    Hevc,
    Av1,
}

impl VideoCodec {
    /// Parses the codec name carried in a video init message.
    #[must_use]
    pub fn parse(name: &str) -> Option<VideoCodec> {
        match name {
            "H264" => Some(VideoCodec::H264),
            "HEVC" => Some(VideoCodec::Hevc),
            "AV1" => Some(VideoCodec::Av1),
            _ => None,
        }
    }
}

/// Parameters carried by `OnInputChanged` when a video init block arrives.
#[derive(Debug, Clone)]
pub struct VideoInitParams {
    pub codec: VideoCodec,
    pub resolution: (u32, u32),
    pub viewport: Viewport,
    pub bit_depth: u8,
    pub init_block: Vec<u8>,
}

/// A raw decoded surface produced by a `VideoDecodeEngine`.
#[derive(Debug, Clone)]
pub struct DecodedVideoFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub color_range: ColorRange,
    pub pts: i64,
    pub data: Vec<u8>,
}

/// Black-box video decoder. Implemented by the real codec; mocked in tests.
pub trait VideoDecodeEngine: Send {
    /// (Re)initializes the engine for a new codec configuration epoch.
    fn reinit(&mut self, params: &VideoInitParams) -> EngineResult<()>;

    /// True if the engine can decode into a 10-bit HDR surface format.
    fn supports_hdr(&self) -> bool;

    /// Submits one elementary-stream fragment for decode.
    fn submit_input(&mut self, fragment: &[u8], subframe_type: SubframeType) -> EngineResult<EngineStatus>;

    /// Polls for a decoded surface. `Ok(None)` means "try again later."
    fn query_output(&mut self) -> EngineResult<Option<DecodedVideoFrame>>;

    /// Discards any buffered state.
    fn flush(&mut self);
}

/// Black-box video encoder (server-side capture -> elementary stream).
pub trait VideoEncodeEngine: Send {
    fn reinit(&mut self, params: &VideoInitParams) -> EngineResult<()>;
    fn submit_input(&mut self, surface: &[u8]) -> EngineResult<EngineStatus>;
    fn query_output(&mut self) -> EngineResult<Option<(SubframeType, Vec<u8>)>>;
    fn flush(&mut self);
}

/// In-memory decode engine used by tests and the demo binaries.
///
/// Echoes each submitted fragment back as a fixed-size decoded frame after
/// one `query_output` call, so pipeline plumbing can be exercised without a
/// real codec.
pub struct MockVideoDecodeEngine {
    initialized: bool,
    hdr: bool,
    pending: std::collections::VecDeque<DecodedVideoFrame>,
    width: u32,
    height: u32,
    format: PixelFormat,
    color_range: ColorRange,
}

impl MockVideoDecodeEngine {
    #[must_use]
    pub fn new(hdr_capable: bool) -> Self {
        Self {
            initialized: false,
            hdr: hdr_capable,
            pending: std::collections::VecDeque::new(),
            width: 0,
            height: 0,
            format: PixelFormat::Nv12,
            color_range: ColorRange::Limited709,
        }
    }

    /// Injects the color range the next decoded frames should report;
    /// exercises the video pipeline's color-range-change reaction in tests.
    pub fn set_color_range(&mut self, range: ColorRange) {
        self.color_range = range;
    }
}

impl VideoDecodeEngine for MockVideoDecodeEngine {
    fn reinit(&mut self, params: &VideoInitParams) -> EngineResult<()> {
        if params.bit_depth == 10 && !self.hdr {
            return Err(crate::error::EngineError::Unsupported(
                "engine does not support HDR surfaces".into(),
            ));
        }
        self.width = params.resolution.0;
        self.height = params.resolution.1;
        self.format = if params.bit_depth == 10 {
            PixelFormat::P010
        } else {
            PixelFormat::Nv12
        };
        self.initialized = true;
        self.pending.clear();
        Ok(())
    }

    fn supports_hdr(&self) -> bool {
        self.hdr
    }

    fn submit_input(&mut self, fragment: &[u8], _subframe_type: SubframeType) -> EngineResult<EngineStatus> {
        if !self.initialized {
            return Err(crate::error::EngineError::NotInitialized);
        }
        self.pending.push_back(DecodedVideoFrame {
            width: self.width,
            height: self.height,
            format: self.format,
            color_range: self.color_range,
            pts: 0,
            data: fragment.to_vec(),
        });
        Ok(EngineStatus::Ok)
    }

    fn query_output(&mut self) -> EngineResult<Option<DecodedVideoFrame>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(bit_depth: u8) -> VideoInitParams {
        VideoInitParams {
            codec: VideoCodec::H264,
            resolution: (1920, 1080),
            viewport: Viewport::default(),
            bit_depth,
            init_block: vec![1, 2, 3],
        }
    }

    #[test]
    fn reinit_rejects_hdr_when_unsupported() {
        let mut engine = MockVideoDecodeEngine::new(false);
        assert!(engine.reinit(&params(10)).is_err());
    }

    #[test]
    fn reinit_accepts_hdr_when_supported() {
        let mut engine = MockVideoDecodeEngine::new(true);
        assert!(engine.reinit(&params(10)).is_ok());
    }

    #[test]
    fn submit_before_reinit_is_not_initialized() {
        let mut engine = MockVideoDecodeEngine::new(true);
        let err = engine.submit_input(&[1, 2, 3], SubframeType::Idr).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::NotInitialized));
    }

    #[test]
    fn round_trips_a_fragment() {
        let mut engine = MockVideoDecodeEngine::new(true);
        engine.reinit(&params(8)).unwrap();
        engine.submit_input(&[9, 9, 9], SubframeType::Idr).unwrap();
        let frame = engine.query_output().unwrap().unwrap();
        assert_eq!(frame.data, vec![9, 9, 9]);
        assert_eq!(frame.format, PixelFormat::Nv12);
    }

    #[test]
    fn codec_parse_roundtrips_known_names() {
        assert_eq!(VideoCodec::parse("H264"), Some(VideoCodec::H264));
        assert_eq!(VideoCodec::parse("HEVC"), Some(VideoCodec::Hevc));
        assert_eq!(VideoCodec::parse("nonsense"), None);
    }
}
