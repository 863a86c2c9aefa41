//! Audio codec engine trait seam.

use crate::error::{EngineResult, EngineStatus};

/// Audio codec identifier, as named on the wire in an audio init message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    Pcm,
}

impl AudioCodec {
    #[must_use]
    pub fn parse(name: &str) -> Option<AudioCodec> {
        match name {
            "OPUS" => Some(AudioCodec::Opus),
            "PCM" => Some(AudioCodec::Pcm),
            _ => None,
        }
    }
}

/// Format a decoded audio engine produces output in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u8,
    pub bits_per_sample: u8,
}

impl AudioFormat {
    /// The standard pipeline format: 48kHz stereo 16-bit.
    pub const STANDARD: AudioFormat = AudioFormat {
        sample_rate: 48_000,
        channels: 2,
        bits_per_sample: 16,
    };
}

/// A decoded PCM buffer produced by an `AudioCodecEngine`.
#[derive(Debug, Clone)]
pub struct DecodedAudioBuffer {
    pub format: AudioFormat,
    pub pts: i64,
    pub samples: Vec<u8>,
}

/// Black-box audio decoder/encoder. Implemented by the real codec; mocked in tests.
pub trait AudioCodecEngine: Send {
    /// (Re)initializes the engine for a new codec configuration epoch.
    fn reinit(&mut self, codec: AudioCodec, format: AudioFormat) -> EngineResult<()>;

    /// Submits one coded (decode) or raw (encode) audio packet.
    fn submit_input(&mut self, packet: &[u8]) -> EngineResult<EngineStatus>;

    /// Polls for decoded output. `Ok(None)` means "try again later."
    fn query_output(&mut self) -> EngineResult<Option<DecodedAudioBuffer>>;

    /// Discards any buffered state, e.g. after a seek or a dropped-packet gap.
    fn flush(&mut self);
}

/// In-memory codec engine used by tests: echoes each submitted packet back
/// as a decoded buffer tagged with the configured format.
pub struct MockAudioCodecEngine {
    initialized: bool,
    format: AudioFormat,
    pending: std::collections::VecDeque<DecodedAudioBuffer>,
}

impl MockAudioCodecEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            initialized: false,
            format: AudioFormat::STANDARD,
            pending: std::collections::VecDeque::new(),
        }
    }
}

impl Default for MockAudioCodecEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCodecEngine for MockAudioCodecEngine {
    fn reinit(&mut self, _codec: AudioCodec, format: AudioFormat) -> EngineResult<()> {
        self.format = format;
        self.initialized = true;
        self.pending.clear();
        Ok(())
    }

    fn submit_input(&mut self, packet: &[u8]) -> EngineResult<EngineStatus> {
        if !self.initialized {
            return Err(crate::error::EngineError::NotInitialized);
        }
        self.pending.push_back(DecodedAudioBuffer {
            format: self.format,
            pts: 0,
            samples: packet.to_vec(),
        });
        Ok(EngineStatus::Ok)
    }

    fn query_output(&mut self) -> EngineResult<Option<DecodedAudioBuffer>> {
        Ok(self.pending.pop_front())
    }

    fn flush(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_before_reinit_is_not_initialized() {
        let mut engine = MockAudioCodecEngine::new();
        let err = engine.submit_input(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, crate::error::EngineError::NotInitialized));
    }

    #[test]
    fn round_trips_a_packet() {
        let mut engine = MockAudioCodecEngine::new();
        engine.reinit(AudioCodec::Opus, AudioFormat::STANDARD).unwrap();
        engine.submit_input(&[7, 7]).unwrap();
        let buf = engine.query_output().unwrap().unwrap();
        assert_eq!(buf.samples, vec![7, 7]);
        assert_eq!(buf.format, AudioFormat::STANDARD);
        assert!(engine.query_output().unwrap().is_none());
    }

    #[test]
    fn codec_parse_roundtrips_known_names() {
        assert_eq!(AudioCodec::parse("OPUS"), Some(AudioCodec::Opus));
        assert_eq!(AudioCodec::parse("garbage"), None);
    }
}
