//! Audio receiver pipeline: decoder -> channel/rate converter -> A/V-sync
//! audio sink.
//!
//! Reinit is keyed only on `initID` (no bit-depth/color-range concerns like
//! the video side); codec selection is by name (AAC, Opus). Platform-native
//! AAC decoders stay behind the `AudioCodecEngine` trait and are not
//! implemented here, per the Non-goals. The channel/rate converter is a
//! real [`PassThroughStage`] link, algorithm-free for the same reason.

use std::sync::Arc;

use streamcast_engines::{AudioCodec, AudioCodecEngine, AudioFormat, AudioPresenter, DecodedAudioBuffer, InitId, StreamId};

use crate::error::{StreamError, StreamResult};
use crate::pipeline::slot::{PassThroughStage, SynchronousSlot};
use crate::pipeline::sync::{AvSynchronizer, SyncDecision};
use crate::protocol::message::FrameHeader;

/// Drives one audio stream's decode -> convert -> present path, dropping
/// packets the [`AvSynchronizer`] flags as too far ahead of video.
pub struct AudioReceiverPipeline {
    engine: Box<dyn AudioCodecEngine>,
    converter: SynchronousSlot<DecodedAudioBuffer, DecodedAudioBuffer>,
    presenter: Box<dyn AudioPresenter>,
    sync: Arc<AvSynchronizer>,
    last_init_id: InitId,
    #[allow(dead_code)]
    stream_id: StreamId,
}

impl AudioReceiverPipeline {
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        engine: Box<dyn AudioCodecEngine>,
        presenter: Box<dyn AudioPresenter>,
        sync: Arc<AvSynchronizer>,
    ) -> Self {
        Self {
            engine,
            converter: SynchronousSlot::new(Box::new(PassThroughStage::new())),
            presenter,
            sync,
            last_init_id: InitId::NONE,
            stream_id,
        }
    }

    /// Reacts to an audio init message, keyed only on `init_id`. Returns
    /// whether a reinit actually ran.
    pub fn on_input_changed(&mut self, init_id: InitId, codec: AudioCodec, format: AudioFormat) -> StreamResult<bool> {
        if init_id == self.last_init_id {
            return Ok(false);
        }
        self.engine.reinit(codec, format)?;
        self.presenter.reconfigure(format)?;
        self.last_init_id = init_id;
        self.converter.flush();
        Ok(true)
    }

    /// Feeds one coded packet through decode and the converter stage; the
    /// synchronizer may decide to drop the decoded buffer rather than
    /// present it. `on_packet` is invoked once per decoded buffer with the
    /// sync decision and current mean A/V desync, whether presented or
    /// dropped, so the caller can derive drop-rate and desync stats.
    pub fn submit_packet(
        &mut self,
        packet: &[u8],
        header: FrameHeader,
        mut on_packet: impl FnMut(SyncDecision, i64),
    ) -> StreamResult<()> {
        self.engine.submit_input(packet)?;
        while let Some(buffer) = self.engine.query_output()? {
            self.converter.submit_input(buffer)?;
            let buffer = self.converter.query_output()?.ok_or_else(|| {
                StreamError::Fail("channel/rate converter stage produced no output for its input".into())
            })?;

            let decision = self.sync.submit_audio(header.pts);
            on_packet(decision, self.sync.mean_desync_ms());
            if decision == SyncDecision::Drop {
                continue;
            }
            self.presenter.present(&buffer.samples, header.pts)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamcast_engines::{MockAudioCodecEngine, MockAudioPresenter};

    fn header(pts: i64) -> FrameHeader {
        FrameHeader {
            stream_id: StreamId::DEFAULT,
            sequence_number: 1,
            origin_pts: pts,
            pts,
            discontinuity: false,
        }
    }

    #[test]
    fn repeated_init_id_is_a_no_op() {
        let mut pipeline = AudioReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockAudioCodecEngine::new()),
            Box::new(MockAudioPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        assert!(pipeline.on_input_changed(InitId(1), AudioCodec::Opus, AudioFormat::STANDARD).unwrap());
        assert!(!pipeline.on_input_changed(InitId(1), AudioCodec::Opus, AudioFormat::STANDARD).unwrap());
    }

    #[test]
    fn decoded_packet_is_presented_when_in_sync() {
        let mut pipeline = AudioReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockAudioCodecEngine::new()),
            Box::new(MockAudioPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        pipeline.on_input_changed(InitId(1), AudioCodec::Opus, AudioFormat::STANDARD).unwrap();
        let mut seen = Vec::new();
        pipeline
            .submit_packet(&[1, 2], header(100), |decision, desync_ms| seen.push((decision, desync_ms)))
            .unwrap();
        assert_eq!(seen, vec![(SyncDecision::Present, 0)]);
    }

    #[test]
    fn sustained_desync_drops_are_reported_through_the_callback() {
        let mut pipeline = AudioReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockAudioCodecEngine::new()),
            Box::new(MockAudioPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        pipeline.on_input_changed(InitId(1), AudioCodec::Opus, AudioFormat::STANDARD).unwrap();
        pipeline.sync.note_video_pts(100);

        let mut drops = 0;
        for _ in 0..101 {
            pipeline
                .submit_packet(&[1, 2], header(0), |decision, _| {
                    if decision == SyncDecision::Drop {
                        drops += 1;
                    }
                })
                .unwrap();
        }
        assert!(drops > 0, "sustained 100ms desync past the 80ms threshold must eventually drop");
    }
}
