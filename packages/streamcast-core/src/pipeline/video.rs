//! Video receiver pipeline: decode -> denoiser -> scaler -> aspect-ratio ->
//! converter -> A/V-sync video sink.
//!
//! The individual filter stages (denoise, scale, aspect-ratio) are
//! algorithm-free pass-throughs here - actual filter implementations are a
//! Non-goal, same as codec implementation - but they are real [`SlotStage`]
//! links in the chain, not comments. What this module owns beyond that is
//! the reinit/gating logic around them: `OnInputChanged` reaction,
//! pixel-format selection by bit depth, and color-range/target-size-triggered
//! reconfiguration.

use std::sync::Arc;

use streamcast_engines::{
    ColorRange, DecodedVideoFrame, PixelFormat, StreamId, SubframeType, VideoDecodeEngine,
    VideoInitParams, VideoPresenter, Viewport,
};

use crate::error::{StreamError, StreamResult};
use crate::pipeline::slot::{PassThroughStage, SynchronousSlot};
use crate::pipeline::sync::AvSynchronizer;
use crate::protocol::message::FrameHeader;
use streamcast_engines::InitId;

/// Per-frame tagging attached as it crosses the sink boundary: origin PTS,
/// stream ID, and client-observed timestamp.
#[derive(Debug, Clone, Copy)]
pub struct TaggedFrame {
    pub stream_id: StreamId,
    pub origin_pts: i64,
    pub pts: i64,
    pub client_timestamp: i64,
}

/// Drives one filter's worth of frames through a [`PassThroughStage`] and
/// back out, surfacing a descriptive error if the stage ever fails its own
/// single-buffer invariant instead of silently unwrapping.
fn run_passthrough(
    slot: &mut SynchronousSlot<DecodedVideoFrame, DecodedVideoFrame>,
    frame: DecodedVideoFrame,
    stage_name: &str,
) -> StreamResult<DecodedVideoFrame> {
    slot.submit_input(frame)?;
    slot.query_output()?
        .ok_or_else(|| StreamError::Fail(format!("{stage_name} stage produced no output for its input")))
}

/// Drives one video stream's decode -> filter -> present path, reacting to
/// init changes, color-range changes and viewport/fullscreen changes.
pub struct VideoReceiverPipeline {
    engine: Box<dyn VideoDecodeEngine>,
    denoise: SynchronousSlot<DecodedVideoFrame, DecodedVideoFrame>,
    scale: SynchronousSlot<DecodedVideoFrame, DecodedVideoFrame>,
    aspect: SynchronousSlot<DecodedVideoFrame, DecodedVideoFrame>,
    presenter: Box<dyn VideoPresenter>,
    sync: Arc<AvSynchronizer>,
    last_init_id: InitId,
    last_color_range: Option<ColorRange>,
    last_target_size: Option<(u32, u32)>,
    viewport: Viewport,
    exclusive_fullscreen: bool,
    stream_id: StreamId,
}

impl VideoReceiverPipeline {
    #[must_use]
    pub fn new(
        stream_id: StreamId,
        engine: Box<dyn VideoDecodeEngine>,
        presenter: Box<dyn VideoPresenter>,
        sync: Arc<AvSynchronizer>,
    ) -> Self {
        Self {
            engine,
            denoise: SynchronousSlot::new(Box::new(PassThroughStage::new())),
            scale: SynchronousSlot::new(Box::new(PassThroughStage::new())),
            aspect: SynchronousSlot::new(Box::new(PassThroughStage::new())),
            presenter,
            sync,
            last_init_id: InitId::NONE,
            last_color_range: None,
            last_target_size: None,
            viewport: Viewport::default(),
            exclusive_fullscreen: false,
            stream_id,
        }
    }

    /// Switches between presenting at the decoded frame's native resolution
    /// (exclusive fullscreen) and the negotiated viewport rectangle
    /// (windowed). Takes effect on the next decoded frame.
    pub fn set_exclusive_fullscreen(&mut self, exclusive: bool) {
        self.exclusive_fullscreen = exclusive;
    }

    /// Reacts to a video init message. Reinitializes the decode engine only
    /// if `init_id` differs from the last one applied - repeated init
    /// blocks sent while gating on an un-acked InitID are cheap no-ops here.
    /// Returns whether a reinit actually ran.
    pub fn on_input_changed(&mut self, init_id: InitId, params: &VideoInitParams) -> StreamResult<bool> {
        if init_id == self.last_init_id {
            return Ok(false);
        }
        self.engine.reinit(params)?;
        self.last_init_id = init_id;
        self.last_color_range = None;
        self.last_target_size = None;
        self.viewport = params.viewport;
        self.denoise.flush();
        self.scale.flush();
        self.aspect.flush();
        Ok(true)
    }

    /// Feeds one coded fragment through decode and the filter chain,
    /// presenting whatever decoded frame becomes available (there may be
    /// none yet, or more than one), invoking `on_frame` once per presented
    /// frame so the caller can derive latency stats from it.
    pub fn submit_fragment(
        &mut self,
        fragment: &[u8],
        header: FrameHeader,
        client_timestamp: i64,
        mut on_frame: impl FnMut(&TaggedFrame),
    ) -> StreamResult<()> {
        self.engine.submit_input(fragment, SubframeType::Unknown)?;

        while let Some(frame) = self.engine.query_output()? {
            let frame = run_passthrough(&mut self.denoise, frame, "denoise")?;
            let frame = run_passthrough(&mut self.scale, frame, "scale")?;
            let frame = run_passthrough(&mut self.aspect, frame, "aspect-ratio")?;

            self.reconfigure_if_needed(&frame)?;
            self.sync.note_video_pts(header.pts);
            self.presenter.present(&frame.data, header.pts)?;
            on_frame(&TaggedFrame {
                stream_id: self.stream_id,
                origin_pts: header.origin_pts,
                pts: header.pts,
                client_timestamp,
            });
        }
        Ok(())
    }

    /// Resolves the presenter's target size: the decoded frame's native
    /// resolution under exclusive fullscreen, otherwise the negotiated
    /// viewport rectangle (falling back to native if the viewport is empty).
    fn target_size(&self, frame: &DecodedVideoFrame) -> (u32, u32) {
        if self.exclusive_fullscreen {
            return (frame.width, frame.height);
        }
        let width = self.viewport.right.saturating_sub(self.viewport.left);
        let height = self.viewport.bottom.saturating_sub(self.viewport.top);
        if width == 0 || height == 0 {
            (frame.width, frame.height)
        } else {
            (width, height)
        }
    }

    fn reconfigure_if_needed(&mut self, frame: &DecodedVideoFrame) -> StreamResult<()> {
        let target = self.target_size(frame);
        let color_range_changed = self.last_color_range != Some(frame.color_range);
        let target_changed = self.last_target_size != Some(target);
        if color_range_changed || target_changed {
            self.presenter.reconfigure(streamcast_engines::PresenterFormat {
                width: target.0,
                height: target.1,
                pixel_format: frame.format,
                color_range: frame.color_range,
            })?;
            self.last_color_range = Some(frame.color_range);
            self.last_target_size = Some(target);
        }
        Ok(())
    }
}

/// Selects the decode-side pixel format for a negotiated bit depth.
#[must_use]
pub fn pixel_format_for_bit_depth(bit_depth: u8) -> PixelFormat {
    if bit_depth >= 10 {
        PixelFormat::P010
    } else {
        PixelFormat::Nv12
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamcast_engines::{MockVideoDecodeEngine, MockVideoPresenter};

    fn params(bit_depth: u8) -> VideoInitParams {
        VideoInitParams {
            codec: streamcast_engines::VideoCodec::H264,
            resolution: (1920, 1080),
            viewport: Viewport::default(),
            bit_depth,
            init_block: vec![],
        }
    }

    #[test]
    fn pixel_format_selection_follows_bit_depth() {
        assert_eq!(pixel_format_for_bit_depth(8), PixelFormat::Nv12);
        assert_eq!(pixel_format_for_bit_depth(10), PixelFormat::P010);
    }

    #[test]
    fn repeated_init_id_is_a_no_op() {
        let mut pipeline = VideoReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockVideoDecodeEngine::new(true)),
            Box::new(MockVideoPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        assert!(pipeline.on_input_changed(InitId(1), &params(8)).unwrap());
        // A second call with the same InitID must not error even though the
        // underlying engine would reject a 10-bit reinit it never saw, and
        // must report no reinit happened.
        assert!(!pipeline.on_input_changed(InitId(1), &params(8)).unwrap());
    }

    #[test]
    fn decoded_frame_is_presented_and_triggers_reconfigure_once() {
        let mut pipeline = VideoReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockVideoDecodeEngine::new(true)),
            Box::new(MockVideoPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        pipeline.on_input_changed(InitId(1), &params(8)).unwrap();

        let header = FrameHeader {
            stream_id: StreamId::DEFAULT,
            sequence_number: 1,
            origin_pts: 0,
            pts: 100,
            discontinuity: false,
        };
        let mut tagged = Vec::new();
        pipeline
            .submit_fragment(&[1, 2, 3], header, 12345, |frame| tagged.push(*frame))
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].client_timestamp, 12345);
        assert_eq!(tagged[0].pts, 100);
    }

    #[test]
    fn exclusive_fullscreen_targets_native_resolution_and_windowed_targets_viewport() {
        let mut pipeline = VideoReceiverPipeline::new(
            StreamId::DEFAULT,
            Box::new(MockVideoDecodeEngine::new(true)),
            Box::new(MockVideoPresenter::new()),
            Arc::new(AvSynchronizer::new(crate::pipeline::sync::SyncConfig::default())),
        );
        let mut init_params = params(8);
        init_params.viewport = Viewport { left: 0, top: 0, right: 640, bottom: 360 };
        pipeline.on_input_changed(InitId(1), &init_params).unwrap();

        let frame = DecodedVideoFrame {
            width: 1920,
            height: 1080,
            format: PixelFormat::Nv12,
            color_range: ColorRange::Full709,
            pts: 0,
            data: vec![],
        };
        assert_eq!(pipeline.target_size(&frame), (640, 360));

        pipeline.set_exclusive_fullscreen(true);
        assert_eq!(pipeline.target_size(&frame), (1920, 1080));
    }
}
