//! Dispatcher: maps `StreamID`s to pipelines and owns the init-block
//! buffers shared between the sender (for resend) and, client-side, the
//! decode engine.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use streamcast_engines::{InitId, StreamId};

use crate::error::{StreamError, StreamResult};
use crate::pipeline::{AudioReceiverPipeline, VideoReceiverPipeline};

/// An immutable init block for one `initID` epoch: the JSON header plus raw
/// codec extradata. Reference-counted so it can be held both by the
/// server's resend cache and by whatever in-flight send is copying it into
/// an outbound fragment.
#[derive(Debug, Clone)]
pub struct InitBlock {
    pub init_id: InitId,
    pub header_json: Vec<u8>,
    pub extradata: Vec<u8>,
}

/// Server-side cache of the current init block per stream.
///
/// Until a subscriber's last-acked InitID matches the stream's current one,
/// the transmitter resends this cached block in place of P/I frames rather
/// than buffering or dropping silently.
#[derive(Default)]
pub struct InitBlockCache {
    current: DashMap<StreamId, Arc<InitBlock>>,
}

impl InitBlockCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, stream_id: StreamId, block: Arc<InitBlock>) {
        self.current.insert(stream_id, block);
    }

    #[must_use]
    pub fn get(&self, stream_id: StreamId) -> Option<Arc<InitBlock>> {
        self.current.get(&stream_id).map(|entry| entry.clone())
    }

    #[must_use]
    pub fn current_init_id(&self, stream_id: StreamId) -> InitId {
        self.get(stream_id).map_or(InitId::NONE, |block| block.init_id)
    }
}

/// Client-side dispatch table for video streams: routes a decoded/coded
/// frame for `StreamID` S to the receiver pipeline registered for S.
/// `DEFAULT_STREAM` is always registered by the owning transport at
/// construction time.
#[derive(Default)]
pub struct VideoDispatcher {
    pipelines: DashMap<StreamId, Mutex<VideoReceiverPipeline>>,
}

impl VideoDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the pipeline for a stream. A single
    /// subscriber never has two concurrent decoders for the same stream:
    /// registering again replaces, it does not stack.
    pub fn register(&self, stream_id: StreamId, pipeline: VideoReceiverPipeline) {
        self.pipelines.insert(stream_id, Mutex::new(pipeline));
    }

    #[must_use]
    pub fn is_registered(&self, stream_id: StreamId) -> bool {
        self.pipelines.contains_key(&stream_id)
    }

    /// Runs `f` against the pipeline registered for `stream_id`. Frames
    /// arriving for an unregistered stream are discarded with a warning
    /// rather than buffered.
    pub fn with_pipeline<R>(
        &self,
        stream_id: StreamId,
        f: impl FnOnce(&mut VideoReceiverPipeline) -> StreamResult<R>,
    ) -> StreamResult<R> {
        let entry = self
            .pipelines
            .get(&stream_id)
            .ok_or_else(|| StreamError::InvalidArg(format!("unknown video stream {stream_id}")))?;
        let mut guard = entry.lock();
        f(&mut guard)
    }
}

/// Client-side dispatch table for audio streams, parallel to
/// [`VideoDispatcher`].
#[derive(Default)]
pub struct AudioDispatcher {
    pipelines: DashMap<StreamId, Mutex<AudioReceiverPipeline>>,
}

impl AudioDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, stream_id: StreamId, pipeline: AudioReceiverPipeline) {
        self.pipelines.insert(stream_id, Mutex::new(pipeline));
    }

    #[must_use]
    pub fn is_registered(&self, stream_id: StreamId) -> bool {
        self.pipelines.contains_key(&stream_id)
    }

    pub fn with_pipeline<R>(
        &self,
        stream_id: StreamId,
        f: impl FnOnce(&mut AudioReceiverPipeline) -> StreamResult<R>,
    ) -> StreamResult<R> {
        let entry = self
            .pipelines
            .get(&stream_id)
            .ok_or_else(|| StreamError::InvalidArg(format!("unknown audio stream {stream_id}")))?;
        let mut guard = entry.lock();
        f(&mut guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_block_cache_tracks_current_init_id_per_stream() {
        let cache = InitBlockCache::new();
        assert_eq!(cache.current_init_id(StreamId::DEFAULT), InitId::NONE);

        cache.set(
            StreamId::DEFAULT,
            Arc::new(InitBlock { init_id: InitId(1), header_json: vec![], extradata: vec![] }),
        );
        assert_eq!(cache.current_init_id(StreamId::DEFAULT), InitId(1));
    }

    #[test]
    fn video_dispatcher_rejects_unknown_stream() {
        let dispatcher = VideoDispatcher::new();
        let result = dispatcher.with_pipeline(StreamId(7), |_pipeline| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn video_dispatcher_reports_registration() {
        let dispatcher = VideoDispatcher::new();
        assert!(!dispatcher.is_registered(StreamId::DEFAULT));
    }
}
