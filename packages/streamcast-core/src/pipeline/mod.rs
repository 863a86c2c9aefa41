//! A/V pipeline: slot contract, video/audio receiver pipelines, and the
//! A/V synchronizer.

pub mod audio;
pub mod slot;
pub mod sync;
pub mod video;

pub use audio::AudioReceiverPipeline;
pub use slot::{AsynchronousSlot, PipelineSlotKind, SinkSlot, SlotStage, SynchronousSlot};
pub use sync::{AvSynchronizer, SyncConfig, SyncDecision};
pub use video::{pixel_format_for_bit_depth, TaggedFrame, VideoReceiverPipeline};
