//! Core streaming library: protocol framing, session/subscription state
//! machines, A/V receiver pipelines, and the server/client transports built
//! on top of them.
//!
//! Wire protocol and session bookkeeping are transport-agnostic, the
//! transports in `transport` wire them to `tokio::net` sockets, and
//! `streamcast-engines` (a sibling crate) supplies the pluggable
//! codec/capture/presenter seams the pipelines drive.

pub mod cipher;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod input;
pub mod net;
pub mod pipeline;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod transport;

pub use cipher::SessionCipher;
pub use config::Config;
pub use dispatch::{AudioDispatcher, InitBlock, InitBlockCache, VideoDispatcher};
pub use error::{ResultKind, StreamError, StreamResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter, NetworkEvent, NoopEventEmitter, PipelineEvent, SessionEvent};
pub use input::{event_value_kind, split_controller_path, Controller, ControllerManager, EventValueKind, GameController, KeyboardController, MouseController};
pub use net::{DatagramSocket, StreamSocket};
pub use pipeline::{
    pixel_format_for_bit_depth, AsynchronousSlot, AudioReceiverPipeline, AvSynchronizer, PipelineSlotKind, SinkSlot,
    SlotStage, SyncConfig, SyncDecision, SynchronousSlot, TaggedFrame, VideoReceiverPipeline,
};
pub use protocol::{
    decode_message, encode_message, AdaptiveSizer, ControllerEventBatch, DiscoveryRequest, DiscoveryResponse,
    Fragment, FragmentConfig, FragmentHeader, ForceIdrRequest, FrameHeader, HelloRefusedBody, HelloRequest, Message,
    Opcode, Reassembler, ReadyAck, StreamDescriptor, StreamSubscription, TurnaroundLatency, FRAGMENT_HEADER_LEN,
};
pub use runtime::{TaskSpawner, TokioSpawner};
pub use session::{Session, SessionHandle, SessionHandleAllocator, SessionManager, SessionRole, SessionState};
pub use stats::{StatsManager, StatsSnapshot};
pub use transport::{controller_event, discover, ClientTransport, ConnectionAuthorizer, DiscoveryAuthorizer, DiscoveryDecision, ServerTransport, Subscriber};

pub use streamcast_engines as engines;
pub use streamcast_engines::{
    AudioCodec, AudioFormat, CaptureSource, ColorRange, CursorBitmap, CursorType, DecodedAudioBuffer,
    DecodedVideoFrame, EventValue, InitId, PixelFormat, StreamId, SubframeType, VideoCodec, VideoInitParams, Viewport,
};
