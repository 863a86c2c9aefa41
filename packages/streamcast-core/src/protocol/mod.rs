//! Flow-control protocol: wire framing, fragmentation/reassembly, and the
//! typed message shapes that ride on top.

pub mod fragment;
pub mod message;
pub mod wire;

pub use fragment::{AdaptiveSizer, FragmentConfig, Reassembler};
pub use message::{
    decode_message, encode_message, ControllerEventBatch, DiscoveryRequest, DiscoveryResponse, ForceIdrRequest,
    FrameHeader, HelloRefusedBody, HelloRequest, Message, Opcode, ReadyAck, StreamDescriptor, StreamSubscription,
    TurnaroundLatency,
};
pub use wire::{Fragment, FragmentHeader, FRAGMENT_HEADER_LEN};
