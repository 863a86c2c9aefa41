//! Typed message shapes carried on top of the fragment framing.
//!
//! JSON bodies use `serde_json`, with `#[serde(rename_all = "camelCase")]`
//! throughout so the wire shape matches conventional JSON field naming.

use serde::{Deserialize, Serialize};

use streamcast_engines::{EventValue, InitId, StreamId, Viewport};

use crate::error::{StreamError, StreamResult};

/// One-byte opcode carried at the start of a SERVICE-channel payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Discovery = 0,
    Hello = 1,
    HelloOk = 2,
    HelloRefused = 3,
    Stats = 4,
    ForceIdr = 5,
    ServerStat = 6,
    TurnaroundLatency = 7,
    VideoInit = 8,
    VideoFrame = 9,
    AudioInit = 10,
    AudioFrame = 11,
    SensorsOut = 12,
    SensorsIn = 13,
    Subscribe = 14,
    Unsubscribe = 15,
    Ready = 16,
    Nack = 17,
}

impl Opcode {
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::Discovery,
            1 => Self::Hello,
            2 => Self::HelloOk,
            3 => Self::HelloRefused,
            4 => Self::Stats,
            5 => Self::ForceIdr,
            6 => Self::ServerStat,
            7 => Self::TurnaroundLatency,
            8 => Self::VideoInit,
            9 => Self::VideoFrame,
            10 => Self::AudioInit,
            11 => Self::AudioFrame,
            12 => Self::SensorsOut,
            13 => Self::SensorsIn,
            14 => Self::Subscribe,
            15 => Self::Unsubscribe,
            16 => Self::Ready,
            17 => Self::Nack,
            _ => return None,
        })
    }
}

/// `{w, h}` resolution pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub w: u32,
    pub h: u32,
}

/// Video init header, JSON on the video-out channel ahead of raw codec
/// extradata bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInitHeader {
    pub codec: String,
    pub stream_id: StreamId,
    pub init_id: InitId,
    pub resolution: Resolution,
    pub viewport: Viewport,
    pub bit_depth: u8,
    pub stereo: bool,
    pub foveated: bool,
}

/// One coded subframe's size, in declared order within a video frame body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubframeDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u32,
}

/// Video frame header, JSON ahead of concatenated subframe payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFrameHeader {
    pub stream_id: StreamId,
    pub sequence_number: u64,
    pub origin_pts: i64,
    pub pts: i64,
    pub discontinuity: bool,
    pub subframes: Vec<SubframeDescriptor>,
}

/// Audio init header, parallel shape to [`VideoInitHeader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInitHeader {
    pub codec: String,
    pub stream_id: StreamId,
    pub init_id: InitId,
    pub channels: u8,
    pub layout: String,
    pub sampling_rate: u32,
    pub format: String,
}

/// Audio frame header, parallel shape to [`VideoFrameHeader`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrameHeader {
    pub stream_id: StreamId,
    pub sequence_number: u64,
    pub origin_pts: i64,
    pub pts: i64,
    pub discontinuity: bool,
    pub size: u32,
}

/// Server-advertised stream descriptor, carried in a discovery reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub id: StreamId,
    pub codec: String,
    pub resolution: Resolution,
    pub fps: u32,
}

/// `DISCOVERY` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRequest {
    pub device_id: String,
}

/// `HELLO_OK` reply to a successful discovery, carrying the server's
/// advertised stream list and name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub server_name: String,
    pub streams: Vec<StreamDescriptor>,
}

/// `HELLO` (connect) request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRequest {
    pub device_id: String,
    pub role: String,
    pub platform: String,
    /// Salt used for this session's cipher key derivation, if the server
    /// has a passphrase configured. `None` means no encryption.
    pub cipher_salt: Option<Vec<u8>>,
}

/// `HELLO_REFUSED` reply body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloRefusedBody {
    pub reason: String,
}

/// `SUBSCRIBE`/`UNSUBSCRIBE` request body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSubscription {
    pub stream_id: StreamId,
}

/// `READY` acknowledgement: the client has finished reinitializing its
/// decoder for `init_id` and is prepared to receive frames referencing it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyAck {
    pub stream_id: StreamId,
    pub init_id: InitId,
}

/// `FORCE_IDR` request body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceIdrRequest {
    pub stream_id: StreamId,
}

/// `TURNAROUND_LATENCY` heartbeat body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnaroundLatency {
    pub client_send_ts: i64,
}

/// One controller event: an input from client→server, or an effect (cursor,
/// haptic) from server→client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerEvent {
    pub id: String,
    pub value: EventValue,
    pub flags: u32,
}

/// JSON array of controller events carried on SENSORS_IN/SENSORS_OUT.
pub type ControllerEventBatch = Vec<ControllerEvent>;

/// Frame header shared across video/audio framing, used by callers that
/// only need the common per-frame fields (e.g. the A/V synchronizer).
#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub stream_id: StreamId,
    pub sequence_number: u64,
    pub origin_pts: i64,
    pub pts: i64,
    pub discontinuity: bool,
}

impl From<&VideoFrameHeader> for FrameHeader {
    fn from(h: &VideoFrameHeader) -> Self {
        Self {
            stream_id: h.stream_id,
            sequence_number: h.sequence_number,
            origin_pts: h.origin_pts,
            pts: h.pts,
            discontinuity: h.discontinuity,
        }
    }
}

impl From<&AudioFrameHeader> for FrameHeader {
    fn from(h: &AudioFrameHeader) -> Self {
        Self {
            stream_id: h.stream_id,
            sequence_number: h.sequence_number,
            origin_pts: h.origin_pts,
            pts: h.pts,
            discontinuity: h.discontinuity,
        }
    }
}

/// Top-level decoded message body, dispatched on by the service-channel
/// opcode.
#[derive(Debug, Clone)]
pub enum Message {
    Discovery(DiscoveryRequest),
    Hello(HelloRequest),
    HelloOk(DiscoveryResponse),
    HelloRefused(HelloRefusedBody),
    Subscribe(StreamSubscription),
    Unsubscribe(StreamSubscription),
    Ready(ReadyAck),
    VideoInit { header: VideoInitHeader, extradata: Vec<u8> },
    VideoFrame { header: VideoFrameHeader, payload: Vec<u8> },
    AudioInit { header: AudioInitHeader, extradata: Vec<u8> },
    AudioFrame { header: AudioFrameHeader, payload: Vec<u8> },
    SensorsIn(ControllerEventBatch),
    SensorsOut(ControllerEventBatch),
    ForceIdr(ForceIdrRequest),
    Nack { stream_id: StreamId, msg_id: u32, missing: Vec<u16> },
    TurnaroundLatency(TurnaroundLatency),
    Stats(serde_json::Value),
}

/// Encodes a [`Message`] as an opcode byte followed by its JSON body (and,
/// for video/audio init/frame, raw bytes appended after the JSON header),
/// the shape every SERVICE/VIDEO_OUT/AUDIO_OUT channel payload takes on
/// the wire.
///
/// # Errors
///
/// Returns `InvalidArg` if JSON serialization of the body fails (it never
/// should for these plain-data types).
pub fn encode_message(message: &Message) -> StreamResult<Vec<u8>> {
    fn with_header<H: Serialize>(opcode: Opcode, header: &H, trailing: &[u8]) -> StreamResult<Vec<u8>> {
        let json = serde_json::to_vec(header)
            .map_err(|e| StreamError::InvalidArg(format!("failed to encode message body: {e}")))?;
        let mut out = Vec::with_capacity(1 + json.len() + trailing.len());
        out.push(opcode as u8);
        out.extend_from_slice(&json);
        if !trailing.is_empty() {
            out.push(0); // NUL separator between the JSON header and raw trailing bytes
            out.extend_from_slice(trailing);
        }
        Ok(out)
    }

    match message {
        Message::Discovery(body) => with_header(Opcode::Discovery, body, &[]),
        Message::Hello(body) => with_header(Opcode::Hello, body, &[]),
        Message::HelloOk(body) => with_header(Opcode::HelloOk, body, &[]),
        Message::HelloRefused(body) => with_header(Opcode::HelloRefused, body, &[]),
        Message::Subscribe(body) => with_header(Opcode::Subscribe, body, &[]),
        Message::Unsubscribe(body) => with_header(Opcode::Unsubscribe, body, &[]),
        Message::Ready(body) => with_header(Opcode::Ready, body, &[]),
        Message::VideoInit { header, extradata } => with_header(Opcode::VideoInit, header, extradata),
        Message::VideoFrame { header, payload } => with_header(Opcode::VideoFrame, header, payload),
        Message::AudioInit { header, extradata } => with_header(Opcode::AudioInit, header, extradata),
        Message::AudioFrame { header, payload } => with_header(Opcode::AudioFrame, header, payload),
        Message::SensorsIn(batch) => with_header(Opcode::SensorsIn, batch, &[]),
        Message::SensorsOut(batch) => with_header(Opcode::SensorsOut, batch, &[]),
        Message::ForceIdr(body) => with_header(Opcode::ForceIdr, body, &[]),
        Message::Nack { stream_id, msg_id, missing } => with_header(
            Opcode::Nack,
            &serde_json::json!({ "streamId": stream_id, "msgId": msg_id, "missing": missing }),
            &[],
        ),
        Message::TurnaroundLatency(body) => with_header(Opcode::TurnaroundLatency, body, &[]),
        Message::Stats(value) => with_header(Opcode::Stats, value, &[]),
    }
}

/// Decodes a service-channel payload produced by [`encode_message`].
///
/// # Errors
///
/// Returns `InvalidArg` if the payload is empty, the opcode byte is
/// unrecognized, or the JSON header fails to parse or deserialize into the
/// shape the opcode implies.
pub fn decode_message(payload: &[u8]) -> StreamResult<Message> {
    let (&opcode_byte, rest) = payload
        .split_first()
        .ok_or_else(|| StreamError::InvalidArg("empty message payload".into()))?;
    let opcode = Opcode::from_byte(opcode_byte)
        .ok_or_else(|| StreamError::InvalidArg(format!("unknown opcode {opcode_byte}")))?;

    // The JSON header and any trailing raw bytes are separated by a NUL
    // byte that cannot occur inside valid (non-pathological) JSON text, so
    // splitting on its first occurrence recovers both halves losslessly.
    let (json_part, trailing) = match rest.iter().position(|&b| b == 0) {
        Some(idx) => (&rest[..idx], &rest[idx + 1..]),
        None => (rest, &rest[rest.len()..]),
    };

    fn parse<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> StreamResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StreamError::InvalidArg(format!("malformed message body: {e}")))
    }

    Ok(match opcode {
        Opcode::Discovery => Message::Discovery(parse(json_part)?),
        Opcode::Hello => Message::Hello(parse(json_part)?),
        Opcode::HelloOk => Message::HelloOk(parse(json_part)?),
        Opcode::HelloRefused => Message::HelloRefused(parse(json_part)?),
        Opcode::Subscribe => Message::Subscribe(parse(json_part)?),
        Opcode::Unsubscribe => Message::Unsubscribe(parse(json_part)?),
        Opcode::Ready => Message::Ready(parse(json_part)?),
        Opcode::VideoInit => Message::VideoInit { header: parse(json_part)?, extradata: trailing.to_vec() },
        Opcode::VideoFrame => Message::VideoFrame { header: parse(json_part)?, payload: trailing.to_vec() },
        Opcode::AudioInit => Message::AudioInit { header: parse(json_part)?, extradata: trailing.to_vec() },
        Opcode::AudioFrame => Message::AudioFrame { header: parse(json_part)?, payload: trailing.to_vec() },
        Opcode::SensorsIn => Message::SensorsIn(parse(json_part)?),
        Opcode::SensorsOut => Message::SensorsOut(parse(json_part)?),
        Opcode::ForceIdr => Message::ForceIdr(parse(json_part)?),
        Opcode::Nack => {
            let value: serde_json::Value = parse(json_part)?;
            Message::Nack {
                stream_id: serde_json::from_value(value["streamId"].clone())
                    .map_err(|e| StreamError::InvalidArg(format!("malformed nack: {e}")))?,
                msg_id: value["msgId"].as_u64().unwrap_or(0) as u32,
                missing: serde_json::from_value(value["missing"].clone()).unwrap_or_default(),
            }
        }
        Opcode::TurnaroundLatency => Message::TurnaroundLatency(parse(json_part)?),
        Opcode::Stats => Message::Stats(parse(json_part)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_known_bytes() {
        assert_eq!(Opcode::from_byte(0), Some(Opcode::Discovery));
        assert_eq!(Opcode::from_byte(9), Some(Opcode::VideoFrame));
        assert_eq!(Opcode::from_byte(255), None);
    }

    #[test]
    fn video_init_header_round_trips_through_json() {
        let header = VideoInitHeader {
            codec: "H264".to_string(),
            stream_id: StreamId::DEFAULT,
            init_id: InitId(1),
            resolution: Resolution { w: 1920, h: 1080 },
            viewport: Viewport::default(),
            bit_depth: 8,
            stereo: false,
            foveated: false,
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(json.contains("\"streamId\""));
        let decoded: VideoInitHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.codec, "H264");
    }

    #[test]
    fn frame_header_extracts_common_fields() {
        let video = VideoFrameHeader {
            stream_id: StreamId::DEFAULT,
            sequence_number: 7,
            origin_pts: 100,
            pts: 105,
            discontinuity: false,
            subframes: vec![],
        };
        let common: FrameHeader = (&video).into();
        assert_eq!(common.sequence_number, 7);
        assert_eq!(common.pts, 105);
    }

    #[test]
    fn discovery_round_trips_through_encode_decode() {
        let message = Message::Discovery(DiscoveryRequest { device_id: "c1".to_string() });
        let wire = encode_message(&message).unwrap();
        assert_eq!(wire[0], Opcode::Discovery as u8);
        match decode_message(&wire).unwrap() {
            Message::Discovery(body) => assert_eq!(body.device_id, "c1"),
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn video_frame_round_trips_with_trailing_payload() {
        let header = VideoFrameHeader {
            stream_id: StreamId::DEFAULT,
            sequence_number: 1,
            origin_pts: 0,
            pts: 16,
            discontinuity: false,
            subframes: vec![SubframeDescriptor { kind: "IDR".to_string(), size: 3 }],
        };
        let message = Message::VideoFrame { header, payload: vec![1, 2, 3] };
        let wire = encode_message(&message).unwrap();
        match decode_message(&wire).unwrap() {
            Message::VideoFrame { header, payload } => {
                assert_eq!(header.sequence_number, 1);
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn decode_rejects_empty_payload() {
        assert!(decode_message(&[]).is_err());
    }

    #[test]
    fn decode_rejects_unknown_opcode() {
        assert!(decode_message(&[255]).is_err());
    }
}
