//! Per-fragment wire header and TCP length-prefixed framing.
//!
//! Fields are encoded in network byte order via `bytes::{Buf, BufMut}`
//! rather than hand-rolled indexing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{StreamError, StreamResult};

/// "Last fragment" bit in [`FragmentHeader::flags`].
pub const FLAG_LAST_FRAGMENT: u16 = 0x0001;
/// Set when this fragment carries an in-band `MaxFragmentSize` announcement.
pub const FLAG_SIZE_ANNOUNCE: u16 = 0x0002;
/// Set when this fragment is a retransmission, not an original send.
pub const FLAG_RETRANSMIT: u16 = 0x0004;

/// Current wire protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the fixed-length fragment header, in bytes.
pub const FRAGMENT_HEADER_LEN: usize = 1 + 1 + 4 + 2 + 2 + 2;

/// Per-fragment header carried ahead of every UDP payload (and, for TCP,
/// ahead of the single fragment a length-prefixed frame always contains).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    pub version: u8,
    pub channel: u8,
    /// Per-session monotonic message id.
    pub msg_id: u32,
    pub fragment_index: u16,
    pub fragment_count: u16,
    pub flags: u16,
}

impl FragmentHeader {
    #[must_use]
    pub fn is_last_fragment(&self) -> bool {
        self.flags & FLAG_LAST_FRAGMENT != 0
    }

    /// Encodes the header into `buf`, network byte order.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.channel);
        buf.put_u32(self.msg_id);
        buf.put_u16(self.fragment_index);
        buf.put_u16(self.fragment_count);
        buf.put_u16(self.flags);
    }

    /// Decodes a header from the front of `buf`, advancing it past the
    /// header bytes.
    pub fn decode(buf: &mut Bytes) -> StreamResult<Self> {
        if buf.len() < FRAGMENT_HEADER_LEN {
            return Err(StreamError::InvalidArg("fragment shorter than header".into()));
        }
        let version = buf.get_u8();
        let channel = buf.get_u8();
        let msg_id = buf.get_u32();
        let fragment_index = buf.get_u16();
        let fragment_count = buf.get_u16();
        let flags = buf.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(StreamError::InvalidArg(format!("unsupported protocol version {version}")));
        }
        if fragment_count == 0 || fragment_index >= fragment_count {
            return Err(StreamError::InvalidArg(format!(
                "fragment index {fragment_index} out of range for count {fragment_count}"
            )));
        }
        Ok(Self {
            version,
            channel,
            msg_id,
            fragment_index,
            fragment_count,
            flags,
        })
    }
}

/// One framed fragment: header plus payload.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub header: FragmentHeader,
    pub payload: Bytes,
}

impl Fragment {
    /// Encodes this fragment as a standalone UDP datagram payload.
    #[must_use]
    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + self.payload.len());
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a fragment from a received UDP datagram payload.
    pub fn from_datagram(mut datagram: Bytes) -> StreamResult<Self> {
        let header = FragmentHeader::decode(&mut datagram)?;
        Ok(Self { header, payload: datagram })
    }

    /// Encodes this fragment as a TCP stream frame: a 4-byte big-endian
    /// length prefix ahead of the fragment header + payload. `fragment_count`
    /// is always 1 for TCP.
    #[must_use]
    pub fn to_tcp_frame(&self) -> Bytes {
        let body_len = FRAGMENT_HEADER_LEN + self.payload.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32(body_len as u32);
        self.header.encode(&mut buf);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes one fragment from a buffer that may contain a partial or
    /// multiple TCP frames. Returns `Ok(None)` if the buffer does not yet
    /// contain a complete frame; on success, consumes exactly one frame's
    /// worth of bytes from the front of `buf`.
    pub fn try_decode_tcp_frame(buf: &mut BytesMut) -> StreamResult<Option<Self>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if buf.len() < 4 + body_len {
            return Ok(None);
        }
        buf.advance(4);
        let body = buf.split_to(body_len).freeze();
        let fragment = Self::from_datagram(body)?;
        if fragment.header.fragment_count != 1 {
            return Err(StreamError::InvalidArg(
                "TCP fragments must have fragment_count == 1".into(),
            ));
        }
        Ok(Some(fragment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> FragmentHeader {
        FragmentHeader {
            version: PROTOCOL_VERSION,
            channel: 2,
            msg_id: 42,
            fragment_index: 0,
            fragment_count: 3,
            flags: 0,
        }
    }

    #[test]
    fn header_round_trips() {
        let h = header();
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        let mut bytes = buf.freeze();
        let decoded = FragmentHeader::decode(&mut bytes).unwrap();
        assert_eq!(decoded, h);
    }

    #[test]
    fn rejects_index_out_of_range() {
        let mut h = header();
        h.fragment_index = 5;
        let mut buf = BytesMut::new();
        h.encode(&mut buf);
        let mut bytes = buf.freeze();
        assert!(FragmentHeader::decode(&mut bytes).is_err());
    }

    #[test]
    fn datagram_round_trips_with_payload() {
        let fragment = Fragment {
            header: header(),
            payload: Bytes::from_static(b"hello"),
        };
        let datagram = fragment.to_datagram();
        let decoded = Fragment::from_datagram(datagram).unwrap();
        assert_eq!(decoded.header, fragment.header);
        assert_eq!(decoded.payload, fragment.payload);
    }

    #[test]
    fn tcp_frame_decode_waits_for_full_frame() {
        let fragment = Fragment {
            header: FragmentHeader { fragment_count: 1, ..header() },
            payload: Bytes::from_static(b"partial-test"),
        };
        let frame = fragment.to_tcp_frame();
        let mut buf = BytesMut::from(&frame[..frame.len() - 1]);
        assert!(Fragment::try_decode_tcp_frame(&mut buf).unwrap().is_none());

        let mut full = BytesMut::from(&frame[..]);
        let decoded = Fragment::try_decode_tcp_frame(&mut full).unwrap().unwrap();
        assert_eq!(decoded.payload, fragment.payload);
        assert!(full.is_empty());
    }

    #[test]
    fn tcp_frame_rejects_multi_fragment_count() {
        let fragment = Fragment {
            header: header(),
            payload: Bytes::from_static(b"x"),
        };
        let frame = fragment.to_tcp_frame();
        let mut buf = BytesMut::from(&frame[..]);
        assert!(Fragment::try_decode_tcp_frame(&mut buf).is_err());
    }
}
