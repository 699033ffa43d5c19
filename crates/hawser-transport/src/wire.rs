//! # hawser wire format
//!
//! Every datagram carries one packet: a fixed-size big-endian header followed
//! by the payload.
//!
//! ```text
//!  0      1      2          6         10        14      16     18        22
//! +------+------+----------+----------+----------+-------+------+--------+
//! | ver  |flags | conn_id  |   seq    |   ack    |  win  | len  | cksum  |
//! | u8   | u8   | u32      | u32      | u32      | u16   | u16  | u32    |
//! +------+------+----------+----------+----------+-------+------+--------+
//! | payload (len bytes) ...
//! ```
//!
//! The checksum is CRC-32/IEEE over the header with the checksum field set to
//! zero, concatenated with the payload. A packet is well-formed iff the
//! header decodes and the recomputed checksum equals the transmitted one.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Encoded header size in bytes.
pub const HEADER_LEN: usize = 22;

/// Byte offset of the checksum field within the header.
const CHECKSUM_OFFSET: usize = 18;

/// Reliable control-line segment (command text rides the sequence space).
pub const FLAG_CMD: u8 = 0x01;

/// Cumulative acknowledgment; the `ack` field is meaningful, `seq` is not.
pub const FLAG_ACK: u8 = 0x02;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Decode failure. Malformed datagrams are dropped without notification.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),
}

// ─── Header ─────────────────────────────────────────────────────────────────

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version (must be 1).
    pub version: u8,
    /// Flag bitset: [`FLAG_CMD`], [`FLAG_ACK`]. Other bits reserved.
    pub flags: u8,
    /// Connection identifier.
    pub conn_id: u32,
    /// Starting byte offset of the payload in the sender's stream.
    pub seq: u32,
    /// Cumulative acknowledgment: every byte offset below this is delivered.
    pub ack: u32,
    /// Advertised receive window.
    pub window: u16,
    /// Payload length in bytes.
    pub payload_len: u16,
    /// CRC-32 over the zeroed-checksum header and the payload.
    pub checksum: u32,
}

impl Header {
    pub fn is_ack(&self) -> bool {
        self.flags & FLAG_ACK != 0
    }

    pub fn is_cmd(&self) -> bool {
        self.flags & FLAG_CMD != 0
    }

    fn encode_into(&self, buf: &mut BytesMut, checksum: u32) {
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u32(self.conn_id);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u16(self.window);
        buf.put_u16(self.payload_len);
        buf.put_u32(checksum);
    }
}

// ─── Packet ─────────────────────────────────────────────────────────────────

/// A full packet: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl Packet {
    /// Build a data segment.
    pub fn data(conn_id: u32, seq: u32, window: u16, payload: Bytes) -> Self {
        Packet {
            header: Header {
                version: PROTOCOL_VERSION,
                flags: 0,
                conn_id,
                seq,
                ack: 0,
                window,
                payload_len: payload.len() as u16,
                checksum: 0,
            },
            payload,
        }
    }

    /// Build a control-line segment (same sequence space as data).
    pub fn control(conn_id: u32, seq: u32, window: u16, payload: Bytes) -> Self {
        let mut pkt = Packet::data(conn_id, seq, window, payload);
        pkt.header.flags |= FLAG_CMD;
        pkt
    }

    /// Build a cumulative ACK. Carries no payload and no sequence number.
    pub fn ack(conn_id: u32, ack: u32, window: u16) -> Self {
        Packet {
            header: Header {
                version: PROTOCOL_VERSION,
                flags: FLAG_ACK,
                conn_id,
                seq: 0,
                ack,
                window,
                payload_len: 0,
                checksum: 0,
            },
            payload: Bytes::new(),
        }
    }

    /// Serialize: header with the checksum field zeroed, CRC-32 over
    /// header ‖ payload, then the checksum patched in place.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.header.encode_into(&mut buf, 0);
        buf.extend_from_slice(&self.payload);

        let checksum = crc32fast::hash(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_be_bytes());
        buf.freeze()
    }

    /// Deserialize and verify a datagram.
    pub fn decode(datagram: &[u8]) -> Result<Packet, WireError> {
        if datagram.len() < HEADER_LEN {
            return Err(WireError::MalformedPacket("short header"));
        }

        let mut buf = &datagram[..HEADER_LEN];
        let header = Header {
            version: buf.get_u8(),
            flags: buf.get_u8(),
            conn_id: buf.get_u32(),
            seq: buf.get_u32(),
            ack: buf.get_u32(),
            window: buf.get_u16(),
            payload_len: buf.get_u16(),
            checksum: buf.get_u32(),
        };

        if header.version != PROTOCOL_VERSION {
            return Err(WireError::MalformedPacket("unknown version"));
        }

        let payload = &datagram[HEADER_LEN..];
        if header.payload_len as usize != payload.len() {
            return Err(WireError::MalformedPacket("length mismatch"));
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&datagram[..CHECKSUM_OFFSET]);
        hasher.update(&[0u8; 4]);
        hasher.update(payload);
        if hasher.finalize() != header.checksum {
            return Err(WireError::MalformedPacket("checksum mismatch"));
        }

        Ok(Packet {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}
