use bytes::{Buf, BufMut, Bytes, BytesMut};

/// MySQL packet header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;
/// Maximum packet payload size (16MB - 1)
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL wire protocol packet
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Build a command packet (always sequence 0) with an optional argument
    pub fn command(command: u8, argument: &[u8]) -> Self {
        let mut payload = BytesMut::with_capacity(1 + argument.len());
        payload.put_u8(command);
        payload.extend_from_slice(argument);
        Self::new(0, payload.freeze())
    }

    /// Encode packet to bytes (header + payload)
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        // 3 bytes for length (little endian)
        dst.put_u8((len & 0xFF) as u8);
        dst.put_u8(((len >> 8) & 0xFF) as u8);
        dst.put_u8(((len >> 16) & 0xFF) as u8);
        dst.put_u8(self.sequence_id);
        dst.extend_from_slice(&self.payload);
    }

    /// Try to decode packet from bytes, returns None if not enough data
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }

        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);

        let total_len = PACKET_HEADER_SIZE + len;
        if src.len() < total_len {
            src.reserve(total_len - src.len());
            return None;
        }

        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Some(Self {
            sequence_id,
            payload,
        })
    }
}

/// Command bytes sent by the probe
pub mod command {
    pub const COM_QUIT: u8 = 0x01;
    pub const COM_QUERY: u8 = 0x03;
    pub const COM_PING: u8 = 0x0e;
}

/// MySQL capability flags
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities the probe asks for.
    ///
    /// CLIENT_DEPRECATE_EOF stays off: some backends advertise it and still
    /// send EOF packets, so result sets are always read in classic EOF mode.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH;
}

/// Read a length-encoded integer, advancing the buffer.
///
/// Returns None on truncated input or on the 0xFB (NULL) / 0xFF markers,
/// which are not integers.
pub fn read_lenenc_int(buf: &mut &[u8]) -> Option<u64> {
    let first = *buf.first()?;
    let (value, size) = match first {
        0..=0xFA => (first as u64, 1),
        0xFC if buf.len() >= 3 => (u16::from_le_bytes([buf[1], buf[2]]) as u64, 3),
        0xFD if buf.len() >= 4 => (u32::from_le_bytes([buf[1], buf[2], buf[3], 0]) as u64, 4),
        0xFE if buf.len() >= 9 => (
            u64::from_le_bytes([
                buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
            ]),
            9,
        ),
        _ => return None,
    };
    buf.advance(size);
    Some(value)
}

/// Read a length-encoded string, advancing the buffer
pub fn read_lenenc_bytes<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let (value, rest) = buf.split_at(len);
    *buf = rest;
    Some(value)
}
