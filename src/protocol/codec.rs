use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use super::packet::{Packet, MAX_PACKET_SIZE};

/// MySQL packet codec for use with tokio Framed
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Packet::decode(src))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Probe commands are short; multi-packet payloads are never produced
        if item.payload.len() >= MAX_PACKET_SIZE {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "packet payload too large",
            ));
        }
        item.encode(dst);
        Ok(())
    }
}
