use crate::{
    address::Address,
    bits::{BitReader, BitWriter},
    sequence_number::SeqNo,
};

use super::{Header, InvalidPacket, RouteHeader};

/// An application text message, delivered hop by hop to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub destination: Address,
    pub hop_count: u8,
    /// Sequence number of the node which sent this hop.
    pub sequence_number: SeqNo,
    /// Application text, sent verbatim after the armored header. Must not contain line breaks.
    pub payload: String,
}

impl Message {
    pub(super) fn write_bits(&self, dst: &mut BitWriter) {
        RouteHeader::write_bits(
            self.destination,
            self.hop_count,
            self.sequence_number.into(),
            dst,
        );
    }

    pub(super) fn from_bits(
        header: Header,
        src: &mut BitReader<'_>,
        payload: String,
    ) -> Result<Self, InvalidPacket> {
        let route = RouteHeader::from_bits(src)?;

        Ok(Message {
            header,
            destination: route.destination,
            hop_count: route.hop_count,
            sequence_number: route.sequence_number.into(),
            payload,
        })
    }
}
