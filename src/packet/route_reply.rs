use crate::{
    address::Address,
    bits::{BitReader, BitWriter, Field},
    sequence_number::SeqNo,
};

use super::{Header, InvalidPacket, RouteHeader};

/// Layout of the body of a [`RouteReply`], following the route header.
const BODY_LAYOUT: [Field; 4] = [
    Field::new("rreq_id", 8),
    Field::new("destination_sequence_number", 8),
    Field::new("originator_address", 8),
    Field::new("ttl", 8),
];

/// Reply to a [`RouteRequest`](super::RouteRequest), travelling back to the requester along the
/// reverse path.
///
/// Note the naming: `destination` is the node which requested the route, while
/// `originator_address` is the node the route leads to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub header: Header,
    /// The requester this reply travels to.
    pub destination: Address,
    /// Distance from the sender of this hop to `originator_address`.
    pub hop_count: u8,
    /// Sequence number of `originator_address`.
    pub sequence_number: SeqNo,
    pub rreq_id: u8,
    pub destination_sequence_number: SeqNo,
    /// The node the advertised route leads to.
    pub originator_address: Address,
    pub ttl: u8,
}

impl RouteReply {
    pub(super) fn write_bits(&self, dst: &mut BitWriter) {
        RouteHeader::write_bits(
            self.destination,
            self.hop_count,
            self.sequence_number.into(),
            dst,
        );
        dst.pack(
            &BODY_LAYOUT,
            &[
                self.rreq_id as u64,
                u8::from(self.destination_sequence_number) as u64,
                u8::from(self.originator_address) as u64,
                self.ttl as u64,
            ],
        );
    }

    pub(super) fn from_bits(header: Header, src: &mut BitReader<'_>) -> Result<Self, InvalidPacket> {
        let route = RouteHeader::from_bits(src)?;
        let body = src.unpack(&BODY_LAYOUT)?;

        Ok(RouteReply {
            header,
            destination: route.destination,
            hop_count: route.hop_count,
            sequence_number: route.sequence_number.into(),
            rreq_id: body[0] as u8,
            destination_sequence_number: SeqNo::from(body[1] as u8),
            originator_address: Address::new(body[2] as u8),
            ttl: body[3] as u8,
        })
    }
}
