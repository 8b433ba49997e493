use crate::{
    address::Address,
    bits::{BitReader, BitWriter, Field},
    sequence_number::SeqNo,
};

use super::{Header, InvalidPacket, RouteHeader};

/// Layout of the body of a [`RouteRequest`], following the route header.
const BODY_LAYOUT: [Field; 5] = [
    Field::new("rreq_id", 8),
    Field::new("destination_sequence_number", 8),
    Field::new("originator_address", 8),
    Field::new("originator_sequence", 8),
    Field::new("ttl", 8),
];

/// A broadcast request for a route to `destination`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub header: Header,
    /// The node a route is requested for.
    pub destination: Address,
    /// Amount of hops this request travelled so far.
    pub hop_count: u8,
    pub sequence_number: SeqNo,
    /// Identifies this discovery together with the originator address.
    pub rreq_id: u8,
    /// Last sequence number known by the originator for the destination, 0 if none.
    pub destination_sequence_number: SeqNo,
    /// The node which started the discovery.
    pub originator_address: Address,
    pub originator_sequence: SeqNo,
    /// Remaining amount of times this request may be rebroadcast.
    pub ttl: u8,
}

impl RouteRequest {
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
                u8::from(self.originator_sequence) as u64,
                self.ttl as u64,
            ],
        );
    }

    pub(super) fn from_bits(header: Header, src: &mut BitReader<'_>) -> Result<Self, InvalidPacket> {
        let route = RouteHeader::from_bits(src)?;
        let body = src.unpack(&BODY_LAYOUT)?;

        Ok(RouteRequest {
            header,
            destination: route.destination,
            hop_count: route.hop_count,
            sequence_number: route.sequence_number.into(),
            rreq_id: body[0] as u8,
            destination_sequence_number: SeqNo::from(body[1] as u8),
            originator_address: Address::new(body[2] as u8),
            originator_sequence: SeqNo::from(body[3] as u8),
            ttl: body[4] as u8,
        })
    }
}
