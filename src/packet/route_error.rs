use log::warn;

use crate::{
    address::Address,
    bits::{self, BitReader, BitWriter, Field},
    sequence_number::SeqNo,
};

use super::{Header, InvalidPacket, HEADER_LAYOUT};

/// Width of the entry count, which directly follows the header.
const COUNT_FIELD: Field = Field::new("count", 8);

/// Layout of a single entry in a [`RouteError`].
const ENTRY_LAYOUT: [Field; 2] = [
    Field::new("unreachable_destination", 8),
    Field::new("unreachable_sequence_number", 8),
];

/// A destination which can no longer be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnreachableDestination {
    pub destination: Address,
    /// Last known sequence number of the destination.
    pub sequence_number: SeqNo,
}

/// Announces that routes through the sender to the listed destinations are broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteError {
    pub header: Header,
    /// The count on the wire is a single byte, so at most 255 entries are encoded. Any further
    /// entries are dropped with a warning.
    pub destinations: Vec<UnreachableDestination>,
}

impl RouteError {
    pub(super) fn write_bits(&self, dst: &mut BitWriter) {
        let count = u8::try_from(self.destinations.len()).unwrap_or_else(|_| {
            warn!(
                "Route error lists {} destinations, only the first {} are encoded",
                self.destinations.len(),
                u8::MAX
            );
            u8::MAX
        });
        dst.write(count as u64, COUNT_FIELD.width);
        for entry in self.destinations.iter().take(count as usize) {
            dst.pack(
                &ENTRY_LAYOUT,
                &[
                    u8::from(entry.destination) as u64,
                    u8::from(entry.sequence_number) as u64,
                ],
            );
        }
    }

    pub(super) fn from_bits(header: Header, src: &mut BitReader<'_>) -> Result<Self, InvalidPacket> {
        // The count sits at a fixed offset, so the expected size is known up front.
        let count = src.read(COUNT_FIELD.width).ok_or(InvalidPacket::Truncated {
            field: COUNT_FIELD.name,
        })?;
        debug_assert_eq!(
            src.position(),
            bits::layout_width(&HEADER_LAYOUT) + COUNT_FIELD.width as usize
        );

        // Reject a count the data can't hold before allocating for it.
        if src.remaining() < count as usize * bits::layout_width(&ENTRY_LAYOUT) {
            return Err(InvalidPacket::Truncated {
                field: ENTRY_LAYOUT[0].name,
            });
        }

        let mut destinations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let entry = src.unpack(&ENTRY_LAYOUT)?;
            destinations.push(UnreachableDestination {
                destination: Address::new(entry[0] as u8),
                sequence_number: SeqNo::from(entry[1] as u8),
            });
        }

        Ok(RouteError {
            header,
            destinations,
        })
    }
}
