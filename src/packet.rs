//! Routing and data packets exchanged over the radio.
//!
//! Packets are packed with the [bit packer](crate::bits) and then armored as standard base64 text,
//! since the radio link only transports printable lines. The [`Message`] packet is special: only
//! its fixed size header is armored, which happens to be exactly 8 characters, after which the
//! payload text is appended verbatim.

use core::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    address::Address,
    bits::{self, BitReader, BitWriter, Field, ShortRead},
};

pub use self::{
    ack::Ack,
    message::Message,
    route_error::{RouteError, UnreachableDestination},
    route_reply::RouteReply,
    route_request::RouteRequest,
};

mod ack;
mod message;
mod route_error;
mod route_reply;
mod route_request;

/// Layout of the header shared by all packets.
const HEADER_LAYOUT: [Field; 4] = [
    Field::new("type", 4),
    Field::new("flags", 4),
    Field::new("next_hop", 8),
    Field::new("source", 8),
];

/// Layout of the second header row shared by route requests, route replies and messages.
const ROUTE_HEADER_LAYOUT: [Field; 3] = [
    Field::new("destination", 8),
    Field::new("hop_count", 8),
    Field::new("sequence_number", 8),
];

/// Amount of base64 characters which encode the [`HEADER_LAYOUT`].
const ARMORED_HEADER_LEN: usize = bits::layout_width(&HEADER_LAYOUT) / 6;

/// Amount of base64 characters in front of the payload of a [`Message`].
pub const ARMORED_MESSAGE_HEADER_LEN: usize =
    (bits::layout_width(&HEADER_LAYOUT) + bits::layout_width(&ROUTE_HEADER_LAYOUT)) / 6;

/// The type tag of a packet, stored in the first 4 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    RouteRequest = 0,
    RouteReply = 1,
    RouteError = 2,
    Message = 3,
    Ack = 4,
}

impl PacketType {
    /// Convert a wire type tag to a `PacketType`, if it is known.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(PacketType::RouteRequest),
            1 => Some(PacketType::RouteReply),
            2 => Some(PacketType::RouteError),
            3 => Some(PacketType::Message),
            4 => Some(PacketType::Ack),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PacketType::RouteRequest => "RREQ",
            PacketType::RouteReply => "RREP",
            PacketType::RouteError => "RERR",
            PacketType::Message => "MSG",
            PacketType::Ack => "ACK",
        })
    }
}

/// Header fields present on every packet. The type tag is implied by the [`Packet`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Reserved, carried but not interpreted.
    pub flags: u8,
    /// The node which should process this packet, or [`Address::BROADCAST`].
    pub next_hop: Address,
    /// The node which transmitted this packet on the current hop.
    pub source: Address,
}

impl Header {
    pub fn new(next_hop: Address, source: Address) -> Self {
        Self {
            flags: 0,
            next_hop,
            source,
        }
    }

    fn write_bits(&self, packet_type: PacketType, dst: &mut BitWriter) {
        dst.pack(
            &HEADER_LAYOUT,
            &[
                packet_type as u64,
                self.flags as u64,
                u8::from(self.next_hop) as u64,
                u8::from(self.source) as u64,
            ],
        );
    }

    /// Read a header from the start of `src`, returning the type tag as is.
    fn from_bits(src: &mut BitReader<'_>) -> Result<(u8, Self), InvalidPacket> {
        let values = src.unpack(&HEADER_LAYOUT)?;
        Ok((
            values[0] as u8,
            Header {
                flags: values[1] as u8,
                next_hop: Address::new(values[2] as u8),
                source: Address::new(values[3] as u8),
            },
        ))
    }
}

/// A packet of one of the 5 supported kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    RouteError(RouteError),
    Message(Message),
    Ack(Ack),
}

impl Packet {
    /// The type of this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::RouteRequest(_) => PacketType::RouteRequest,
            Packet::RouteReply(_) => PacketType::RouteReply,
            Packet::RouteError(_) => PacketType::RouteError,
            Packet::Message(_) => PacketType::Message,
            Packet::Ack(_) => PacketType::Ack,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Packet::RouteRequest(p) => &p.header,
            Packet::RouteReply(p) => &p.header,
            Packet::RouteError(p) => &p.header,
            Packet::Message(p) => &p.header,
            Packet::Ack(p) => &p.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut Header {
        match self {
            Packet::RouteRequest(p) => &mut p.header,
            Packet::RouteReply(p) => &mut p.header,
            Packet::RouteError(p) => &mut p.header,
            Packet::Message(p) => &mut p.header,
            Packet::Ack(p) => &mut p.header,
        }
    }

    /// Pack this packet into bytes. For a [`Message`], only the header is packed.
    pub fn to_bytes(&self) -> bytes::BytesMut {
        let mut dst = BitWriter::new();
        self.header().write_bits(self.packet_type(), &mut dst);
        match self {
            Packet::RouteRequest(p) => p.write_bits(&mut dst),
            Packet::RouteReply(p) => p.write_bits(&mut dst),
            Packet::RouteError(p) => p.write_bits(&mut dst),
            Packet::Message(p) => p.write_bits(&mut dst),
            Packet::Ack(_) => {}
        }
        dst.finish()
    }

    /// Encode this packet as a single line of text, ready to be handed to a transport.
    pub fn encode(&self) -> String {
        let mut line = STANDARD.encode(self.to_bytes());
        if let Packet::Message(msg) = self {
            line.push_str(&msg.payload);
        }
        line
    }

    /// Decode a packet from a line of text as produced by [`Packet::encode`].
    pub fn decode(line: &str) -> Result<Self, InvalidPacket> {
        let armored_header = line
            .get(..ARMORED_HEADER_LEN)
            .ok_or(InvalidPacket::Truncated { field: "type" })?;
        let tag = STANDARD
            .decode(armored_header)
            .map_err(|_| InvalidPacket::Encoding)?
            .first()
            .map(|b| b >> 4)
            .ok_or(InvalidPacket::Encoding)?;
        let packet_type = PacketType::from_tag(tag).ok_or(InvalidPacket::UnknownType(tag))?;

        // Messages carry plain text after the armored header, so only that part is decoded.
        let (armored, payload) = if packet_type == PacketType::Message {
            if line.len() < ARMORED_MESSAGE_HEADER_LEN {
                return Err(InvalidPacket::Truncated {
                    field: ROUTE_HEADER_LAYOUT[0].name,
                });
            }
            if !line.is_char_boundary(ARMORED_MESSAGE_HEADER_LEN) {
                return Err(InvalidPacket::Encoding);
            }
            line.split_at(ARMORED_MESSAGE_HEADER_LEN)
        } else {
            (line, "")
        };

        let raw = STANDARD
            .decode(armored)
            .map_err(|_| InvalidPacket::Encoding)?;
        let mut src = BitReader::new(&raw);
        let (_, header) = Header::from_bits(&mut src)?;

        Ok(match packet_type {
            PacketType::RouteRequest => {
                Packet::RouteRequest(RouteRequest::from_bits(header, &mut src)?)
            }
            PacketType::RouteReply => Packet::RouteReply(RouteReply::from_bits(header, &mut src)?),
            PacketType::RouteError => Packet::RouteError(RouteError::from_bits(header, &mut src)?),
            PacketType::Message => {
                Packet::Message(Message::from_bits(header, &mut src, payload.to_string())?)
            }
            PacketType::Ack => Packet::Ack(Ack { header }),
        })
    }
}

impl From<RouteRequest> for Packet {
    fn from(value: RouteRequest) -> Self {
        Packet::RouteRequest(value)
    }
}

impl From<RouteReply> for Packet {
    fn from(value: RouteReply) -> Self {
        Packet::RouteReply(value)
    }
}

impl From<RouteError> for Packet {
    fn from(value: RouteError) -> Self {
        Packet::RouteError(value)
    }
}

impl From<Message> for Packet {
    fn from(value: Message) -> Self {
        Packet::Message(value)
    }
}

impl From<Ack> for Packet {
    fn from(value: Ack) -> Self {
        Packet::Ack(value)
    }
}

/// The values of the second header row, as read from the wire.
struct RouteHeader {
    destination: Address,
    hop_count: u8,
    sequence_number: u8,
}

impl RouteHeader {
    fn write_bits(destination: Address, hop_count: u8, sequence_number: u8, dst: &mut BitWriter) {
        dst.pack(
            &ROUTE_HEADER_LAYOUT,
            &[
                u8::from(destination) as u64,
                hop_count as u64,
                sequence_number as u64,
            ],
        );
    }

    fn from_bits(src: &mut BitReader<'_>) -> Result<Self, InvalidPacket> {
        let values = src.unpack(&ROUTE_HEADER_LAYOUT)?;
        Ok(RouteHeader {
            destination: Address::new(values[0] as u8),
            hop_count: values[1] as u8,
            sequence_number: values[2] as u8,
        })
    }
}

/// Error returned when a line of text can't be decoded into a [`Packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacket {
    /// The armored part of the line is not valid base64.
    Encoding,
    /// The type tag does not match any known packet type.
    UnknownType(u8),
    /// The data ended before the named field.
    Truncated { field: &'static str },
}

impl fmt::Display for InvalidPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidPacket::Encoding => f.write_str("packet is not valid base64"),
            InvalidPacket::UnknownType(tag) => write!(f, "unknown packet type {tag}"),
            InvalidPacket::Truncated { field } => {
                write!(f, "packet data ends before field {field}")
            }
        }
    }
}

impl std::error::Error for InvalidPacket {}

impl From<ShortRead> for InvalidPacket {
    fn from(value: ShortRead) -> Self {
        InvalidPacket::Truncated { field: value.field }
    }
}
