use super::Header;

/// Hop by hop acknowledgement. `header.source` is the node which received the acknowledged
/// packet, `header.next_hop` the node which sent it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub header: Header,
}
