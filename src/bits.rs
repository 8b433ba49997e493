//! Bit level packing of fixed width fields.
//!
//! Fields are written most significant bit first, in declaration order, without any alignment
//! between them. A value wider than its field is truncated to the low order bits, a narrower value
//! is left padded with zeroes. This module has no knowledge of packets or of the text encoding
//! which is applied on top of the packed bytes.

use bytes::{BufMut, BytesMut};

/// A single fixed width field in a wire layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    /// Name of the field, used to report truncated input.
    pub name: &'static str,
    /// Width of the field in bits, at most 64.
    pub width: u8,
}

impl Field {
    /// Create a new `Field`.
    pub const fn new(name: &'static str, width: u8) -> Self {
        Self { name, width }
    }
}

/// Total width in bits of a layout.
pub const fn layout_width(layout: &[Field]) -> usize {
    let mut width = 0;
    let mut i = 0;
    while i < layout.len() {
        width += layout[i].width as usize;
        i += 1;
    }
    width
}

/// Input ended before the named field could be read completely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortRead {
    pub field: &'static str,
}

/// Writes fields into a growing byte buffer.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: BytesMut,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the lowest `width` bits of `value`.
    pub fn write(&mut self, value: u64, width: u8) {
        debug_assert!(width <= 64);
        for shift in (0..width).rev() {
            let offset = self.bit_len % 8;
            if offset == 0 {
                self.buf.put_u8(0);
            }
            if (value >> shift) & 1 == 1 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 0x80 >> offset;
            }
            self.bit_len += 1;
        }
    }

    /// Append all `values` according to `layout`. Both must have the same length.
    pub fn pack(&mut self, layout: &[Field], values: &[u64]) {
        debug_assert_eq!(layout.len(), values.len());
        for (field, value) in layout.iter().zip(values) {
            self.write(*value, field.width);
        }
    }

    /// Consume the writer, returning the written bytes. A trailing partial byte is padded with
    /// zero bits.
    pub fn finish(self) -> BytesMut {
        self.buf
    }
}

/// Reads fields from a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Current position, in bits from the start of the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Amount of bits left to read.
    pub fn remaining(&self) -> usize {
        self.src.len() * 8 - self.pos
    }

    /// Read a `width` bit value, or [`None`] if the input is too short.
    pub fn read(&mut self, width: u8) -> Option<u64> {
        let value = peek(self.src, self.pos, width)?;
        self.pos += width as usize;
        Some(value)
    }

    /// Read every field of `layout`, in order.
    pub fn unpack(&mut self, layout: &[Field]) -> Result<Vec<u64>, ShortRead> {
        layout
            .iter()
            .map(|field| self.read(field.width).ok_or(ShortRead { field: field.name }))
            .collect()
    }
}

/// Read a `width` bit value starting `offset` bits into `src`, without any cursor.
pub fn peek(src: &[u8], offset: usize, width: u8) -> Option<u64> {
    debug_assert!(width <= 64);
    if offset + width as usize > src.len() * 8 {
        return None;
    }

    let mut value = 0u64;
    for bit in offset..offset + width as usize {
        let set = src[bit / 8] & (0x80 >> (bit % 8)) != 0;
        value = (value << 1) | set as u64;
    }

    Some(value)
}

#[cfg(test)]
mod tests {
    use super::{layout_width, peek, BitReader, BitWriter, Field, ShortRead};

    const LAYOUT: [Field; 3] = [
        Field::new("kind", 4),
        Field::new("flags", 4),
        Field::new("address", 8),
    ];

    #[test]
    fn packs_msb_first() {
        let mut writer = BitWriter::new();
        writer.pack(&LAYOUT, &[0x3, 0xA, 0x42]);
        let buf = writer.finish();
        assert_eq!(buf.len() * 8, layout_width(&LAYOUT));
        assert_eq!(&buf[..], &[0x3A, 0x42]);
    }

    #[test]
    fn truncates_wide_values() {
        let mut writer = BitWriter::new();
        writer.write(0x1F, 4);
        writer.write(0x1FF, 8);
        assert_eq!(&writer.finish()[..], &[0xFF, 0xF0]);
    }

    #[test]
    fn pads_partial_trailing_byte() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        assert_eq!(&writer.finish()[..], &[0b1010_0000]);
    }

    #[test]
    fn unaligned_fields() {
        let mut writer = BitWriter::new();
        writer.write(1, 1);
        writer.write(0xABC, 12);
        writer.write(0, 3);
        let buf = writer.finish();

        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.read(1), Some(1));
        assert_eq!(reader.read(12), Some(0xABC));
        assert_eq!(reader.read(3), Some(0));
        assert_eq!(reader.remaining(), 0);
        assert_eq!(reader.read(1), None);
    }

    #[test]
    fn unpack_reports_missing_field() {
        let buf = [0x3A];
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.unpack(&LAYOUT), Err(ShortRead { field: "address" }));

        let buf = [0x3A, 0x42];
        let mut reader = BitReader::new(&buf);
        assert_eq!(reader.unpack(&LAYOUT), Ok(vec![0x3, 0xA, 0x42]));
        assert_eq!(reader.position(), 16);
    }

    #[test]
    fn peek_at_offset() {
        let buf = [0x12, 0x34, 0x56];
        assert_eq!(peek(&buf, 8, 8), Some(0x34));
        assert_eq!(peek(&buf, 4, 12), Some(0x234));
        assert_eq!(peek(&buf, 20, 8), None);
    }
}
