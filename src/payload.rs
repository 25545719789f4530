//! Bounds-checked decoding of provider payloads
//!
//! Every payload is treated as a borrowed byte slice that dies when the
//! delivery callback returns. Decoders copy out the scalar fields they need
//! and take owned copies of embedded strings; nothing here holds a reference
//! into the buffer beyond the lifetime of the borrowed slice.
//!
//! Layouts are little-endian with pointer-sized fields whose width depends on
//! the producer (32- or 64-bit).

/// Width of pointer-sized payload fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerWidth {
    Four,
    #[default]
    Eight,
}

impl PointerWidth {
    /// Size of one pointer in bytes
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }

    /// Read one pointer-sized value, widened to u64
    fn read(self, buf: &[u8], offset: usize) -> Option<u64> {
        match self {
            PointerWidth::Four => read_u32(buf, offset).map(u64::from),
            PointerWidth::Eight => read_u64(buf, offset),
        }
    }
}

impl TryFrom<u8> for PointerWidth {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(PointerWidth::Four),
            8 => Ok(PointerWidth::Eight),
            other => Err(format!("unsupported pointer size {}", other)),
        }
    }
}

impl From<PointerWidth> for u8 {
    fn from(width: PointerWidth) -> Self {
        width.bytes() as u8
    }
}

fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

fn read_u64(buf: &[u8], offset: usize) -> Option<u64> {
    let bytes = buf.get(offset..offset.checked_add(8)?)?;
    Some(u64::from_le_bytes(bytes.try_into().ok()?))
}

/// Secure-mode transition payload: `{ operation: u16, call_number: u16 }`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecureCallPayload {
    pub operation: u16,
    pub call_number: u16,
}

impl SecureCallPayload {
    /// Exact payload size; anything else is a foreign record
    pub const SIZE: usize = 4;

    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() != Self::SIZE {
            return None;
        }

        Some(Self {
            operation: read_u16(payload, 0)?,
            call_number: read_u16(payload, 2)?,
        })
    }
}

/// Stack-walk payload: fixed header followed by N pointer-sized return addresses
#[derive(Debug, Clone, Copy)]
pub struct StackWalkPayload<'a> {
    /// Timestamp of the event this stack belongs to (the join key)
    pub event_timestamp: i64,
    pub process_id: u32,
    pub thread_id: u32,
    frames: &'a [u8],
    width: PointerWidth,
}

impl<'a> StackWalkPayload<'a> {
    /// `{ timestamp: i64, process_id: u32, thread_id: u32 }`
    pub const HEADER_SIZE: usize = 16;

    /// Decode the fixed header; returns `None` if the payload cannot hold it
    pub fn parse(payload: &'a [u8], width: PointerWidth) -> Option<Self> {
        if payload.len() < Self::HEADER_SIZE {
            return None;
        }

        Some(Self {
            event_timestamp: read_u64(payload, 0)? as i64,
            process_id: read_u32(payload, 8)?,
            thread_id: read_u32(payload, 12)?,
            frames: &payload[Self::HEADER_SIZE..],
            width,
        })
    }

    /// Number of whole frames in the tail; trailing partial bytes are ignored
    pub fn frame_count(&self) -> usize {
        self.frames.len() / self.width.bytes()
    }

    /// Frame addresses in delivery order (innermost call site first)
    pub fn addresses(&self) -> impl Iterator<Item = u64> + 'a {
        let width = self.width;
        self.frames
            .chunks_exact(width.bytes())
            .filter_map(move |chunk| width.read(chunk, 0))
    }
}

/// Module load/unload/rundown payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLoadPayload {
    pub image_base: u64,
    pub image_size: u64,
    pub process_id: u32,
    pub checksum: u32,
    pub time_date_stamp: u32,
    pub default_base: u64,
    /// Owned copy of the UTF-16 name embedded in the payload tail
    pub file_name: String,
}

impl ImageLoadPayload {
    /// Offset of the embedded file name for a given pointer width
    pub fn name_offset(width: PointerWidth) -> usize {
        // base, size, pid, checksum, timestamp, reserved0, default base, reserved1..4
        3 * width.bytes() + 32
    }

    pub fn parse(payload: &[u8], width: PointerWidth) -> Option<Self> {
        let w = width.bytes();
        let name_offset = Self::name_offset(width);
        if payload.len() < name_offset {
            return None;
        }

        Some(Self {
            image_base: width.read(payload, 0)?,
            image_size: width.read(payload, w)?,
            process_id: read_u32(payload, 2 * w)?,
            checksum: read_u32(payload, 2 * w + 4)?,
            time_date_stamp: read_u32(payload, 2 * w + 8)?,
            default_base: width.read(payload, 2 * w + 16)?,
            file_name: decode_wide_string(&payload[name_offset..]),
        })
    }
}

/// Decode a NUL-terminated UTF-16LE string, stopping at the buffer end if the
/// terminator is missing
pub fn decode_wide_string(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .take_while(|&unit| unit != 0)
        .collect();
    String::from_utf16_lossy(&units)
}
