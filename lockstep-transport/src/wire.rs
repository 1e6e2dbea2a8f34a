//! Wire format for frames.
//!
//! Frame format: `[length:4][checksum:4][payload:N]`
//!
//! - **length**: total frame size including header (little-endian u32)
//! - **checksum**: CRC32C of the payload
//! - **payload**: one encoded envelope or handshake message

/// Header size: 4 (length) + 4 (checksum).
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Wire format error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough data to parse the frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Minimum bytes required to parse.
        needed: usize,
        /// Actual bytes available.
        have: usize,
    },

    /// Payload does not match its checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried in the header.
        expected: u32,
        /// Checksum computed over the received payload.
        actual: u32,
    },

    /// Payload exceeds [`MAX_PAYLOAD_SIZE`].
    #[error("frame too large: {size} bytes (max {MAX_PAYLOAD_SIZE})")]
    FrameTooLarge {
        /// Payload size in bytes.
        size: usize,
    },

    /// Length field is smaller than the header or larger than allowed.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// The rejected length value.
        length: u32,
    },
}

/// Fixed-size frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame size including header.
    pub length: u32,
    /// CRC32C of the payload.
    pub checksum: u32,
}

impl FrameHeader {
    /// Write the header into the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn serialize_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// Read a header, validating the length field.
    pub fn deserialize(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < HEADER_SIZE {
            return Err(WireError::InsufficientData {
                needed: HEADER_SIZE,
                have: buf.len(),
            });
        }

        let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let checksum = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if (length as usize) < HEADER_SIZE || (length as usize) > HEADER_SIZE + MAX_PAYLOAD_SIZE
        {
            return Err(WireError::InvalidLength { length });
        }

        Ok(Self { length, checksum })
    }
}

/// Frame `payload` for the wire.
///
/// # Examples
///
/// ```
/// use lockstep_transport::wire::{serialize_frame, try_deserialize_frame};
///
/// let frame = serialize_frame(b"round 0").expect("serialize");
/// let (payload, consumed) = try_deserialize_frame(&frame)
///     .expect("valid frame")
///     .expect("complete frame");
/// assert_eq!(payload, b"round 0");
/// assert_eq!(consumed, frame.len());
/// ```
pub fn serialize_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
        });
    }

    let total_length = HEADER_SIZE + payload.len();
    let mut data = vec![0u8; total_length];

    let header = FrameHeader {
        length: total_length as u32,
        checksum: crc32c::crc32c(payload),
    };
    header.serialize_into(&mut data[..HEADER_SIZE]);
    data[HEADER_SIZE..].copy_from_slice(payload);

    Ok(data)
}

/// Parse one frame from the front of a buffer that may hold a partial frame.
///
/// Returns `Ok(None)` when more bytes are needed, and
/// `Ok(Some((payload, consumed)))` once a whole frame is present.
pub fn try_deserialize_frame(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let header = FrameHeader::deserialize(data)?;
    let frame_len = header.length as usize;
    if data.len() < frame_len {
        return Ok(None);
    }

    let payload = &data[HEADER_SIZE..frame_len];
    let actual = crc32c::crc32c(payload);
    if actual != header.checksum {
        return Err(WireError::ChecksumMismatch {
            expected: header.checksum,
            actual,
        });
    }

    Ok(Some((payload.to_vec(), frame_len)))
}
