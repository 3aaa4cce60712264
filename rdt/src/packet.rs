//! Wire-format definitions for frames and acknowledgments.
//!
//! Every unit exchanged over the channel is a fixed-capacity frame.  This
//! module is responsible for:
//! - Defining the on-wire binary layout (header fields, payload, padding).
//! - Computing and verifying the per-frame checksum.
//! - Serialising a [`Packet`] into exactly `frame_capacity` bytes.
//! - Deserialising raw bytes back into a [`Packet`], returning errors for
//!   malformed or corrupted input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0       1               5               9
//! +-------+---------------+---------------+------------------------+
//! | size  |   sequence    |   checksum    | payload ... | padding  |
//! +-------+---------------+---------------+------------------------+
//! ```
//!
//! - `size` is the payload length (`1..=max_payload`).  `0` marks an
//!   acknowledgment, whose `sequence` field names the acknowledged frame.
//! - `checksum` is CRC-32 over `size ‖ sequence ‖ payload`.
//! - Unused bytes up to the frame capacity are zero.

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 9;

/// The `size` field is one byte wide.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Largest frame capacity the one-byte size field can describe.
pub const MAX_FRAME_CAPACITY: usize = HEADER_LEN + MAX_PAYLOAD_LEN;

const OFF_SIZE: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_CHECKSUM: usize = 5;

/// Payload size that marks an acknowledgment.
const ACK_MARKER: u8 = 0;

/// CRC-32 over `size ‖ sequence ‖ payload`.
///
/// Sender and receiver must agree on both the digest and the input order, or
/// no frame would ever validate.
pub fn checksum(size: u8, seq: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[size]);
    hasher.update(&seq.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One sequence-numbered slice of an application message.
///
/// Immutable once built; the checksum is computed at construction and always
/// matches the other fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u32,
    checksum: u32,
    payload: Vec<u8>,
}

impl Frame {
    /// Build a data frame.
    ///
    /// # Panics
    ///
    /// Panics when `payload` is empty or longer than [`MAX_PAYLOAD_LEN`];
    /// the segmenter never produces such payloads.
    pub fn new(seq: u32, payload: Vec<u8>) -> Self {
        assert!(
            !payload.is_empty() && payload.len() <= MAX_PAYLOAD_LEN,
            "frame payload length {} outside 1..={MAX_PAYLOAD_LEN}",
            payload.len()
        );
        let checksum = checksum(payload.len() as u8, seq, &payload);
        Self {
            seq,
            checksum,
            payload,
        }
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Give up the frame, keeping only its payload.
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

// ---------------------------------------------------------------------------
// Packet
// ---------------------------------------------------------------------------

/// A decoded wire unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A payload-carrying frame.
    Data(Frame),
    /// Acknowledgment of exactly one frame, by sequence number.
    Ack(u32),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Encoder/decoder bound to one frame capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    frame_capacity: usize,
}

impl Codec {
    /// Create a codec for frames of `frame_capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics when the capacity cannot hold a header plus one payload byte,
    /// or exceeds [`MAX_FRAME_CAPACITY`].  [`crate::config::Config::validate`]
    /// rejects such values first.
    pub fn new(frame_capacity: usize) -> Self {
        assert!(
            frame_capacity > HEADER_LEN && frame_capacity <= MAX_FRAME_CAPACITY,
            "frame capacity {frame_capacity} outside {}..={MAX_FRAME_CAPACITY}",
            HEADER_LEN + 1
        );
        Self { frame_capacity }
    }

    pub fn frame_capacity(&self) -> usize {
        self.frame_capacity
    }

    /// Largest payload a frame can carry (`capacity - 9`).
    pub fn max_payload(&self) -> usize {
        self.frame_capacity - HEADER_LEN
    }

    /// Serialise `packet` into a zero-padded buffer of `frame_capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if a data frame carries more than [`Codec::max_payload`] bytes.
    pub fn encode(&self, packet: &Packet) -> Vec<u8> {
        match packet {
            Packet::Data(frame) => self.encode_frame(frame),
            Packet::Ack(seq) => self.encode_ack(*seq),
        }
    }

    /// Serialise an acknowledgment of `seq`.
    pub fn encode_ack(&self, seq: u32) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_capacity];
        buf[OFF_SIZE] = ACK_MARKER;
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&seq.to_be_bytes());
        let csum = checksum(ACK_MARKER, seq, &[]);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&csum.to_be_bytes());
        buf
    }

    /// Serialise a data frame without wrapping it in a [`Packet`].
    pub fn encode_frame(&self, frame: &Frame) -> Vec<u8> {
        let mut buf = vec![0u8; self.frame_capacity];
        let size = frame.payload_size();
        assert!(
            size <= self.max_payload(),
            "payload of {size} bytes does not fit a {}-byte frame",
            self.frame_capacity
        );
        buf[OFF_SIZE] = size as u8;
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&frame.seq().to_be_bytes());
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 4].copy_from_slice(&frame.checksum().to_be_bytes());
        buf[HEADER_LEN..HEADER_LEN + size].copy_from_slice(frame.payload());
        buf
    }

    /// Parse a [`Packet`] from raw bytes.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`],
    /// - the size field exceeds [`Codec::max_payload`],
    /// - `buf` holds fewer payload bytes than the size field claims, or
    /// - the checksum does not verify.
    pub fn decode(&self, buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort(buf.len()));
        }

        let size = buf[OFF_SIZE];
        let seq = read_u32(buf, OFF_SEQ);
        let stored = read_u32(buf, OFF_CHECKSUM);

        if size as usize > self.max_payload() {
            return Err(PacketError::InvalidPayloadSize(size));
        }
        let end = HEADER_LEN + size as usize;
        if buf.len() < end {
            return Err(PacketError::Truncated {
                needed: end,
                got: buf.len(),
            });
        }

        let payload = &buf[HEADER_LEN..end];
        let computed = checksum(size, seq, payload);
        if computed != stored {
            return Err(PacketError::ChecksumMismatch {
                seq,
                stored,
                computed,
            });
        }

        if size == ACK_MARKER {
            return Ok(Packet::Ack(seq));
        }
        Ok(Packet::Data(Frame {
            seq,
            checksum: stored,
            payload: payload.to_vec(),
        }))
    }
}

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// Errors that can arise when parsing a raw frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("buffer of {0} bytes is too short to contain a header")]
    BufferTooShort(usize),
    /// Size field larger than the frame can carry.
    #[error("payload size {0} exceeds the frame capacity")]
    InvalidPayloadSize(u8),
    /// Size field claims more bytes than the buffer holds.
    #[error("frame needs {needed} bytes but only {got} are present")]
    Truncated { needed: usize, got: usize },
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch on seq {seq}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { seq: u32, stored: u32, computed: u32 },
}

impl PacketError {
    /// `true` for structurally invalid frames, `false` for corrupted ones.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, PacketError::ChecksumMismatch { .. })
    }
}
