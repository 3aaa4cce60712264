//! Splits an application message into sequence-numbered frames.
//!
//! A message of `N` bytes becomes `ceil(N / max_payload)` frames; every frame
//! but the last is full and the last takes the remainder.  The segmenter is
//! stateless: the caller owns the sequence counter and advances it by the
//! number of frames returned.

use thiserror::Error;

use crate::packet::Frame;

/// Errors that can arise while segmenting a message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SegmentError {
    /// The 32-bit sequence space cannot number every new frame.
    #[error("sequence space exhausted: {frames} frames starting at {first_seq}")]
    SequenceExhausted { first_seq: u32, frames: usize },
    /// The frame list could not be allocated.
    #[error("out of memory reserving {0} frames")]
    ResourceExhausted(usize),
}

/// Number of frames `message_len` bytes occupy.
pub fn frame_count(message_len: usize, max_payload: usize) -> usize {
    message_len.div_ceil(max_payload)
}

/// Cut `message` into frames numbered from `first_seq`.
///
/// Sequence numbers are never reused, so the last frame's number plus one
/// must still be representable; otherwise [`SegmentError::SequenceExhausted`]
/// is returned and nothing is produced.
///
/// # Panics
///
/// Panics if `max_payload` is zero.
pub fn segment(
    message: &[u8],
    first_seq: u32,
    max_payload: usize,
) -> Result<Vec<Frame>, SegmentError> {
    assert!(max_payload > 0, "max_payload must be at least 1");
    let frames = frame_count(message.len(), max_payload);

    let exhausted = SegmentError::SequenceExhausted { first_seq, frames };
    let count = u32::try_from(frames).map_err(|_| exhausted.clone())?;
    first_seq.checked_add(count).ok_or(exhausted)?;

    let mut out = Vec::new();
    out.try_reserve_exact(frames)
        .map_err(|_| SegmentError::ResourceExhausted(frames))?;

    let mut seq = first_seq;
    for chunk in message.chunks(max_payload) {
        out.push(Frame::new(seq, chunk.to_vec()));
        seq += 1;
    }
    Ok(out)
}
