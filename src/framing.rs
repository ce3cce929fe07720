//! The payload framing codec (component A): `marker || length || body`, or the unframed
//! alternative where the receive loop simply delivers whatever bytes the stream returns.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::{BufMut, Bytes, BytesMut};

/// Byte order used to encode the 4-byte length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

/// Whether a session frames its payloads or hands the raw stream through.
#[derive(Debug, Clone)]
pub enum FrameMode {
    /// `marker || length_u32(endian) || body`. `marker` may be empty, degenerating to a pure
    /// length prefix.
    Aware { marker: Bytes, endian: Endian },
    /// No send-side transformation; the receive loop delivers whatever one read returns.
    Unaware,
}

impl FrameMode {
    pub fn aware(marker: impl Into<Bytes>, endian: Endian) -> Self {
        FrameMode::Aware {
            marker: marker.into(),
            endian,
        }
    }

    pub fn is_aware(&self) -> bool {
        matches!(self, FrameMode::Aware { .. })
    }
}

/// Failure modes of the framing codec: an unrecognised marker, or a decoded length that cannot
/// possibly be a valid frame.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("invalid frame marker: expected {expected:?}, got {got:?}")]
    InvalidMarker { expected: Vec<u8>, got: Vec<u8> },

    /// The decoded length exceeds the configured maximum frame size (guards against a
    /// corrupted/adversarial length field causing an unbounded allocation).
    #[error("decoded frame length {length} exceeds maximum {max}")]
    LengthTooLarge { length: u32, max: u32 },
}

/// The outcome of attempting to extract a length from a partially-accumulated header buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderOutcome {
    /// Fewer than `marker.len() + 4` bytes have been accumulated so far.
    NeedMore,
    /// A valid length was extracted.
    Length(u32),
    /// The marker didn't match, or the length is out of bounds.
    Invalid(FramingError),
}

/// Maximum frame body length accepted by [`Framing::extract_length`], guarding against runaway
/// allocation from a corrupted length field. `2^31`, matching the round-trip law in the testable
/// properties (`length ∈ [0, 2^31)`).
pub const MAX_FRAME_LENGTH: u32 = 1 << 31;

/// The framing codec for a single session: a fixed marker and endianness, chosen at
/// construction and shared by the `EnabledTlsProtocols`-style immutability of the rest of the
/// session configuration.
#[derive(Debug, Clone)]
pub struct Framing {
    mode: FrameMode,
}

impl Framing {
    pub fn new(mode: FrameMode) -> Self {
        Framing { mode }
    }

    pub fn mode(&self) -> &FrameMode {
        &self.mode
    }

    /// Size in bytes of the header (`marker.len() + 4`), or `None` in unaware mode.
    pub fn header_len(&self) -> Option<usize> {
        match &self.mode {
            FrameMode::Aware { marker, .. } => Some(marker.len() + 4),
            FrameMode::Unaware => None,
        }
    }

    /// Prepend `marker || length` to `body`, returning the bytes ready to write to the wire.
    /// In unaware mode, returns `body` unchanged.
    pub fn add_header(&self, body: &[u8]) -> Bytes {
        match &self.mode {
            FrameMode::Aware { marker, endian } => {
                let mut buf = BytesMut::with_capacity(marker.len() + 4 + body.len());
                buf.put_slice(marker);
                let mut length_bytes = [0u8; 4];
                match endian {
                    Endian::Little => LittleEndian::write_u32(&mut length_bytes, body.len() as u32),
                    Endian::Big => BigEndian::write_u32(&mut length_bytes, body.len() as u32),
                }
                buf.put_slice(&length_bytes);
                buf.put_slice(body);
                buf.freeze()
            }
            FrameMode::Unaware => Bytes::copy_from_slice(body),
        }
    }

    /// Validate the marker (if any) and extract the length from a header buffer that has
    /// accumulated `header.len()` bytes so far, out of the `header_len()` required.
    pub fn extract_length(&self, header: &[u8]) -> HeaderOutcome {
        let (marker, endian) = match &self.mode {
            FrameMode::Aware { marker, endian } => (marker, *endian),
            FrameMode::Unaware => {
                // Unframed sessions never call extract_length; treat as a marker-less, 4-byte
                // header for callers that do so by mistake.
                return HeaderOutcome::NeedMore;
            }
        };
        let needed = marker.len() + 4;
        if header.len() < needed {
            return HeaderOutcome::NeedMore;
        }
        let (got_marker, length_bytes) = header.split_at(marker.len());
        if got_marker != marker.as_ref() {
            return HeaderOutcome::Invalid(FramingError::InvalidMarker {
                expected: marker.to_vec(),
                got: got_marker.to_vec(),
            });
        }
        let length = match endian {
            Endian::Little => LittleEndian::read_u32(length_bytes),
            Endian::Big => BigEndian::read_u32(length_bytes),
        };
        if length >= MAX_FRAME_LENGTH {
            return HeaderOutcome::Invalid(FramingError::LengthTooLarge {
                length,
                max: MAX_FRAME_LENGTH,
            });
        }
        HeaderOutcome::Length(length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn framing_with_marker(marker: &[u8], endian: Endian) -> Framing {
        Framing::new(FrameMode::aware(Bytes::copy_from_slice(marker), endian))
    }

    #[test]
    fn add_header_then_extract_length_round_trips() {
        for &endian in &[Endian::Little, Endian::Big] {
            let framing = framing_with_marker(&[0xAA, 0x55], endian);
            for length in [0u32, 1, 3, 255, 65536, (MAX_FRAME_LENGTH - 1)] {
                let body = vec![0u8; length as usize];
                let framed = framing.add_header(&body);
                let header_len = framing.header_len().unwrap();
                let outcome = framing.extract_length(&framed[..header_len]);
                assert_eq!(outcome, HeaderOutcome::Length(length));
            }
        }
    }

    #[test]
    fn empty_marker_is_a_pure_length_prefix() {
        let framing = framing_with_marker(&[], Endian::Little);
        let framed = framing.add_header(&[1, 2, 3]);
        assert_eq!(framed.len(), 4 + 3);
        assert_eq!(
            framing.extract_length(&framed[..4]),
            HeaderOutcome::Length(3)
        );
    }

    #[test]
    fn empty_frame_is_legal() {
        let framing = framing_with_marker(&[0xAA, 0x55], Endian::Little);
        let framed = framing.add_header(&[]);
        assert_eq!(framed.len(), framing.header_len().unwrap());
        assert_eq!(framing.extract_length(&framed), HeaderOutcome::Length(0));
    }

    #[test]
    fn partial_header_needs_more() {
        let framing = framing_with_marker(&[0xAA, 0x55], Endian::Little);
        let framed = framing.add_header(&[1, 2, 3]);
        assert_eq!(framing.extract_length(&framed[..3]), HeaderOutcome::NeedMore);
    }

    #[test]
    fn wrong_marker_is_invalid() {
        let framing = framing_with_marker(&[0xAA, 0x55], Endian::Little);
        let mut framed = framing.add_header(&[1, 2, 3]).to_vec();
        framed[0] = 0x00;
        match framing.extract_length(&framed[..framing.header_len().unwrap()]) {
            HeaderOutcome::Invalid(FramingError::InvalidMarker { .. }) => {}
            other => panic!("expected InvalidMarker, got {:?}", other),
        }
    }

    #[test]
    fn overlong_length_is_invalid() {
        let framing = framing_with_marker(&[], Endian::Little);
        let mut header = [0u8; 4];
        LittleEndian::write_u32(&mut header, MAX_FRAME_LENGTH);
        match framing.extract_length(&header) {
            HeaderOutcome::Invalid(FramingError::LengthTooLarge { .. }) => {}
            other => panic!("expected LengthTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn unaware_mode_has_no_header() {
        let framing = Framing::new(FrameMode::Unaware);
        assert!(framing.header_len().is_none());
        assert_eq!(framing.add_header(&[1, 2, 3]).as_ref(), &[1, 2, 3]);
    }
}
