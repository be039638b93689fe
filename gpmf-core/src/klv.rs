//! KLV record decoding for GPMF byte streams.
//!
//! Every record starts with an 8-byte header:
//!
//! ```text
//! [0..4]  tag           four-character code
//! [4]     type          value type code, 0 for nested containers
//! [5]     element size  bytes per tuple
//! [6..8]  repeat        number of tuples, big-endian
//! ```
//!
//! followed by `element size * repeat` payload bytes padded to a multiple of
//! four. Container payloads are themselves sequences of records.
//!
//! [`decode`] never consumes part of a record: when the buffer ends inside a
//! record, everything from that record's header onward is returned as
//! leftover so the caller can prepend it to the next chunk.

use crate::parser::{self, DecodedValue, InterpretError, TypeCode};
use crate::types::FourCC;
use byteorder::{BigEndian, ByteOrder};
use std::fmt;
use thiserror::Error;

/// Size of a record header in bytes.
pub const HEADER_SIZE: usize = 8;

/// Why a record header was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// The tag contains bytes that are not letters, digits or spaces
    InvalidTag,
    /// The type byte is neither the container marker nor printable ASCII
    UnrecognizedType(u8),
    /// A zero element size with a non-zero repeat count
    ZeroElementSize,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTag => write!(f, "invalid tag"),
            Self::UnrecognizedType(code) => write!(f, "unrecognized type code 0x{:02x}", code),
            Self::ZeroElementSize => write!(f, "zero element size with non-zero repeat"),
        }
    }
}

/// Errors reported while walking a KLV stream.
///
/// All of them are collected in [`Decoded::malformed`]. Only
/// `Desynchronized` ends decoding of the buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KlvError {
    #[error("skipped malformed record {tag} at offset {offset}: {reason}")]
    Malformed {
        offset: usize,
        tag: FourCC,
        reason: MalformedReason,
    },

    #[error("malformed record {tag} at offset {offset} ({reason}) runs past the buffer; {discarded} bytes discarded")]
    Desynchronized {
        offset: usize,
        tag: FourCC,
        reason: MalformedReason,
        discarded: usize,
    },

    #[error("container {tag} at offset {offset} ends inside a nested record")]
    TruncatedContainer { offset: usize, tag: FourCC },
}

impl KlvError {
    /// Stream offset of the offending record.
    pub fn offset(&self) -> usize {
        match self {
            Self::Malformed { offset, .. }
            | Self::Desynchronized { offset, .. }
            | Self::TruncatedContainer { offset, .. } => *offset,
        }
    }

    /// Tag of the offending record.
    pub fn tag(&self) -> FourCC {
        match self {
            Self::Malformed { tag, .. }
            | Self::Desynchronized { tag, .. }
            | Self::TruncatedContainer { tag, .. } => *tag,
        }
    }
}

/// A parsed record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub tag: FourCC,
    pub type_code: u8,
    pub element_size: u8,
    pub repeat: u16,
}

impl Header {
    /// Parses a header from the start of `bytes`, or `None` if fewer than
    /// eight bytes are available.
    #[inline]
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            tag: FourCC::new([bytes[0], bytes[1], bytes[2], bytes[3]]),
            type_code: bytes[4],
            element_size: bytes[5],
            repeat: BigEndian::read_u16(&bytes[6..8]),
        })
    }

    /// Encodes the header back to its wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..4].copy_from_slice(self.tag.as_bytes());
        out[4] = self.type_code;
        out[5] = self.element_size;
        BigEndian::write_u16(&mut out[6..8], self.repeat);
        out
    }

    /// Payload length without padding.
    #[inline]
    pub fn data_length(&self) -> usize {
        self.element_size as usize * self.repeat as usize
    }

    /// Payload length rounded up to the next multiple of four.
    #[inline]
    pub fn padded_length(&self) -> usize {
        (self.data_length() + 3) & !3
    }

    /// Returns true for records whose payload is a nested record sequence.
    #[inline]
    pub fn is_container(&self) -> bool {
        self.type_code == 0
    }

    /// Checks the header fields for combinations that cannot occur in a
    /// well-formed stream.
    pub fn validate(&self) -> Result<(), MalformedReason> {
        if !self.tag.is_valid() {
            return Err(MalformedReason::InvalidTag);
        }
        if TypeCode::from_u8(self.type_code).is_none() {
            return Err(MalformedReason::UnrecognizedType(self.type_code));
        }
        if self.element_size == 0 && self.repeat != 0 {
            return Err(MalformedReason::ZeroElementSize);
        }
        Ok(())
    }
}

/// One decoded KLV record borrowing its payload from the input buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord<'a> {
    pub header: Header,
    /// Offset of the header from the start of the decoded buffer
    pub offset: usize,
    /// Payload without alignment padding
    pub payload: &'a [u8],
    /// Nested records when this is a container
    pub children: Vec<RawRecord<'a>>,
}

impl<'a> RawRecord<'a> {
    #[inline]
    pub fn tag(&self) -> FourCC {
        self.header.tag
    }

    #[inline]
    pub fn is_container(&self) -> bool {
        self.header.is_container()
    }

    /// Total bytes this record occupies on the wire.
    #[inline]
    pub fn wire_length(&self) -> usize {
        HEADER_SIZE + self.header.padded_length()
    }

    /// Interprets the payload according to the header's type code.
    pub fn interpret(&self) -> Result<DecodedValue<'a>, InterpretError> {
        parser::interpret(
            self.header.type_code,
            self.header.element_size,
            self.header.repeat,
            self.payload,
        )
    }
}

/// Result of decoding one buffer.
#[derive(Debug, Default)]
pub struct Decoded<'a> {
    /// Complete top-level records in stream order
    pub records: Vec<RawRecord<'a>>,
    /// Unconsumed suffix starting at the first incomplete record
    pub leftover: &'a [u8],
    /// Records that were skipped or could not be decoded
    pub malformed: Vec<KlvError>,
    /// Bytes dropped after a malformed header that could not be skipped
    pub discarded: usize,
}

impl<'a> Decoded<'a> {
    /// Iterates over all records depth-first, containers before their
    /// children.
    pub fn iter(&self) -> Records<'_, 'a> {
        Records::new(&self.records)
    }
}

/// Depth-first iterator over a record tree.
pub struct Records<'r, 'a> {
    stack: Vec<std::slice::Iter<'r, RawRecord<'a>>>,
}

impl<'r, 'a> Records<'r, 'a> {
    pub fn new(records: &'r [RawRecord<'a>]) -> Self {
        Self {
            stack: vec![records.iter()],
        }
    }
}

impl<'r, 'a> Iterator for Records<'r, 'a> {
    type Item = &'r RawRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(top) = self.stack.last_mut() {
            if let Some(record) = top.next() {
                if !record.children.is_empty() {
                    self.stack.push(record.children.iter());
                }
                return Some(record);
            }
            self.stack.pop();
        }
        None
    }
}

/// Outcome of reading the record at one position.
enum Step<'a> {
    Record(RawRecord<'a>, usize),
    Skipped(usize),
    NeedMore,
    Desync(KlvError),
}

fn next_record<'a>(
    buffer: &'a [u8],
    pos: usize,
    base: usize,
    malformed: &mut Vec<KlvError>,
) -> Step<'a> {
    let Some(header) = Header::parse(&buffer[pos..]) else {
        return Step::NeedMore;
    };
    let offset = base + pos;
    let end = pos + HEADER_SIZE + header.padded_length();
    let validity = header.validate();

    if end > buffer.len() {
        return match validity {
            Ok(()) => Step::NeedMore,
            Err(reason) => Step::Desync(KlvError::Desynchronized {
                offset,
                tag: header.tag,
                reason,
                discarded: buffer.len() - pos,
            }),
        };
    }

    if let Err(reason) = validity {
        let err = KlvError::Malformed {
            offset,
            tag: header.tag,
            reason,
        };
        log::warn!("{}", err);
        malformed.push(err);
        return Step::Skipped(end);
    }

    let data_start = pos + HEADER_SIZE;
    let payload = &buffer[data_start..data_start + header.data_length()];
    let children = if header.is_container() {
        decode_nested(payload, base + data_start, header.tag, offset, malformed)
    } else {
        Vec::new()
    };

    Step::Record(
        RawRecord {
            header,
            offset,
            payload,
            children,
        },
        end,
    )
}

/// Decodes a container payload. The container is complete, so running out
/// of bytes here is a defect rather than a reason to wait.
fn decode_nested<'a>(
    payload: &'a [u8],
    base: usize,
    tag: FourCC,
    container_offset: usize,
    malformed: &mut Vec<KlvError>,
) -> Vec<RawRecord<'a>> {
    let mut children = Vec::new();
    let mut pos = 0;

    while pos < payload.len() {
        match next_record(payload, pos, base, malformed) {
            Step::Record(record, next) => {
                children.push(record);
                pos = next;
            }
            Step::Skipped(next) => pos = next,
            Step::NeedMore => {
                let err = KlvError::TruncatedContainer {
                    offset: container_offset,
                    tag,
                };
                log::warn!("{}", err);
                malformed.push(err);
                break;
            }
            Step::Desync(err) => {
                log::warn!("{}", err);
                malformed.push(err);
                break;
            }
        }
    }

    children
}

/// Decodes as many complete records as `buffer` holds.
///
/// Malformed records are skipped with a warning and reported in
/// [`Decoded::malformed`]; decoding resumes at the next record boundary.
pub fn decode(buffer: &[u8]) -> Decoded<'_> {
    let mut decoded = Decoded::default();
    let mut pos = 0;

    while pos < buffer.len() {
        match next_record(buffer, pos, 0, &mut decoded.malformed) {
            Step::Record(record, next) => {
                decoded.records.push(record);
                pos = next;
            }
            Step::Skipped(next) => pos = next,
            Step::NeedMore => break,
            Step::Desync(err) => {
                log::warn!("{}", err);
                decoded.discarded = buffer.len() - pos;
                decoded.malformed.push(err);
                pos = buffer.len();
            }
        }
    }

    decoded.leftover = &buffer[pos..];
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &[u8; 4], type_code: u8, size: u8, repeat: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Header {
            tag: FourCC::new(*tag),
            type_code,
            element_size: size,
            repeat,
        }
        .to_bytes()
        .to_vec();
        out.extend_from_slice(payload);
        while out.len() % 4 != 0 {
            out.push(0);
        }
        out
    }

    #[test]
    fn test_header_round_trip() {
        let bytes = record(b"GPS5", b'l', 20, 3, &[0; 60]);
        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 1);
        let header = decoded.records[0].header;
        assert_eq!(header.tag, FourCC::GPS5);
        assert_eq!(header.type_code, b'l');
        assert_eq!(header.element_size, 20);
        assert_eq!(header.repeat, 3);
        assert_eq!(&header.to_bytes()[..], &bytes[..8]);
    }

    #[test]
    fn test_aligned_payload_consumes_exact_length() {
        let mut bytes = record(b"SCAL", b'l', 4, 2, &[0, 0, 0, 10, 0, 0, 0, 20]);
        bytes.extend(record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 3]));
        let decoded = decode(&bytes);
        assert_eq!(decoded.records[0].wire_length(), 8 + 8);
        assert_eq!(decoded.records[1].offset, 16);
        assert!(decoded.leftover.is_empty());
    }

    #[test]
    fn test_padding_is_skipped() {
        // 3 payload bytes round up to 4
        let mut bytes = record(b"STNM", b'c', 3, 1, b"GPS");
        bytes.extend(record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 2]));
        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].payload, b"GPS");
        assert_eq!(decoded.records[0].wire_length(), 12);
        assert_eq!(decoded.records[1].offset, 12);
        assert_eq!(decoded.records[1].tag(), FourCC::GPSF);
    }

    #[test]
    fn test_partial_header_is_leftover() {
        let mut bytes = record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 2]);
        bytes.extend_from_slice(b"GPS5");
        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.leftover, b"GPS5");
        assert!(decoded.malformed.is_empty());
    }

    #[test]
    fn test_withheld_final_byte() {
        let mut bytes = record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 2]);
        let last = record(b"SCAL", b's', 2, 2, &[0, 10, 0, 100]);
        bytes.extend_from_slice(&last);

        let (head, tail) = bytes.split_at(bytes.len() - 1);
        let decoded = decode(head);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.leftover, &last[..last.len() - 1]);

        let mut resumed = decoded.leftover.to_vec();
        resumed.extend_from_slice(tail);
        let decoded = decode(&resumed);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].tag(), FourCC::SCAL);
        assert_eq!(decoded.records[0].payload, &[0, 10, 0, 100]);
        assert!(decoded.leftover.is_empty());
    }

    #[test]
    fn test_nested_containers() {
        let mut strm_body = record(b"STNM", b'c', 4, 1, b"GPS ");
        strm_body.extend(record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 3]));
        let strm = record(b"STRM", 0, 1, strm_body.len() as u16, &strm_body);
        let devc = record(b"DEVC", 0, 1, strm.len() as u16, &strm);

        let decoded = decode(&devc);
        assert_eq!(decoded.records.len(), 1);
        let tags: Vec<FourCC> = decoded.iter().map(|r| r.tag()).collect();
        assert_eq!(
            tags,
            vec![FourCC::DEVC, FourCC::STRM, FourCC::STNM, FourCC::GPSF]
        );
        let gpsf = decoded.iter().last().unwrap();
        assert_eq!(gpsf.offset, 28);
    }

    #[test]
    fn test_truncated_container_waits_for_more() {
        let body = record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 3]);
        let devc = record(b"DEVC", 0, 1, body.len() as u16, &body);
        let decoded = decode(&devc[..devc.len() - 2]);
        assert!(decoded.records.is_empty());
        assert_eq!(decoded.leftover.len(), devc.len() - 2);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut bytes = record(b"GP\x01F", b'L', 4, 1, &[0, 0, 0, 3]);
        bytes.extend(record(b"GPSF", 0x07, 4, 1, &[0, 0, 0, 3]));
        bytes.extend(record(b"SCAL", b'l', 0, 1, &[]));
        bytes.extend(record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 2]));

        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].tag(), FourCC::GPSF);
        assert_eq!(decoded.malformed.len(), 3);
        assert_eq!(
            decoded.malformed[1],
            KlvError::Malformed {
                offset: 12,
                tag: FourCC::GPSF,
                reason: MalformedReason::UnrecognizedType(0x07),
            }
        );
        assert_eq!(decoded.malformed[2].offset(), 24);
    }

    #[test]
    fn test_unskippable_malformed_header_discards_rest() {
        let mut bytes = record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 2]);
        bytes.extend_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 1, 2]);
        let decoded = decode(&bytes);
        assert_eq!(decoded.records.len(), 1);
        assert!(decoded.leftover.is_empty());
        assert_eq!(decoded.discarded, 10);
        assert!(matches!(
            decoded.malformed[0],
            KlvError::Desynchronized { offset: 12, .. }
        ));
    }

    #[test]
    fn test_malformed_nested_record_keeps_siblings() {
        let mut body = record(b"GPSF", 0x02, 4, 1, &[0, 0, 0, 3]);
        body.extend(record(b"GPSF", b'L', 4, 1, &[0, 0, 0, 3]));
        let strm = record(b"STRM", 0, 4, (body.len() / 4) as u16, &body);
        let decoded = decode(&strm);
        assert_eq!(decoded.records[0].children.len(), 1);
        assert_eq!(decoded.malformed[0].offset(), 8);
    }

    #[test]
    fn test_empty_buffer() {
        let decoded = decode(&[]);
        assert!(decoded.records.is_empty());
        assert!(decoded.leftover.is_empty());
    }
}
