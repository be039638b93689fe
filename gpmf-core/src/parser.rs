//! Payload interpretation for GPMF KLV records.
//!
//! Given a record's type code, element size and repeat count, this module
//! turns the raw payload into typed values. All multi-byte numbers are
//! big-endian.

use crate::types::FourCC;
use byteorder::{BigEndian, ByteOrder};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::slice::Chunks;
use thiserror::Error;

/// Errors that can occur while interpreting a record payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretError {
    #[error("element size {element_size} is not a multiple of the {width}-byte '{code}' type")]
    Misaligned {
        code: char,
        element_size: u8,
        width: usize,
    },

    #[error("payload holds {actual} bytes, header declares {expected}")]
    ShortPayload { expected: usize, actual: usize },

    #[error("invalid UTC timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// GPMF value type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCode {
    /// Nested KLV records (0x00)
    Nested,
    /// 'b'
    I8,
    /// 'B'
    U8,
    /// 'c', fixed-length ASCII
    Char,
    /// 'd'
    F64,
    /// 'f'
    F32,
    /// 'F', four-character code
    FourCC,
    /// 'G', 128-bit identifier
    Guid,
    /// 'j'
    I64,
    /// 'J'
    U64,
    /// 'l'
    I32,
    /// 'L'
    U32,
    /// 'q', Q15.16 fixed point
    Q15_16,
    /// 'Q', Q31.32 fixed point
    Q31_32,
    /// 's'
    I16,
    /// 'S'
    U16,
    /// 'U', "yymmddhhmmss.sss"
    UtcDate,
    /// '?', structure described by a separate TYPE record
    Complex,
    /// Any other printable code
    Unknown(u8),
}

impl TypeCode {
    /// Parses a type code byte.
    ///
    /// Returns `None` for bytes that can never be a type code (non-printable,
    /// other than the nested marker).
    #[inline]
    pub fn from_u8(value: u8) -> Option<Self> {
        let code = match value {
            0 => Self::Nested,
            b'b' => Self::I8,
            b'B' => Self::U8,
            b'c' => Self::Char,
            b'd' => Self::F64,
            b'f' => Self::F32,
            b'F' => Self::FourCC,
            b'G' => Self::Guid,
            b'j' => Self::I64,
            b'J' => Self::U64,
            b'l' => Self::I32,
            b'L' => Self::U32,
            b'q' => Self::Q15_16,
            b'Q' => Self::Q31_32,
            b's' => Self::I16,
            b'S' => Self::U16,
            b'U' => Self::UtcDate,
            b'?' => Self::Complex,
            0x20..=0x7E => Self::Unknown(value),
            _ => return None,
        };
        Some(code)
    }

    /// Returns the wire byte of this type code.
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Nested => 0,
            Self::I8 => b'b',
            Self::U8 => b'B',
            Self::Char => b'c',
            Self::F64 => b'd',
            Self::F32 => b'f',
            Self::FourCC => b'F',
            Self::Guid => b'G',
            Self::I64 => b'j',
            Self::U64 => b'J',
            Self::I32 => b'l',
            Self::U32 => b'L',
            Self::Q15_16 => b'q',
            Self::Q31_32 => b'Q',
            Self::I16 => b's',
            Self::U16 => b'S',
            Self::UtcDate => b'U',
            Self::Complex => b'?',
            Self::Unknown(v) => *v,
        }
    }

    /// Width in bytes of one scalar of this type, if the type is fixed-width.
    #[inline]
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::I8 | Self::U8 | Self::Char => Some(1),
            Self::I16 | Self::U16 => Some(2),
            Self::I32 | Self::U32 | Self::F32 | Self::Q15_16 | Self::FourCC => Some(4),
            Self::I64 | Self::U64 | Self::F64 | Self::Q31_32 => Some(8),
            Self::UtcDate | Self::Guid => Some(16),
            Self::Nested | Self::Complex | Self::Unknown(_) => None,
        }
    }
}

/// One decoded numeric field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Fixed-point value already converted to floating point
    Fixed(f64),
    FourCC(FourCC),
}

impl Scalar {
    /// Returns the value as `f64`, or `None` for four-character codes.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::I8(v) => Some(v as f64),
            Self::U8(v) => Some(v as f64),
            Self::I16(v) => Some(v as f64),
            Self::U16(v) => Some(v as f64),
            Self::I32(v) => Some(v as f64),
            Self::U32(v) => Some(v as f64),
            Self::I64(v) => Some(v as f64),
            Self::U64(v) => Some(v as f64),
            Self::F32(v) => Some(v as f64),
            Self::F64(v) | Self::Fixed(v) => Some(v),
            Self::FourCC(_) => None,
        }
    }
}

/// The typed content of one record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedValue<'a> {
    /// `repeat` tuples of `arity` scalars each, stored flat
    Numeric { arity: usize, values: Vec<Scalar> },
    /// One string per repeat
    Text(Vec<String>),
    /// One UTC time per 16-byte element
    Timestamps(Vec<DateTime<Utc>>),
    /// One identifier per 16-byte element
    Guids(Vec<[u8; 16]>),
    /// Payload of a type this interpreter does not decode
    Opaque(&'a [u8]),
}

impl<'a> DecodedValue<'a> {
    /// Iterates over numeric tuples. Returns `None` for non-numeric values.
    pub fn tuples(&self) -> Option<Chunks<'_, Scalar>> {
        match self {
            Self::Numeric { arity, values } => Some(values.chunks((*arity).max(1))),
            _ => None,
        }
    }

    /// Returns every numeric field as `f64` in wire order.
    pub fn flat_f64(&self) -> Option<Vec<f64>> {
        match self {
            Self::Numeric { values, .. } => values.iter().map(Scalar::as_f64).collect(),
            _ => None,
        }
    }
}

// ============================================================================
// Scalar readers
// ============================================================================

/// Reads one big-endian scalar of the given fixed-width numeric type.
///
/// `bytes` must be exactly the type's width.
#[inline]
fn read_scalar(code: TypeCode, bytes: &[u8]) -> Scalar {
    match code {
        TypeCode::I8 => Scalar::I8(bytes[0] as i8),
        TypeCode::U8 => Scalar::U8(bytes[0]),
        TypeCode::I16 => Scalar::I16(BigEndian::read_i16(bytes)),
        TypeCode::U16 => Scalar::U16(BigEndian::read_u16(bytes)),
        TypeCode::I32 => Scalar::I32(BigEndian::read_i32(bytes)),
        TypeCode::U32 => Scalar::U32(BigEndian::read_u32(bytes)),
        TypeCode::I64 => Scalar::I64(BigEndian::read_i64(bytes)),
        TypeCode::U64 => Scalar::U64(BigEndian::read_u64(bytes)),
        TypeCode::F32 => Scalar::F32(BigEndian::read_f32(bytes)),
        TypeCode::F64 => Scalar::F64(BigEndian::read_f64(bytes)),
        TypeCode::Q15_16 => Scalar::Fixed(BigEndian::read_i32(bytes) as f64 / 65_536.0),
        TypeCode::Q31_32 => Scalar::Fixed(BigEndian::read_i64(bytes) as f64 / 4_294_967_296.0),
        _ => Scalar::FourCC(FourCC::new([bytes[0], bytes[1], bytes[2], bytes[3]])),
    }
}

/// Converts fixed-length ASCII to a string, dropping NUL and space padding.
#[inline]
fn read_text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == '\0' || c == ' ')
        .to_string()
}

// ============================================================================
// UTC dates
// Format: "yymmddhhmmss.sss", years map to 20yy
// ============================================================================

/// Parses a GPMF UTC date string such as `"190217154025.500"`.
pub fn parse_utc(text: &str) -> Result<DateTime<Utc>, InterpretError> {
    let trimmed = text.trim_end_matches(|c: char| c == '\0' || c == ' ');
    NaiveDateTime::parse_from_str(trimmed, "%y%m%d%H%M%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| InterpretError::InvalidTimestamp(trimmed.to_string()))
}

/// Interprets a record payload according to its header fields.
///
/// `payload` must hold at least `element_size * repeat` bytes; anything
/// beyond that (alignment padding) is ignored. Type codes without a decode
/// rule yield [`DecodedValue::Opaque`] instead of an error.
pub fn interpret(
    type_code: u8,
    element_size: u8,
    repeat: u16,
    payload: &[u8],
) -> Result<DecodedValue<'_>, InterpretError> {
    let expected = element_size as usize * repeat as usize;
    if payload.len() < expected {
        return Err(InterpretError::ShortPayload {
            expected,
            actual: payload.len(),
        });
    }
    let data = &payload[..expected];

    let Some(code) = TypeCode::from_u8(type_code) else {
        return Ok(DecodedValue::Opaque(data));
    };
    let Some(width) = code.width() else {
        return Ok(DecodedValue::Opaque(data));
    };

    if element_size as usize % width != 0 {
        return Err(InterpretError::Misaligned {
            code: type_code as char,
            element_size,
            width,
        });
    }
    if expected == 0 {
        return Ok(match code {
            TypeCode::Char => DecodedValue::Text(Vec::new()),
            TypeCode::UtcDate => DecodedValue::Timestamps(Vec::new()),
            TypeCode::Guid => DecodedValue::Guids(Vec::new()),
            _ => DecodedValue::Numeric {
                arity: element_size as usize / width,
                values: Vec::new(),
            },
        });
    }

    let value = match code {
        TypeCode::Char => {
            DecodedValue::Text(data.chunks(element_size as usize).map(read_text).collect())
        }
        TypeCode::UtcDate => {
            let times = data
                .chunks_exact(width)
                .map(|chunk| parse_utc(&read_text(chunk)))
                .collect::<Result<Vec<_>, _>>()?;
            DecodedValue::Timestamps(times)
        }
        TypeCode::Guid => DecodedValue::Guids(
            data.chunks_exact(width)
                .map(|chunk| {
                    let mut guid = [0u8; 16];
                    guid.copy_from_slice(chunk);
                    guid
                })
                .collect(),
        ),
        _ => DecodedValue::Numeric {
            arity: element_size as usize / width,
            values: data
                .chunks_exact(width)
                .map(|chunk| read_scalar(code, chunk))
                .collect(),
        },
    };

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_type_code_parsing() {
        assert_eq!(TypeCode::from_u8(0), Some(TypeCode::Nested));
        assert_eq!(TypeCode::from_u8(b'l'), Some(TypeCode::I32));
        assert_eq!(TypeCode::from_u8(b'U'), Some(TypeCode::UtcDate));
        assert_eq!(TypeCode::from_u8(b'x'), Some(TypeCode::Unknown(b'x')));
        assert_eq!(TypeCode::from_u8(0x01), None);
        assert_eq!(TypeCode::from_u8(0xFF), None);
        assert_eq!(TypeCode::Q31_32.as_u8(), b'Q');
    }

    #[test]
    fn test_gps5_tuples() {
        // two 5-field tuples of big-endian i32
        let mut payload = Vec::new();
        for v in [1i32, -2, 3, 4, 5, 10, 20, -30, 40, 50] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let value = interpret(b'l', 20, 2, &payload).unwrap();
        let tuples: Vec<Vec<f64>> = value
            .tuples()
            .unwrap()
            .map(|t| t.iter().map(|s| s.as_f64().unwrap()).collect())
            .collect();
        assert_eq!(tuples.len(), 2);
        assert_eq!(tuples[0], vec![1.0, -2.0, 3.0, 4.0, 5.0]);
        assert_eq!(tuples[1], vec![10.0, 20.0, -30.0, 40.0, 50.0]);
    }

    #[test]
    fn test_single_tuple_with_padding_ignored() {
        // one i16 followed by two padding bytes
        let payload = [0x01, 0x00, 0xAA, 0xBB];
        let value = interpret(b's', 2, 1, &payload).unwrap();
        assert_eq!(
            value,
            DecodedValue::Numeric {
                arity: 1,
                values: vec![Scalar::I16(256)]
            }
        );
    }

    #[test]
    fn test_fixed_point() {
        let payload = (3 * 65_536 + 32_768i32).to_be_bytes();
        let value = interpret(b'q', 4, 1, &payload).unwrap();
        assert_eq!(value.flat_f64().unwrap(), vec![3.5]);
    }

    #[test]
    fn test_floats_and_unsigned() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1.5f32.to_be_bytes());
        payload.extend_from_slice(&(-0.25f32).to_be_bytes());
        let value = interpret(b'f', 4, 2, &payload).unwrap();
        assert_eq!(value.flat_f64().unwrap(), vec![1.5, -0.25]);

        let bytes = u32::MAX.to_be_bytes();
        let value = interpret(b'L', 4, 1, &bytes).unwrap();
        assert_eq!(value.flat_f64().unwrap(), vec![u32::MAX as f64]);
    }

    #[test]
    fn test_text() {
        let value = interpret(b'c', 8, 1, b"GPS5\0\0\0\0").unwrap();
        assert_eq!(value, DecodedValue::Text(vec!["GPS5".to_string()]));
    }

    #[test]
    fn test_utc_date() {
        let value = interpret(b'U', 16, 1, b"190217154025.500").unwrap();
        let DecodedValue::Timestamps(times) = value else {
            panic!("expected timestamps");
        };
        let t = times[0];
        assert_eq!((t.year(), t.month(), t.day()), (2019, 2, 17));
        assert_eq!((t.hour(), t.minute(), t.second()), (15, 40, 25));
        assert_eq!(t.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_invalid_utc_date() {
        assert!(matches!(
            interpret(b'U', 16, 1, b"not a time here!"),
            Err(InterpretError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_unknown_type_is_opaque() {
        let value = interpret(b'?', 4, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(value, DecodedValue::Opaque(&[1, 2, 3, 4]));
        assert!(value.tuples().is_none());
    }

    #[test]
    fn test_misaligned_element_size() {
        assert!(matches!(
            interpret(b'l', 6, 1, &[0; 8]),
            Err(InterpretError::Misaligned { width: 4, .. })
        ));
    }

    #[test]
    fn test_short_payload() {
        assert_eq!(
            interpret(b'l', 4, 2, &[0; 4]),
            Err(InterpretError::ShortPayload {
                expected: 8,
                actual: 4
            })
        );
    }
}
