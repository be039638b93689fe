//! Typed view of the GPMF records the track builder understands.
//!
//! Each recognized four-character code maps to one variant carrying its
//! payload in a fixed shape. Values are still raw here; scale division
//! happens in the track builder.

use crate::klv::RawRecord;
use crate::parser::{self, DecodedValue, InterpretError};
use crate::types::{FixState, FourCC};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that make a recognized record unusable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("{tag} at offset {offset}: {source}")]
    Interpret {
        offset: usize,
        tag: FourCC,
        #[source]
        source: InterpretError,
    },

    #[error("{tag} at offset {offset}: expected {expected} fields per sample, found {found}")]
    Shape {
        offset: usize,
        tag: FourCC,
        expected: usize,
        found: usize,
    },

    #[error("{tag} at offset {offset}: expected {expected} payload")]
    Type {
        offset: usize,
        tag: FourCC,
        expected: &'static str,
    },
}

/// One record, classified by its four-character code.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// DEVC or STRM; children are walked separately
    Container(FourCC),
    /// STNM
    StreamName(String),
    /// SCAL divisors, flattened in wire order
    Scale(Vec<f64>),
    /// GPSF
    GpsFix(FixState),
    /// GPSU
    GpsTime(DateTime<Utc>),
    /// GPS5 burst: latitude, longitude, altitude, 2D speed, 3D speed
    Gps5(Vec<[f64; 5]>),
    /// SYST: seconds, milliseconds
    SystemTime([f64; 2]),
    /// GPRI: gps time, latitude, longitude, altitude, speed
    KarmaGps(Vec<[f64; 5]>),
    /// CORI burst: w, x, y, z
    CameraOrientation(Vec<[f64; 4]>),
    /// IORI burst: w, x, y, z
    ImageOrientation(Vec<[f64; 4]>),
    /// Any other code
    Other(FourCC),
}

impl Record {
    /// Classifies and decodes a raw record.
    pub fn from_raw(raw: &RawRecord<'_>) -> Result<Self, RecordError> {
        let tag = raw.tag();
        if raw.is_container() {
            return Ok(Self::Container(tag));
        }

        let record = match tag {
            FourCC::STNM => match interpret(raw)? {
                DecodedValue::Text(mut names) if !names.is_empty() => {
                    Self::StreamName(names.swap_remove(0))
                }
                _ => return Err(type_error(raw, "text")),
            },
            FourCC::SCAL => Self::Scale(numbers(raw)?),
            FourCC::GPSF => {
                let values = numbers(raw)?;
                let first = values
                    .first()
                    .ok_or_else(|| type_error(raw, "numeric"))?;
                Self::GpsFix(FixState::from_raw(*first as u32))
            }
            FourCC::GPSU => Self::GpsTime(gps_time(raw)?),
            FourCC::GPS5 => Self::Gps5(tuples::<5>(raw)?),
            FourCC::SYST => {
                let values = numbers(raw)?;
                if values.len() < 2 {
                    return Err(RecordError::Shape {
                        offset: raw.offset,
                        tag,
                        expected: 2,
                        found: values.len(),
                    });
                }
                Self::SystemTime([values[0], values[1]])
            }
            FourCC::GPRI => Self::KarmaGps(tuples::<5>(raw)?),
            FourCC::CORI => Self::CameraOrientation(tuples::<4>(raw)?),
            FourCC::IORI => Self::ImageOrientation(tuples::<4>(raw)?),
            other => Self::Other(other),
        };

        Ok(record)
    }
}

fn interpret<'a>(raw: &RawRecord<'a>) -> Result<DecodedValue<'a>, RecordError> {
    raw.interpret().map_err(|source| RecordError::Interpret {
        offset: raw.offset,
        tag: raw.tag(),
        source,
    })
}

fn type_error(raw: &RawRecord<'_>, expected: &'static str) -> RecordError {
    RecordError::Type {
        offset: raw.offset,
        tag: raw.tag(),
        expected,
    }
}

fn numbers(raw: &RawRecord<'_>) -> Result<Vec<f64>, RecordError> {
    interpret(raw)?
        .flat_f64()
        .ok_or_else(|| type_error(raw, "numeric"))
}

fn gps_time(raw: &RawRecord<'_>) -> Result<DateTime<Utc>, RecordError> {
    match interpret(raw)? {
        DecodedValue::Timestamps(times) => times
            .first()
            .copied()
            .ok_or_else(|| type_error(raw, "UTC date")),
        // some firmware writes the date as plain text
        DecodedValue::Text(texts) => {
            let text = texts.first().ok_or_else(|| type_error(raw, "UTC date"))?;
            parser::parse_utc(text).map_err(|source| RecordError::Interpret {
                offset: raw.offset,
                tag: raw.tag(),
                source,
            })
        }
        _ => Err(type_error(raw, "UTC date")),
    }
}

/// Decodes a burst of fixed-arity numeric tuples.
fn tuples<const N: usize>(raw: &RawRecord<'_>) -> Result<Vec<[f64; N]>, RecordError> {
    let value = interpret(raw)?;
    let DecodedValue::Numeric { arity, values } = &value else {
        return Err(type_error(raw, "numeric"));
    };
    if *arity != N {
        return Err(RecordError::Shape {
            offset: raw.offset,
            tag: raw.tag(),
            expected: N,
            found: *arity,
        });
    }

    let mut out = Vec::with_capacity(values.len() / N);
    for chunk in values.chunks_exact(N) {
        let mut tuple = [0.0; N];
        for (slot, scalar) in tuple.iter_mut().zip(chunk) {
            *slot = scalar.as_f64().ok_or_else(|| type_error(raw, "numeric"))?;
        }
        out.push(tuple);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::klv;
    use crate::klv::Header;

    fn encode(tag: FourCC, type_code: u8, size: u8, repeat: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Header {
            tag,
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

    fn classify(bytes: &[u8]) -> Result<Record, RecordError> {
        let decoded = klv::decode(bytes);
        Record::from_raw(&decoded.records[0])
    }

    #[test]
    fn test_gps5_burst() {
        let mut payload = Vec::new();
        for v in [100i32, 200, 300, 5, 6, 0, 0, 0, 0, 0] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let record = classify(&encode(FourCC::GPS5, b'l', 20, 2, &payload)).unwrap();
        assert_eq!(
            record,
            Record::Gps5(vec![[100.0, 200.0, 300.0, 5.0, 6.0], [0.0; 5]])
        );
    }

    #[test]
    fn test_gps5_wrong_arity() {
        let err = classify(&encode(FourCC::GPS5, b'l', 16, 1, &[0; 16])).unwrap_err();
        assert_eq!(
            err,
            RecordError::Shape {
                offset: 0,
                tag: FourCC::GPS5,
                expected: 5,
                found: 4
            }
        );
    }

    #[test]
    fn test_scale_from_repeated_shorts() {
        let payload = [0, 10, 0, 20, 0, 30];
        let record = classify(&encode(FourCC::SCAL, b's', 2, 3, &payload)).unwrap();
        assert_eq!(record, Record::Scale(vec![10.0, 20.0, 30.0]));
    }

    #[test]
    fn test_fix_and_time() {
        let record = classify(&encode(FourCC::GPSF, b'L', 4, 1, &[0, 0, 0, 3])).unwrap();
        assert_eq!(record, Record::GpsFix(FixState::Fix3D));

        let record = classify(&encode(FourCC::GPSU, b'U', 16, 1, b"190217154025.500")).unwrap();
        let Record::GpsTime(t) = record else {
            panic!("expected GPS time");
        };
        assert_eq!(t.to_rfc3339(), "2019-02-17T15:40:25.500+00:00");

        let record = classify(&encode(FourCC::GPSU, b'c', 16, 1, b"190217154025.500")).unwrap();
        assert!(matches!(record, Record::GpsTime(_)));
    }

    #[test]
    fn test_orientation_and_other() {
        let mut payload = Vec::new();
        for v in [32767i16, 0, 0, 0] {
            payload.extend_from_slice(&v.to_be_bytes());
        }
        let record = classify(&encode(FourCC::CORI, b's', 8, 1, &payload)).unwrap();
        assert_eq!(record, Record::CameraOrientation(vec![[32767.0, 0.0, 0.0, 0.0]]));

        let record = classify(&encode(FourCC::new(*b"ACCL"), b's', 6, 1, &[0; 6])).unwrap();
        assert_eq!(record, Record::Other(FourCC::new(*b"ACCL")));
    }

    #[test]
    fn test_system_time_needs_two_fields() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&12u64.to_be_bytes());
        payload.extend_from_slice(&34u64.to_be_bytes());
        let record = classify(&encode(FourCC::SYST, b'J', 16, 1, &payload)).unwrap();
        assert_eq!(record, Record::SystemTime([12.0, 34.0]));

        let err = classify(&encode(FourCC::SYST, b'J', 8, 1, &payload[..8])).unwrap_err();
        assert!(matches!(err, RecordError::Shape { expected: 2, found: 1, .. }));
    }
}
