//! Core types for GPMF telemetry data.
//!
//! This module defines the four-character codes, the physical-unit samples
//! produced by the track builder, and the per-frame table produced by the
//! streaming decoder.

use crate::decoder::DecodeError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::ops::AddAssign;

/// A four-character code identifying the meaning of a KLV record.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Device container.
    pub const DEVC: FourCC = FourCC(*b"DEVC");
    /// Stream container.
    pub const STRM: FourCC = FourCC(*b"STRM");
    /// Stream name.
    pub const STNM: FourCC = FourCC(*b"STNM");
    /// Scale divisors for the following data record.
    pub const SCAL: FourCC = FourCC(*b"SCAL");
    /// GPS fix quality.
    pub const GPSF: FourCC = FourCC(*b"GPSF");
    /// GPS UTC time base.
    pub const GPSU: FourCC = FourCC(*b"GPSU");
    /// GPS burst: latitude, longitude, altitude, 2D speed, 3D speed.
    pub const GPS5: FourCC = FourCC(*b"GPS5");
    /// System time base used by the Karma GPS variant.
    pub const SYST: FourCC = FourCC(*b"SYST");
    /// Karma drone GPS record.
    pub const GPRI: FourCC = FourCC(*b"GPRI");
    /// Camera orientation quaternions.
    pub const CORI: FourCC = FourCC(*b"CORI");
    /// Image orientation quaternions.
    pub const IORI: FourCC = FourCC(*b"IORI");

    /// Creates a FourCC from its raw bytes.
    #[inline]
    pub fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the code.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Returns true if every byte is an ASCII letter, digit or space.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || *b == b' ')
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCC({})", self)
    }
}

/// GPS fix quality reported by GPSF records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FixState {
    /// No lock; positions are not trustworthy.
    #[default]
    NoFix,
    /// Two-dimensional lock.
    Fix2D,
    /// Three-dimensional lock.
    Fix3D,
    /// A value outside the documented set.
    Other(u32),
}

impl FixState {
    /// Maps a raw GPSF value to a fix state.
    pub fn from_raw(value: u32) -> Self {
        match value {
            0 => Self::NoFix,
            2 => Self::Fix2D,
            3 => Self::Fix3D,
            other => Self::Other(other),
        }
    }

    /// Returns the raw GPSF value.
    pub fn raw(&self) -> u32 {
        match self {
            Self::NoFix => 0,
            Self::Fix2D => 2,
            Self::Fix3D => 3,
            Self::Other(v) => *v,
        }
    }

    /// Returns true unless this is `NoFix`.
    #[inline]
    pub fn has_fix(&self) -> bool {
        !matches!(self, Self::NoFix)
    }
}

impl fmt::Display for FixState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFix => write!(f, "no fix"),
            Self::Fix2D => write!(f, "2D fix"),
            Self::Fix3D => write!(f, "3D fix"),
            Self::Other(v) => write!(f, "fix {}", v),
        }
    }
}

/// A scale-divided orientation quaternion.
///
/// Samples carry no timestamp; they line up with other tracks by position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Creates a new quaternion.
    #[inline]
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }
}

/// A GPS sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsPoint {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Elevation in meters
    pub elevation: f64,
    /// Ground speed in m/s
    pub speed: f64,
    /// 3D speed in m/s, zero when the source does not report it
    pub speed_3d: f64,
    /// UTC time of the sample
    pub timestamp: DateTime<Utc>,
    /// Fix state in effect when the sample was decoded. `NoFix` marks a
    /// low-confidence point kept because bad-fix skipping was disabled.
    pub fix: FixState,
}

impl GpsPoint {
    /// Returns true if the point was decoded without a GPS lock.
    #[inline]
    pub fn is_low_confidence(&self) -> bool {
        !self.fix.has_fix()
    }
}

/// Per-sample outcome counters of the track builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackStats {
    /// Points emitted into the track
    pub accepted: usize,
    /// Points decoded while the fix state was `NoFix`
    pub bad_fix: usize,
    /// Bad-fix points that were dropped because skipping was enabled
    pub bad_fix_skipped: usize,
    /// Points dropped because their raw position was all zero
    pub empty: usize,
    /// Points dropped because no time base had been seen yet
    pub untimed: usize,
}

impl TrackStats {
    /// Total number of GPS samples seen, emitted or not.
    ///
    /// Every sample ends in exactly one of accepted, empty, untimed or
    /// skipped; `bad_fix` overlaps with those.
    pub fn total(&self) -> usize {
        self.accepted + self.empty + self.untimed + self.bad_fix_skipped
    }

    /// Logs a summary block at info level.
    pub fn log_summary(&self) {
        log::info!("-- stats -----------------");
        log::info!("- Ok:              {:5}", self.accepted);
        log::info!(
            "- GPSFIX=0 (bad):  {:5} (skipped: {})",
            self.bad_fix,
            self.bad_fix_skipped
        );
        log::info!("- Empty (No data): {:5}", self.empty);
        log::info!("- Untimed:         {:5}", self.untimed);
        log::info!("Total points:      {:5}", self.total());
        log::info!("--------------------------");
    }
}

impl fmt::Display for TrackStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accepted, {} without fix ({} skipped), {} empty, {} untimed",
            self.accepted, self.bad_fix, self.bad_fix_skipped, self.empty, self.untimed
        )
    }
}

impl AddAssign for TrackStats {
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.bad_fix += rhs.bad_fix;
        self.bad_fix_skipped += rhs.bad_fix_skipped;
        self.empty += rhs.empty;
        self.untimed += rhs.untimed;
    }
}

/// Samples accumulated over a decode session.
#[derive(Debug, Clone, Default)]
pub struct Track {
    /// GPS points in decode order
    pub points: Vec<GpsPoint>,
    /// Camera orientation (CORI) samples in decode order
    pub camera_orientation: Vec<Quaternion>,
    /// Image orientation (IORI) samples in decode order
    pub image_orientation: Vec<Quaternion>,
    /// Outcome counters
    pub stats: TrackStats,
}

impl Track {
    /// Creates an empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends all samples and counters of `other`.
    pub fn extend(&mut self, other: &Track) {
        self.points.extend_from_slice(&other.points);
        self.camera_orientation
            .extend_from_slice(&other.camera_orientation);
        self.image_orientation
            .extend_from_slice(&other.image_orientation);
        self.stats += other.stats;
    }

    /// Returns true if no sample of any kind was collected.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
            && self.camera_orientation.is_empty()
            && self.image_orientation.is_empty()
    }

    /// Returns an error if no GPS point was accepted.
    pub fn require_points(&self) -> Result<&[GpsPoint], DecodeError> {
        if self.points.is_empty() {
            Err(DecodeError::NothingToExport { stats: self.stats })
        } else {
            Ok(&self.points)
        }
    }
}

/// Telemetry aligned onto video frames, stored column-wise.
///
/// Slots whose frames never received GPS data keep `None`.
#[derive(Debug, Clone, Default)]
pub struct FrameTable {
    pub index: Vec<u64>,
    pub presentation_time: Vec<f64>,
    pub gps_time: Vec<Option<DateTime<Utc>>>,
    pub latitude: Vec<Option<f64>>,
    pub longitude: Vec<Option<f64>>,
    pub elevation: Vec<Option<f64>>,
    pub speed: Vec<Option<f64>>,
    pub camera_orientation: Vec<Option<Quaternion>>,
    pub image_orientation: Vec<Option<Quaternion>>,
}

impl FrameTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty slot for one video frame.
    pub fn push_frame(&mut self, index: u64, presentation_time: f64) {
        self.index.push(index);
        self.presentation_time.push(presentation_time);
        self.gps_time.push(None);
        self.latitude.push(None);
        self.longitude.push(None);
        self.elevation.push(None);
        self.speed.push(None);
        self.camera_orientation.push(None);
        self.image_orientation.push(None);
    }

    /// Number of frame slots.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Keeps the first `len` slots.
    pub fn truncate(&mut self, len: usize) {
        self.index.truncate(len);
        self.presentation_time.truncate(len);
        self.gps_time.truncate(len);
        self.latitude.truncate(len);
        self.longitude.truncate(len);
        self.elevation.truncate(len);
        self.speed.truncate(len);
        self.camera_orientation.truncate(len);
        self.image_orientation.truncate(len);
    }
}

/// Result of a complete decode session.
#[derive(Debug)]
pub struct DecodeResult {
    /// All decoded samples
    pub track: Track,
    /// Telemetry aligned onto the frames seen during the session
    pub frames: FrameTable,
    /// Bytes left undecoded at end of stream
    pub trailing_bytes: usize,
    /// Records skipped as malformed
    pub malformed_records: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display_and_validity() {
        assert_eq!(FourCC::GPS5.to_string(), "GPS5");
        assert!(FourCC::new(*b"TMP ").is_valid());
        assert!(!FourCC::new([0x00, b'A', b'B', b'C']).is_valid());
        assert_eq!(FourCC::new([0x01, b'A', b'B', b'C']).to_string(), "\\x01ABC");
    }

    #[test]
    fn test_fix_state_mapping() {
        assert_eq!(FixState::from_raw(0), FixState::NoFix);
        assert_eq!(FixState::from_raw(2), FixState::Fix2D);
        assert_eq!(FixState::from_raw(3), FixState::Fix3D);
        assert_eq!(FixState::from_raw(7), FixState::Other(7));
        assert!(!FixState::NoFix.has_fix());
        assert!(FixState::Other(7).has_fix());
        assert_eq!(FixState::Fix3D.raw(), 3);
    }

    #[test]
    fn test_stats_accumulate() {
        let mut a = TrackStats {
            accepted: 3,
            bad_fix: 1,
            ..Default::default()
        };
        a += TrackStats {
            accepted: 2,
            empty: 4,
            ..Default::default()
        };
        assert_eq!(a.accepted, 5);
        assert_eq!(a.bad_fix, 1);
        assert_eq!(a.empty, 4);
        assert_eq!(a.total(), 9);
    }

    #[test]
    fn test_require_points_on_empty_track() {
        let track = Track::new();
        assert!(matches!(
            track.require_points(),
            Err(DecodeError::NothingToExport { .. })
        ));
    }

    #[test]
    fn test_frame_table_push() {
        let mut table = FrameTable::new();
        table.push_frame(0, 0.0);
        table.push_frame(1, 0.033);
        assert_eq!(table.len(), 2);
        assert!(table.latitude.iter().all(Option::is_none));

        table.truncate(1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.image_orientation.len(), 1);
    }
}
