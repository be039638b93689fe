//! Linear resampling of telemetry onto another timeline.
//!
//! Source samples and target slots are both assumed to span the same time
//! interval evenly: slot `i` of `n` sits at fraction `i / (n - 1)` and is
//! interpolated between the source samples around that fraction. The first
//! and last slots map exactly onto the first and last source samples.
//!
//! Latitude and longitude are interpolated independently, which is adequate
//! for the short gaps between GPS samples.

use crate::types::{FrameTable, GpsPoint};
use chrono::{DateTime, Duration, Utc};

/// Precomputed interpolation weights for one source/target length pair.
#[derive(Debug, Clone)]
pub struct Resampler {
    source_len: usize,
    /// Lower source index and weight of the upper neighbour, per slot
    weights: Vec<(usize, f64)>,
}

impl Resampler {
    /// Builds weights mapping `source_len` samples onto `target_len` slots.
    pub fn new(source_len: usize, target_len: usize) -> Self {
        let weights = if source_len == 0 {
            Vec::new()
        } else if source_len == 1 || target_len == 1 {
            vec![(0, 0.0); target_len]
        } else {
            let last = source_len - 2;
            (0..target_len)
                .map(|slot| {
                    let pos = (slot * (source_len - 1)) as f64 / (target_len - 1) as f64;
                    let lower = (pos.floor() as usize).min(last);
                    (lower, pos - lower as f64)
                })
                .collect()
        };
        Self {
            source_len,
            weights,
        }
    }

    /// Number of output slots. Zero when the source is empty.
    pub fn target_len(&self) -> usize {
        self.weights.len()
    }

    pub fn source_len(&self) -> usize {
        self.source_len
    }

    #[inline]
    fn interpolate(values: &[f64], lower: usize, frac: f64) -> f64 {
        if frac == 0.0 {
            return values[lower];
        }
        values[lower] * (1.0 - frac) + values[lower + 1] * frac
    }

    /// Resamples one numeric channel.
    ///
    /// # Panics
    ///
    /// Panics if `values` does not hold `source_len` samples.
    pub fn apply(&self, values: &[f64]) -> Vec<f64> {
        assert_eq!(values.len(), self.source_len, "channel length mismatch");
        self.weights
            .iter()
            .map(|&(lower, frac)| Self::interpolate(values, lower, frac))
            .collect()
    }

    /// Resamples timestamps.
    ///
    /// Times are converted to microsecond offsets from the first sample
    /// before interpolating, since interpolating absolute times in floating
    /// point loses sub-second precision.
    pub fn apply_times(&self, times: &[DateTime<Utc>]) -> Vec<DateTime<Utc>> {
        assert_eq!(times.len(), self.source_len, "channel length mismatch");
        let Some(&epoch) = times.first() else {
            return Vec::new();
        };
        let offsets: Vec<f64> = times
            .iter()
            .map(|t| micros_between(epoch, *t) as f64)
            .collect();
        self.apply(&offsets)
            .into_iter()
            .map(|us| epoch + Duration::microseconds(us.round() as i64))
            .collect()
    }
}

#[inline]
fn micros_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    let delta = to - from;
    delta
        .num_microseconds()
        .unwrap_or_else(|| delta.num_milliseconds().saturating_mul(1000))
}

/// GPS channels resampled onto a run of target slots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResampledTrack {
    pub timestamp: Vec<DateTime<Utc>>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
    pub elevation: Vec<f64>,
    pub speed: Vec<f64>,
}

impl ResampledTrack {
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }
}

/// Resamples every channel of `points` onto `target_len` slots.
///
/// Returns an empty result when `points` is empty.
pub fn resample_points(points: &[GpsPoint], target_len: usize) -> ResampledTrack {
    let resampler = Resampler::new(points.len(), target_len);
    let channel = |f: fn(&GpsPoint) -> f64| -> Vec<f64> {
        resampler.apply(&points.iter().map(f).collect::<Vec<_>>())
    };
    let times: Vec<DateTime<Utc>> = points.iter().map(|p| p.timestamp).collect();

    ResampledTrack {
        timestamp: resampler.apply_times(&times),
        latitude: channel(|p| p.latitude),
        longitude: channel(|p| p.longitude),
        elevation: channel(|p| p.elevation),
        speed: channel(|p| p.speed),
    }
}

/// Upper bound on the slots [`synthetic_frames`] allocates, about 19 hours
/// at 30 Hz.
pub const MAX_SYNTHETIC_FRAMES: usize = 1 << 21;

/// Builds a frame table for a constant frame rate spanning the whole track
/// and fills it with the resampled GPS channels.
///
/// The table has `ceil(duration * frame_rate) + 1` slots, so both the first
/// and the last point land on a frame. The slot count is capped at
/// [`MAX_SYNTHETIC_FRAMES`]; a capped table still spans the whole track.
/// A frame rate that is not finite and positive yields an empty table.
pub fn synthetic_frames(points: &[GpsPoint], frame_rate: f64) -> FrameTable {
    let mut table = FrameTable::new();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return table;
    };
    if !(frame_rate.is_finite() && frame_rate > 0.0) {
        log::warn!("Ignoring invalid frame rate {}", frame_rate);
        return table;
    }

    let duration = micros_between(first.timestamp, last.timestamp).max(0) as f64 / 1e6;
    let wanted = (duration * frame_rate).ceil() + 1.0;
    let slots = if wanted.is_finite() && wanted <= MAX_SYNTHETIC_FRAMES as f64 {
        wanted as usize
    } else {
        log::warn!(
            "{}s at {} Hz needs {} frames, limiting to {}",
            duration,
            frame_rate,
            wanted,
            MAX_SYNTHETIC_FRAMES
        );
        MAX_SYNTHETIC_FRAMES
    };
    let gps = resample_points(points, slots);
    for i in 0..slots {
        table.push_frame(i as u64, i as f64 / frame_rate);
        table.gps_time[i] = Some(gps.timestamp[i]);
        table.latitude[i] = Some(gps.latitude[i]);
        table.longitude[i] = Some(gps.longitude[i]);
        table.elevation[i] = Some(gps.elevation[i]);
        table.speed[i] = Some(gps.speed[i]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_utc;
    use crate::types::FixState;
    use approx::assert_relative_eq;

    #[test]
    fn test_18_to_30_endpoints() {
        let source: Vec<f64> = (0..18).map(|i| 47.0 + i as f64 * 0.013).collect();
        let out = Resampler::new(18, 30).apply(&source);
        assert_eq!(out.len(), 30);
        assert_eq!(out[0], source[0]);
        assert_eq!(out[29], source[17]);
    }

    #[test]
    fn test_midpoint_interpolation() {
        let out = Resampler::new(2, 3).apply(&[10.0, 20.0]);
        assert_eq!(out, vec![10.0, 15.0, 20.0]);

        let out = Resampler::new(3, 5).apply(&[0.0, 10.0, 30.0]);
        assert_eq!(out, vec![0.0, 5.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_downsampling() {
        let source: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let out = Resampler::new(30, 18).apply(&source);
        assert_eq!(out.len(), 18);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[17], 29.0);
        for pair in out.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_degenerate_lengths() {
        assert_eq!(Resampler::new(1, 4).apply(&[3.0]), vec![3.0; 4]);
        assert_eq!(Resampler::new(5, 1).apply(&[1.0, 2.0, 3.0, 4.0, 5.0]), vec![1.0]);
        assert!(Resampler::new(4, 0).apply(&[1.0, 2.0, 3.0, 4.0]).is_empty());
        assert_eq!(Resampler::new(0, 10).target_len(), 0);
    }

    #[test]
    fn test_time_precision_preserved() {
        let t0 = parse_utc("230101120000.000").unwrap();
        let times = vec![t0, t0 + Duration::microseconds(1_001)];
        let out = Resampler::new(2, 3).apply_times(&times);
        assert_eq!(out[0], t0);
        assert_eq!(out[1], t0 + Duration::microseconds(501));
        assert_eq!(out[2], times[1]);
    }

    #[test]
    fn test_resample_points() {
        let t0 = parse_utc("230101120000.000").unwrap();
        let points: Vec<GpsPoint> = (0..18)
            .map(|i| GpsPoint {
                latitude: 47.0 + i as f64 * 1e-5,
                longitude: 8.0,
                elevation: 400.0 + i as f64,
                speed: 1.0,
                speed_3d: 1.0,
                timestamp: t0 + Duration::microseconds(i * 55_556),
                fix: FixState::Fix3D,
            })
            .collect();

        let out = resample_points(&points, 30);
        assert_eq!(out.len(), 30);
        assert_eq!(out.timestamp[0], points[0].timestamp);
        assert_eq!(out.timestamp[29], points[17].timestamp);
        assert_eq!(out.elevation[29], 417.0);
        assert_relative_eq!(out.longitude[13], 8.0);
        for pair in out.timestamp.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        assert!(resample_points(&[], 30).is_empty());
    }

    #[test]
    fn test_synthetic_frames() {
        let t0 = parse_utc("230101120000.000").unwrap();
        let points: Vec<GpsPoint> = (0..3)
            .map(|i| GpsPoint {
                latitude: 47.0 + i as f64,
                longitude: 8.0,
                elevation: 400.0,
                speed: 0.0,
                speed_3d: 0.0,
                timestamp: t0 + Duration::milliseconds(i * 500),
                fix: FixState::Fix3D,
            })
            .collect();

        let table = synthetic_frames(&points, 4.0);
        assert_eq!(table.len(), 5);
        assert_eq!(table.presentation_time[4], 1.0);
        assert_eq!(table.latitude[0], Some(47.0));
        assert_eq!(table.latitude[2], Some(48.0));
        assert_eq!(table.latitude[4], Some(49.0));
        assert_eq!(table.gps_time[4], Some(points[2].timestamp));

        assert!(synthetic_frames(&[], 30.0).is_empty());
        assert!(synthetic_frames(&points, 0.0).is_empty());
        assert!(synthetic_frames(&points, f64::NAN).is_empty());
        assert!(synthetic_frames(&points, f64::INFINITY).is_empty());
    }

    #[test]
    fn test_synthetic_frames_capped() {
        let t0 = parse_utc("230101120000.000").unwrap();
        let points: Vec<GpsPoint> = [0, 1]
            .iter()
            .map(|&s| GpsPoint {
                latitude: 47.0 + s as f64,
                longitude: 8.0,
                elevation: 400.0,
                speed: 0.0,
                speed_3d: 0.0,
                timestamp: t0 + Duration::seconds(s),
                fix: FixState::Fix3D,
            })
            .collect();

        let table = synthetic_frames(&points, 1e30);
        assert_eq!(table.len(), MAX_SYNTHETIC_FRAMES);
        assert_eq!(table.latitude[0], Some(47.0));
        assert_eq!(table.latitude[MAX_SYNTHETIC_FRAMES - 1], Some(48.0));
        assert_eq!(table.gps_time[MAX_SYNTHETIC_FRAMES - 1], Some(points[1].timestamp));
    }
}
