//! Stateful track builder.
//!
//! Consumes records in stream order and turns raw GPS and orientation bursts
//! into physical-unit samples. The builder tracks the scale divisors, the GPS
//! fix state and the time bases that earlier records establish for later
//! ones.

use crate::klv::RawRecord;
use crate::record::Record;
use crate::types::{FixState, GpsPoint, Quaternion, Track};
use chrono::{DateTime, Duration, TimeZone, Utc};

/// Nominal GPS5 sample rate used to space samples after a GPSU time base.
///
/// This is an approximation: cameras report bursts at roughly 18 Hz but the
/// stream does not carry the exact rate.
pub const NOMINAL_GPS_RATE_HZ: f64 = 18.0;

/// Track builder options.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackConfig {
    /// Drop samples decoded without a GPS fix instead of emitting them
    /// flagged as low confidence.
    pub skip_bad_fix: bool,
    /// Sample rate used to space GPS5 timestamps. Rates that are not finite
    /// and positive fall back to [`NOMINAL_GPS_RATE_HZ`].
    pub gps_rate_hz: f64,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            skip_bad_fix: false,
            gps_rate_hz: NOMINAL_GPS_RATE_HZ,
        }
    }
}

impl TrackConfig {
    /// Whether `gps_rate_hz` can space samples.
    #[inline]
    pub fn has_valid_rate(&self) -> bool {
        self.gps_rate_hz.is_finite() && self.gps_rate_hz > 0.0
    }

    /// The GPS rate in effect.
    #[inline]
    pub fn gps_rate(&self) -> f64 {
        if self.has_valid_rate() {
            self.gps_rate_hz
        } else {
            NOMINAL_GPS_RATE_HZ
        }
    }

    /// Offset of the `index`-th sample after a time base.
    #[inline]
    pub fn sample_offset(&self, index: u64) -> Duration {
        let micros = (index as f64 * 1_000_000.0 / self.gps_rate()).round();
        Duration::microseconds(micros as i64)
    }
}

/// Per-field scale divisors from the most recent SCAL record.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleVector(Vec<f64>);

impl Default for ScaleVector {
    fn default() -> Self {
        Self::identity()
    }
}

impl ScaleVector {
    /// A vector that leaves every field unchanged.
    pub fn identity() -> Self {
        Self(vec![1.0])
    }

    /// Builds a scale vector. Zero or non-finite divisors are replaced by 1.
    pub fn new(divisors: Vec<f64>) -> Self {
        if divisors.is_empty() {
            return Self::identity();
        }
        if divisors.iter().any(|d| *d == 0.0 || !d.is_finite()) {
            log::warn!("Ignoring unusable divisors in SCAL {:?}", divisors);
        }
        Self(
            divisors
                .into_iter()
                .map(|d| if d == 0.0 || !d.is_finite() { 1.0 } else { d })
                .collect(),
        )
    }

    /// Divisor for the given field. A single divisor applies to all fields;
    /// fields past the end of a longer vector are left unscaled.
    #[inline]
    pub fn divisor(&self, field: usize) -> f64 {
        match self.0.as_slice() {
            [single] => *single,
            all => all.get(field).copied().unwrap_or(1.0),
        }
    }

    /// The first divisor, used for records scaled by a single value.
    #[inline]
    pub fn scalar(&self) -> f64 {
        self.0.first().copied().unwrap_or(1.0)
    }

    /// Divides each field by its divisor.
    #[inline]
    pub fn apply<const N: usize>(&self, raw: &[f64; N]) -> [f64; N] {
        let mut out = *raw;
        for (i, v) in out.iter_mut().enumerate() {
            *v /= self.divisor(i);
        }
        out
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

/// GPSU time base and the index of the next sample timed from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBase {
    pub origin: DateTime<Utc>,
    pub next_index: u64,
}

/// Running state carried from one record to the next.
///
/// Export it with [`TrackBuilder::state`] and resume with
/// [`TrackBuilder::with_state`] to continue a stream in a new segment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuilderState {
    pub scale: ScaleVector,
    pub fix: FixState,
    pub gps_time: Option<TimeBase>,
    /// Wall clock from the most recent usable SYST record
    pub system_time: Option<DateTime<Utc>>,
}

/// Finite-state reducer from records to samples.
#[derive(Debug, Clone, Default)]
pub struct TrackBuilder {
    config: TrackConfig,
    state: BuilderState,
}

impl TrackBuilder {
    /// Creates a builder with initial state: identity scale, no fix, no
    /// time base.
    pub fn new(config: TrackConfig) -> Self {
        Self::with_state(config, BuilderState::default())
    }

    /// Creates a builder that continues from a previous segment's state.
    pub fn with_state(config: TrackConfig, state: BuilderState) -> Self {
        if !config.has_valid_rate() {
            log::warn!(
                "Invalid GPS rate {} Hz, using {} Hz",
                config.gps_rate_hz,
                NOMINAL_GPS_RATE_HZ
            );
        }
        Self { config, state }
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn state(&self) -> &BuilderState {
        &self.state
    }

    pub fn into_state(self) -> BuilderState {
        self.state
    }

    /// Feeds records in stream order, appending samples and counters to
    /// `track`.
    ///
    /// Records that are recognized but cannot be decoded are skipped with a
    /// warning.
    pub fn consume<'r, 'a: 'r, I>(&mut self, records: I, track: &mut Track)
    where
        I: IntoIterator<Item = &'r RawRecord<'a>>,
    {
        for raw in records {
            match Record::from_raw(raw) {
                Ok(record) => self.apply(&record, track),
                Err(err) => log::warn!("Skipping record: {}", err),
            }
        }
    }

    /// Applies one typed record.
    pub fn apply(&mut self, record: &Record, track: &mut Track) {
        match record {
            Record::Scale(divisors) => {
                self.state.scale = ScaleVector::new(divisors.clone());
            }
            Record::GpsFix(fix) => {
                if *fix != self.state.fix {
                    log::debug!("GPSFIX change to {} [{}]", fix.raw(), fix);
                }
                self.state.fix = *fix;
            }
            Record::GpsTime(origin) => {
                self.state.gps_time = Some(TimeBase {
                    origin: *origin,
                    next_index: 0,
                });
            }
            Record::SystemTime(raw) => self.system_time(raw),
            Record::Gps5(samples) => self.gps5(samples, track),
            Record::KarmaGps(samples) => self.karma_gps(samples, track),
            Record::CameraOrientation(samples) => {
                let divisor = self.state.scale.scalar();
                track
                    .camera_orientation
                    .extend(samples.iter().map(|q| quaternion(q, divisor)));
            }
            Record::ImageOrientation(samples) => {
                let divisor = self.state.scale.scalar();
                track
                    .image_orientation
                    .extend(samples.iter().map(|q| quaternion(q, divisor)));
            }
            Record::StreamName(name) => log::debug!("Stream {}", name),
            Record::Container(_) | Record::Other(_) => {}
        }
    }

    fn system_time(&mut self, raw: &[f64; 2]) {
        let [seconds, milliseconds] = self.state.scale.apply(raw);
        if seconds == 0.0 || milliseconds == 0.0 {
            return;
        }
        // the second field carries the wall clock, in seconds since the epoch
        let whole = milliseconds.trunc();
        let nanos = ((milliseconds - whole) * 1e9).round().clamp(0.0, 999_999_999.0);
        match Utc.timestamp_opt(whole as i64, nanos as u32).single() {
            Some(time) => self.state.system_time = Some(time),
            None => log::warn!("Ignoring out-of-range SYST time {}", milliseconds),
        }
    }

    /// Applies the empty and fix filters shared by both GPS variants.
    /// Returns false if the sample must not be emitted.
    fn admit(&self, lat: f64, lon: f64, alt: f64, track: &mut Track) -> bool {
        if lat == 0.0 && lon == 0.0 && alt == 0.0 {
            log::warn!("Warning: Skipping empty point");
            track.stats.empty += 1;
            return false;
        }
        if !self.state.fix.has_fix() {
            track.stats.bad_fix += 1;
            if self.config.skip_bad_fix {
                log::warn!("Warning: Skipping point due GPSFIX==0");
                track.stats.bad_fix_skipped += 1;
                return false;
            }
        }
        true
    }

    fn gps5(&mut self, samples: &[[f64; 5]], track: &mut Track) {
        for raw in samples {
            // every sample advances the clock, emitted or not
            let timestamp = self.state.gps_time.as_mut().map(|base| {
                let t = base.origin + self.config.sample_offset(base.next_index);
                base.next_index += 1;
                t
            });

            if !self.admit(raw[0], raw[1], raw[2], track) {
                continue;
            }
            let Some(timestamp) = timestamp else {
                log::warn!("Warning: Skipping GPS5 point before any GPSU time");
                track.stats.untimed += 1;
                continue;
            };

            let [lat, lon, alt, speed, speed_3d] = self.state.scale.apply(raw);
            track.points.push(GpsPoint {
                latitude: lat,
                longitude: lon,
                elevation: alt,
                speed,
                speed_3d,
                timestamp,
                fix: self.state.fix,
            });
            track.stats.accepted += 1;
        }
    }

    fn karma_gps(&mut self, samples: &[[f64; 5]], track: &mut Track) {
        for raw in samples {
            if !self.admit(raw[1], raw[2], raw[3], track) {
                continue;
            }
            let Some(timestamp) = self.state.system_time else {
                log::warn!("Warning: Skipping GPRI point before any SYST time");
                track.stats.untimed += 1;
                continue;
            };

            let [_, lat, lon, alt, speed] = self.state.scale.apply(raw);
            track.points.push(GpsPoint {
                latitude: lat,
                longitude: lon,
                elevation: alt,
                speed,
                speed_3d: 0.0,
                timestamp,
                fix: self.state.fix,
            });
            track.stats.accepted += 1;
        }
    }
}

#[inline]
fn quaternion(raw: &[f64; 4], divisor: f64) -> Quaternion {
    Quaternion::new(
        raw[0] / divisor,
        raw[1] / divisor,
        raw[2] / divisor,
        raw[3] / divisor,
    )
}
