//! Python bindings for the GPMF telemetry decoder with numpy support.
//!
//! Decoded tracks are exposed column-wise as numpy arrays. The `Decoder`
//! class lets a Python-side demuxer (PyAV, ffmpeg pipes) feed frames and
//! telemetry packets as they are read from the container.

use gpmf_core::{
    resample_points, DecodeError, DecoderConfig, FrameTable, Quaternion, TelemetryDecoder,
    TrackConfig,
};
use numpy::{IntoPyArray, PyArray1};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

fn to_py_err(err: DecodeError) -> PyErr {
    match err {
        DecodeError::Io(e) => PyIOError::new_err(format!("Failed to decode: {}", e)),
        other => PyValueError::new_err(other.to_string()),
    }
}

fn config(skip: bool, strict: bool) -> DecoderConfig {
    DecoderConfig {
        track: TrackConfig {
            skip_bad_fix: skip,
            ..Default::default()
        },
        strict,
        ..Default::default()
    }
}

/// Flattens quaternions to `[w, x, y, z, w, x, ...]`.
fn flatten(samples: &[Quaternion]) -> Vec<f64> {
    samples.iter().flat_map(|q| [q.w, q.x, q.y, q.z]).collect()
}

fn or_nan(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|v| v.unwrap_or(f64::NAN)).collect()
}

/// Decoded GPS and orientation samples.
///
/// GPS channels are parallel numpy arrays with one entry per point.
/// Timestamps are microseconds since the UNIX epoch (UTC).
#[pyclass(name = "Track")]
pub struct PyTrack {
    inner: gpmf_core::Track,
}

#[pymethods]
impl PyTrack {
    /// Returns the number of GPS points.
    fn __len__(&self) -> usize {
        self.inner.points.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "Track(points={}, camera_orientation={}, image_orientation={})",
            self.inner.points.len(),
            self.inner.camera_orientation.len(),
            self.inner.image_orientation.len()
        )
    }

    /// Latitudes in degrees.
    #[getter]
    fn latitude<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.column(|p| p.latitude).into_pyarray(py)
    }

    /// Longitudes in degrees.
    #[getter]
    fn longitude<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.column(|p| p.longitude).into_pyarray(py)
    }

    /// Elevations in meters.
    #[getter]
    fn elevation<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.column(|p| p.elevation).into_pyarray(py)
    }

    /// Ground speed in m/s.
    #[getter]
    fn speed<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.column(|p| p.speed).into_pyarray(py)
    }

    /// 3D speed in m/s.
    #[getter]
    fn speed_3d<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        self.column(|p| p.speed_3d).into_pyarray(py)
    }

    /// Timestamps in microseconds since the UNIX epoch.
    #[getter]
    fn timestamp_us<'py>(&self, py: Python<'py>) -> &'py PyArray1<i64> {
        self.inner
            .points
            .iter()
            .map(|p| p.timestamp.timestamp_micros())
            .collect::<Vec<_>>()
            .into_pyarray(py)
    }

    /// Raw GPSF fix value in effect for each point (0 = no fix).
    #[getter]
    fn fix<'py>(&self, py: Python<'py>) -> &'py PyArray1<u32> {
        self.inner
            .points
            .iter()
            .map(|p| p.fix.raw())
            .collect::<Vec<_>>()
            .into_pyarray(py)
    }

    /// Camera orientation as a flat array of w, x, y, z quadruples.
    #[getter]
    fn camera_orientation<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        flatten(&self.inner.camera_orientation).into_pyarray(py)
    }

    /// Image orientation as a flat array of w, x, y, z quadruples.
    #[getter]
    fn image_orientation<'py>(&self, py: Python<'py>) -> &'py PyArray1<f64> {
        flatten(&self.inner.image_orientation).into_pyarray(py)
    }

    /// Returns the per-sample outcome counters as a dictionary.
    fn stats(&self, py: Python<'_>) -> PyResult<PyObject> {
        let stats = self.inner.stats;
        let dict = PyDict::new(py);
        dict.set_item("accepted", stats.accepted)?;
        dict.set_item("bad_fix", stats.bad_fix)?;
        dict.set_item("bad_fix_skipped", stats.bad_fix_skipped)?;
        dict.set_item("empty", stats.empty)?;
        dict.set_item("untimed", stats.untimed)?;
        Ok(dict.into())
    }

    /// Resamples the GPS channels onto `n` evenly spaced slots.
    ///
    /// The first and last slots reproduce the first and last points.
    fn resample(&self, py: Python<'_>, n: usize) -> PyResult<PyObject> {
        let resampled = resample_points(&self.inner.points, n);
        let timestamps: Vec<i64> = resampled
            .timestamp
            .iter()
            .map(|t| t.timestamp_micros())
            .collect();

        let dict = PyDict::new(py);
        dict.set_item("timestamp_us", timestamps.into_pyarray(py))?;
        dict.set_item("latitude", resampled.latitude.into_pyarray(py))?;
        dict.set_item("longitude", resampled.longitude.into_pyarray(py))?;
        dict.set_item("elevation", resampled.elevation.into_pyarray(py))?;
        dict.set_item("speed", resampled.speed.into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl PyTrack {
    fn column(&self, field: fn(&gpmf_core::GpsPoint) -> f64) -> Vec<f64> {
        self.inner.points.iter().map(field).collect()
    }
}

/// Builds the per-frame dictionary returned by `Decoder.finish`.
fn frame_dict<'py>(py: Python<'py>, frames: &FrameTable) -> PyResult<&'py PyDict> {
    let gps_time: Vec<f64> = frames
        .gps_time
        .iter()
        .map(|t| t.map_or(f64::NAN, |t| t.timestamp_micros() as f64))
        .collect();

    let dict = PyDict::new(py);
    dict.set_item("index", frames.index.clone().into_pyarray(py))?;
    dict.set_item(
        "presentation_time",
        frames.presentation_time.clone().into_pyarray(py),
    )?;
    dict.set_item("gps_time_us", gps_time.into_pyarray(py))?;
    dict.set_item("latitude", or_nan(&frames.latitude).into_pyarray(py))?;
    dict.set_item("longitude", or_nan(&frames.longitude).into_pyarray(py))?;
    dict.set_item("elevation", or_nan(&frames.elevation).into_pyarray(py))?;
    dict.set_item("speed", or_nan(&frames.speed).into_pyarray(py))?;

    for (prefix, column) in [
        ("c", &frames.camera_orientation),
        ("i", &frames.image_orientation),
    ] {
        let parts: [(&str, fn(&Quaternion) -> f64); 4] = [
            ("qw", |q| q.w),
            ("qx", |q| q.x),
            ("qy", |q| q.y),
            ("qz", |q| q.z),
        ];
        for (name, part) in parts {
            let values: Vec<f64> = column
                .iter()
                .map(|q| q.as_ref().map_or(f64::NAN, part))
                .collect();
            dict.set_item(format!("{}_{}", prefix, name), values.into_pyarray(py))?;
        }
    }
    Ok(dict)
}

/// Streaming decoder fed by a Python-side demuxer.
///
/// Example:
///     >>> import gpmf
///     >>> decoder = gpmf.Decoder(skip=True)
///     >>> for kind, payload in demux("GOPR0001.MP4"):
///     ...     if kind == "frame":
///     ...         decoder.push_frame(*payload)
///     ...     else:
///     ...         decoder.push_packet(payload)
///     >>> frames = decoder.finish()
///     >>> frames["latitude"]  # NaN where no GPS was available
#[pyclass]
pub struct Decoder {
    inner: TelemetryDecoder,
}

#[pymethods]
impl Decoder {
    #[new]
    #[pyo3(signature = (skip=false, strict=false))]
    fn new(skip: bool, strict: bool) -> Self {
        Self {
            inner: TelemetryDecoder::new(config(skip, strict)),
        }
    }

    /// Records one video frame. Returns False once the frame limit is hit.
    fn push_frame(&mut self, index: u64, time: f64) -> bool {
        self.inner.push_frame(index, time)
    }

    /// Decodes one telemetry packet and returns the number of GPS points it
    /// produced.
    fn push_packet(&mut self, data: &[u8]) -> PyResult<usize> {
        let track = self.inner.decode_packet(data).map_err(to_py_err)?;
        Ok(track.points.len())
    }

    /// Ends the session.
    ///
    /// Returns a dictionary of per-frame numpy columns (NaN for missing
    /// values) with the full decoded track under "track".
    fn finish(&mut self, py: Python<'_>) -> PyResult<PyObject> {
        let result = self.inner.finish();
        let dict = frame_dict(py, &result.frames)?;
        dict.set_item("trailing_bytes", result.trailing_bytes)?;
        dict.set_item("malformed_records", result.malformed_records)?;
        dict.set_item("track", Py::new(py, PyTrack { inner: result.track })?)?;
        Ok(dict.into())
    }
}

/// Decodes a raw GPMF dump and returns the track.
///
/// Args:
///     path: Path to the dump (the extracted GPMF metadata track)
///     skip: Drop points recorded without a GPS fix
///
/// Returns:
///     Track: Container with GPS and orientation arrays
///
/// Example:
///     >>> import gpmf
///     >>> track = gpmf.decode_file("GOPR0001.bin")
///     >>> print(f"Decoded {len(track)} points")
///     >>> lat = track.latitude  # numpy array of latitudes
#[pyfunction]
#[pyo3(signature = (path, skip=false))]
fn decode_file(py: Python<'_>, path: &str, skip: bool) -> PyResult<Py<PyTrack>> {
    let path = PathBuf::from(path);

    let mut decoder = TelemetryDecoder::new(config(skip, false));
    let result = decoder.decode_file(&path).map_err(to_py_err)?;

    Py::new(py, PyTrack { inner: result.track })
}

/// Decodes GPMF bytes already in memory.
///
/// Args:
///     data: Raw GPMF bytes
///     skip: Drop points recorded without a GPS fix
///
/// Returns:
///     Track: Container with the decoded samples
#[pyfunction]
#[pyo3(signature = (data, skip=false))]
fn decode_bytes(py: Python<'_>, data: &[u8], skip: bool) -> PyResult<Py<PyTrack>> {
    let mut decoder = TelemetryDecoder::new(config(skip, false));
    decoder.decode_packet(data).map_err(to_py_err)?;
    let result = decoder.finish();

    Py::new(py, PyTrack { inner: result.track })
}

/// GPMF telemetry decoder module for Python.
#[pymodule]
fn gpmf(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_class::<PyTrack>()?;
    m.add_class::<Decoder>()?;
    Ok(())
}
