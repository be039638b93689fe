//! Output format writers for decoded GPMF telemetry.
//!
//! All writers produce CSV: GPS points with a selectable column order,
//! orientation samples, the per-frame table, and PIX4D image geolocation.

use crate::types::{FrameTable, GpsPoint, Quaternion};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// One column of the GPS point CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsColumn {
    Time,
    Latitude,
    Longitude,
    Elevation,
    Speed,
    Speed3d,
    Fix,
}

impl GpsColumn {
    const ALL: [GpsColumn; 7] = [
        Self::Time,
        Self::Latitude,
        Self::Longitude,
        Self::Elevation,
        Self::Speed,
        Self::Speed3d,
        Self::Fix,
    ];

    /// Column name as written in the header.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Latitude => "lat",
            Self::Longitude => "lon",
            Self::Elevation => "ele",
            Self::Speed => "speed",
            Self::Speed3d => "speed3d",
            Self::Fix => "fix",
        }
    }

    fn parse(name: &str) -> Option<Self> {
        match name {
            "t" | "time" | "timestamp" => Some(Self::Time),
            "lat" | "latitude" => Some(Self::Latitude),
            "lon" | "longitude" => Some(Self::Longitude),
            "ele" | "elevation" | "alt" | "altitude" => Some(Self::Elevation),
            "speed" => Some(Self::Speed),
            "speed3d" => Some(Self::Speed3d),
            "fix" => Some(Self::Fix),
            _ => None,
        }
    }

    fn write_value<W: Write>(&self, out: &mut W, point: &GpsPoint) -> std::io::Result<()> {
        match self {
            Self::Time => write!(out, "{}", format_time(&point.timestamp)),
            Self::Latitude => write!(out, "{}", point.latitude),
            Self::Longitude => write!(out, "{}", point.longitude),
            Self::Elevation => write!(out, "{}", point.elevation),
            Self::Speed => write!(out, "{}", point.speed),
            Self::Speed3d => write!(out, "{}", point.speed_3d),
            Self::Fix => write!(out, "{}", point.fix.raw()),
        }
    }
}

/// Column order for GPS point output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpsColumns(Vec<GpsColumn>);

impl Default for GpsColumns {
    /// time, lat, lon, ele, speed
    fn default() -> Self {
        Self(GpsColumn::ALL[..5].to_vec())
    }
}

impl std::str::FromStr for GpsColumns {
    type Err = OutputError;

    /// Parses a column order from a format string like "time,lat,lon,ele".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut columns = Vec::new();
        for part in s.split(',').map(|p| p.trim().to_lowercase()) {
            let column = GpsColumn::parse(&part).ok_or_else(|| {
                OutputError::InvalidFormat(format!(
                    "Unknown column: {}. Use time, lat, lon, ele, speed, speed3d, fix",
                    part
                ))
            })?;
            if columns.contains(&column) {
                return Err(OutputError::InvalidFormat(format!(
                    "Duplicate column: {}",
                    part
                )));
            }
            columns.push(column);
        }
        Ok(Self(columns))
    }
}

impl GpsColumns {
    pub fn columns(&self) -> &[GpsColumn] {
        &self.0
    }

    /// Returns the header line for this column order.
    pub fn header(&self) -> String {
        self.0
            .iter()
            .map(GpsColumn::name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Formats a timestamp as RFC 3339 with microseconds.
pub fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// CSV writer for GPS points.
pub struct GpsCsvWriter<W: Write> {
    writer: BufWriter<W>,
    columns: GpsColumns,
}

impl<W: Write> GpsCsvWriter<W> {
    pub fn new(writer: W, columns: GpsColumns) -> Self {
        Self {
            writer: BufWriter::new(writer),
            columns,
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "{}", self.columns.header())?;
        Ok(())
    }

    /// Writes a batch of GPS points.
    pub fn write_points(&mut self, points: &[GpsPoint]) -> Result<(), OutputError> {
        for point in points {
            self.write_point(point)?;
        }
        Ok(())
    }

    #[inline]
    fn write_point(&mut self, point: &GpsPoint) -> Result<(), OutputError> {
        for (i, column) in self.columns.0.iter().enumerate() {
            if i > 0 {
                self.writer.write_all(b",")?;
            }
            column.write_value(&mut self.writer, point)?;
        }
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// CSV writer for orientation quaternions.
pub struct OrientationCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> OrientationCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "source,qw,qx,qy,qz")?;
        Ok(())
    }

    /// Writes samples tagged with their source, e.g. "CORI".
    pub fn write_samples(&mut self, source: &str, samples: &[Quaternion]) -> Result<(), OutputError> {
        for q in samples {
            writeln!(self.writer, "{},{},{},{},{}", source, q.w, q.x, q.y, q.z)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

fn cell<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn quaternion_cells(value: Option<Quaternion>) -> String {
    match value {
        Some(q) => format!("{},{},{},{}", q.w, q.x, q.y, q.z),
        None => ",,,".to_string(),
    }
}

/// CSV writer for the per-frame table. Missing values become empty cells.
pub struct FrameCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "index,presentation_time,gps_time,latitude,longitude,elevation,speed,\
             c_qw,c_qx,c_qy,c_qz,i_qw,i_qx,i_qy,i_qz"
        )?;
        Ok(())
    }

    pub fn write_table(&mut self, frames: &FrameTable) -> Result<(), OutputError> {
        for i in 0..frames.len() {
            writeln!(
                self.writer,
                "{},{},{},{},{},{},{},{},{}",
                frames.index[i],
                frames.presentation_time[i],
                cell(frames.gps_time[i].as_ref().map(format_time)),
                cell(frames.latitude[i]),
                cell(frames.longitude[i]),
                cell(frames.elevation[i]),
                cell(frames.speed[i]),
                quaternion_cells(frames.camera_orientation[i]),
                quaternion_cells(frames.image_orientation[i]),
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Digits needed to zero-pad image numbers for `count` frames.
fn image_number_width(count: usize) -> usize {
    let mut width = 0;
    let mut limit = 1usize;
    while limit < count {
        limit = limit.saturating_mul(10);
        width += 1;
    }
    width
}

/// CSV writer for PIX4D image geolocation files.
///
/// Each frame with a position becomes one `IMG_<n>.JPG` row, numbered from
/// one.
pub struct Pix4dCsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> Pix4dCsvWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::new(writer),
        }
    }

    pub fn write_header(&mut self) -> Result<(), OutputError> {
        writeln!(self.writer, "imagename,latitude,longitude,altitude")?;
        Ok(())
    }

    pub fn write_table(&mut self, frames: &FrameTable) -> Result<(), OutputError> {
        let width = image_number_width(frames.len());
        for i in 0..frames.len() {
            let (Some(lat), Some(lon), Some(ele)) =
                (frames.latitude[i], frames.longitude[i], frames.elevation[i])
            else {
                continue;
            };
            writeln!(
                self.writer,
                "IMG_{:0width$}.JPG,{},{},{}",
                frames.index[i] + 1,
                lat,
                lon,
                ele,
                width = width
            )?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes GPS points to a CSV file.
pub fn write_gps_csv<P: AsRef<Path>>(
    path: P,
    points: &[GpsPoint],
    columns: GpsColumns,
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = GpsCsvWriter::new(file, columns);
    writer.write_header()?;
    writer.write_points(points)?;
    writer.flush()?;
    Ok(())
}

/// Writes camera then image orientation samples to a CSV file.
pub fn write_orientation_csv<P: AsRef<Path>>(
    path: P,
    camera: &[Quaternion],
    image: &[Quaternion],
) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = OrientationCsvWriter::new(file);
    writer.write_header()?;
    writer.write_samples("CORI", camera)?;
    writer.write_samples("IORI", image)?;
    writer.flush()?;
    Ok(())
}

/// Writes the per-frame table to a CSV file.
pub fn write_frame_csv<P: AsRef<Path>>(path: P, frames: &FrameTable) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = FrameCsvWriter::new(file);
    writer.write_header()?;
    writer.write_table(frames)?;
    writer.flush()?;
    Ok(())
}

/// Writes a PIX4D image geolocation file.
pub fn write_pix4d_csv<P: AsRef<Path>>(path: P, frames: &FrameTable) -> Result<(), OutputError> {
    let file = File::create(path)?;
    let mut writer = Pix4dCsvWriter::new(file);
    writer.write_header()?;
    writer.write_table(frames)?;
    writer.flush()?;
    Ok(())
}
