//! GPMF telemetry extractor CLI application.
//!
//! Decodes raw GoPro GPMF dumps to GPS, orientation and per-frame CSV files.

use anyhow::{Context, Result};
use clap::Parser;
use gpmf_core::decoder::DEFAULT_CHUNK_SIZE;
use gpmf_core::output::{self, GpsColumns};
use gpmf_core::track::NOMINAL_GPS_RATE_HZ;
use gpmf_core::{synthetic_frames, DecodeError, DecoderConfig, TelemetryDecoder, TrackConfig};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Instant;

/// GoPro GPMF telemetry extractor.
///
/// Decodes a raw GPMF dump (the metadata track extracted from a GoPro video)
/// into a GPS track CSV, with optional orientation, per-frame and PIX4D
/// geolocation outputs.
#[derive(Parser, Debug)]
#[command(name = "gpmf-extract")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input raw GPMF dump
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output CSV path for the GPS track
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Column order for the GPS track CSV.
    ///
    /// Format: comma-separated column names out of
    /// time, lat, lon, ele, speed, speed3d, fix
    ///
    /// Examples:
    /// - "time,lat,lon,ele,speed" (default)
    /// - "lat,lon,ele"
    /// - "time,lat,lon,fix"
    #[arg(short, long, default_value = "time,lat,lon,ele,speed")]
    columns: String,

    /// Output file for camera and image orientation samples (optional)
    #[arg(long, value_name = "PATH")]
    orientation: Option<PathBuf>,

    /// Output file for the GPS track resampled onto video frames (optional)
    #[arg(long, value_name = "PATH")]
    frames: Option<PathBuf>,

    /// Frame rate used for --frames and --pix4d
    #[arg(long, value_name = "HZ", default_value_t = 30.0)]
    frame_rate: f64,

    /// Output file for a PIX4D image geolocation CSV (optional)
    #[arg(short, long, value_name = "PATH")]
    pix4d: Option<PathBuf>,

    /// Skip GPS points recorded without a fix
    #[arg(short, long)]
    skip: bool,

    /// Abort on the first malformed record instead of skipping it
    #[arg(long)]
    strict: bool,

    /// Bytes read from the input per packet
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Nominal GPS sample rate used to space GPS5 timestamps
    #[arg(long, value_name = "HZ", default_value_t = NOMINAL_GPS_RATE_HZ)]
    gps_rate: f64,

    /// Limit the number of frames written by --frames and --pix4d
    #[arg(long, value_name = "N")]
    max_frames: Option<usize>,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    let columns = GpsColumns::from_str(&args.columns)
        .context("Invalid column list. Use comma-separated: time,lat,lon,ele,speed,speed3d,fix")?;
    for (flag, rate) in [("--gps-rate", args.gps_rate), ("--frame-rate", args.frame_rate)] {
        if !(rate.is_finite() && rate > 0.0) {
            anyhow::bail!("{} must be a finite positive number, got {}", flag, rate);
        }
    }

    // Setup progress bar
    let progress = if args.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .context("Invalid progress template")?,
        );
        pb
    };

    let start_time = Instant::now();

    progress.set_message(format!(
        "Decoding {:?}...",
        args.input.file_name().unwrap_or_default()
    ));

    let mut decoder = TelemetryDecoder::new(DecoderConfig {
        track: TrackConfig {
            skip_bad_fix: args.skip,
            gps_rate_hz: args.gps_rate,
        },
        strict: args.strict,
        max_frames: args.max_frames,
        chunk_size: args.chunk_size,
    });
    let result = decoder
        .decode_file(&args.input)
        .context("Failed to decode GPMF dump")?;
    let track = &result.track;

    let points = match track.require_points() {
        Ok(points) => points,
        Err(DecodeError::NothingToExport { stats }) => {
            progress.finish_and_clear();
            eprintln!("Nothing to export: no GPS point was accepted ({})", stats);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    progress.set_message(format!(
        "Writing to {:?}...",
        args.output.file_name().unwrap_or_default()
    ));

    output::write_gps_csv(&args.output, points, columns).context("Failed to write GPS CSV")?;
    log::info!("Wrote {} points to {:?}", points.len(), args.output);

    if let Some(path) = &args.orientation {
        output::write_orientation_csv(path, &track.camera_orientation, &track.image_orientation)
            .context("Failed to write orientation CSV")?;
        log::info!(
            "Wrote {} orientation samples to {:?}",
            track.camera_orientation.len() + track.image_orientation.len(),
            path
        );
    }

    let mut frame_count = 0;
    if args.frames.is_some() || args.pix4d.is_some() {
        let mut frames = synthetic_frames(points, args.frame_rate);
        if let Some(max) = args.max_frames {
            frames.truncate(max);
        }
        frame_count = frames.len();
        log::info!("Resampled GPS onto {} frames at {} Hz", frame_count, args.frame_rate);

        if let Some(path) = &args.frames {
            output::write_frame_csv(path, &frames).context("Failed to write frame CSV")?;
        }
        if let Some(path) = &args.pix4d {
            output::write_pix4d_csv(path, &frames).context("Failed to write PIX4D CSV")?;
        }
    }

    let total_duration = start_time.elapsed();

    progress.finish_with_message(format!(
        "Done! Extracted {} GPS points in {:.2}s",
        points.len(),
        total_duration.as_secs_f64()
    ));

    if !args.quiet {
        let first = points[0].timestamp;
        let last = points[points.len() - 1].timestamp;
        eprintln!();
        eprintln!("Summary:");
        eprintln!("  Input:        {:?}", args.input);
        eprintln!("  Output:       {:?}", args.output);
        eprintln!("  GPS points:   {}", points.len());
        eprintln!("  Without fix:  {} ({} skipped)", track.stats.bad_fix, track.stats.bad_fix_skipped);
        eprintln!("  Empty:        {}", track.stats.empty);
        eprintln!("  Untimed:      {}", track.stats.untimed);
        eprintln!(
            "  Orientation:  {} camera, {} image",
            track.camera_orientation.len(),
            track.image_orientation.len()
        );
        if frame_count > 0 {
            eprintln!("  Frames:       {}", frame_count);
        }
        if result.malformed_records > 0 || result.trailing_bytes > 0 {
            eprintln!(
                "  Skipped:      {} malformed records, {} trailing bytes",
                result.malformed_records, result.trailing_bytes
            );
        }
        eprintln!(
            "  Time span:    {} .. {}",
            output::format_time(&first),
            output::format_time(&last)
        );
        eprintln!("  Duration:     {:.3}s", total_duration.as_secs_f64());
    }

    Ok(())
}
