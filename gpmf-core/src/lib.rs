//! GPMF telemetry decoder for GoPro cameras.
//!
//! This crate decodes the GPMF metadata track that GoPro cameras embed in
//! their video files. It walks the KLV record tree, interprets typed
//! payloads, turns GPS and orientation bursts into physical-unit samples,
//! and resamples GPS onto video frame timelines.
//!
//! # Example
//!
//! ```no_run
//! use gpmf_core::decoder::TelemetryDecoder;
//!
//! let mut decoder = TelemetryDecoder::default();
//! let result = decoder.decode_file("GOPR0001.bin").unwrap();
//!
//! println!("Decoded {} GPS points", result.track.points.len());
//! println!("{}", result.track.stats);
//! ```
//!
//! # Features
//!
//! - Streaming KLV decoding with records split across packet boundaries
//! - All GPMF scalar, fixed-point, text, date and GUID type codes
//! - GPS5 and Karma GPRI tracks, camera and image orientation
//! - Linear resampling of GPS onto video frames
//! - CSV output with customizable column ordering

pub mod decoder;
pub mod klv;
pub mod output;
pub mod parser;
pub mod record;
pub mod resample;
pub mod source;
pub mod track;
pub mod types;

// Re-export commonly used types
pub use decoder::{DecodeError, DecoderConfig, TelemetryDecoder};
pub use klv::{KlvError, RawRecord};
pub use output::{GpsColumns, OutputError};
pub use resample::{resample_points, synthetic_frames, Resampler, MAX_SYNTHETIC_FRAMES};
pub use source::{MemorySource, PacketSource, RawDumpSource, StreamEvent};
pub use track::{BuilderState, TrackBuilder, TrackConfig};
pub use types::{DecodeResult, FixState, FourCC, FrameTable, GpsPoint, Quaternion, Track, TrackStats};
