//! Streaming GPMF decoder.
//!
//! A [`TelemetryDecoder`] owns one decode session: it carries incomplete
//! records from one packet to the next, drives the [`TrackBuilder`], and
//! aligns GPS samples onto the video frames reported alongside the packets.

use crate::klv::{self, KlvError};
use crate::resample::resample_points;
use crate::source::{PacketSource, RawDumpSource, StreamEvent};
use crate::track::{BuilderState, TrackBuilder, TrackConfig};
use crate::types::{DecodeResult, FrameTable, Quaternion, Track, TrackStats};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during a decode session.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed stream: {0}")]
    Malformed(#[from] KlvError),

    #[error("No GPMF telemetry track found in {0}")]
    MissingTelemetryTrack(String),

    #[error("Nothing to export: no GPS point was accepted ({stats})")]
    NothingToExport { stats: TrackStats },
}

/// Read size used by [`TelemetryDecoder::decode_file`].
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Session options.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Track builder options
    pub track: TrackConfig,
    /// Fail on the first malformed record instead of skipping it
    pub strict: bool,
    /// Stop after this many video frames
    pub max_frames: Option<usize>,
    /// Bytes per read when decoding a raw dump
    pub chunk_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            track: TrackConfig::default(),
            strict: false,
            max_frames: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Streaming decoder for one telemetry track.
#[derive(Debug)]
pub struct TelemetryDecoder {
    config: DecoderConfig,
    builder: TrackBuilder,
    /// Incomplete record bytes carried to the next packet
    pending: Vec<u8>,
    track: Track,
    frames: FrameTable,
    /// Frames before this index already hold telemetry
    aligned_frames: usize,
    malformed_records: usize,
}

impl Default for TelemetryDecoder {
    fn default() -> Self {
        Self::new(DecoderConfig::default())
    }
}

impl TelemetryDecoder {
    /// Creates a decoder with fresh builder state.
    pub fn new(config: DecoderConfig) -> Self {
        Self::with_state(config, BuilderState::default())
    }

    /// Creates a decoder that continues from the builder state of a
    /// previous segment.
    pub fn with_state(config: DecoderConfig, state: BuilderState) -> Self {
        let builder = TrackBuilder::with_state(config.track.clone(), state);
        Self {
            config,
            builder,
            pending: Vec::new(),
            track: Track::new(),
            frames: FrameTable::new(),
            aligned_frames: 0,
            malformed_records: 0,
        }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Running builder state, for handing off to the next segment.
    pub fn state(&self) -> &BuilderState {
        self.builder.state()
    }

    /// Samples accumulated so far.
    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// Bytes currently held back waiting for the rest of a record.
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Returns true once `max_frames` frames have been recorded.
    pub fn frame_limit_reached(&self) -> bool {
        self.config
            .max_frames
            .is_some_and(|max| self.frames.len() >= max)
    }

    /// Records one video frame slot. Returns false if the frame limit was
    /// already reached and the frame was ignored.
    pub fn push_frame(&mut self, index: u64, presentation_time: f64) -> bool {
        if self.frame_limit_reached() {
            return false;
        }
        self.frames.push_frame(index, presentation_time);
        true
    }

    /// Decodes one telemetry packet and returns the samples it produced.
    ///
    /// The samples are also appended to the session track. If the packet
    /// produced GPS points, they are resampled onto the frames received
    /// since the last GPS-bearing packet.
    ///
    /// In strict mode a malformed record fails the whole packet and its
    /// bytes are dropped.
    pub fn decode_packet(&mut self, packet: &[u8]) -> Result<Track, DecodeError> {
        let mut buffer = std::mem::take(&mut self.pending);
        buffer.extend_from_slice(packet);

        let decoded = klv::decode(&buffer);
        self.malformed_records += decoded.malformed.len();
        if self.config.strict {
            if let Some(err) = decoded.malformed.first() {
                return Err(err.clone().into());
            }
        }

        let mut packet_track = Track::new();
        self.builder.consume(decoded.iter(), &mut packet_track);
        self.pending = decoded.leftover.to_vec();

        if !packet_track.points.is_empty() {
            self.align(&packet_track);
        }
        self.track.extend(&packet_track);
        Ok(packet_track)
    }

    /// Fills the frames not yet aligned from one packet's samples.
    fn align(&mut self, packet: &Track) {
        let start = self.aligned_frames;
        let end = self.frames.len();
        if start == end {
            return;
        }

        let gps = resample_points(&packet.points, end - start);
        let frames = &mut self.frames;
        for (i, slot) in (start..end).enumerate() {
            frames.gps_time[slot] = Some(gps.timestamp[i]);
            frames.latitude[slot] = Some(gps.latitude[i]);
            frames.longitude[slot] = Some(gps.longitude[i]);
            frames.elevation[slot] = Some(gps.elevation[i]);
            frames.speed[slot] = Some(gps.speed[i]);
            frames.camera_orientation[slot] = positional(&packet.camera_orientation, i);
            frames.image_orientation[slot] = positional(&packet.image_orientation, i);
        }
        self.aligned_frames = end;
    }

    /// Drives a packet source to its end or to the frame limit.
    pub fn run<S: PacketSource>(&mut self, source: &mut S) -> Result<(), DecodeError> {
        if !source.has_telemetry() {
            return Err(DecodeError::MissingTelemetryTrack(source.describe()));
        }

        while let Some(event) = source.next_event()? {
            match event {
                StreamEvent::Frame { index, time } => {
                    if !self.push_frame(index, time) {
                        log::info!("Reached frame limit, stopping");
                        break;
                    }
                }
                StreamEvent::Metadata(packet) => {
                    self.decode_packet(&packet)?;
                }
            }
        }
        Ok(())
    }

    /// Decodes a raw GPMF dump from disk.
    pub fn decode_file<P: AsRef<Path>>(&mut self, path: P) -> Result<DecodeResult, DecodeError> {
        let mut source = RawDumpSource::open(path, self.config.chunk_size)?;
        self.run(&mut source)?;
        Ok(self.finish())
    }

    /// Ends the session and hands over everything decoded so far.
    ///
    /// The builder state is kept, so the decoder can go on with the next
    /// segment of the same recording.
    pub fn finish(&mut self) -> DecodeResult {
        let track = std::mem::take(&mut self.track);
        let frames = std::mem::take(&mut self.frames);
        let trailing_bytes = std::mem::take(&mut self.pending).len();
        let malformed_records = std::mem::take(&mut self.malformed_records);
        self.aligned_frames = 0;

        track.stats.log_summary();
        if trailing_bytes > 0 {
            log::warn!("{} trailing bytes could not be decoded", trailing_bytes);
        }

        DecodeResult {
            track,
            frames,
            trailing_bytes,
            malformed_records,
        }
    }

    /// Discards all session data and builder state.
    pub fn reset(&mut self) {
        *self = Self::new(self.config.clone());
    }
}

#[inline]
fn positional(samples: &[Quaternion], slot: usize) -> Option<Quaternion> {
    samples.get(slot).or(samples.last()).copied()
}
