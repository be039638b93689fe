//! Packet sources feeding the streaming decoder.
//!
//! A source stands in for a container demuxer: it yields video frame slots
//! and raw telemetry packets in presentation order.

use crate::decoder::DecodeError;
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// One item produced by a demuxer.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A decoded video frame: its index and presentation time in seconds
    Frame { index: u64, time: f64 },
    /// One packet of the telemetry track
    Metadata(Vec<u8>),
}

/// Ordered supply of frames and telemetry packets.
pub trait PacketSource {
    /// Returns false if the container has no telemetry track.
    fn has_telemetry(&self) -> bool;

    /// Returns the next event, or `None` at end of stream.
    fn next_event(&mut self) -> Result<Option<StreamEvent>, DecodeError>;

    /// Human-readable name of the input, used in error messages.
    fn describe(&self) -> String {
        "input".to_string()
    }
}

/// Reads a raw GPMF dump (the extracted telemetry track) in fixed-size
/// chunks. Chunk boundaries fall anywhere, including inside records.
pub struct RawDumpSource<R: Read> {
    reader: R,
    chunk_size: usize,
    has_telemetry: bool,
    name: String,
}

impl RawDumpSource<BufReader<File>> {
    /// Opens a dump file. An empty file reports no telemetry.
    pub fn open<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<Self, DecodeError> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let has_telemetry = file.metadata()?.len() > 0;
        Ok(Self {
            reader: BufReader::new(file),
            chunk_size: chunk_size.max(1),
            has_telemetry,
            name: path.display().to_string(),
        })
    }
}

impl<R: Read> RawDumpSource<R> {
    /// Wraps an arbitrary reader.
    pub fn from_reader(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
            has_telemetry: true,
            name: "reader".to_string(),
        }
    }
}

impl<R: Read> PacketSource for RawDumpSource<R> {
    fn has_telemetry(&self) -> bool {
        self.has_telemetry
    }

    fn next_event(&mut self) -> Result<Option<StreamEvent>, DecodeError> {
        let mut chunk = vec![0u8; self.chunk_size];
        let bytes_read = self.reader.read(&mut chunk)?;
        if bytes_read == 0 {
            return Ok(None);
        }
        chunk.truncate(bytes_read);
        Ok(Some(StreamEvent::Metadata(chunk)))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// An in-memory event queue, for callers that demux elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    events: VecDeque<StreamEvent>,
    has_telemetry: bool,
}

impl MemorySource {
    pub fn new(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
            has_telemetry: true,
        }
    }

    /// A source whose container lacks a telemetry track.
    pub fn without_telemetry() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: StreamEvent) {
        self.events.push_back(event);
    }
}

impl PacketSource for MemorySource {
    fn has_telemetry(&self) -> bool {
        self.has_telemetry
    }

    fn next_event(&mut self) -> Result<Option<StreamEvent>, DecodeError> {
        Ok(self.events.pop_front())
    }
}
