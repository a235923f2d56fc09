//! Compressed packets as produced by a [`Demuxer`](crate::source::Demuxer).

use std::sync::Arc;

/// One unit of still-compressed audio.
///
/// The payload is reference-counted: cloning a packet shares the bytes instead of
/// copying them, so the demuxer's copy stays valid after the queue takes its own.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompressedPacket {
    stream_index: u32,
    ts: u64,
    dur: u64,
    data: Arc<[u8]>,
}

impl CompressedPacket {
    pub fn new(stream_index: u32, ts: u64, dur: u64, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            stream_index,
            ts,
            dur,
            data: data.into(),
        }
    }

    /// Index of the stream this packet was demuxed from.
    pub fn stream_index(&self) -> u32 {
        self.stream_index
    }

    /// Presentation timestamp in the stream's time base.
    pub fn ts(&self) -> u64 {
        self.ts
    }

    /// Duration in the stream's time base.
    pub fn dur(&self) -> u64 {
        self.dur
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Byte length counted against the queue size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
