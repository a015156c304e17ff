//! # Stream Blocks
//!
//! A block is one timestamped unit of payload moving through a stream:
//! a video frame or a run of audio samples.
//!
//! Timestamps use 100ns units. Blocks are uniquely owned: the producer hands
//! a block to a queue with `write_block`, and the reader that dequeues it
//! becomes its new owner. Blocks are never cloned.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Block timestamps tick at 10 MHz (100ns resolution).
pub const TIME_UNITS_PER_SECOND: u64 = 10_000_000;

/// Duration of one video frame at `frame_rate` frames per second.
pub fn video_frame_duration(frame_rate: u32) -> u64 {
    if frame_rate == 0 {
        return 0;
    }
    TIME_UNITS_PER_SECOND / frame_rate as u64
}

/// Duration of a block of `samples` audio samples at `sample_rate` Hz.
pub fn audio_block_duration(samples: u32, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    samples as u64 * TIME_UNITS_PER_SECOND / sample_rate as u64
}

/// Current wall-clock time in 100ns units since the Unix epoch, used as a
/// group's absolute start time
pub fn wall_clock_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as u64)
        .unwrap_or(0)
}

// ============================================================================
// Stream Types
// ============================================================================

/// Kind of media a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Video,
    Audio,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

/// Payload layout within a stream kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamSubType {
    /// Packed 8-bit RGB
    Rgb24,
    /// Packed 8-bit RGB with padding byte
    Rgb32,
    /// Planar YUV 4:2:0
    Yuv420,
    /// Interleaved PCM samples
    Pcm,
    /// Compressed bitstream (either kind)
    Encoded,
}

impl StreamSubType {
    /// Whether this subtype can appear in a stream of `kind`
    pub fn belongs_to(&self, kind: StreamKind) -> bool {
        match self {
            Self::Rgb24 | Self::Rgb32 | Self::Yuv420 => kind == StreamKind::Video,
            Self::Pcm => kind == StreamKind::Audio,
            Self::Encoded => true,
        }
    }
}

// ============================================================================
// Formats
// ============================================================================

/// Frame buffer layout of a video block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    /// Bytes per row
    pub stride: u32,
    pub bits_per_pixel: u32,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, bits_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            stride: width * (bits_per_pixel / 8),
            bits_per_pixel,
        }
    }

    /// Size of one frame in bytes
    pub fn frame_size(&self) -> usize {
        self.stride as usize * self.height as usize
    }
}

/// Sample layout of an audio block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub bits_per_sample: u32,
    pub channels: u32,
    pub sample_rate: u32,
    /// Samples per channel carried by the block
    pub samples: u32,
}

impl AudioFormat {
    /// Bytes per sample frame across all channels
    pub fn bytes_per_sample(&self) -> usize {
        self.channels as usize * (self.bits_per_sample as usize / 8)
    }

    pub fn buffer_size(&self) -> usize {
        self.bytes_per_sample() * self.samples as usize
    }

    /// Playback duration of the block in 100ns units
    pub fn duration(&self) -> u64 {
        audio_block_duration(self.samples, self.sample_rate)
    }
}

/// Format descriptor; its variant determines the block's [`StreamKind`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockFormat {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl BlockFormat {
    pub fn kind(&self) -> StreamKind {
        match self {
            Self::Video(_) => StreamKind::Video,
            Self::Audio(_) => StreamKind::Audio,
        }
    }
}

// ============================================================================
// Stream Block
// ============================================================================

/// One timestamped unit of stream payload
#[derive(Debug)]
pub struct StreamBlock {
    id: u64,
    subtype: StreamSubType,
    format: BlockFormat,
    time: u64,
    payload: Bytes,
    properties: bool,
}

impl StreamBlock {
    fn build(format: BlockFormat, subtype: StreamSubType, time: u64, payload: Bytes, properties: bool) -> Self {
        static BLOCK_COUNTER: AtomicU64 = AtomicU64::new(0);
        Self {
            id: BLOCK_COUNTER.fetch_add(1, Ordering::Relaxed),
            subtype,
            format,
            time,
            payload,
            properties,
        }
    }

    /// Create a data block carrying `payload` at stream time `time`
    pub fn new(format: BlockFormat, subtype: StreamSubType, time: u64, payload: impl Into<Bytes>) -> Self {
        Self::build(format, subtype, time, payload.into(), false)
    }

    pub fn video(format: VideoFormat, subtype: StreamSubType, time: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(BlockFormat::Video(format), subtype, time, payload)
    }

    pub fn audio(format: AudioFormat, time: u64, payload: impl Into<Bytes>) -> Self {
        Self::new(BlockFormat::Audio(format), StreamSubType::Pcm, time, payload)
    }

    /// Create a format-only block announcing stream properties downstream
    pub fn properties(format: BlockFormat, subtype: StreamSubType) -> Self {
        Self::build(format, subtype, 0, Bytes::new(), true)
    }

    /// Process-unique block id, assigned at creation
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> StreamKind {
        self.format.kind()
    }

    pub fn subtype(&self) -> StreamSubType {
        self.subtype
    }

    pub fn format(&self) -> &BlockFormat {
        &self.format
    }

    /// Stream time in 100ns units
    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn is_properties(&self) -> bool {
        self.properties
    }

    /// Take the payload out, consuming the block
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Replace the payload and format, keeping identity and timing
    pub fn with_payload(mut self, format: BlockFormat, payload: impl Into<Bytes>) -> Self {
        debug_assert_eq!(format.kind(), self.format.kind());
        self.format = format;
        self.payload = payload.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations() {
        assert_eq!(video_frame_duration(25), 400_000);
        assert_eq!(video_frame_duration(0), 0);
        // 1764 samples at 44.1kHz = 40ms
        assert_eq!(audio_block_duration(1764, 44_100), 400_000);
        assert_eq!(audio_block_duration(1024, 0), 0);
    }

    #[test]
    fn test_subtype_kinds() {
        assert!(StreamSubType::Rgb24.belongs_to(StreamKind::Video));
        assert!(!StreamSubType::Rgb24.belongs_to(StreamKind::Audio));
        assert!(StreamSubType::Pcm.belongs_to(StreamKind::Audio));
        assert!(!StreamSubType::Pcm.belongs_to(StreamKind::Video));
        assert!(StreamSubType::Encoded.belongs_to(StreamKind::Video));
        assert!(StreamSubType::Encoded.belongs_to(StreamKind::Audio));
    }

    #[test]
    fn test_block_sizes() {
        let video = VideoFormat::new(320, 240, 24);
        assert_eq!(video.stride, 960);
        assert_eq!(video.frame_size(), 320 * 240 * 3);

        let audio = AudioFormat {
            bits_per_sample: 16,
            channels: 2,
            sample_rate: 48_000,
            samples: 480,
        };
        assert_eq!(audio.buffer_size(), 480 * 4);
        assert_eq!(audio.duration(), 100_000);
    }

    #[test]
    fn test_block_identity() {
        let format = VideoFormat::new(4, 4, 24);
        let a = StreamBlock::video(format, StreamSubType::Rgb24, 0, vec![0u8; 48]);
        let b = StreamBlock::video(format, StreamSubType::Rgb24, 400_000, vec![1u8; 48]);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.kind(), StreamKind::Video);
        assert_eq!(b.time(), 400_000);
        assert!(!a.is_properties());

        let props = StreamBlock::properties(BlockFormat::Video(format), StreamSubType::Rgb24);
        assert!(props.is_properties());
        assert!(props.is_empty());
    }
}
