//! Pipeline configuration
//!
//! Queue depth, thread-affinity diagnostics and the synthetic source, stored
//! as JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::block::{AudioFormat, VideoFormat};
use crate::queue::MAX_CAPACITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// What to do when a stream is driven from the wrong thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadCheckMode {
    /// Skip the check entirely
    Off,
    /// Log the violation and keep going
    Warn,
    /// Abort the offending thread
    Panic,
}

impl Default for ThreadCheckMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            ThreadCheckMode::Panic
        } else {
            ThreadCheckMode::Warn
        }
    }
}

/// Per-stream queue settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Pending blocks tolerated before the producer blocks; the queue holds
    /// at most `queue_capacity + 1` blocks.
    pub queue_capacity: usize,
    pub thread_checks: ThreadCheckMode,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            thread_checks: ThreadCheckMode::default(),
        }
    }
}

/// How a source drives its streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduling {
    /// One producer thread per stream
    Threaded,
    /// All streams interleaved on one thread
    #[default]
    Cooperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSourceConfig {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u32,
    pub frame_rate: u32,
}

impl Default for VideoSourceConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            bits_per_pixel: 24,
            frame_rate: 25,
        }
    }
}

impl VideoSourceConfig {
    pub fn format(&self) -> VideoFormat {
        VideoFormat::new(self.width, self.height, self.bits_per_pixel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSourceConfig {
    pub channels: u32,
    pub bits_per_sample: u32,
    pub sample_rate: u32,
    pub samples_per_block: u32,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            bits_per_sample: 16,
            sample_rate: 44_100,
            samples_per_block: 1764, // 40ms
        }
    }
}

impl AudioSourceConfig {
    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            bits_per_sample: self.bits_per_sample,
            channels: self.channels,
            sample_rate: self.sample_rate,
            samples: self.samples_per_block,
        }
    }
}

/// Synthetic source settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub scheduling: Scheduling,
    /// Blocks per stream before end-of-stream (None = run until stopped)
    pub max_blocks: Option<u64>,
    /// Seed for the payload generator
    pub seed: u64,
    pub video: VideoSourceConfig,
    pub audio: AudioSourceConfig,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            scheduling: Scheduling::default(),
            max_blocks: None,
            seed: 0x853c49e6748fea9b,
            video: VideoSourceConfig::default(),
            audio: AudioSourceConfig::default(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub stream: StreamConfig,
    pub source: SourceConfig,
}

impl FlowConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: FlowConfig = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!("Loaded config from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.queue_capacity > MAX_CAPACITY {
            return Err(ConfigError::Invalid(format!(
                "queue capacity {} exceeds the maximum of {}",
                self.stream.queue_capacity, MAX_CAPACITY
            )));
        }

        let video = &self.source.video;
        if video.width == 0 || video.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "video size {}x{} is empty",
                video.width, video.height
            )));
        }
        // The source generates packed RGB only
        if video.bits_per_pixel != 24 && video.bits_per_pixel != 32 {
            return Err(ConfigError::Invalid(format!(
                "video bits per pixel must be 24 or 32, got {}",
                video.bits_per_pixel
            )));
        }
        if video.frame_rate == 0 {
            return Err(ConfigError::Invalid("video frame rate is zero".into()));
        }

        let audio = &self.source.audio;
        if audio.channels == 0 || audio.samples_per_block == 0 {
            return Err(ConfigError::Invalid("audio block is empty".into()));
        }
        if audio.bits_per_sample == 0 || audio.bits_per_sample % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "audio bits per sample must be a non-zero multiple of 8, got {}",
                audio.bits_per_sample
            )));
        }
        if audio.sample_rate == 0 {
            return Err(ConfigError::Invalid("audio sample rate is zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.stream.queue_capacity, 1);
        assert_eq!(config.source.scheduling, Scheduling::Cooperative);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let json = r#"{ "stream": { "thread_checks": "off" }, "source": { "max_blocks": 10 } }"#;
        let config: FlowConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stream.thread_checks, ThreadCheckMode::Off);
        assert_eq!(config.stream.queue_capacity, 1);
        assert_eq!(config.source.max_blocks, Some(10));
        assert_eq!(config.source.video.frame_rate, 25);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");

        let mut config = FlowConfig::default();
        config.stream.queue_capacity = 4;
        config.source.scheduling = Scheduling::Threaded;
        config.save(&path).unwrap();

        let loaded = FlowConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{ "source": { "video": { "frame_rate": 0 } } }"#).unwrap();

        match FlowConfig::load(&path) {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("expected invalid config, got {:?}", other),
        }

        let mut config = FlowConfig::default();
        config.source.audio.bits_per_sample = 12;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_video_depth_limited_to_rgb() {
        let mut config = FlowConfig::default();
        for bpp in [16, 48] {
            config.source.video.bits_per_pixel = bpp;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
        config.source.video.bits_per_pixel = 32;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_oversized_queue_capacity_rejected() {
        let mut config = FlowConfig::default();
        config.stream.queue_capacity = MAX_CAPACITY;
        assert!(config.validate().is_ok());

        for capacity in [MAX_CAPACITY + 1, 1 << 40, usize::MAX] {
            config.stream.queue_capacity = capacity;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }
}
