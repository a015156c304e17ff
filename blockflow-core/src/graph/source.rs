//! Synthetic audio/video source
//!
//! Generates frames and sample blocks filled with pseudo-random bytes, one
//! writer per stream kind, both registered in the node's write group. Each
//! block is stamped with the stream's running time, which then advances by
//! one frame (video) or one block of samples (audio).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{GraphError, GraphNode, GraphResult};
use crate::block::{self, BlockFormat, StreamBlock, StreamKind, StreamSubType};
use crate::config::{ConfigError, Scheduling, SourceConfig, StreamConfig};
use crate::group::StreamGroupWrite;
use crate::queue::WriteOutcome;
use crate::scheduler::{MultiTask, Task, TaskFlow};
use crate::stream::{StreamReader, StreamWriter};

/// Produces the blocks of one stream, one per step
struct Generator {
    writer: Arc<StreamWriter>,
    format: BlockFormat,
    subtype: StreamSubType,
    block_duration: u64,
    time: u64,
    produced: u64,
    max_blocks: Option<u64>,
    check_thread: bool,
    rng_state: u64,
}

impl Generator {
    fn new(writer: Arc<StreamWriter>, format: BlockFormat, config: &SourceConfig, check_thread: bool) -> Self {
        let (block_duration, salt) = match format {
            BlockFormat::Video(_) => (block::video_frame_duration(config.video.frame_rate), 0x9e37_79b9_7f4a_7c15),
            BlockFormat::Audio(audio) => (audio.duration(), 0xc2b2_ae3d_27d4_eb4f),
        };
        Self {
            subtype: writer.subtype(),
            writer,
            format,
            block_duration,
            time: 0,
            produced: 0,
            max_blocks: config.max_blocks,
            check_thread,
            // xorshift must not start at zero
            rng_state: (config.seed ^ salt).max(1),
        }
    }

    // xorshift64
    fn next_random(&mut self) -> u64 {
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    fn fill(&mut self, data: &mut [u8]) {
        for chunk in data.chunks_mut(8) {
            let bytes = self.next_random().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }

    fn payload_size(&self) -> usize {
        match &self.format {
            BlockFormat::Video(video) => video.frame_size(),
            BlockFormat::Audio(audio) => audio.buffer_size(),
        }
    }
}

impl Task for Generator {
    fn step(&mut self) -> TaskFlow {
        if self.max_blocks.is_some_and(|max| self.produced >= max) {
            tracing::debug!("{} source reached {} blocks", self.writer.kind(), self.produced);
            self.writer.disable_write(true);
            return TaskFlow::Finished;
        }

        let mut payload = vec![0u8; self.payload_size()];
        self.fill(&mut payload);
        let block = StreamBlock::new(self.format, self.subtype, self.time, payload);
        self.time += self.block_duration;

        let outcome = if self.check_thread {
            self.writer.write_block(block)
        } else {
            self.writer.write_block_unchecked_thread(block)
        };

        match outcome {
            WriteOutcome::Queued => {
                self.produced += 1;
                TaskFlow::Continue
            }
            WriteOutcome::Dropped => TaskFlow::Finished,
        }
    }
}

/// Source node generating one video and one audio stream
pub struct SourceRandom {
    name: String,
    config: SourceConfig,
    group: StreamGroupWrite,
    video: Arc<StreamWriter>,
    audio: Arc<StreamWriter>,
    multi_task: Option<MultiTask>,
    threads: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl SourceRandom {
    /// Create both streams and announce their formats with a properties
    /// block each
    pub fn new(name: impl Into<String>, config: &SourceConfig, stream_config: &StreamConfig) -> GraphResult<Self> {
        let name = name.into();
        let group = StreamGroupWrite::new(name.clone());

        let video_subtype = match config.video.bits_per_pixel {
            24 => StreamSubType::Rgb24,
            32 => StreamSubType::Rgb32,
            bpp => {
                return Err(ConfigError::Invalid(format!("no RGB subtype for {} bits per pixel", bpp)).into());
            }
        };
        let mut video = StreamWriter::new(StreamKind::Video, video_subtype, stream_config)?;
        let mut audio = StreamWriter::new(StreamKind::Audio, StreamSubType::Pcm, stream_config)?;
        group.add_stream(&mut video);
        group.add_stream(&mut audio);

        let source = Self {
            name,
            config: *config,
            group,
            video: Arc::new(video),
            audio: Arc::new(audio),
            multi_task: None,
            threads: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        source.send_stream_properties();
        Ok(source)
    }

    fn send_stream_properties(&self) {
        let video = BlockFormat::Video(self.config.video.format());
        self.video
            .write_block_unchecked_thread(StreamBlock::properties(video, self.video.subtype()));

        let audio = BlockFormat::Audio(self.config.audio.format());
        self.audio
            .write_block_unchecked_thread(StreamBlock::properties(audio, StreamSubType::Pcm));
    }

    pub fn output(&self, kind: StreamKind) -> &Arc<StreamWriter> {
        match kind {
            StreamKind::Video => &self.video,
            StreamKind::Audio => &self.audio,
        }
    }

    /// Create the reader of the `kind` output
    pub fn create_reader(&self, kind: StreamKind) -> GraphResult<StreamReader> {
        Ok(self.output(kind).create_reader()?)
    }

    pub fn group(&self) -> &StreamGroupWrite {
        &self.group
    }

    fn generators(&self, check_thread: bool) -> [Generator; 2] {
        [
            Generator::new(
                self.video.clone(),
                BlockFormat::Video(self.config.video.format()),
                &self.config,
                check_thread,
            ),
            Generator::new(
                self.audio.clone(),
                BlockFormat::Audio(self.config.audio.format()),
                &self.config,
                check_thread,
            ),
        ]
    }

    fn is_started(&self) -> bool {
        self.multi_task.is_some() || !self.threads.is_empty()
    }

    fn join_threads(&mut self) {
        if let Some(mut multi_task) = self.multi_task.take() {
            multi_task.join();
        }
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Source '{}': producer thread panicked", self.name);
            }
        }
    }
}

impl GraphNode for SourceRandom {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> GraphResult<()> {
        if self.is_started() {
            return Err(GraphError::AlreadyRunning(self.name.clone()));
        }
        self.stop.store(false, Ordering::SeqCst);
        self.group.set_start_time_abs(block::wall_clock_time());

        match self.config.scheduling {
            Scheduling::Cooperative => {
                // One thread drives both streams of the group, so the
                // distinct-thread check does not apply
                let mut multi_task = MultiTask::new(format!("{}-tasks", self.name));
                for generator in self.generators(false) {
                    multi_task.add_task(generator);
                }
                multi_task.start()?;
                self.multi_task = Some(multi_task);
            }
            Scheduling::Threaded => {
                for mut generator in self.generators(true) {
                    let stop = self.stop.clone();
                    let thread_name = format!("{}-{}", self.name, generator.writer.kind());
                    let handle = thread::Builder::new().name(thread_name).spawn(move || {
                        while !stop.load(Ordering::SeqCst) {
                            if generator.step() == TaskFlow::Finished {
                                break;
                            }
                        }
                    });
                    match handle {
                        Ok(handle) => self.threads.push(handle),
                        Err(e) => {
                            self.stop();
                            return Err(GraphError::Spawn(e));
                        }
                    }
                }
            }
        }

        tracing::info!("Source '{}' started ({:?})", self.name, self.config.scheduling);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.is_started() {
            return;
        }
        self.stop.store(true, Ordering::SeqCst);
        // Wake producers blocked on full queues before joining
        self.video.disable_write(true);
        self.audio.disable_write(true);
        if let Some(mut multi_task) = self.multi_task.take() {
            multi_task.stop();
        }
        self.join_threads();
        tracing::info!("Source '{}' stopped", self.name);
    }

    fn wait(&mut self) {
        self.join_threads();
    }
}

impl Drop for SourceRandom {
    fn drop(&mut self) {
        self.stop();
    }
}
