//! Terminal consumer
//!
//! Drains every input on its own thread, hands each block to an optional
//! callback and keeps statistics per input. All inputs share one read group,
//! whose start time is taken from the wall clock when the first block arrives.

use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{GraphError, GraphNode, GraphResult};
use crate::block::{self, StreamBlock, StreamKind};
use crate::group::StreamGroupRead;
use crate::stream::StreamReader;

pub type BlockCallback = Arc<dyn Fn(&StreamBlock) + Send + Sync>;

/// Counters for one input stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Data blocks received
    pub blocks: u64,
    /// Properties blocks received
    pub properties: u64,
    /// Payload bytes of data blocks
    pub bytes: u64,
    pub first_time: Option<u64>,
    pub last_time: Option<u64>,
    /// Data blocks stamped earlier than their predecessor
    pub regressions: u64,
}

impl StreamStats {
    fn record(&mut self, block: &StreamBlock) {
        if block.is_properties() {
            self.properties += 1;
            return;
        }

        let time = block.time();
        if self.last_time.is_some_and(|last| time < last) {
            self.regressions += 1;
        }
        self.first_time.get_or_insert(time);
        self.last_time = Some(time);
        self.blocks += 1;
        self.bytes += block.len() as u64;
    }

    /// Stream time covered between the first and last data block
    pub fn span(&self) -> u64 {
        match (self.first_time, self.last_time) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    /// Wall-clock origin of the sink's read group
    pub start_time_abs: Option<u64>,
    /// Kind and counters of each input, in `add_input` order
    pub inputs: Vec<(StreamKind, StreamStats)>,
}

impl SinkStats {
    /// Counters of the first input carrying `kind`
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamStats> {
        self.inputs.iter().find(|(k, _)| *k == kind).map(|(_, stats)| stats)
    }

    pub fn input(&self, index: usize) -> Option<&StreamStats> {
        self.inputs.get(index).map(|(_, stats)| stats)
    }

    /// Data blocks received across all inputs
    pub fn total_blocks(&self) -> u64 {
        self.inputs.iter().map(|(_, s)| s.blocks).sum()
    }
}

/// Shared view of a sink's statistics that outlives the sink
#[derive(Debug, Clone, Default)]
pub struct SinkStatsHandle(Arc<Mutex<SinkStats>>);

impl SinkStatsHandle {
    pub fn snapshot(&self) -> SinkStats {
        self.0.lock().clone()
    }
}

pub struct BlockSink {
    name: String,
    group: StreamGroupRead,
    inputs: Vec<Arc<StreamReader>>,
    callback: Option<BlockCallback>,
    stats: SinkStatsHandle,
    threads: Vec<JoinHandle<()>>,
}

impl BlockSink {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            group: StreamGroupRead::new(name.clone()),
            name,
            inputs: Vec::new(),
            callback: None,
            stats: SinkStatsHandle::default(),
            threads: Vec::new(),
        }
    }

    /// Call `callback` for every block received, on the input's thread
    pub fn with_callback(mut self, callback: impl Fn(&StreamBlock) + Send + Sync + 'static) -> Self {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Take ownership of `reader` and add it to the sink's read group
    pub fn add_input(&mut self, mut reader: StreamReader) -> usize {
        let index = self.group.add_stream(&mut reader);
        self.stats.0.lock().inputs.push((reader.kind(), StreamStats::default()));
        self.inputs.push(Arc::new(reader));
        index
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn group(&self) -> &StreamGroupRead {
        &self.group
    }

    pub fn stats_handle(&self) -> SinkStatsHandle {
        self.stats.clone()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.snapshot()
    }

    fn join_threads(&mut self) {
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Sink '{}': consumer thread panicked", self.name);
            }
        }
    }
}

fn consume(index: usize, reader: &StreamReader, callback: Option<&BlockCallback>, stats: &SinkStatsHandle) {
    let kind = reader.kind();
    let mut first = true;

    while let Some(block) = reader.read_block() {
        if first {
            first = false;
            reader.set_start_time_abs(block::wall_clock_time());
            stats.0.lock().start_time_abs = reader.start_time_abs();
        }

        tracing::trace!("{} block {} at {}", kind, block.id(), block.time());
        if let Some(callback) = callback {
            callback(&block);
        }
        if let Some((_, input)) = stats.0.lock().inputs.get_mut(index) {
            input.record(&block);
        }
    }

    tracing::debug!("{} input #{} finished", kind, index);
}

impl GraphNode for BlockSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> GraphResult<()> {
        if !self.threads.is_empty() {
            return Err(GraphError::AlreadyRunning(self.name.clone()));
        }
        if self.inputs.is_empty() {
            return Err(GraphError::NoInputs(self.name.clone()));
        }

        for (index, reader) in self.inputs.iter().enumerate() {
            let reader = reader.clone();
            let callback = self.callback.clone();
            let stats = self.stats.clone();
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.name, index))
                .spawn(move || consume(index, &reader, callback.as_ref(), &stats));

            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.stop();
                    return Err(GraphError::Spawn(e));
                }
            }
        }

        tracing::info!("Sink '{}' started with {} inputs", self.name, self.inputs.len());
        Ok(())
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        for reader in &self.inputs {
            reader.disable_read(true);
        }
        self.join_threads();

        let stats = self.stats.snapshot();
        tracing::info!("Sink '{}' stopped, {} blocks received", self.name, stats.total_blocks());
    }

    fn wait(&mut self) {
        self.join_threads();
    }
}

impl Drop for BlockSink {
    fn drop(&mut self) {
        self.stop();
    }
}
