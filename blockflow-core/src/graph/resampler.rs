//! Single-stream transform stage
//!
//! Reads each block from its upstream stream, runs it through a
//! [`BlockTransform`] and writes the result downstream. Properties blocks are
//! forwarded untouched. When upstream ends, downstream is ended too.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::{GraphError, GraphNode, GraphResult};
use crate::block::StreamBlock;
use crate::config::StreamConfig;
use crate::group::{StreamGroupRead, StreamGroupWrite};
use crate::queue::WriteOutcome;
use crate::stream::{StreamReader, StreamWriter};

/// Per-block processing applied by a [`TransformResampler`]
pub trait BlockTransform: Send {
    fn transform(&mut self, block: StreamBlock) -> StreamBlock;
}

/// Forwards blocks unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl BlockTransform for Passthrough {
    fn transform(&mut self, block: StreamBlock) -> StreamBlock {
        block
    }
}

pub struct TransformResampler {
    name: String,
    input: Arc<StreamReader>,
    output: Arc<StreamWriter>,
    input_group: StreamGroupRead,
    output_group: StreamGroupWrite,
    transform: Option<Box<dyn BlockTransform>>,
    processed: Arc<AtomicU64>,
    handle: Option<JoinHandle<Box<dyn BlockTransform>>>,
}

impl TransformResampler {
    /// Take ownership of `input` and create a downstream stream of the same
    /// kind and subtype
    pub fn new(name: impl Into<String>, mut input: StreamReader, config: &StreamConfig) -> GraphResult<Self> {
        let name = name.into();

        let input_group = StreamGroupRead::new(format!("{}-in", name));
        input_group.add_stream(&mut input);

        let mut output = StreamWriter::new(input.kind(), input.subtype(), config)?;
        let output_group = StreamGroupWrite::new(format!("{}-out", name));
        output_group.add_stream(&mut output);

        Ok(Self {
            name,
            input: Arc::new(input),
            output: Arc::new(output),
            input_group,
            output_group,
            transform: Some(Box::new(Passthrough)),
            processed: Arc::new(AtomicU64::new(0)),
            handle: None,
        })
    }

    /// Replace the transform; takes effect on the next start
    pub fn with_transform(mut self, transform: impl BlockTransform + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    /// Create the reader of the downstream stream
    pub fn create_reader(&self) -> GraphResult<StreamReader> {
        Ok(self.output.create_reader()?)
    }

    /// Data blocks transformed so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn input_group(&self) -> &StreamGroupRead {
        &self.input_group
    }

    pub fn output_group(&self) -> &StreamGroupWrite {
        &self.output_group
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            match handle.join() {
                Ok(transform) => self.transform = Some(transform),
                Err(_) => tracing::error!("Resampler '{}' thread panicked", self.name),
            }
        }
    }
}

fn run(
    name: &str,
    input: &StreamReader,
    output: &StreamWriter,
    transform: &mut dyn BlockTransform,
    processed: &AtomicU64,
) {
    while let Some(block) = input.read_block() {
        let block = if block.is_properties() {
            block
        } else {
            processed.fetch_add(1, Ordering::Relaxed);
            transform.transform(block)
        };

        tracing::trace!("Resampler '{}': block at {}", name, block.time());
        if output.write_block(block) == WriteOutcome::Dropped {
            tracing::debug!("Resampler '{}': downstream disabled", name);
            break;
        }
    }

    output.disable_write(true);
}

impl GraphNode for TransformResampler {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> GraphResult<()> {
        let mut transform = match self.transform.take() {
            Some(transform) if self.handle.is_none() => transform,
            other => {
                self.transform = other;
                return Err(GraphError::AlreadyRunning(self.name.clone()));
            }
        };

        let name = self.name.clone();
        let input = self.input.clone();
        let output = self.output.clone();
        let processed = self.processed.clone();

        let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
            run(&name, &input, &output, transform.as_mut(), &processed);
            transform
        })?;
        self.handle = Some(spawned);

        tracing::info!("Resampler '{}' started ({})", self.name, self.input.kind());
        Ok(())
    }

    fn stop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        self.input.disable_read(true);
        self.output.disable_write(true);
        self.join();
        tracing::info!("Resampler '{}' stopped after {} blocks", self.name, self.processed());
    }

    fn wait(&mut self) {
        self.join();
    }
}

impl Drop for TransformResampler {
    fn drop(&mut self) {
        self.stop();
    }
}
