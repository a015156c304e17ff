//! # Pipeline Graph
//!
//! Nodes produce, transform or consume blocks over streams:
//!
//! ```text
//! ┌──────────────┐  video  ┌───────────────────┐  video  ┌───────────┐
//! │ SourceRandom │────────►│ TransformResampler│────────►│ BlockSink │
//! │ (write group)│  audio  └───────────────────┘         │(read group)│
//! │              │────────────────────────────────────────►│           │
//! └──────────────┘                                        └───────────┘
//! ```
//!
//! Streams are wired while the graph is assembled: a downstream node takes a
//! reader created from the upstream node's writer. [`Graph`] owns the nodes
//! and starts consumers before producers.

mod resampler;
mod sink;
mod source;

pub use resampler::{BlockTransform, Passthrough, TransformResampler};
pub use sink::{BlockSink, SinkStats, SinkStatsHandle, StreamStats};
pub use source::SourceRandom;

use thiserror::Error;

use crate::config::ConfigError;
use crate::scheduler::SchedulerError;
use crate::stream::StreamError;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Stream setup failed: {0}")]
    Stream(#[from] StreamError),
    #[error("Scheduler failed: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Node '{0}' is already running")]
    AlreadyRunning(String),
    #[error("Node '{0}' has no inputs")]
    NoInputs(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

/// A pipeline stage with its own threads
pub trait GraphNode: Send {
    fn name(&self) -> &str;

    /// Spawn the node's threads
    fn start(&mut self) -> GraphResult<()>;

    /// Disable the node's streams and join its threads
    fn stop(&mut self);

    /// Block until the node's threads exit on their own
    fn wait(&mut self) {}
}

/// Owns the nodes of one pipeline
pub struct Graph {
    name: String,
    nodes: Vec<Box<dyn GraphNode>>,
    running: bool,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            running: false,
        }
    }

    /// Add a node; producers should be added before their consumers
    pub fn add_node(&mut self, node: impl GraphNode + 'static) {
        self.nodes.push(Box::new(node));
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start all nodes, consumers first. If a node fails to start, the nodes
    /// already started are stopped again and the error is returned.
    pub fn start(&mut self) -> GraphResult<()> {
        if self.running {
            return Err(GraphError::AlreadyRunning(self.name.clone()));
        }

        let count = self.nodes.len();
        for index in (0..count).rev() {
            if let Err(e) = self.nodes[index].start() {
                tracing::error!(
                    "Graph '{}': node '{}' failed to start: {}",
                    self.name,
                    self.nodes[index].name(),
                    e
                );
                for started in &mut self.nodes[index + 1..] {
                    started.stop();
                }
                return Err(e);
            }
        }

        self.running = true;
        tracing::info!("Graph '{}' started with {} nodes", self.name, count);
        Ok(())
    }

    /// Wait for every node to finish on its own (finite sources only)
    pub fn wait(&mut self) {
        for node in &mut self.nodes {
            node.wait();
        }
        self.running = false;
    }

    /// Stop all nodes, producers first
    pub fn stop(&mut self) {
        for node in &mut self.nodes {
            node.stop();
        }
        if self.running {
            tracing::info!("Graph '{}' stopped", self.name);
        }
        self.running = false;
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::StreamKind;
    use crate::config::{FlowConfig, Scheduling, StreamConfig, ThreadCheckMode};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl GraphNode for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn start(&mut self) -> GraphResult<()> {
            if self.fail {
                return Err(GraphError::NoInputs(self.name.clone()));
            }
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        fn stop(&mut self) {
            self.log.lock().push(format!("stop {}", self.name));
        }
    }

    fn recorder(name: &str, log: &Arc<Mutex<Vec<String>>>, fail: bool) -> Recorder {
        Recorder {
            name: name.to_string(),
            log: log.clone(),
            fail,
        }
    }

    #[test]
    fn test_start_stop_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new("order");
        graph.add_node(recorder("source", &log, false));
        graph.add_node(recorder("sink", &log, false));

        graph.start().unwrap();
        assert!(graph.is_running());
        assert!(matches!(graph.start(), Err(GraphError::AlreadyRunning(_))));
        graph.stop();

        assert_eq!(
            *log.lock(),
            vec!["start sink", "start source", "stop source", "stop sink"]
        );
    }

    #[test]
    fn test_failed_start_rolls_back() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut graph = Graph::new("rollback");
        graph.add_node(recorder("source", &log, true));
        graph.add_node(recorder("transform", &log, false));
        graph.add_node(recorder("sink", &log, false));

        assert!(graph.start().is_err());
        assert!(!graph.is_running());
        assert_eq!(
            *log.lock(),
            vec!["start sink", "start transform", "stop transform", "stop sink"]
        );
    }

    fn run_pipeline(scheduling: Scheduling) -> SinkStats {
        let mut config = FlowConfig::default();
        config.stream = StreamConfig {
            queue_capacity: 1,
            thread_checks: ThreadCheckMode::Panic,
        };
        config.source.scheduling = scheduling;
        config.source.max_blocks = Some(20);
        config.source.video.width = 16;
        config.source.video.height = 8;

        let source = SourceRandom::new("source", &config.source, &config.stream).unwrap();
        let resampler = TransformResampler::new(
            "resampler",
            source.create_reader(StreamKind::Audio).unwrap(),
            &config.stream,
        )
        .unwrap();

        let mut sink = BlockSink::new("sink");
        sink.add_input(source.create_reader(StreamKind::Video).unwrap());
        sink.add_input(resampler.create_reader().unwrap());
        let stats = sink.stats_handle();

        let mut graph = Graph::new("pipeline");
        graph.add_node(source);
        graph.add_node(resampler);
        graph.add_node(sink);

        graph.start().unwrap();
        graph.wait();
        graph.stop();
        stats.snapshot()
    }

    #[test]
    fn test_pipeline_cooperative() {
        let stats = run_pipeline(Scheduling::Cooperative);
        let video = stats.stream(StreamKind::Video).unwrap();
        let audio = stats.stream(StreamKind::Audio).unwrap();

        assert_eq!(video.blocks, 20);
        assert_eq!(audio.blocks, 20);
        assert_eq!(video.properties, 1);
        assert_eq!(audio.properties, 1);
        assert_eq!(video.regressions, 0);
        assert_eq!(video.last_time, Some(19 * 400_000));
        assert_eq!(video.bytes, 20 * 16 * 8 * 3);
        assert!(stats.start_time_abs.is_some());
    }

    #[test]
    fn test_pipeline_threaded() {
        let stats = run_pipeline(Scheduling::Threaded);
        let video = stats.stream(StreamKind::Video).unwrap();
        let audio = stats.stream(StreamKind::Audio).unwrap();

        assert_eq!(video.blocks, 20);
        assert_eq!(audio.blocks, 20);
        assert_eq!(audio.regressions, 0);
        assert_eq!(audio.last_time, Some(19 * 400_000));
    }
}
