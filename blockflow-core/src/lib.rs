//! # blockflow Core
//!
//! Bounded block queues, typed streams and stream groups for moving media
//! blocks between pipeline threads.
//!
//! A [`StreamWriter`] owns a [`BlockQueue`] and hands out exactly one
//! [`StreamReader`]. Writers block while the queue is over capacity, readers
//! block while it is empty, and disabling either side is the only way to
//! cancel. Streams of one node are bound together in a [`StreamGroup`] that
//! shares an absolute start time and, in debug builds, checks that every
//! stream is driven from its own thread.

// ============================================================================
// Blocks / Queues
// ============================================================================
pub mod block;
pub mod queue;

// ============================================================================
// Streams
// ============================================================================
pub mod affinity;
pub mod group;
pub mod stream;

// ============================================================================
// Scheduling / Pipelines
// ============================================================================
pub mod graph;
pub mod scheduler;

// ============================================================================
// Configuration
// ============================================================================
pub mod config;

pub use affinity::AffinityViolation;
pub use block::{AudioFormat, BlockFormat, StreamBlock, StreamKind, StreamSubType, VideoFormat};
pub use config::{ConfigError, FlowConfig, Scheduling, SourceConfig, StreamConfig, ThreadCheckMode};
pub use graph::{
    BlockSink, BlockTransform, Graph, GraphError, GraphNode, GraphResult, Passthrough, SinkStats,
    SinkStatsHandle, SourceRandom, StreamStats, TransformResampler,
};
pub use group::{StreamGroup, StreamGroupRead, StreamGroupWrite, StreamInfo};
pub use queue::{BlockQueue, QueueStats, WriteOutcome};
pub use scheduler::{MultiTask, SchedulerError, Task, TaskFlow};
pub use stream::{StreamError, StreamReader, StreamWriter};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
