//! # Stream Writer / Reader
//!
//! Typed handles over a [`BlockQueue`]. A writer owns the queue; exactly one
//! reader can be created from it. Both sides validate that blocks match the
//! stream type and, depending on [`ThreadCheckMode`], that each stream is
//! driven from one thread that no sibling in its group shares.
//!
//! Dropping a writer disables writing (the reader drains, then sees
//! end-of-stream). Dropping a reader disables both sides so a producer blocked
//! on a full queue wakes up and its later blocks are dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use thiserror::Error;

use crate::affinity::ThreadAffinity;
use crate::block::{StreamBlock, StreamKind, StreamSubType};
use crate::config::{StreamConfig, ThreadCheckMode};
use crate::group::GroupShared;
use crate::queue::{BlockQueue, QueueStats, WriteOutcome, MAX_CAPACITY};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Subtype {subtype:?} is not valid for {kind} streams")]
    IncompatibleSubType { kind: StreamKind, subtype: StreamSubType },
    #[error("Stream already has a reader")]
    ReaderAlreadyAttached,
    #[error("Queue capacity {0} exceeds the maximum of {max}", max = MAX_CAPACITY)]
    CapacityTooLarge(usize),
}

// ============================================================================
// Stream Writer
// ============================================================================

/// Producer handle of one stream
pub struct StreamWriter {
    kind: StreamKind,
    subtype: StreamSubType,
    thread_checks: ThreadCheckMode,
    queue: Arc<BlockQueue>,
    affinity: Arc<ThreadAffinity>,
    group: Option<Weak<GroupShared>>,
    reader_attached: AtomicBool,
}

impl StreamWriter {
    /// Create a writer and its queue
    pub fn new(kind: StreamKind, subtype: StreamSubType, config: &StreamConfig) -> Result<Self, StreamError> {
        if !subtype.belongs_to(kind) {
            return Err(StreamError::IncompatibleSubType { kind, subtype });
        }
        if config.queue_capacity > MAX_CAPACITY {
            return Err(StreamError::CapacityTooLarge(config.queue_capacity));
        }

        Ok(Self {
            kind,
            subtype,
            thread_checks: config.thread_checks,
            queue: Arc::new(BlockQueue::new(config.queue_capacity)),
            affinity: Arc::new(ThreadAffinity::default()),
            group: None,
            reader_attached: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn subtype(&self) -> StreamSubType {
        self.subtype
    }

    /// Hand `block` to the stream, blocking while the queue is full.
    ///
    /// Panics if the block's kind or subtype differ from the stream's.
    pub fn write_block(&self, block: StreamBlock) -> WriteOutcome {
        self.write(block, true)
    }

    /// Like [`write_block`](Self::write_block) but without the thread check,
    /// for writes issued outside the producer thread (stream properties
    /// during assembly)
    pub fn write_block_unchecked_thread(&self, block: StreamBlock) -> WriteOutcome {
        self.write(block, false)
    }

    fn write(&self, block: StreamBlock, check_thread: bool) -> WriteOutcome {
        assert!(
            block.kind() == self.kind && block.subtype() == self.subtype,
            "{:?}/{:?} block written to {:?}/{:?} stream",
            block.kind(),
            block.subtype(),
            self.kind,
            self.subtype
        );

        if check_thread {
            let group = self.group.as_ref().and_then(Weak::upgrade);
            self.affinity.check(self.thread_checks, group.as_deref(), "writer");
        }

        self.queue.write_block(block)
    }

    /// Disable or re-enable writing; disabling also signals end-of-stream
    pub fn disable_write(&self, disable: bool) {
        self.queue.disable_write(disable);
    }

    /// Whether writing is disabled, by this writer or by its reader going away
    pub fn is_disabled(&self) -> bool {
        self.queue.is_write_disabled()
    }

    /// Create the single reader of this stream
    pub fn create_reader(&self) -> Result<StreamReader, StreamError> {
        if self
            .reader_attached
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamError::ReaderAlreadyAttached);
        }

        Ok(StreamReader {
            kind: self.kind,
            subtype: self.subtype,
            thread_checks: self.thread_checks,
            queue: self.queue.clone(),
            affinity: Arc::new(ThreadAffinity::default()),
            group: None,
        })
    }

    /// Start time of the owning write group
    pub fn start_time_abs(&self) -> Option<u64> {
        self.group.as_ref()?.upgrade()?.start_time_abs()
    }

    /// Set the owning group's start time; false without a group or if it
    /// was already set
    pub fn set_start_time_abs(&self, time: u64) -> bool {
        match self.group.as_ref().and_then(Weak::upgrade) {
            Some(group) => group.set_start_time_abs(time),
            None => false,
        }
    }

    /// Thread captured by the affinity check
    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.affinity.owner()
    }

    /// Affinity violations recorded in `Warn` mode
    pub fn affinity_violations(&self) -> u64 {
        self.affinity.violations()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub(crate) fn affinity(&self) -> &Arc<ThreadAffinity> {
        &self.affinity
    }

    pub(crate) fn is_grouped(&self) -> bool {
        self.group.is_some()
    }

    pub(crate) fn set_group(&mut self, group: Weak<GroupShared>) {
        self.group = Some(group);
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        self.queue.disable_write(true);
    }
}

impl std::fmt::Debug for StreamWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamWriter")
            .field("kind", &self.kind)
            .field("subtype", &self.subtype)
            .field("pending", &self.queue.len())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

// ============================================================================
// Stream Reader
// ============================================================================

/// Consumer handle of one stream, created by [`StreamWriter::create_reader`]
pub struct StreamReader {
    kind: StreamKind,
    subtype: StreamSubType,
    thread_checks: ThreadCheckMode,
    queue: Arc<BlockQueue>,
    affinity: Arc<ThreadAffinity>,
    group: Option<Weak<GroupShared>>,
}

impl StreamReader {
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn subtype(&self) -> StreamSubType {
        self.subtype
    }

    /// Take the next block, blocking while the stream is empty.
    ///
    /// `None` means reading was disabled or the writer ended the stream.
    pub fn read_block(&self) -> Option<StreamBlock> {
        self.check_thread();
        self.queue.read_block()
    }

    /// Take the next block if one is pending
    pub fn try_read_block(&self) -> Option<StreamBlock> {
        self.check_thread();
        self.queue.try_read_block()
    }

    /// Like [`read_block`](Self::read_block) but without the thread check
    pub fn read_block_unchecked_thread(&self) -> Option<StreamBlock> {
        self.queue.read_block()
    }

    fn check_thread(&self) {
        let group = self.group.as_ref().and_then(Weak::upgrade);
        self.affinity.check(self.thread_checks, group.as_deref(), "reader");
    }

    /// Disable or re-enable reading; disabling wakes a blocked read
    pub fn disable_read(&self, disable: bool) {
        self.queue.disable_read(disable);
    }

    pub fn is_disabled(&self) -> bool {
        self.queue.is_read_disabled()
    }

    /// True once the writer ended the stream and nothing is pending
    pub fn is_finished(&self) -> bool {
        self.queue.is_write_disabled() && self.queue.is_empty()
    }

    /// Start time of the owning read group
    pub fn start_time_abs(&self) -> Option<u64> {
        self.group.as_ref()?.upgrade()?.start_time_abs()
    }

    /// Set the owning group's start time; false without a group or if it
    /// was already set
    pub fn set_start_time_abs(&self, time: u64) -> bool {
        match self.group.as_ref().and_then(Weak::upgrade) {
            Some(group) => group.set_start_time_abs(time),
            None => false,
        }
    }

    pub fn owner_thread(&self) -> Option<ThreadId> {
        self.affinity.owner()
    }

    pub fn affinity_violations(&self) -> u64 {
        self.affinity.violations()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub(crate) fn affinity(&self) -> &Arc<ThreadAffinity> {
        &self.affinity
    }

    pub(crate) fn is_grouped(&self) -> bool {
        self.group.is_some()
    }

    pub(crate) fn set_group(&mut self, group: Weak<GroupShared>) {
        self.group = Some(group);
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.queue.disable_read(true);
        self.queue.disable_write(true);
    }
}

impl std::fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("kind", &self.kind)
            .field("subtype", &self.subtype)
            .field("pending", &self.queue.len())
            .field("disabled", &self.is_disabled())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
