//! # Block Queue - Bounded Cross-Thread Block Channel
//!
//! One producer and one consumer per queue:
//! - FIFO delivery in `write_block` call order
//! - Backpressure: the producer blocks while more than `capacity` blocks
//!   are pending
//! - Independent read/write disable flags for shutdown and end-of-stream
//!
//! ```text
//! ┌──────────┐ write_block ┌────────────┐ read_block ┌──────────┐
//! │ Producer │────────────►│ BlockQueue │───────────►│ Consumer │
//! │ Thread   │◄─ space ────│  pending   │── data ───►│ Thread   │
//! └──────────┘             └────────────┘            └──────────┘
//! ```
//!
//! Both waits are predicate loops on a condition variable; every wake
//! re-checks the disable flags, so a disable racing a wait is never lost.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::block::StreamBlock;

/// Largest accepted capacity threshold
pub const MAX_CAPACITY: usize = 1 << 16;

/// Pending slots reserved up front; larger queues grow on demand
const PREALLOCATED_BLOCKS: usize = 8;

/// Result of handing a block to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Appended to the pending list
    Queued,
    /// Write side disabled; the block was dropped
    Dropped,
}

struct QueueState {
    pending: VecDeque<StreamBlock>,
    read_disabled: bool,
    write_disabled: bool,
}

/// Bounded single-producer/single-consumer block queue
pub struct BlockQueue {
    state: Mutex<QueueState>,

    /// Signaled when a block is appended or the queue is disabled
    data_ready: Condvar,

    /// Signaled when a block is removed or writing is disabled
    space_ready: Condvar,

    capacity: usize,

    blocks_written: AtomicU64,
    blocks_read: AtomicU64,
    blocks_dropped: AtomicU64,
}

impl BlockQueue {
    /// Create a queue that blocks the producer while more than `capacity`
    /// blocks are pending
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::with_capacity(capacity.min(PREALLOCATED_BLOCKS) + 1),
                read_disabled: false,
                write_disabled: false,
            }),
            data_ready: Condvar::new(),
            space_ready: Condvar::new(),
            capacity,
            blocks_written: AtomicU64::new(0),
            blocks_read: AtomicU64::new(0),
            blocks_dropped: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // Producer API
    // ========================================================================

    /// Append a block, blocking while the queue is over capacity.
    ///
    /// Takes ownership unconditionally: if writing is disabled (before or
    /// while waiting) the block is dropped.
    pub fn write_block(&self, block: StreamBlock) -> WriteOutcome {
        let mut state = self.state.lock();

        loop {
            if state.write_disabled {
                drop(state);
                self.blocks_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Dropped block {} (write disabled)", block.id());
                return WriteOutcome::Dropped;
            }
            if state.pending.len() <= self.capacity {
                break;
            }
            self.space_ready.wait(&mut state);
        }

        tracing::trace!("Queued block {} at {}", block.id(), block.time());
        state.pending.push_back(block);
        self.blocks_written.fetch_add(1, Ordering::Relaxed);
        self.data_ready.notify_one();
        WriteOutcome::Queued
    }

    // ========================================================================
    // Consumer API
    // ========================================================================

    /// Pop the oldest block, blocking while the queue is empty.
    ///
    /// Returns `None` when reading is disabled, or once the queue is drained
    /// after writing was disabled (end-of-stream).
    pub fn read_block(&self) -> Option<StreamBlock> {
        let mut state = self.state.lock();

        loop {
            if state.read_disabled {
                return None;
            }
            if let Some(block) = state.pending.pop_front() {
                self.blocks_read.fetch_add(1, Ordering::Relaxed);
                self.space_ready.notify_one();
                return Some(block);
            }
            if state.write_disabled {
                return None;
            }
            self.data_ready.wait(&mut state);
        }
    }

    /// Pop the oldest block without waiting
    pub fn try_read_block(&self) -> Option<StreamBlock> {
        let mut state = self.state.lock();
        if state.read_disabled {
            return None;
        }
        let block = state.pending.pop_front()?;
        self.blocks_read.fetch_add(1, Ordering::Relaxed);
        self.space_ready.notify_one();
        Some(block)
    }

    // ========================================================================
    // Control API
    // ========================================================================

    /// Disable or re-enable the write side. Disabling wakes a blocked writer
    /// (its block is dropped) and a blocked reader (it sees end-of-stream
    /// once drained).
    pub fn disable_write(&self, disable: bool) {
        let mut state = self.state.lock();
        if state.write_disabled == disable {
            return;
        }
        state.write_disabled = disable;
        if disable {
            self.space_ready.notify_all();
            self.data_ready.notify_all();
        }
        tracing::debug!("Queue write {}", if disable { "disabled" } else { "enabled" });
    }

    /// Disable or re-enable the read side. Disabling wakes a blocked reader
    /// with no block.
    pub fn disable_read(&self, disable: bool) {
        let mut state = self.state.lock();
        if state.read_disabled == disable {
            return;
        }
        state.read_disabled = disable;
        if disable {
            self.data_ready.notify_all();
        }
        tracing::debug!("Queue read {}", if disable { "disabled" } else { "enabled" });
    }

    /// Disable both sides and drop everything pending
    pub fn shutdown(&self) -> usize {
        self.disable_write(true);
        self.disable_read(true);
        self.clear()
    }

    /// Drop all pending blocks, returning how many were discarded
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.pending.len();
        state.pending.clear();
        drop(state);
        if discarded > 0 {
            self.blocks_dropped.fetch_add(discarded as u64, Ordering::Relaxed);
            self.space_ready.notify_all();
            tracing::debug!("Discarded {} pending blocks", discarded);
        }
        discarded
    }

    // ========================================================================
    // Status API
    // ========================================================================

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().pending.is_empty()
    }

    /// Pending blocks tolerated before the producer blocks
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_read_disabled(&self) -> bool {
        self.state.lock().read_disabled
    }

    pub fn is_write_disabled(&self) -> bool {
        self.state.lock().write_disabled
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            pending: state.pending.len(),
            blocks_written: self.blocks_written.load(Ordering::Relaxed),
            blocks_read: self.blocks_read.load(Ordering::Relaxed),
            blocks_dropped: self.blocks_dropped.load(Ordering::Relaxed),
            read_disabled: state.read_disabled,
            write_disabled: state.write_disabled,
        }
    }
}

impl Drop for BlockQueue {
    fn drop(&mut self) {
        let pending = self.state.get_mut().pending.len();
        if pending > 0 {
            tracing::debug!("Queue dropped with {} pending blocks", pending);
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub pending: usize,
    pub blocks_written: u64,
    pub blocks_read: u64,
    pub blocks_dropped: u64,
    pub read_disabled: bool,
    pub write_disabled: bool,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{StreamSubType, VideoFormat};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn block(time: u64) -> StreamBlock {
        StreamBlock::video(VideoFormat::new(2, 2, 24), StreamSubType::Rgb24, time, vec![0u8; 12])
    }

    #[test]
    fn test_fifo_order() {
        let queue = BlockQueue::new(16);
        for t in 0..10 {
            assert_eq!(queue.write_block(block(t)), WriteOutcome::Queued);
        }
        for t in 0..10 {
            assert_eq!(queue.read_block().unwrap().time(), t);
        }
        assert!(queue.is_empty());
        assert!(queue.try_read_block().is_none());
    }

    #[test]
    fn test_read_blocks_when_empty() {
        let queue = Arc::new(BlockQueue::new(1));
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let queue = queue.clone();
            let done = done.clone();
            thread::spawn(move || {
                let block = queue.read_block();
                done.store(true, Ordering::SeqCst);
                block
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        queue.write_block(block(7));
        let block = reader.join().unwrap();
        assert_eq!(block.unwrap().time(), 7);
    }

    #[test]
    fn test_bounded_write_blocks_until_read() {
        // K=1: two blocks fit, the third write blocks until a read
        let queue = Arc::new(BlockQueue::new(1));
        queue.write_block(block(0)); // A
        queue.write_block(block(1)); // B
        assert_eq!(queue.len(), 2);

        let written = Arc::new(AtomicBool::new(false));
        let writer = {
            let queue = queue.clone();
            let written = written.clone();
            thread::spawn(move || {
                let outcome = queue.write_block(block(2)); // C
                written.store(true, Ordering::SeqCst);
                outcome
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!written.load(Ordering::SeqCst));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.read_block().unwrap().time(), 0);
        assert_eq!(writer.join().unwrap(), WriteOutcome::Queued);
        assert!(written.load(Ordering::SeqCst));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.read_block().unwrap().time(), 1);
        assert_eq!(queue.read_block().unwrap().time(), 2);
    }

    #[test]
    fn test_pending_never_exceeds_capacity_plus_one() {
        let queue = Arc::new(BlockQueue::new(3));
        let max_seen = Arc::new(AtomicU64::new(0));

        let producer = {
            let queue = queue.clone();
            let max_seen = max_seen.clone();
            thread::spawn(move || {
                for t in 0..500 {
                    queue.write_block(block(t));
                    max_seen.fetch_max(queue.len() as u64, Ordering::SeqCst);
                }
            })
        };

        for t in 0..500 {
            assert_eq!(queue.read_block().unwrap().time(), t);
        }
        producer.join().unwrap();
        assert!(max_seen.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn test_no_lost_wakeup_stress() {
        const PAIRS: u64 = 10_000;
        let queue = Arc::new(BlockQueue::new(1));

        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for t in 0..PAIRS {
                    assert_eq!(queue.write_block(block(t)), WriteOutcome::Queued);
                }
            })
        };

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut expected = 0;
                while expected < PAIRS {
                    let block = queue.read_block().expect("queue disabled unexpectedly");
                    assert_eq!(block.time(), expected);
                    expected += 1;
                }
                expected
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), PAIRS);

        let stats = queue.stats();
        assert_eq!(stats.blocks_written, PAIRS);
        assert_eq!(stats.blocks_read, PAIRS);
        assert_eq!(stats.pending, 0);
    }

    #[test]
    fn test_disable_write_drops() {
        let queue = BlockQueue::new(4);
        queue.write_block(block(0));
        queue.disable_write(true);

        assert_eq!(queue.write_block(block(1)), WriteOutcome::Dropped);
        assert_eq!(queue.write_block(block(2)), WriteOutcome::Dropped);

        // Pending data drains, then end-of-stream
        assert_eq!(queue.read_block().unwrap().time(), 0);
        assert!(queue.read_block().is_none());
        assert_eq!(queue.stats().blocks_dropped, 2);

        queue.disable_write(false);
        assert_eq!(queue.write_block(block(3)), WriteOutcome::Queued);
        assert_eq!(queue.read_block().unwrap().time(), 3);
    }

    #[test]
    fn test_disable_write_wakes_blocked_writer() {
        let queue = Arc::new(BlockQueue::new(0));
        queue.write_block(block(0));

        let writer = {
            let queue = queue.clone();
            thread::spawn(move || queue.write_block(block(1)))
        };

        thread::sleep(Duration::from_millis(50));
        queue.disable_write(true);
        assert_eq!(writer.join().unwrap(), WriteOutcome::Dropped);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_disable_read_wakes_blocked_reader() {
        let queue = Arc::new(BlockQueue::new(1));

        let reader = {
            let queue = queue.clone();
            thread::spawn(move || queue.read_block())
        };

        thread::sleep(Duration::from_millis(50));
        queue.disable_read(true);
        assert!(reader.join().unwrap().is_none());

        // Disabled reads never block, even with data pending
        queue.write_block(block(0));
        assert!(queue.read_block().is_none());
        assert!(queue.try_read_block().is_none());

        queue.disable_read(false);
        assert_eq!(queue.read_block().unwrap().time(), 0);
    }

    #[test]
    fn test_disable_is_idempotent() {
        let queue = BlockQueue::new(1);
        queue.disable_read(true);
        queue.disable_read(true);
        assert!(queue.is_read_disabled());
        queue.disable_read(false);
        queue.disable_read(false);
        assert!(!queue.is_read_disabled());
        assert!(!queue.is_write_disabled());
    }

    #[test]
    fn test_huge_capacity_does_not_preallocate() {
        let queue = BlockQueue::new(usize::MAX);
        assert_eq!(queue.capacity(), usize::MAX);
        assert_eq!(queue.write_block(block(0)), WriteOutcome::Queued);
        assert_eq!(queue.read_block().unwrap().time(), 0);
    }

    #[test]
    fn test_shutdown_discards_pending() {
        let queue = BlockQueue::new(4);
        for t in 0..3 {
            queue.write_block(block(t));
        }
        assert_eq!(queue.shutdown(), 3);
        assert!(queue.is_empty());
        assert!(queue.read_block().is_none());
        assert_eq!(queue.write_block(block(9)), WriteOutcome::Dropped);
    }
}
