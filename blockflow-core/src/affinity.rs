//! Thread-affinity diagnostics
//!
//! Each stream remembers the first thread that drove it. Later calls from a
//! different thread, or from a thread that already drives a sibling stream in
//! the same group, are violations. The check is diagnostic only; the queue
//! stays correct either way.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use crate::config::ThreadCheckMode;
use crate::group::GroupShared;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityViolation {
    /// Stream driven from a thread other than the one that first used it
    ThreadChanged { owner: ThreadId, current: ThreadId },
    /// Two streams of one group driven from the same thread
    SharedWithSibling { group: String, sibling: usize, thread: ThreadId },
}

impl fmt::Display for AffinityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ThreadChanged { owner, current } => write!(
                f,
                "stream owned by thread {:?} used from thread {:?}",
                owner, current
            ),
            Self::SharedWithSibling { group, sibling, thread } => write!(
                f,
                "thread {:?} already drives stream {} of group '{}'",
                thread, sibling, group
            ),
        }
    }
}

/// Lazily captured owning thread of one stream
#[derive(Debug, Default)]
pub(crate) struct ThreadAffinity {
    owner: Mutex<Option<ThreadId>>,
    violations: AtomicU64,
}

impl ThreadAffinity {
    pub(crate) fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    pub(crate) fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// Capture or validate the calling thread, then make sure no sibling in
    /// `group` is owned by it
    fn validate(self: &Arc<Self>, group: Option<&GroupShared>) -> Result<(), AffinityViolation> {
        let current = thread::current().id();

        {
            let mut owner = self.owner.lock();
            match *owner {
                None => *owner = Some(current),
                Some(id) if id != current => {
                    return Err(AffinityViolation::ThreadChanged { owner: id, current });
                }
                Some(_) => {}
            }
        }

        let Some(group) = group else {
            return Ok(());
        };
        group.for_each_member(|index, member| {
            if Arc::ptr_eq(member, self) {
                return Ok(());
            }
            if member.owner() == Some(current) {
                return Err(AffinityViolation::SharedWithSibling {
                    group: group.name().to_string(),
                    sibling: index,
                    thread: current,
                });
            }
            Ok(())
        })
    }

    /// Run the check according to `mode`
    pub(crate) fn check(self: &Arc<Self>, mode: ThreadCheckMode, group: Option<&GroupShared>, label: &str) {
        if mode == ThreadCheckMode::Off {
            return;
        }
        if let Err(violation) = self.validate(group) {
            match mode {
                ThreadCheckMode::Panic => panic!("{} thread affinity violated: {}", label, violation),
                _ => {
                    self.violations.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("{} thread affinity violated: {}", label, violation);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_first_thread() {
        let affinity = Arc::new(ThreadAffinity::default());
        assert!(affinity.owner().is_none());

        affinity.check(ThreadCheckMode::Warn, None, "test");
        assert_eq!(affinity.owner(), Some(thread::current().id()));

        affinity.check(ThreadCheckMode::Warn, None, "test");
        assert_eq!(affinity.violations(), 0);
    }

    #[test]
    fn test_thread_change_counted() {
        let affinity = Arc::new(ThreadAffinity::default());
        affinity.check(ThreadCheckMode::Warn, None, "test");

        let other = affinity.clone();
        thread::spawn(move || {
            let err = other.validate(None).unwrap_err();
            assert!(matches!(err, AffinityViolation::ThreadChanged { .. }));
            other.check(ThreadCheckMode::Warn, None, "test");
        })
        .join()
        .unwrap();

        assert_eq!(affinity.violations(), 1);
    }

    #[test]
    fn test_off_skips_capture() {
        let affinity = Arc::new(ThreadAffinity::default());
        affinity.check(ThreadCheckMode::Off, None, "test");
        assert!(affinity.owner().is_none());
    }

    #[test]
    fn test_panic_mode_panics() {
        let affinity = Arc::new(ThreadAffinity::default());
        affinity.check(ThreadCheckMode::Panic, None, "test");

        let other = affinity.clone();
        let result = thread::spawn(move || other.check(ThreadCheckMode::Panic, None, "test")).join();
        assert!(result.is_err());
    }
}
