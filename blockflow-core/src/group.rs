//! # Stream Groups
//!
//! A group collects the streams of one direction that share a playback time
//! origin (for example the video and audio outputs of one source). Members
//! must be driven from distinct threads.
//!
//! Groups never own their streams. A stream keeps a weak back-reference to
//! its group, and the group keeps only each member's shared affinity record.
//! Membership is established while the graph is assembled (`add_stream` needs
//! `&mut` access to the stream) and is only read afterwards.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::ThreadId;

use crate::affinity::ThreadAffinity;
use crate::block::{StreamKind, StreamSubType};
use crate::stream::{StreamReader, StreamWriter};

/// Marker for groups of [`StreamWriter`](crate::stream::StreamWriter)s
#[derive(Debug)]
pub enum WriteSide {}

/// Marker for groups of [`StreamReader`](crate::stream::StreamReader)s
#[derive(Debug)]
pub enum ReadSide {}

pub type StreamGroupWrite = StreamGroup<WriteSide>;
pub type StreamGroupRead = StreamGroup<ReadSide>;

/// Snapshot of one group member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub subtype: StreamSubType,
    /// Thread that drives the stream, once captured
    pub owner: Option<ThreadId>,
}

struct GroupMember {
    kind: StreamKind,
    subtype: StreamSubType,
    affinity: Arc<ThreadAffinity>,
}

pub(crate) struct GroupShared {
    name: String,
    start_time: OnceCell<u64>,
    members: RwLock<Vec<GroupMember>>,
}

impl GroupShared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn start_time_abs(&self) -> Option<u64> {
        self.start_time.get().copied()
    }

    pub(crate) fn set_start_time_abs(&self, time: u64) -> bool {
        match self.start_time.set(time) {
            Ok(()) => {
                tracing::debug!("Group '{}' start time set to {}", self.name, time);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn for_each_member<E>(
        &self,
        mut f: impl FnMut(usize, &Arc<ThreadAffinity>) -> Result<(), E>,
    ) -> Result<(), E> {
        for (index, member) in self.members.read().iter().enumerate() {
            f(index, &member.affinity)?;
        }
        Ok(())
    }
}

/// Streams of one direction sharing a start time
pub struct StreamGroup<D> {
    shared: Arc<GroupShared>,
    _direction: PhantomData<D>,
}

impl<D> StreamGroup<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(GroupShared {
                name: name.into(),
                start_time: OnceCell::new(),
                members: RwLock::new(Vec::new()),
            }),
            _direction: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn register(&self, kind: StreamKind, subtype: StreamSubType, affinity: Arc<ThreadAffinity>) -> usize {
        let mut members = self.shared.members.write();
        members.push(GroupMember { kind, subtype, affinity });
        tracing::debug!("Group '{}': added {} stream #{}", self.shared.name, kind, members.len() - 1);
        members.len() - 1
    }

    pub fn num_streams(&self) -> usize {
        self.shared.members.read().len()
    }

    pub fn stream(&self, index: usize) -> Option<StreamInfo> {
        self.shared.members.read().get(index).map(|m| StreamInfo {
            kind: m.kind,
            subtype: m.subtype,
            owner: m.affinity.owner(),
        })
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        (0..self.num_streams()).filter_map(|i| self.stream(i)).collect()
    }

    /// Absolute time origin shared by all members, once set
    pub fn start_time_abs(&self) -> Option<u64> {
        self.shared.start_time_abs()
    }

    /// Set the shared time origin. Only the first call takes effect; returns
    /// whether this call set it.
    pub fn set_start_time_abs(&self, time: u64) -> bool {
        self.shared.set_start_time_abs(time)
    }

    /// Map a block's stream time onto the group's absolute timeline; `None`
    /// before the start time is set or if the sum overflows
    pub fn to_absolute(&self, time: u64) -> Option<u64> {
        self.start_time_abs()?.checked_add(time)
    }
}

impl StreamGroup<WriteSide> {
    /// Register `stream` and return its index.
    ///
    /// Panics if the stream already belongs to a group.
    pub fn add_stream(&self, stream: &mut StreamWriter) -> usize {
        assert!(!stream.is_grouped(), "stream already belongs to a group");
        stream.set_group(Arc::downgrade(&self.shared));
        self.register(stream.kind(), stream.subtype(), stream.affinity().clone())
    }
}

impl StreamGroup<ReadSide> {
    /// Register `stream` and return its index.
    ///
    /// Panics if the stream already belongs to a group.
    pub fn add_stream(&self, stream: &mut StreamReader) -> usize {
        assert!(!stream.is_grouped(), "stream already belongs to a group");
        stream.set_group(Arc::downgrade(&self.shared));
        self.register(stream.kind(), stream.subtype(), stream.affinity().clone())
    }
}

impl<D> std::fmt::Debug for StreamGroup<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGroup")
            .field("name", &self.shared.name)
            .field("streams", &self.num_streams())
            .field("start_time_abs", &self.start_time_abs())
            .finish()
    }
}
