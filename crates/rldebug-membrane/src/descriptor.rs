//! Resource descriptors: one per live memory block or open stream.
//!
//! A descriptor is bracketed by two fixed markers and sealed by a checksum
//! over its canonical byte image, including the slot indices of its registry
//! neighbors. Any link change therefore requires a checksum refresh of every
//! descriptor whose links moved.

use std::fmt;
use std::fs::File;
use std::num::NonZeroU64;
use std::ptr::NonNull;

use crate::arena::SlotId;
use crate::guard::{ChecksumFold, GuardPattern};
use crate::limits::CallKind;
use crate::region::GuardedRegion;

/// Marker stored ahead of every descriptor's fields.
pub const LEADING_MARKER: u64 = 0xc8fc_cdb5_05c6_ac13;

/// Marker stored after every descriptor's fields.
pub const TRAILING_MARKER: u64 = 0xece7_06d3_d053_3953;

/// Caller-supplied source position of an intercepted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: &'static str,
    pub line: u32,
}

impl SourceLocation {
    #[must_use]
    pub const fn new(file: &'static str, line: u32) -> Self {
        Self { file, line }
    }

    /// A location for damage that cannot be pinned to a call site.
    #[must_use]
    pub const fn unknown() -> Self {
        Self { file: "", line: 0 }
    }

    #[must_use]
    pub fn is_known(&self) -> bool {
        !self.file.is_empty()
    }

    /// File name without its directory components.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        self.file.rsplit(['/', '\\']).next().unwrap_or(self.file)
    }
}

impl From<&'static std::panic::Location<'static>> for SourceLocation {
    fn from(loc: &'static std::panic::Location<'static>) -> Self {
        Self::new(loc.file(), loc.line())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_known() {
            write!(f, "{}:{}", self.file_name(), self.line)
        } else {
            f.write_str("<unknown>")
        }
    }
}

/// Capture the current source position as a [`SourceLocation`].
#[macro_export]
macro_rules! location {
    () => {
        $crate::SourceLocation::new(file!(), line!())
    };
}

/// Client-visible handle of a memory block: the address of its first payload byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle(NonNull<u8>);

impl BlockHandle {
    /// Wrap an arbitrary pointer; `None` for null.
    ///
    /// The pointer need not come from the debugger: foreign handles are how
    /// invalid releases are expressed.
    #[must_use]
    pub fn from_ptr(ptr: *mut u8) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    #[must_use]
    pub const fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHandle({:#x})", self.addr())
    }
}

/// Opaque handle of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(NonZeroU64);

impl StreamHandle {
    /// Wrap a raw identifier; `None` for zero.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Option<Self> {
        match NonZeroU64::new(raw) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Which variant a descriptor carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Memory,
    Stream,
}

/// A tracked heap block.
#[derive(Debug)]
pub struct MemoryBlock {
    pub region: GuardedRegion,
    /// Call kind that created or last resized the block.
    pub produced_by: CallKind,
    pub head_guard: GuardPattern,
    pub tail_guard: GuardPattern,
}

impl MemoryBlock {
    /// Wrap a region and stamp the reference guards around its payload.
    #[must_use]
    pub fn new(mut region: GuardedRegion, produced_by: CallKind) -> Self {
        let head_guard = GuardPattern::head();
        let tail_guard = GuardPattern::tail();
        region.stamp_guards(&head_guard, &tail_guard);
        Self {
            region,
            produced_by,
            head_guard,
            tail_guard,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.region.size()
    }

    #[must_use]
    pub fn handle(&self) -> BlockHandle {
        BlockHandle(self.region.payload_ptr())
    }

    /// Restamp guards after the payload moved or changed size.
    pub fn restamp_guards(&mut self) {
        self.region.stamp_guards(&self.head_guard, &self.tail_guard);
    }
}

/// A tracked open stream.
#[derive(Debug)]
pub struct StreamRecord {
    pub name: String,
    pub mode: String,
    pub handle: StreamHandle,
    pub file: File,
}

/// Resource carried by a descriptor.
#[derive(Debug)]
pub enum Resource {
    Memory(MemoryBlock),
    Stream(StreamRecord),
}

impl Resource {
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Memory(_) => ResourceKind::Memory,
            Self::Stream(_) => ResourceKind::Stream,
        }
    }
}

/// Registry entry for one live resource.
#[derive(Debug)]
pub struct Descriptor {
    pub leading_marker: u64,
    pub resource: Resource,
    /// Acquisition site (or last resize site for memory).
    pub location: SourceLocation,
    pub(crate) prev: Option<SlotId>,
    pub(crate) next: Option<SlotId>,
    pub checksum: u32,
    pub trailing_marker: u64,
}

impl Descriptor {
    /// A detached descriptor; the registry seals it on insert.
    #[must_use]
    pub fn new(resource: Resource, location: SourceLocation) -> Self {
        Self {
            leading_marker: LEADING_MARKER,
            resource,
            location,
            prev: None,
            next: None,
            checksum: 0,
            trailing_marker: TRAILING_MARKER,
        }
    }

    #[must_use]
    pub const fn prev(&self) -> Option<SlotId> {
        self.prev
    }

    #[must_use]
    pub const fn next(&self) -> Option<SlotId> {
        self.next
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.resource.kind()
    }

    #[must_use]
    pub fn as_memory(&self) -> Option<&MemoryBlock> {
        match &self.resource {
            Resource::Memory(block) => Some(block),
            Resource::Stream(_) => None,
        }
    }

    #[must_use]
    pub fn as_memory_mut(&mut self) -> Option<&mut MemoryBlock> {
        match &mut self.resource {
            Resource::Memory(block) => Some(block),
            Resource::Stream(_) => None,
        }
    }

    #[must_use]
    pub fn as_stream(&self) -> Option<&StreamRecord> {
        match &self.resource {
            Resource::Stream(record) => Some(record),
            Resource::Memory(_) => None,
        }
    }

    #[must_use]
    pub fn as_stream_mut(&mut self) -> Option<&mut StreamRecord> {
        match &mut self.resource {
            Resource::Stream(record) => Some(record),
            Resource::Memory(_) => None,
        }
    }

    /// Checksum over the canonical image with the checksum field taken as zero.
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut fold = ChecksumFold::new();
        fold.u64(self.leading_marker);
        match &self.resource {
            Resource::Memory(block) => {
                fold.byte(0);
                fold.u64(block.size() as u64);
                fold.u64(block.handle().addr() as u64);
                fold.byte(block.produced_by as u8);
                fold.bytes(&block.head_guard.bytes);
                fold.bytes(&block.tail_guard.bytes);
            }
            Resource::Stream(record) => {
                fold.byte(1);
                fold.str(&record.name);
                fold.str(&record.mode);
                fold.u64(record.handle.raw());
            }
        }
        fold.str(self.location.file);
        fold.u64(u64::from(self.location.line));
        fold.u64(link_image(self.prev));
        fold.u64(link_image(self.next));
        fold.bytes(&0u32.to_le_bytes());
        fold.u64(self.trailing_marker);
        fold.finish()
    }

    /// Recompute and store the checksum.
    pub fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }
}

fn link_image(link: Option<SlotId>) -> u64 {
    link.map_or(u64::MAX, |slot| slot.index() as u64)
}
