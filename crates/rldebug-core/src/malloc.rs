//! Heap boundary: malloc, calloc, realloc, free, strdup and strndup.
//!
//! Every call first validates the whole registry. Allocation-class calls
//! then go through the limit table in its fixed order; a refused call
//! returns `None` without touching the registry or the heap counters.

use rldebug_membrane::{
    BlockHandle, CallKind, DebuggerMetrics, Descriptor, Fill, GuardedRegion, MAX_REQUEST,
    MemoryBlock, Request, ResizeOutcome, Resource, SlotId, SourceLocation,
};

use crate::debugger::Debugger;
use crate::fault::{Event, FatalFault};

/// Flavor of a heap acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// `malloc`: payload poisoned.
    Plain,
    /// `calloc`: payload zeroed.
    Zeroed,
    /// `realloc`: resize an existing block, or acquire when there is none.
    Resize,
}

impl AllocKind {
    #[must_use]
    pub const fn call_kind(self) -> CallKind {
        match self {
            Self::Plain => CallKind::Malloc,
            Self::Zeroed => CallKind::Calloc,
            Self::Resize => CallKind::Realloc,
        }
    }
}

/// Flavor of a string duplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DupKind {
    /// `strdup`
    Unbounded,
    /// `strndup`
    Bounded,
}

impl DupKind {
    #[must_use]
    pub const fn call_kind(self) -> CallKind {
        match self {
            Self::Unbounded => CallKind::Strdup,
            Self::Bounded => CallKind::Strndup,
        }
    }
}

impl Debugger {
    /// Generic allocation entry point.
    ///
    /// The requested byte total is `count * element_size`; a total above
    /// `MAX_REQUEST` (or one that overflows) is refused before any limit.
    pub fn allocate(
        &mut self,
        kind: AllocKind,
        existing: Option<BlockHandle>,
        count: usize,
        element_size: usize,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        let call = kind.call_kind();
        self.sweep(location);
        let Some(bytes) = count
            .checked_mul(element_size)
            .filter(|&total| total <= MAX_REQUEST)
        else {
            return self.soft_failure(Event::InvalidSize(call), location, |e| e);
        };
        let acquired = match kind {
            AllocKind::Plain => self.acquire(call, bytes, Fill::Poison, location),
            AllocKind::Zeroed => self.acquire(call, bytes, Fill::Zero, location),
            AllocKind::Resize => self.resize(existing, bytes, location),
        };
        acquired.map(|(_, handle)| handle)
    }

    pub fn malloc(&mut self, size: usize, location: SourceLocation) -> Option<BlockHandle> {
        self.allocate(AllocKind::Plain, None, size, 1, location)
    }

    pub fn calloc(
        &mut self,
        count: usize,
        size: usize,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        self.allocate(AllocKind::Zeroed, None, count, size, location)
    }

    /// Resize `ptr` to `size` bytes, or acquire a new block when `ptr` is `None`.
    ///
    /// A refused resize leaves the original block registered and intact.
    pub fn realloc(
        &mut self,
        ptr: Option<BlockHandle>,
        size: usize,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        self.allocate(AllocKind::Resize, ptr, size, 1, location)
    }

    /// Release a block. `None` is a warning; an unknown handle is fatal.
    pub fn free(&mut self, ptr: Option<BlockHandle>, location: SourceLocation) {
        self.sweep(location);
        self.check_heap_enabled(CallKind::Free, location);
        let Some(handle) = ptr else {
            self.warning(Event::NullRelease, location);
            return;
        };
        let Some(slot) = self.registry.find_block(handle) else {
            self.fatal(
                FatalFault::new(Event::UnregisteredRelease, location)
                    .with_detail(format!("{:#x}", handle.addr())),
            );
        };
        let desc = match self.registry.remove(slot) {
            Ok(desc) => desc,
            Err(err) => self.fatal(
                FatalFault::new(Event::RegistryFault(CallKind::Free), location)
                    .with_detail(err.to_string()),
            ),
        };
        let (size, produced_by) = desc
            .as_memory()
            .map_or((0, CallKind::Malloc), |b| (b.size(), b.produced_by));
        self.limits.record_released(produced_by, size);
        DebuggerMetrics::inc(&self.metrics.releases);
        drop(desc);
        self.report(Event::Succeeded(CallKind::Free), location, |e| {
            e.with_size(size).with_address(handle.addr())
        });
    }

    /// Duplicate the NUL-terminated prefix of `source` into a new block.
    ///
    /// The bounded flavor copies at most `max_len` bytes. The copy is always
    /// terminated, so the block is one byte longer than the copied text.
    pub fn duplicate_string(
        &mut self,
        kind: DupKind,
        source: Option<&[u8]>,
        max_len: usize,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        let call = kind.call_kind();
        self.sweep(location);
        self.check_heap_enabled(call, location);
        let Some(source) = source else {
            self.fatal(FatalFault::new(Event::NullSource(call), location));
        };
        let text_len = source.iter().position(|&b| b == 0).unwrap_or(source.len());
        let len = match kind {
            DupKind::Unbounded => text_len,
            DupKind::Bounded => text_len.min(max_len),
        };
        let (slot, handle) = self.acquire(call, len + 1, Fill::Poison, location)?;
        if let Some(block) = self.registry.get_mut(slot).and_then(|d| d.as_memory_mut()) {
            let payload = block.region.payload_mut();
            payload[..len].copy_from_slice(&source[..len]);
            payload[len] = 0;
        }
        Some(handle)
    }

    pub fn strdup(
        &mut self,
        source: Option<&[u8]>,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        self.duplicate_string(DupKind::Unbounded, source, usize::MAX, location)
    }

    pub fn strndup(
        &mut self,
        source: Option<&[u8]>,
        max_len: usize,
        location: SourceLocation,
    ) -> Option<BlockHandle> {
        self.duplicate_string(DupKind::Bounded, source, max_len, location)
    }

    /// Admit, acquire and register a fresh block of `bytes`.
    fn acquire(
        &mut self,
        kind: CallKind,
        bytes: usize,
        fill: Fill,
        location: SourceLocation,
    ) -> Option<(SlotId, BlockHandle)> {
        let current = self.registry.current_heap_size();
        if let Err(refusal) = self.limits.admit(kind, Request::Fresh { bytes }, current) {
            return self.refuse(kind, refusal, location);
        }
        let Some(region) = GuardedRegion::allocate(bytes, fill) else {
            return self.soft_failure(Event::TrulyOutOfMemory(kind), location, |e| {
                e.with_size(bytes)
            });
        };
        let block = MemoryBlock::new(region, kind);
        let handle = block.handle();
        let slot = self
            .registry
            .insert(Descriptor::new(Resource::Memory(block), location));
        self.limits.record_acquired(kind, bytes);
        DebuggerMetrics::inc(&self.metrics.acquisitions);
        self.report(Event::Succeeded(kind), location, |e| {
            e.with_size(bytes).with_address(handle.addr())
        });
        Some((slot, handle))
    }

    fn resize(
        &mut self,
        ptr: Option<BlockHandle>,
        new_size: usize,
        location: SourceLocation,
    ) -> Option<(SlotId, BlockHandle)> {
        let kind = CallKind::Realloc;
        self.check_heap_enabled(kind, location);
        let prior = ptr.map(|handle| (handle, self.registry.find_block(handle)));
        let (handle, slot) = match prior {
            None if new_size == 0 => return None,
            None => return self.acquire(kind, new_size, Fill::Poison, location),
            Some((handle, None)) => self.fatal(
                FatalFault::new(Event::UnregisteredResize, location)
                    .with_detail(format!("{:#x}", handle.addr())),
            ),
            Some((handle, Some(slot))) => (handle, slot),
        };
        let old_size = self
            .registry
            .get(slot)
            .and_then(|d| d.as_memory())
            .map_or(0, |b| b.size());
        if new_size == old_size {
            return Some((slot, handle));
        }

        if let Err(refusal) = self.limits.charge_success(kind) {
            return self.refuse(kind, refusal, location);
        }
        let request = Request::Resize { old_size, new_size };
        let current = self.registry.current_heap_size();
        if let Err(refusal) = self.limits.check_bytes(kind, request, current) {
            return self.refuse(kind, refusal, location);
        }

        match self.registry.resize_block(slot, new_size, kind, location) {
            Ok(ResizeOutcome::Resized { old_size, old_kind }) => {
                self.limits
                    .record_resized(old_kind, old_size, kind, new_size);
                DebuggerMetrics::inc(&self.metrics.resizes);
                let new_handle = self
                    .registry
                    .get(slot)
                    .and_then(|d| d.as_memory())
                    .map_or(handle, |b| b.handle());
                self.report(Event::Succeeded(kind), location, |e| {
                    e.with_size(new_size).with_address(new_handle.addr())
                });
                Some((slot, new_handle))
            }
            Ok(ResizeOutcome::PlatformExhausted) => {
                self.soft_failure(Event::TrulyOutOfMemory(kind), location, |e| {
                    e.with_size(new_size)
                })
            }
            Err(err) => self.fatal(
                FatalFault::new(Event::RegistryFault(kind), location).with_detail(err.to_string()),
            ),
        }
    }
}
