//! Descriptor arena with an intrusive doubly linked registry.
//!
//! Descriptors live in a slab with stable indices; `prev`/`next` links are
//! slot indices, so a descriptor never moves while it is registered. The
//! registry also owns the heap accounting: `current_heap_size` always equals
//! the sum of live memory block sizes.
//!
//! Topology invariants:
//! - `head.prev == None` and `tail.next == None`
//! - exactly one of {empty, single node, multi node} holds
//! - every link change refreshes the checksum of each descriptor touched

use thiserror::Error;

use crate::descriptor::{BlockHandle, Descriptor, Resource, SourceLocation, StreamHandle};
use crate::limits::CallKind;

/// Stable index of a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Internal-consistency faults of the registry itself.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    #[error("slot {0:?} is not occupied")]
    VacantSlot(SlotId),
    #[error("registry links are inconsistent around slot {0:?}")]
    BrokenTopology(SlotId),
    #[error("slot {0:?} does not hold a memory block")]
    NotMemory(SlotId),
}

/// Result of an in-place block resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeOutcome {
    /// The block now has the new size; the previous accounting is returned.
    Resized { old_size: usize, old_kind: CallKind },
    /// The platform allocator refused; the block is untouched.
    PlatformExhausted,
}

/// Ordered registry of live resource descriptors.
#[derive(Debug, Default)]
pub struct Registry {
    slots: Vec<Option<Descriptor>>,
    /// Vacant slot indices for reuse.
    free_list: Vec<usize>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
    current_heap_size: usize,
    peak_heap_size: usize,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn head(&self) -> Option<SlotId> {
        self.head
    }

    #[must_use]
    pub const fn tail(&self) -> Option<SlotId> {
        self.tail
    }

    /// Sum of live memory block sizes.
    #[must_use]
    pub const fn current_heap_size(&self) -> usize {
        self.current_heap_size
    }

    /// Highest value `current_heap_size` has reached.
    #[must_use]
    pub const fn peak_heap_size(&self) -> usize {
        self.peak_heap_size
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&Descriptor> {
        self.slots.get(slot.index()).and_then(Option::as_ref)
    }

    /// Mutable access to a descriptor.
    ///
    /// Changes made through this bypass checksum maintenance; the next
    /// validation sweep reports them as descriptor damage.
    #[must_use]
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Descriptor> {
        self.slots.get_mut(slot.index()).and_then(Option::as_mut)
    }

    fn refresh(&mut self, slot: Option<SlotId>) {
        if let Some(desc) = slot.and_then(|s| self.get_mut(s)) {
            desc.refresh_checksum();
        }
    }

    fn add_heap(&mut self, bytes: usize) {
        self.current_heap_size = self.current_heap_size.saturating_add(bytes);
        self.peak_heap_size = self.peak_heap_size.max(self.current_heap_size);
    }

    /// Append a descriptor at the tail and seal it.
    pub fn insert(&mut self, mut desc: Descriptor) -> SlotId {
        let slot = match self.free_list.pop() {
            Some(index) => SlotId(index),
            None => {
                self.slots.push(None);
                SlotId(self.slots.len() - 1)
            }
        };

        desc.prev = self.tail;
        desc.next = None;
        if let Resource::Memory(block) = &desc.resource {
            self.add_heap(block.size());
        }
        desc.refresh_checksum();
        self.slots[slot.index()] = Some(desc);

        let old_tail = self.tail;
        match old_tail.and_then(|t| self.get_mut(t)) {
            Some(prev) => prev.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.refresh(old_tail);
        self.tail = Some(slot);
        self.len += 1;
        slot
    }

    /// Detach a descriptor and hand it back for destruction.
    ///
    /// Memory blocks leave `current_heap_size`; dropping the returned
    /// descriptor reclaims the storage (or closes the stream).
    pub fn remove(&mut self, slot: SlotId) -> Result<Descriptor, RegistryError> {
        let desc = self.get(slot).ok_or(RegistryError::VacantSlot(slot))?;
        let (prev, next) = (desc.prev, desc.next);
        let is_head = self.head == Some(slot);
        let is_tail = self.tail == Some(slot);

        match (prev, next) {
            (None, None) if is_head && is_tail => {
                self.head = None;
                self.tail = None;
            }
            (None, Some(new_head)) if is_head => {
                let d = self
                    .get_mut(new_head)
                    .ok_or(RegistryError::BrokenTopology(slot))?;
                d.prev = None;
                d.refresh_checksum();
                self.head = Some(new_head);
            }
            (Some(new_tail), None) if is_tail => {
                let d = self
                    .get_mut(new_tail)
                    .ok_or(RegistryError::BrokenTopology(slot))?;
                d.next = None;
                d.refresh_checksum();
                self.tail = Some(new_tail);
            }
            (Some(p), Some(n)) if !is_head && !is_tail => {
                if self.get(p).is_none() || self.get(n).is_none() {
                    return Err(RegistryError::BrokenTopology(slot));
                }
                if let Some(d) = self.get_mut(p) {
                    d.next = Some(n);
                    d.refresh_checksum();
                }
                if let Some(d) = self.get_mut(n) {
                    d.prev = Some(p);
                    d.refresh_checksum();
                }
            }
            _ => return Err(RegistryError::BrokenTopology(slot)),
        }

        let mut desc = self.slots[slot.index()]
            .take()
            .ok_or(RegistryError::VacantSlot(slot))?;
        desc.prev = None;
        desc.next = None;
        if let Resource::Memory(block) = &desc.resource {
            self.current_heap_size = self.current_heap_size.saturating_sub(block.size());
        }
        self.free_list.push(slot.index());
        self.len -= 1;
        Ok(desc)
    }

    /// Resize a registered block in place and re-stamp its guards.
    ///
    /// On success the descriptor takes the new size, producing kind and
    /// location; heap accounting and the checksums of the block and its
    /// neighbors are refreshed.
    pub fn resize_block(
        &mut self,
        slot: SlotId,
        new_size: usize,
        kind: CallKind,
        location: SourceLocation,
    ) -> Result<ResizeOutcome, RegistryError> {
        let desc = self.get_mut(slot).ok_or(RegistryError::VacantSlot(slot))?;
        let (prev, next) = (desc.prev, desc.next);
        let block = desc
            .as_memory_mut()
            .ok_or(RegistryError::NotMemory(slot))?;
        let old_size = block.size();
        let old_kind = block.produced_by;
        if !block.region.resize(new_size) {
            return Ok(ResizeOutcome::PlatformExhausted);
        }
        block.produced_by = kind;
        block.restamp_guards();
        desc.location = location;

        self.refresh(Some(slot));
        self.refresh(prev);
        self.refresh(next);

        self.current_heap_size = self.current_heap_size.saturating_sub(old_size);
        self.add_heap(new_size);
        Ok(ResizeOutcome::Resized { old_size, old_kind })
    }

    /// First memory descriptor whose payload address is `handle`.
    #[must_use]
    pub fn find_block(&self, handle: BlockHandle) -> Option<SlotId> {
        self.iter()
            .find(|(_, d)| d.as_memory().is_some_and(|b| b.handle() == handle))
            .map(|(slot, _)| slot)
    }

    /// First stream descriptor carrying `handle`.
    #[must_use]
    pub fn find_stream(&self, handle: StreamHandle) -> Option<SlotId> {
        self.iter()
            .find(|(_, d)| d.as_stream().is_some_and(|s| s.handle == handle))
            .map(|(slot, _)| slot)
    }

    /// Walk descriptors in registration order.
    #[must_use]
    pub fn iter(&self) -> RegistryIter<'_> {
        RegistryIter {
            registry: self,
            cursor: self.head,
            remaining: self.len,
        }
    }
}

/// Iterator over `(slot, descriptor)` pairs in list order.
pub struct RegistryIter<'a> {
    registry: &'a Registry,
    cursor: Option<SlotId>,
    /// Bounds the walk so a corrupted cycle cannot loop forever.
    remaining: usize,
}

impl<'a> Iterator for RegistryIter<'a> {
    type Item = (SlotId, &'a Descriptor);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let slot = self.cursor?;
        let desc = self.registry.get(slot)?;
        self.cursor = desc.next;
        self.remaining -= 1;
        Some((slot, desc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::MemoryBlock;
    use crate::region::{Fill, GuardedRegion};

    fn block(size: usize) -> Descriptor {
        let region = GuardedRegion::allocate(size, Fill::Poison).expect("alloc");
        Descriptor::new(
            Resource::Memory(MemoryBlock::new(region, CallKind::Malloc)),
            SourceLocation::new("arena_test.c", size as u32),
        )
    }

    fn order(reg: &Registry) -> Vec<SlotId> {
        reg.iter().map(|(slot, _)| slot).collect()
    }

    fn assert_sealed(reg: &Registry) {
        for (slot, desc) in reg.iter() {
            assert_eq!(
                desc.checksum,
                desc.compute_checksum(),
                "stale checksum at {slot:?}"
            );
        }
        if let Some(head) = reg.head() {
            assert!(reg.get(head).unwrap().prev().is_none());
        }
        if let Some(tail) = reg.tail() {
            assert!(reg.get(tail).unwrap().next().is_none());
        }
    }

    #[test]
    fn insert_appends_and_accounts_heap() {
        let mut reg = Registry::new();
        let a = reg.insert(block(10));
        let b = reg.insert(block(20));
        assert_eq!(order(&reg), vec![a, b]);
        assert_eq!(reg.current_heap_size(), 30);
        assert_eq!(reg.peak_heap_size(), 30);
        assert_sealed(&reg);
    }

    #[test]
    fn remove_sole_element_empties_registry() {
        let mut reg = Registry::new();
        let a = reg.insert(block(5));
        let desc = reg.remove(a).expect("remove");
        assert_eq!(desc.as_memory().unwrap().size(), 5);
        assert!(reg.is_empty());
        assert_eq!(reg.head(), None);
        assert_eq!(reg.tail(), None);
        assert_eq!(reg.current_heap_size(), 0);
        assert_eq!(reg.peak_heap_size(), 5);
    }

    #[test]
    fn remove_head_tail_and_interior() {
        let mut reg = Registry::new();
        let a = reg.insert(block(1));
        let b = reg.insert(block(2));
        let c = reg.insert(block(3));
        let d = reg.insert(block(4));

        reg.remove(b).expect("interior");
        assert_eq!(order(&reg), vec![a, c, d]);
        assert_sealed(&reg);

        reg.remove(a).expect("head");
        assert_eq!(order(&reg), vec![c, d]);
        assert_sealed(&reg);

        reg.remove(d).expect("tail");
        assert_eq!(order(&reg), vec![c]);
        assert_sealed(&reg);
        assert_eq!(reg.current_heap_size(), 3);
    }

    #[test]
    fn vacant_slot_is_an_error() {
        let mut reg = Registry::new();
        let a = reg.insert(block(1));
        reg.remove(a).expect("remove");
        assert_eq!(reg.remove(a).unwrap_err(), RegistryError::VacantSlot(a));
    }

    #[test]
    fn broken_links_are_detected_on_remove() {
        let mut reg = Registry::new();
        let a = reg.insert(block(1));
        let b = reg.insert(block(2));
        // Claim b is not the tail while its next link is empty.
        reg.get_mut(a).unwrap().next = None;
        reg.get_mut(b).unwrap().prev = None;
        assert_eq!(
            reg.remove(b).unwrap_err(),
            RegistryError::BrokenTopology(b)
        );
    }

    #[test]
    fn slots_are_reused_after_removal() {
        let mut reg = Registry::new();
        let a = reg.insert(block(1));
        let _b = reg.insert(block(2));
        reg.remove(a).expect("remove");
        let c = reg.insert(block(3));
        assert_eq!(c, a);
        assert_sealed(&reg);
    }

    #[test]
    fn find_block_matches_payload_address_only() {
        let mut reg = Registry::new();
        let a = reg.insert(block(16));
        let handle = reg.get(a).unwrap().as_memory().unwrap().handle();
        assert_eq!(reg.find_block(handle), Some(a));
        let inner = BlockHandle::from_ptr(handle.as_ptr().wrapping_add(1)).unwrap();
        assert_eq!(reg.find_block(inner), None);
    }

    #[test]
    fn resize_updates_accounting_and_neighbors() {
        let mut reg = Registry::new();
        let a = reg.insert(block(10));
        let b = reg.insert(block(20));
        let c = reg.insert(block(30));
        let out = reg
            .resize_block(b, 50, CallKind::Realloc, SourceLocation::new("x.c", 9))
            .expect("resize");
        assert_eq!(
            out,
            ResizeOutcome::Resized {
                old_size: 20,
                old_kind: CallKind::Malloc
            }
        );
        assert_eq!(reg.current_heap_size(), 90);
        assert_eq!(reg.peak_heap_size(), 90);
        let desc = reg.get(b).unwrap();
        assert_eq!(desc.location.line, 9);
        let mem = desc.as_memory().unwrap();
        assert_eq!(mem.produced_by, CallKind::Realloc);
        assert!(mem.tail_guard.verify(mem.region.tail_guard()));
        assert_eq!(order(&reg), vec![a, b, c]);
        assert_sealed(&reg);

        reg.resize_block(b, 5, CallKind::Realloc, SourceLocation::new("x.c", 10))
            .expect("shrink");
        assert_eq!(reg.current_heap_size(), 45);
        assert_eq!(reg.peak_heap_size(), 90);
    }
}
