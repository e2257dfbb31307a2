//! Limit enforcement engine.
//!
//! Every intercepted call kind owns one [`LimitDescriptor`]. Allocation-class
//! requests are admitted in a fixed order; the first failing check wins and
//! nothing is mutated except the success counter already charged:
//!
//! 1. global disable (fatal misuse, not a soft failure)
//! 2. success-count budget (fault injection: "the Nth call onward fails")
//! 3. single-call cap
//! 4. cumulative cap
//! 5. global heap cap
//!
//! Byte caps for a resize of an existing block are evaluated against the
//! growth only; shrinking never trips a single-call or cumulative cap.

use thiserror::Error;

/// Sentinel meaning "no cap".
pub const UNLIMITED: usize = usize::MAX;

/// Largest request accepted; anything above is a negative size cast to unsigned.
pub const MAX_REQUEST: usize = usize::MAX >> 1;

/// Intercepted call kinds. Each keys one limit descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    Malloc,
    Calloc,
    Realloc,
    Free,
    Strdup,
    Strndup,
    Fopen,
    Fclose,
    Exit,
}

impl CallKind {
    /// Every call kind, in table order.
    pub const ALL: [Self; 9] = [
        Self::Malloc,
        Self::Calloc,
        Self::Realloc,
        Self::Free,
        Self::Strdup,
        Self::Strndup,
        Self::Fopen,
        Self::Fclose,
        Self::Exit,
    ];

    /// Number of call kinds.
    pub const COUNT: usize = Self::ALL.len();

    const fn index(self) -> usize {
        self as usize
    }

    /// libc symbol the kind stands in for.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Calloc => "calloc",
            Self::Realloc => "realloc",
            Self::Free => "free",
            Self::Strdup => "strdup",
            Self::Strndup => "strndup",
            Self::Fopen => "fopen",
            Self::Fclose => "fclose",
            Self::Exit => "exit",
        }
    }

    /// Returns true for kinds that acquire heap bytes and consult byte caps.
    #[must_use]
    pub const fn is_allocation(self) -> bool {
        matches!(
            self,
            Self::Malloc | Self::Calloc | Self::Realloc | Self::Strdup | Self::Strndup
        )
    }

    /// Parse a libc symbol name (case-insensitive).
    #[must_use]
    pub fn from_symbol(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.symbol().eq_ignore_ascii_case(s))
    }
}

/// Quota state for one call kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitDescriptor {
    /// Max bytes in one call.
    pub single_shot_cap: usize,
    /// Max bytes this kind may have outstanding.
    pub cumulative_cap: usize,
    /// Bytes this kind currently has outstanding.
    pub cumulative_sum: usize,
    /// Max number of calls allowed to succeed.
    pub success_cap: usize,
    /// Calls charged against `success_cap` so far.
    pub success_counter: usize,
}

impl LimitDescriptor {
    /// A descriptor with every cap lifted and every counter at zero.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            single_shot_cap: UNLIMITED,
            cumulative_cap: UNLIMITED,
            cumulative_sum: 0,
            success_cap: UNLIMITED,
            success_counter: 0,
        }
    }
}

impl Default for LimitDescriptor {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Byte exposure of an allocation-class request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// A new block of `bytes`.
    Fresh { bytes: usize },
    /// An existing `old_size` block becoming `new_size`.
    Resize { old_size: usize, new_size: usize },
}

/// Why a request was refused.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitRefusal {
    #[error("heap functions are globally disabled")]
    HeapDisabled,
    #[error("success budget of {cap} calls exhausted")]
    SuccessBudget { cap: usize },
    #[error("single-call cap is {cap} bytes")]
    SingleShot { cap: usize },
    #[error("cumulative cap is {cap} bytes")]
    Cumulative { cap: usize },
    #[error("global heap cap is {cap} bytes")]
    GlobalHeap { cap: usize },
}

impl LimitRefusal {
    /// Only a disabled heap is misuse; every other refusal is a soft failure.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::HeapDisabled)
    }
}

/// Process-wide quota table plus the global heap switches.
#[derive(Debug, Clone)]
pub struct LimitTable {
    descriptors: [LimitDescriptor; CallKind::COUNT],
    global_heap_cap: Option<usize>,
    heap_disabled: bool,
}

impl LimitTable {
    /// A table with nothing capped.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            descriptors: [LimitDescriptor::unlimited(); CallKind::COUNT],
            global_heap_cap: None,
            heap_disabled: false,
        }
    }

    /// Lift every cap, zero every counter and clear the global switches.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Cap total outstanding heap bytes; `None` or `UNLIMITED` lifts the cap.
    pub fn set_global_heap_cap(&mut self, cap: Option<usize>) {
        self.global_heap_cap = cap.filter(|&c| c != UNLIMITED);
    }

    #[must_use]
    pub const fn global_heap_cap(&self) -> Option<usize> {
        self.global_heap_cap
    }

    pub fn set_heap_disabled(&mut self, disabled: bool) {
        self.heap_disabled = disabled;
    }

    #[must_use]
    pub const fn heap_disabled(&self) -> bool {
        self.heap_disabled
    }

    pub fn set_single_shot_cap(&mut self, kind: CallKind, cap: usize) {
        self.descriptors[kind.index()].single_shot_cap = cap;
    }

    pub fn set_cumulative_cap(&mut self, kind: CallKind, cap: usize) {
        self.descriptors[kind.index()].cumulative_cap = cap;
    }

    pub fn set_success_cap(&mut self, kind: CallKind, cap: usize) {
        self.descriptors[kind.index()].success_cap = cap;
    }

    /// Current quota state for `kind`.
    #[must_use]
    pub fn descriptor(&self, kind: CallKind) -> &LimitDescriptor {
        &self.descriptors[kind.index()]
    }

    /// Step 1: refuse when heap functions are switched off.
    pub fn check_heap_enabled(&self) -> Result<(), LimitRefusal> {
        if self.heap_disabled {
            return Err(LimitRefusal::HeapDisabled);
        }
        Ok(())
    }

    /// Step 2: charge one call against the success budget.
    ///
    /// The counter advances even when the call is refused, so once the budget
    /// is spent every later call of the kind keeps failing.
    pub fn charge_success(&mut self, kind: CallKind) -> Result<(), LimitRefusal> {
        let desc = &mut self.descriptors[kind.index()];
        desc.success_counter = desc.success_counter.saturating_add(1);
        if desc.success_counter > desc.success_cap {
            return Err(LimitRefusal::SuccessBudget {
                cap: desc.success_cap,
            });
        }
        Ok(())
    }

    /// Steps 3-5: single-call, cumulative and global heap caps.
    pub fn check_bytes(
        &self,
        kind: CallKind,
        request: Request,
        current_heap: usize,
    ) -> Result<(), LimitRefusal> {
        let desc = self.descriptor(kind);
        match request {
            Request::Fresh { bytes } => {
                if bytes > desc.single_shot_cap {
                    return Err(LimitRefusal::SingleShot {
                        cap: desc.single_shot_cap,
                    });
                }
                if exceeds(bytes, desc.cumulative_sum, desc.cumulative_cap) {
                    return Err(LimitRefusal::Cumulative {
                        cap: desc.cumulative_cap,
                    });
                }
                if let Some(cap) = self.global_heap_cap {
                    if exceeds(bytes, current_heap, cap) {
                        return Err(LimitRefusal::GlobalHeap { cap });
                    }
                }
            }
            Request::Resize { old_size, new_size } if new_size > old_size => {
                let growth = new_size - old_size;
                if growth > desc.single_shot_cap {
                    return Err(LimitRefusal::SingleShot {
                        cap: desc.single_shot_cap,
                    });
                }
                if exceeds(growth, desc.cumulative_sum, desc.cumulative_cap) {
                    return Err(LimitRefusal::Cumulative {
                        cap: desc.cumulative_cap,
                    });
                }
                if let Some(cap) = self.global_heap_cap {
                    if exceeds(growth, current_heap, cap) {
                        return Err(LimitRefusal::GlobalHeap { cap });
                    }
                }
            }
            Request::Resize { old_size, new_size } => {
                // Shrinking lowers exposure; only an already-exceeded global
                // cap (lowered after the fact) can still refuse it.
                let shrink = old_size - new_size;
                if let Some(cap) = self.global_heap_cap {
                    if current_heap.saturating_sub(shrink) > cap {
                        return Err(LimitRefusal::GlobalHeap { cap });
                    }
                }
            }
        }
        Ok(())
    }

    /// Full admission for a new allocation-class request (steps 1-5).
    pub fn admit(
        &mut self,
        kind: CallKind,
        request: Request,
        current_heap: usize,
    ) -> Result<(), LimitRefusal> {
        self.check_heap_enabled()?;
        self.charge_success(kind)?;
        self.check_bytes(kind, request, current_heap)
    }

    /// Account a successful acquisition of `bytes` by `kind`.
    pub fn record_acquired(&mut self, kind: CallKind, bytes: usize) {
        let desc = &mut self.descriptors[kind.index()];
        desc.cumulative_sum = desc.cumulative_sum.saturating_add(bytes);
    }

    /// Account the release of `bytes` originally produced by `kind`.
    ///
    /// Saturates at zero: a reset while blocks are live zeroes the sum.
    pub fn record_released(&mut self, kind: CallKind, bytes: usize) {
        let desc = &mut self.descriptors[kind.index()];
        desc.cumulative_sum = desc.cumulative_sum.saturating_sub(bytes);
    }

    /// Move a resized block's bytes from its old producer to its new one.
    pub fn record_resized(
        &mut self,
        old_kind: CallKind,
        old_size: usize,
        new_kind: CallKind,
        new_size: usize,
    ) {
        self.record_released(old_kind, old_size);
        self.record_acquired(new_kind, new_size);
    }
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::new()
    }
}

fn exceeds(bytes: usize, already: usize, cap: usize) -> bool {
    bytes.checked_add(already).is_none_or(|total| total > cap)
}
