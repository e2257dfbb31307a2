//! Tracking membrane for the resource leak debugger.
//!
//! This crate holds the bookkeeping that sits behind every intercepted
//! allocation and stream call: it records each live resource, proves on
//! every call that none of the records (or the bytes around a block) have
//! been damaged, and decides whether a request is admitted under the
//! configured quotas.
//!
//! # Architecture
//!
//! - **Guards** (`guard`): 32-byte reference patterns and the descriptor checksum fold
//! - **Guarded regions** (`region`): `[head | payload | tail]` platform allocations
//! - **Descriptors** (`descriptor`): per-resource records with markers and checksum
//! - **Registry** (`arena`): slab of descriptors linked in acquisition order
//! - **Detector** (`detector`): descriptor and whole-registry validation
//! - **Limits** (`limits`): per-call-kind quotas and the admission order
//! - **Configuration** (`config`): severity threshold and fatal action defaults
//! - **Metrics** (`metrics`): atomic counters for observability

#![deny(unsafe_code)]

pub mod arena;
pub mod config;
pub mod descriptor;
pub mod detector;
pub mod guard;
pub mod limits;
pub mod metrics;
pub mod region;

pub use arena::{Registry, RegistryError, ResizeOutcome, SlotId};
pub use config::{FatalAction, Severity};
pub use descriptor::{
    BlockHandle, Descriptor, MemoryBlock, Resource, ResourceKind, SourceLocation, StreamHandle,
    StreamRecord,
};
pub use detector::{Corruption, ValidationError, validate_registry};
pub use guard::{GUARD_SIZE, GuardPattern};
pub use limits::{CallKind, LimitRefusal, LimitTable, MAX_REQUEST, Request, UNLIMITED};
pub use metrics::{DebuggerMetrics, MetricsSnapshot};
pub use region::{Fill, GuardedRegion};
