//! Corruption detector.
//!
//! Validates one descriptor (markers, checksum, guards) or sweeps the whole
//! registry, stopping at the first damaged descriptor.

use thiserror::Error;

use crate::arena::{Registry, SlotId};
use crate::descriptor::{Descriptor, LEADING_MARKER, Resource, SourceLocation, TRAILING_MARKER};

/// Ways a descriptor can fail validation, in check order.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationError {
    #[error("leading marker overwritten")]
    BadLeadingMarker,
    #[error("trailing marker overwritten")]
    BadTrailingMarker,
    #[error("descriptor checksum mismatch")]
    BadChecksum,
    #[error("bytes before the block were overwritten")]
    BadHeadGuard,
    #[error("bytes after the block were overwritten")]
    BadTailGuard,
}

impl ValidationError {
    /// Structural damage means the registry itself can no longer be trusted.
    #[must_use]
    pub const fn is_structural(self) -> bool {
        matches!(
            self,
            Self::BadLeadingMarker | Self::BadTrailingMarker | Self::BadChecksum
        )
    }
}

/// Check a single descriptor.
pub fn validate_descriptor(desc: &Descriptor) -> Result<(), ValidationError> {
    if desc.leading_marker != LEADING_MARKER {
        return Err(ValidationError::BadLeadingMarker);
    }
    if desc.trailing_marker != TRAILING_MARKER {
        return Err(ValidationError::BadTrailingMarker);
    }
    if desc.compute_checksum() != desc.checksum {
        return Err(ValidationError::BadChecksum);
    }
    if let Resource::Memory(block) = &desc.resource {
        if !block.head_guard.verify(block.region.head_guard()) {
            return Err(ValidationError::BadHeadGuard);
        }
        if !block.tail_guard.verify(block.region.tail_guard()) {
            return Err(ValidationError::BadTailGuard);
        }
    }
    Ok(())
}

/// First damage found by a registry sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Corruption {
    pub slot: SlotId,
    pub error: ValidationError,
    /// Where the damaged resource was acquired (or last resized).
    pub acquired_at: SourceLocation,
}

impl Corruption {
    /// Guard damage can be pinned to a block; structural damage cannot.
    #[must_use]
    pub fn attributed_site(&self) -> Option<SourceLocation> {
        (!self.error.is_structural()).then_some(self.acquired_at)
    }
}

/// Validate every registered descriptor in list order.
///
/// Returns the number of descriptors checked.
pub fn validate_registry(registry: &Registry) -> Result<usize, Corruption> {
    let mut checked = 0;
    for (slot, desc) in registry.iter() {
        validate_descriptor(desc).map_err(|error| Corruption {
            slot,
            error,
            acquired_at: desc.location,
        })?;
        checked += 1;
    }
    Ok(checked)
}
