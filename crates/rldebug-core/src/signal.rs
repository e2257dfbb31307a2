//! Fatal signal delivery.

#![allow(unsafe_code)]

/// Raise `sig` in the current process, then abort if a handler returned.
pub(crate) fn raise_fatal(sig: libc::c_int) -> ! {
    // SAFETY: raise(3) has no memory-safety preconditions.
    unsafe {
        libc::raise(sig);
    }
    std::process::abort()
}
