//! Boundary to the GPU driver binding
//!
//! The core never encodes commands itself. It only asks the driver to
//! allocate, bind, unbind and free execution contexts.

use crate::capabilities::Capabilities;
use crate::drawable::Drawable;
use crate::error::NativeError;
use std::fmt;

/// Driver-side context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandle(pub u64);

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Supplied by the GPU driver binding.
pub trait NativeContextProvider: Send + Sync {
    /// Allocates a context for `drawable`. When `share_with` is given the new
    /// context must use the same object namespace as that handle.
    fn create_native_context(
        &self,
        drawable: &Drawable,
        caps: &Capabilities,
        share_with: Option<NativeHandle>,
    ) -> Result<NativeHandle, NativeError>;

    /// Binds `handle` to the calling thread with the given draw/read surfaces.
    fn make_native_current(
        &self,
        handle: NativeHandle,
        draw: &Drawable,
        read: &Drawable,
    ) -> Result<(), NativeError>;

    /// Unbinds `handle` from the calling thread.
    fn release_native(&self, handle: NativeHandle) -> Result<(), NativeError>;

    fn destroy_native(&self, handle: NativeHandle) -> Result<(), NativeError>;
}
