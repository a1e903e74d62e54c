//! Headless software backend
//!
//! Implements [`DrawableProvider`] and [`NativeContextProvider`] without a
//! GPU. It keeps enough bookkeeping to catch the mistakes a real driver
//! would crash on: freeing a handle twice, binding a context on two threads,
//! sharing with an unknown handle, rendering into a destroyed surface.

use crate::capabilities::Capabilities;
use crate::drawable::{Drawable, DrawableId, DrawableProvider, SurfaceDescriptor};
use crate::error::{DrawableError, NativeError};
use crate::native::{NativeContextProvider, NativeHandle};
use log::{debug, trace};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

#[derive(Debug)]
struct NativeRecord {
    /// First handle of the object namespace this context uses
    share_root: NativeHandle,
    current_on: Option<ThreadId>,
    caps: Capabilities,
}

/// Allocation counters, useful for leak assertions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HeadlessStats {
    pub contexts_created: u64,
    pub contexts_destroyed: u64,
    pub drawables_created: u64,
    pub drawables_destroyed: u64,
    pub make_current_calls: u64,
}

#[derive(Debug, Default)]
struct HeadlessState {
    next_handle: u64,
    contexts: HashMap<NativeHandle, NativeRecord>,
    drawables: HashSet<DrawableId>,
    refuse_next: Option<String>,
    stats: HeadlessStats,
}

/// Software implementation of both provider traits.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    state: Mutex<HeadlessState>,
}

impl HeadlessBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next context creation fail with `message`.
    pub fn refuse_next_creation(&self, message: impl Into<String>) {
        self.state.lock().refuse_next = Some(message.into());
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn live_drawables(&self) -> usize {
        self.state.lock().drawables.len()
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats.clone()
    }

    /// Root handle of the object namespace `handle` uses.
    pub fn share_root(&self, handle: NativeHandle) -> Option<NativeHandle> {
        self.state
            .lock()
            .contexts
            .get(&handle)
            .map(|record| record.share_root)
    }

    /// True when both handles see the same objects.
    pub fn shares_namespace(&self, a: NativeHandle, b: NativeHandle) -> bool {
        match (self.share_root(a), self.share_root(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    pub fn capabilities_of(&self, handle: NativeHandle) -> Option<Capabilities> {
        self.state
            .lock()
            .contexts
            .get(&handle)
            .map(|record| record.caps.clone())
    }
}

impl DrawableProvider for HeadlessBackend {
    fn create_drawable(&self, descriptor: &SurfaceDescriptor) -> Result<Arc<Drawable>, DrawableError> {
        let drawable = Drawable::new(descriptor)?;
        let mut state = self.state.lock();
        state.drawables.insert(drawable.id());
        state.stats.drawables_created += 1;
        debug!(
            "headless {:?} drawable {} ({}x{})",
            descriptor.kind,
            drawable.id(),
            descriptor.width,
            descriptor.height
        );
        Ok(drawable)
    }

    fn destroy_drawable(&self, drawable: &Drawable) {
        drawable.invalidate();
        let mut state = self.state.lock();
        if state.drawables.remove(&drawable.id()) {
            state.stats.drawables_destroyed += 1;
            debug!("headless drawable {} destroyed", drawable.id());
        }
    }

    fn resize(&self, drawable: &Drawable, width: u32, height: u32) -> Result<(), DrawableError> {
        if !self.state.lock().drawables.contains(&drawable.id()) {
            return Err(DrawableError::Invalid(drawable.id()));
        }
        drawable.set_size(width, height)
    }
}

impl NativeContextProvider for HeadlessBackend {
    fn create_native_context(
        &self,
        drawable: &Drawable,
        caps: &Capabilities,
        share_with: Option<NativeHandle>,
    ) -> Result<NativeHandle, NativeError> {
        let mut state = self.state.lock();
        if let Some(message) = state.refuse_next.take() {
            return Err(NativeError::new(message));
        }
        if !drawable.is_valid() || !state.drawables.contains(&drawable.id()) {
            return Err(NativeError::new(format!("unknown drawable {}", drawable.id())));
        }

        state.next_handle += 1;
        let handle = NativeHandle(state.next_handle);
        let share_root = match share_with {
            None => handle,
            Some(other) => match state.contexts.get(&other) {
                Some(record) => record.share_root,
                None => return Err(NativeError::new(format!("cannot share with unknown {}", other))),
            },
        };

        state.contexts.insert(
            handle,
            NativeRecord {
                share_root,
                current_on: None,
                caps: caps.clone(),
            },
        );
        state.stats.contexts_created += 1;
        trace!("headless native {} (namespace {})", handle, share_root);
        Ok(handle)
    }

    fn make_native_current(
        &self,
        handle: NativeHandle,
        draw: &Drawable,
        read: &Drawable,
    ) -> Result<(), NativeError> {
        let me = thread::current().id();
        let mut state = self.state.lock();
        for surface in [draw, read] {
            if !state.drawables.contains(&surface.id()) {
                return Err(NativeError::new(format!("surface {} is gone", surface.id())));
            }
        }
        state.stats.make_current_calls += 1;
        let record = state
            .contexts
            .get_mut(&handle)
            .ok_or_else(|| NativeError::new(format!("unknown context {}", handle)))?;
        match record.current_on {
            Some(owner) if owner != me => Err(NativeError::new(format!(
                "context {} is bound to another thread",
                handle
            ))),
            _ => {
                record.current_on = Some(me);
                Ok(())
            }
        }
    }

    fn release_native(&self, handle: NativeHandle) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        let record = state
            .contexts
            .get_mut(&handle)
            .ok_or_else(|| NativeError::new(format!("unknown context {}", handle)))?;
        record.current_on = None;
        Ok(())
    }

    fn destroy_native(&self, handle: NativeHandle) -> Result<(), NativeError> {
        let mut state = self.state.lock();
        match state.contexts.remove(&handle) {
            Some(_) => {
                state.stats.contexts_destroyed += 1;
                Ok(())
            }
            None => Err(NativeError::new(format!("double free of context {}", handle))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_namespace_follows_root() {
        let backend = HeadlessBackend::new();
        let drawable = backend.create_drawable(&SurfaceDescriptor::default()).unwrap();
        let caps = Capabilities::default();

        let a = backend.create_native_context(&drawable, &caps, None).unwrap();
        let b = backend.create_native_context(&drawable, &caps, Some(a)).unwrap();
        let c = backend.create_native_context(&drawable, &caps, Some(b)).unwrap();
        let lone = backend.create_native_context(&drawable, &caps, None).unwrap();

        assert_eq!(backend.share_root(c), Some(a));
        assert!(backend.shares_namespace(b, c));
        assert!(!backend.shares_namespace(a, lone));
    }

    #[test]
    fn test_double_free_detected() {
        let backend = HeadlessBackend::new();
        let drawable = backend.create_drawable(&SurfaceDescriptor::default()).unwrap();
        let handle = backend
            .create_native_context(&drawable, &Capabilities::default(), None)
            .unwrap();

        backend.destroy_native(handle).unwrap();
        assert!(backend.destroy_native(handle).is_err());
        assert_eq!(backend.live_contexts(), 0);
    }

    #[test]
    fn test_refused_creation_is_one_shot() {
        let backend = HeadlessBackend::new();
        let drawable = backend.create_drawable(&SurfaceDescriptor::default()).unwrap();
        backend.refuse_next_creation("no pixel format");

        let caps = Capabilities::default();
        assert_eq!(
            backend.create_native_context(&drawable, &caps, None),
            Err(NativeError::new("no pixel format"))
        );
        assert!(backend.create_native_context(&drawable, &caps, None).is_ok());
    }

    #[test]
    fn test_destroyed_surface_cannot_be_bound() {
        let backend = HeadlessBackend::new();
        let drawable = backend.create_drawable(&SurfaceDescriptor::default()).unwrap();
        let handle = backend
            .create_native_context(&drawable, &Capabilities::default(), None)
            .unwrap();

        backend.destroy_drawable(&drawable);
        assert!(backend.make_native_current(handle, &drawable, &drawable).is_err());
        assert!(backend.resize(&drawable, 10, 10).is_err());
        assert_eq!(backend.live_drawables(), 0);
    }
}
