//! Rendering context lifecycle
//!
//! ```text
//! Uninitialized --create()--> NotCurrent --make_current()--> Current
//!                                  ^                           |
//!                                  +-------- release() --------+
//! NotCurrent --destroy()--> Destroyed
//! ```
//!
//! A [`RenderingContext`] is a cheap, clonable handle. Dropping the last
//! handle of a created context that was never destroyed frees the native
//! handle and reports a release to the registry instead of a leave.

use crate::capabilities::{check_share_compatibility, Capabilities};
use crate::drawable::Drawable;
use crate::error::{ContextError, CreationFailure, ShareError};
use crate::native::{NativeContextProvider, NativeHandle};
use crate::registry::{ContextId, SharingGroupRegistry};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Lifecycle state of a rendering context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Uninitialized,
    NotCurrent,
    Current,
    Destroyed,
}

/// Creates contexts wired to one registry and one driver binding.
#[derive(Clone)]
pub struct ContextFactory {
    registry: Arc<SharingGroupRegistry>,
    native: Arc<dyn NativeContextProvider>,
}

impl ContextFactory {
    pub fn new(
        registry: Arc<SharingGroupRegistry>,
        native: Arc<dyn NativeContextProvider>,
    ) -> Self {
        Self { registry, native }
    }

    pub fn registry(&self) -> &Arc<SharingGroupRegistry> {
        &self.registry
    }

    /// A context that will found its own sharing group when created.
    pub fn context(&self, caps: Capabilities) -> RenderingContext {
        RenderingContext::new(self, caps, None)
    }

    /// A context that will join `master`'s group when created.
    pub fn shared_context(&self, caps: Capabilities, master: &RenderingContext) -> RenderingContext {
        RenderingContext::new(self, caps, Some(master.clone()))
    }
}

struct ContextState {
    lifecycle: LifecycleState,
    native: Option<NativeHandle>,
    draw: Option<Arc<Drawable>>,
    read: Option<Arc<Drawable>>,
    owner: Option<ThreadId>,
}

struct ContextInner {
    id: ContextId,
    caps: Capabilities,
    master: Option<RenderingContext>,
    registry: Arc<SharingGroupRegistry>,
    native: Arc<dyn NativeContextProvider>,
    state: Mutex<ContextState>,
    released: Condvar,
}

/// Handle to a GPU execution context.
#[derive(Clone)]
pub struct RenderingContext {
    inner: Arc<ContextInner>,
}

impl RenderingContext {
    fn new(factory: &ContextFactory, caps: Capabilities, master: Option<RenderingContext>) -> Self {
        let id = ContextId::next();
        debug!(
            "new context {} ({}, master {:?})",
            id,
            caps.profile,
            master.as_ref().map(|m| m.id())
        );
        Self {
            inner: Arc::new(ContextInner {
                id,
                caps,
                master,
                registry: Arc::clone(&factory.registry),
                native: Arc::clone(&factory.native),
                state: Mutex::new(ContextState {
                    lifecycle: LifecycleState::Uninitialized,
                    native: None,
                    draw: None,
                    read: None,
                    owner: None,
                }),
                released: Condvar::new(),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.caps
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.lock().lifecycle
    }

    /// The context this one was asked to share with, if any.
    pub fn requested_master(&self) -> Option<&RenderingContext> {
        self.inner.master.as_ref()
    }

    /// Root of this context's sharing group; `None` when this context is
    /// the root or shares with nobody.
    pub fn shared_master(&self) -> Option<ContextId> {
        self.inner.registry.shared_master(self.inner.id)
    }

    pub fn is_shared(&self) -> bool {
        self.inner.registry.is_shared(self.inner.id)
    }

    pub fn created_share_count(&self) -> usize {
        self.inner.registry.created_share_count(self.inner.id)
    }

    pub fn destroyed_share_count(&self) -> usize {
        self.inner.registry.destroyed_share_count(self.inner.id)
    }

    pub fn native_handle(&self) -> Option<NativeHandle> {
        self.inner.state.lock().native
    }

    pub fn draw_drawable(&self) -> Option<Arc<Drawable>> {
        self.inner.state.lock().draw.clone()
    }

    pub fn read_drawable(&self) -> Option<Arc<Drawable>> {
        self.inner.state.lock().read.clone()
    }

    pub fn is_current_on_this_thread(&self) -> bool {
        self.inner.state.lock().owner == Some(thread::current().id())
    }

    /// True when both handles refer to the same context.
    pub fn ptr_eq(&self, other: &RenderingContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocates the native context against `drawable` and registers it.
    ///
    /// With a master, the master must already be created and the
    /// capabilities must pass [`check_share_compatibility`] before the driver
    /// is asked for anything. If the registry refuses the join, the native
    /// context is freed again so nothing is half-created.
    pub fn create(&self, drawable: &Arc<Drawable>) -> Result<(), ContextError> {
        let id = self.inner.id;
        let mut state = self.inner.state.lock();
        if state.lifecycle != LifecycleState::Uninitialized {
            return Err(ContextError::InvalidState {
                context: id,
                operation: "create",
                state: state.lifecycle,
            });
        }
        drawable.ensure_valid()?;

        let share_with = match &self.inner.master {
            None => None,
            Some(master) => {
                let (master_state, master_native) = {
                    let master_guard = master.inner.state.lock();
                    (master_guard.lifecycle, master_guard.native)
                };
                match master_state {
                    LifecycleState::Uninitialized => {
                        return Err(ShareError::MasterNotFound(master.id()).into())
                    }
                    LifecycleState::Destroyed => {
                        return Err(ShareError::MasterDestroyed(master.id()).into())
                    }
                    LifecycleState::NotCurrent | LifecycleState::Current => {}
                }
                check_share_compatibility(&master.inner.caps, &self.inner.caps).map_err(
                    |mismatch| ContextError::CreationFailed {
                        context: id,
                        reason: CreationFailure::Incompatible(mismatch),
                    },
                )?;
                master_native
            }
        };

        let handle = self
            .inner
            .native
            .create_native_context(drawable, &self.inner.caps, share_with)
            .map_err(|err| ContextError::CreationFailed {
                context: id,
                reason: CreationFailure::Native(err),
            })?;

        let registered = match &self.inner.master {
            None => self.inner.registry.found(id),
            Some(master) => self.inner.registry.join(id, master.id()),
        };
        if let Err(err) = registered {
            if let Err(native_err) = self.inner.native.destroy_native(handle) {
                warn!("failed to free native context {} after refused join: {}", handle, native_err);
            }
            return Err(err.into());
        }

        state.native = Some(handle);
        state.draw = Some(Arc::clone(drawable));
        state.read = Some(Arc::clone(drawable));
        state.lifecycle = LifecycleState::NotCurrent;

        info!(
            "✅ context {} created on {} (native {}, group size {})",
            id,
            drawable.id(),
            handle,
            self.inner.registry.group_size(id)
        );
        Ok(())
    }

    /// Makes the context current on the calling thread, blocking while
    /// another thread holds it. Re-entrant on the owning thread.
    pub fn make_current(&self) -> Result<(), ContextError> {
        let me = thread::current().id();
        let mut state = self.inner.state.lock();
        loop {
            self.check_usable(&state, "make current")?;
            match state.owner {
                None => break,
                Some(owner) if owner == me => return Ok(()),
                Some(_) => self.inner.released.wait(&mut state),
            }
        }
        self.bind_current(&mut state, me)
    }

    /// Like [`make_current`](Self::make_current) but fails immediately with
    /// [`ContextError::AlreadyCurrentElsewhere`] instead of waiting.
    pub fn try_make_current(&self) -> Result<(), ContextError> {
        let me = thread::current().id();
        let mut state = self.inner.state.lock();
        self.check_usable(&state, "make current")?;
        match state.owner {
            None => self.bind_current(&mut state, me),
            Some(owner) if owner == me => Ok(()),
            Some(_) => Err(ContextError::AlreadyCurrentElsewhere(self.inner.id)),
        }
    }

    /// Unbinds the context from the calling thread and wakes one waiter.
    pub fn release(&self) -> Result<(), ContextError> {
        let me = thread::current().id();
        let mut state = self.inner.state.lock();
        if state.owner != Some(me) {
            return Err(ContextError::NotCurrentOnThisThread(self.inner.id));
        }
        if let Some(handle) = state.native {
            self.inner.native.release_native(handle)?;
        }
        state.owner = None;
        state.lifecycle = LifecycleState::NotCurrent;
        drop(state);

        self.inner.released.notify_all();
        Ok(())
    }

    /// Frees the native context and leaves the sharing group.
    ///
    /// Legal from `NotCurrent` (and from `Uninitialized`, where there is
    /// nothing to free).
    ///
    /// # Panics
    ///
    /// Destroying an already destroyed context panics.
    pub fn destroy(&self) -> Result<(), ContextError> {
        let id = self.inner.id;
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            LifecycleState::Destroyed => panic!("double destroy of rendering context {}", id),
            LifecycleState::Current => return Err(ContextError::StillCurrent(id)),
            LifecycleState::Uninitialized => {
                state.draw = None;
                state.read = None;
                state.lifecycle = LifecycleState::Destroyed;
                debug!("context {} destroyed before creation", id);
                return Ok(());
            }
            LifecycleState::NotCurrent => {}
        }

        state.draw = None;
        state.read = None;
        if let Some(handle) = state.native.take() {
            if let Err(err) = self.inner.native.destroy_native(handle) {
                warn!("native destroy of {} ({}) failed: {}", id, handle, err);
            }
        }
        self.inner.registry.leave(id);
        state.lifecycle = LifecycleState::Destroyed;
        drop(state);

        self.inner.released.notify_all();
        info!("🗑️ context {} destroyed", id);
        Ok(())
    }

    /// Rebinds draw and read surfaces. The context must not be current and
    /// must not be destroyed. `None` detaches.
    pub(crate) fn bind_drawables(
        &self,
        draw: Option<Arc<Drawable>>,
        read: Option<Arc<Drawable>>,
    ) -> Result<(), ContextError> {
        let mut state = self.inner.state.lock();
        match state.lifecycle {
            LifecycleState::Current => return Err(ContextError::StillCurrent(self.inner.id)),
            LifecycleState::Destroyed => {
                return Err(ContextError::InvalidState {
                    context: self.inner.id,
                    operation: "bind drawables",
                    state: state.lifecycle,
                })
            }
            LifecycleState::Uninitialized | LifecycleState::NotCurrent => {}
        }
        state.draw = draw;
        state.read = read;
        Ok(())
    }

    /// Reads from a different surface than the one drawn to.
    pub fn set_read_drawable(&self, read: Arc<Drawable>) -> Result<(), ContextError> {
        read.ensure_valid()?;
        let draw = self.draw_drawable().ok_or(ContextError::NoDrawable(self.inner.id))?;
        self.bind_drawables(Some(draw), Some(read))
    }

    fn check_usable(
        &self,
        state: &MutexGuard<'_, ContextState>,
        operation: &'static str,
    ) -> Result<(), ContextError> {
        match state.lifecycle {
            LifecycleState::Uninitialized | LifecycleState::Destroyed => {
                Err(ContextError::InvalidState {
                    context: self.inner.id,
                    operation,
                    state: state.lifecycle,
                })
            }
            LifecycleState::NotCurrent | LifecycleState::Current => Ok(()),
        }
    }

    fn bind_current(
        &self,
        state: &mut MutexGuard<'_, ContextState>,
        me: ThreadId,
    ) -> Result<(), ContextError> {
        let id = self.inner.id;
        let (Some(draw), Some(read)) = (state.draw.clone(), state.read.clone()) else {
            return Err(ContextError::NoDrawable(id));
        };
        draw.ensure_valid()?;
        read.ensure_valid()?;
        let handle = state.native.ok_or(ContextError::InvalidState {
            context: id,
            operation: "make current",
            state: state.lifecycle,
        })?;

        self.inner.native.make_native_current(handle, &draw, &read)?;
        state.owner = Some(me);
        state.lifecycle = LifecycleState::Current;
        Ok(())
    }
}

impl fmt::Debug for RenderingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderingContext")
            .field("id", &self.inner.id)
            .field("profile", &self.inner.caps.profile)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if matches!(
            state.lifecycle,
            LifecycleState::NotCurrent | LifecycleState::Current
        ) {
            if let Some(handle) = state.native.take() {
                if let Err(err) = self.native.destroy_native(handle) {
                    warn!("native destroy of dropped context {} failed: {}", self.id, err);
                }
            }
            self.registry.release(self.id);
        }
    }
}
