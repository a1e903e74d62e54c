//! Render targets (auto-drawables)
//!
//! A [`RenderTarget`] couples one drawable, at most one rendering context and
//! an ordered list of listeners, and drives the per-frame cycle:
//!
//! 1. `init` for every listener not yet initialized
//! 2. `reshape` when the drawable size changed since the last frame (and for
//!    listeners that were just initialized)
//! 3. `display` for every listener
//!
//! Listeners only run while a context is attached and current. A target
//! that holds an uncreated context creates it against its own drawable on
//! the first frame.

use crate::context::{LifecycleState, RenderingContext};
use crate::drawable::{Drawable, DrawableProvider, Size, SurfaceDescriptor};
use crate::error::{ContextError, TargetError};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique render target identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    fn next() -> Self {
        TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// What listeners see during a callback.
pub struct RenderCtx<'a> {
    target: TargetId,
    context: &'a RenderingContext,
    drawable: &'a Arc<Drawable>,
}

impl<'a> RenderCtx<'a> {
    pub(crate) fn new(target: TargetId, context: &'a RenderingContext, drawable: &'a Arc<Drawable>) -> Self {
        Self {
            target,
            context,
            drawable,
        }
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn context(&self) -> &'a RenderingContext {
        self.context
    }

    pub fn drawable(&self) -> &'a Arc<Drawable> {
        self.drawable
    }

    pub fn size(&self) -> Size {
        self.drawable.size()
    }
}

/// Rendering callbacks driven by a [`RenderTarget`].
pub trait RenderListener: Send {
    /// Called once, on the first frame after the listener is attached.
    fn init(&mut self, ctx: &RenderCtx<'_>);

    fn reshape(&mut self, ctx: &RenderCtx<'_>, x: i32, y: i32, width: u32, height: u32) {
        let _ = (ctx, x, y, width, height);
    }

    fn display(&mut self, ctx: &RenderCtx<'_>);

    /// Called once when the owning target is destroyed.
    fn dispose(&mut self, ctx: &RenderCtx<'_>) {
        let _ = ctx;
    }
}

/// A listener plus whether `init` already ran for it.
pub(crate) struct ListenerSlot {
    pub(crate) listener: Box<dyn RenderListener>,
    pub(crate) initialized: bool,
}

impl ListenerSlot {
    fn new(listener: Box<dyn RenderListener>) -> Self {
        Self {
            listener,
            initialized: false,
        }
    }
}

/// Result of one [`RenderTarget::display`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// No context attached; no listener ran.
    NoContext,
}

pub struct RenderTarget {
    id: TargetId,
    drawable: Arc<Drawable>,
    provider: Arc<dyn DrawableProvider>,
    context: Option<RenderingContext>,
    listeners: Vec<ListenerSlot>,
    last_size: Option<Size>,
    frames: u64,
    destroyed: bool,
}

impl RenderTarget {
    /// Creates a context-less target on a fresh drawable.
    pub fn new(
        provider: Arc<dyn DrawableProvider>,
        descriptor: &SurfaceDescriptor,
    ) -> Result<Self, TargetError> {
        let drawable = provider.create_drawable(descriptor)?;
        let id = TargetId::next();
        debug!("render target {} on {} ({})", id, drawable.id(), drawable.size());
        Ok(Self {
            id,
            drawable,
            provider,
            context: None,
            listeners: Vec::new(),
            last_size: None,
            frames: 0,
            destroyed: false,
        })
    }

    /// Creates a target that owns `context` from the start.
    pub fn with_context(
        provider: Arc<dyn DrawableProvider>,
        descriptor: &SurfaceDescriptor,
        context: RenderingContext,
    ) -> Result<Self, TargetError> {
        let mut target = Self::new(provider, descriptor)?;
        target.set_context(Some(context))?;
        Ok(target)
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn drawable(&self) -> &Arc<Drawable> {
        &self.drawable
    }

    pub fn context(&self) -> Option<&RenderingContext> {
        self.context.as_ref()
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Frames rendered with listeners run.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn add_listener(&mut self, listener: Box<dyn RenderListener>) {
        self.listeners.push(ListenerSlot::new(listener));
    }

    pub fn insert_listener(
        &mut self,
        index: usize,
        listener: Box<dyn RenderListener>,
    ) -> Result<(), TargetError> {
        if index > self.listeners.len() {
            return Err(TargetError::ListenerIndex {
                index,
                len: self.listeners.len(),
            });
        }
        self.listeners.insert(index, ListenerSlot::new(listener));
        Ok(())
    }

    /// Removes a listener without disposing it.
    pub fn remove_listener(&mut self, index: usize) -> Result<Box<dyn RenderListener>, TargetError> {
        if index >= self.listeners.len() {
            return Err(TargetError::ListenerIndex {
                index,
                len: self.listeners.len(),
            });
        }
        Ok(self.listeners.remove(index).listener)
    }

    /// Resizes the drawable through its provider. Listeners see a reshape
    /// on the next frame.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), TargetError> {
        self.ensure_alive()?;
        self.provider.resize(&self.drawable, width, height)?;
        Ok(())
    }

    /// Detaches the current context (without destroying it) and attaches
    /// `context`, bound to this target's drawable. Returns the old one.
    ///
    /// Both this target and whichever target `context` came from must be
    /// paused. On error nothing changes.
    pub fn set_context(
        &mut self,
        context: Option<RenderingContext>,
    ) -> Result<Option<RenderingContext>, TargetError> {
        self.ensure_alive()?;

        if let Some(old) = &self.context {
            // A destroyed context has no drawables left to unbind
            if old.state() != LifecycleState::Destroyed {
                old.bind_drawables(None, None)?;
            }
        }
        if let Some(new) = &context {
            let bound = self
                .drawable
                .ensure_valid()
                .map_err(ContextError::from)
                .and_then(|_| {
                    new.bind_drawables(Some(Arc::clone(&self.drawable)), Some(Arc::clone(&self.drawable)))
                });
            if let Err(err) = bound {
                if let Some(old) = self.context.as_ref().filter(|c| c.state() != LifecycleState::Destroyed) {
                    if let Err(rebind) =
                        old.bind_drawables(Some(Arc::clone(&self.drawable)), Some(Arc::clone(&self.drawable)))
                    {
                        warn!("failed to rebind {} after refused swap: {}", old.id(), rebind);
                    }
                }
                return Err(err.into());
            }
        }

        let old = std::mem::replace(&mut self.context, context);
        self.last_size = None;
        debug!(
            "target {} context {:?} -> {:?}",
            self.id,
            old.as_ref().map(|c| c.id()),
            self.context.as_ref().map(|c| c.id())
        );
        Ok(old)
    }

    /// Runs one frame. Creates the context on first use.
    pub fn display(&mut self) -> Result<FrameOutcome, TargetError> {
        self.ensure_alive()?;
        let Some(context) = self.context.clone() else {
            return Ok(FrameOutcome::NoContext);
        };
        self.drawable.ensure_valid()?;

        if context.state() == LifecycleState::Uninitialized {
            context.create(&self.drawable)?;
        }

        context.make_current()?;
        self.run_listeners(&context);
        context.release()?;

        self.frames += 1;
        Ok(FrameOutcome::Rendered)
    }

    fn run_listeners(&mut self, context: &RenderingContext) {
        let size = self.drawable.size();
        let resized = self.last_size != Some(size);
        let ctx = RenderCtx {
            target: self.id,
            context,
            drawable: &self.drawable,
        };

        for slot in self.listeners.iter_mut() {
            let fresh = !slot.initialized;
            if fresh {
                slot.listener.init(&ctx);
                slot.initialized = true;
            }
            if fresh || resized {
                slot.listener.reshape(&ctx, 0, 0, size.width, size.height);
            }
        }
        for slot in self.listeners.iter_mut() {
            slot.listener.display(&ctx);
        }
        self.last_size = Some(size);
    }

    /// Disposes listeners in reverse order, destroys the owned context (if
    /// it was not detached), then tears down the drawable.
    ///
    /// Calling it again is a no-op.
    pub fn destroy(&mut self) -> Result<(), TargetError> {
        if self.destroyed {
            return Ok(());
        }

        if let Some(context) = self.context.take() {
            if let Err(err) = self.teardown_context(&context) {
                self.context = Some(context);
                return Err(err);
            }
        } else {
            let skipped = self.listeners.iter().filter(|slot| slot.initialized).count();
            if skipped > 0 {
                warn!(
                    "target {} destroyed without a context, {} initialized listeners not disposed",
                    self.id, skipped
                );
            }
        }

        self.listeners.clear();
        self.provider.destroy_drawable(&self.drawable);
        self.destroyed = true;
        info!("🗑️ render target {} destroyed after {} frames", self.id, self.frames);
        Ok(())
    }

    fn teardown_context(&mut self, context: &RenderingContext) -> Result<(), TargetError> {
        match context.state() {
            LifecycleState::Destroyed => {
                warn!("target {} held already destroyed context {}", self.id, context.id());
                return Ok(());
            }
            LifecycleState::Uninitialized => {
                context.destroy()?;
                return Ok(());
            }
            LifecycleState::NotCurrent | LifecycleState::Current => {}
        }

        if self.listeners.iter().any(|slot| slot.initialized) {
            match context.make_current() {
                Ok(()) => {
                    let ctx = RenderCtx {
                        target: self.id,
                        context,
                        drawable: &self.drawable,
                    };
                    for slot in self.listeners.iter_mut().rev() {
                        if slot.initialized {
                            slot.listener.dispose(&ctx);
                            slot.initialized = false;
                        }
                    }
                    context.release()?;
                }
                // Surface already gone: nothing to make current on
                Err(err) => warn!(
                    "target {} cannot make {} current for dispose, skipping listener dispose: {}",
                    self.id,
                    context.id(),
                    err
                ),
            }
        }

        context.destroy()?;
        Ok(())
    }

    /// Moves the context and listeners out, leaving the drawable in place.
    /// `None` when there is no context to move.
    pub(crate) fn take_state(
        &mut self,
    ) -> Result<Option<(RenderingContext, Vec<ListenerSlot>)>, TargetError> {
        self.ensure_alive()?;
        let Some(context) = self.context.take() else {
            return Ok(None);
        };
        if context.state() == LifecycleState::Destroyed {
            warn!("target {} dropped already destroyed context {}", self.id, context.id());
            self.last_size = None;
            return Ok(None);
        }
        if let Err(err) = context.bind_drawables(None, None) {
            self.context = Some(context);
            return Err(err.into());
        }
        self.last_size = None;
        Ok(Some((context, std::mem::take(&mut self.listeners))))
    }

    /// Installs a moved context and listeners. The target must be
    /// context-less; its existing listeners run before the installed ones.
    ///
    /// `listeners` is drained only on success.
    pub(crate) fn install_state(
        &mut self,
        context: &RenderingContext,
        listeners: &mut Vec<ListenerSlot>,
    ) -> Result<(), TargetError> {
        self.ensure_alive()?;
        self.drawable.ensure_valid()?;
        context.bind_drawables(Some(Arc::clone(&self.drawable)), Some(Arc::clone(&self.drawable)))?;
        self.context = Some(context.clone());
        self.listeners.append(listeners);
        self.last_size = None;
        Ok(())
    }

    fn ensure_alive(&self) -> Result<(), TargetError> {
        if self.destroyed {
            Err(TargetError::Destroyed(self.id))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTarget")
            .field("id", &self.id)
            .field("drawable", &self.drawable.id())
            .field("context", &self.context.as_ref().map(|c| c.id()))
            .field("listeners", &self.listeners.len())
            .field("destroyed", &self.destroyed)
            .finish()
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        if !self.destroyed {
            warn!("render target {} dropped without destroy", self.id);
            if let Err(err) = self.destroy() {
                error!("implicit destroy of render target {} failed: {}", self.id, err);
            }
        }
    }
}

/// Exchanges the contexts of two paused targets. Listeners stay with their
/// targets. On error both targets keep their original contexts.
pub fn swap_contexts(a: &mut RenderTarget, b: &mut RenderTarget) -> Result<(), TargetError> {
    let from_a = a.set_context(None)?;
    let from_b = match b.set_context(from_a.clone()) {
        Ok(previous) => previous,
        Err(err) => {
            a.set_context(from_a)?;
            return Err(err);
        }
    };
    if let Err(err) = a.set_context(from_b.clone()) {
        b.set_context(from_b)?;
        a.set_context(from_a)?;
        return Err(err);
    }
    info!("🔄 swapped contexts between {} and {}", a.id, b.id);
    Ok(())
}
