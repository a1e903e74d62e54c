//! Moving a live context between render targets
//!
//! [`LifecycleSnapshot::detach`] lifts a target's context and listeners out
//! without disposing anything; [`LifecycleSnapshot::attach`] installs them on
//! another target. GPU objects survive the move, listeners are not
//! re-initialized and the sharing registry never sees a leave or a join.
//!
//! A snapshot that is never attached still owns what it carries. Dispose it
//! with [`LifecycleSnapshot::dispose`] to run the listeners' `dispose`
//! callbacks; dropping it only destroys the context.

use crate::context::{LifecycleState, RenderingContext};
use crate::drawable::{Drawable, DrawableProvider, SurfaceDescriptor, SurfaceKind};
use crate::error::{ContextError, SnapshotError};
use crate::target::{ListenerSlot, RenderCtx, RenderTarget, TargetId};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::Arc;

/// Context and listeners in transit between two targets.
pub struct LifecycleSnapshot {
    context: Option<RenderingContext>,
    listeners: Vec<ListenerSlot>,
    owner: bool,
    source: TargetId,
}

impl LifecycleSnapshot {
    /// Takes `target`'s context and listeners. The target keeps its drawable
    /// and is left context-less.
    pub fn detach(target: &mut RenderTarget) -> Result<Self, SnapshotError> {
        let source = target.id();
        let Some((context, listeners)) = target.take_state()? else {
            return Err(SnapshotError::DetachFromContextless(source));
        };
        debug!(
            "detached context {} and {} listeners from {}",
            context.id(),
            listeners.len(),
            source
        );
        Ok(Self {
            context: Some(context),
            listeners,
            owner: true,
            source,
        })
    }

    /// Installs the carried context and listeners on `target`, which must
    /// not have a context. On error the snapshot keeps everything.
    pub fn attach(&mut self, target: &mut RenderTarget) -> Result<(), SnapshotError> {
        let Some(context) = self.context.as_ref() else {
            return Err(SnapshotError::Empty);
        };
        if target.has_context() {
            return Err(SnapshotError::AttachToOccupied(target.id()));
        }

        let moved = self.listeners.len();
        target.install_state(context, &mut self.listeners)?;
        info!(
            "🔀 context {} moved from {} to {} with {} listeners",
            context.id(),
            self.source,
            target.id(),
            moved
        );
        self.context = None;
        self.owner = false;
        Ok(())
    }

    pub fn context(&self) -> Option<&RenderingContext> {
        self.context.as_ref()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// True until the contents were attached somewhere.
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn source(&self) -> TargetId {
        self.source
    }

    /// Tears down an unattached snapshot: disposes initialized listeners in
    /// reverse order on a scratch pbuffer from `provider`, then destroys the
    /// context. A no-op once attached.
    pub fn dispose(mut self, provider: &Arc<dyn DrawableProvider>) -> Result<(), SnapshotError> {
        if !self.owner {
            return Ok(());
        }
        let Some(context) = self.context.take() else {
            self.owner = false;
            return Ok(());
        };
        self.owner = false;

        if context.state() == LifecycleState::NotCurrent
            && self.listeners.iter().any(|slot| slot.initialized)
        {
            let scratch = provider
                .create_drawable(&SurfaceDescriptor::new(SurfaceKind::Pbuffer, 1, 1))
                .map_err(ContextError::from)?;
            let disposed = Self::dispose_listeners(&context, &mut self.listeners, self.source, &scratch);
            let unbound = context.bind_drawables(None, None);
            provider.destroy_drawable(&scratch);
            disposed?;
            unbound?;
        }
        self.listeners.clear();

        if context.state() != LifecycleState::Destroyed {
            context.destroy()?;
        }
        debug!("disposed unattached snapshot from {}", self.source);
        Ok(())
    }

    fn dispose_listeners(
        context: &RenderingContext,
        listeners: &mut [ListenerSlot],
        source: TargetId,
        scratch: &Arc<Drawable>,
    ) -> Result<(), SnapshotError> {
        context.bind_drawables(Some(Arc::clone(scratch)), Some(Arc::clone(scratch)))?;
        context.make_current()?;
        let ctx = RenderCtx::new(source, context, scratch);
        for slot in listeners.iter_mut().rev() {
            if slot.initialized {
                slot.listener.dispose(&ctx);
                slot.initialized = false;
            }
        }
        context.release()?;
        Ok(())
    }
}

impl fmt::Debug for LifecycleSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleSnapshot")
            .field("source", &self.source)
            .field("context", &self.context.as_ref().map(|c| c.id()))
            .field("listeners", &self.listeners.len())
            .field("owner", &self.owner)
            .finish()
    }
}

impl Drop for LifecycleSnapshot {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        let Some(context) = self.context.take() else {
            return;
        };
        warn!(
            "snapshot from {} dropped while owning context {}; {} listeners skip dispose",
            self.source,
            context.id(),
            self.listeners.len()
        );
        match context.state() {
            LifecycleState::Destroyed => {}
            LifecycleState::Current => {
                error!("cannot destroy context {}: still current", context.id());
            }
            LifecycleState::Uninitialized | LifecycleState::NotCurrent => {
                if let Err(err) = context.destroy() {
                    error!("destroying orphaned context {} failed: {}", context.id(), err);
                }
            }
        }
    }
}
