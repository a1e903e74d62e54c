//! Error taxonomy for the sharing core
//!
//! Every recoverable failure is returned as a typed value. The one exception
//! is destroying a context twice, which panics: it means the caller's
//! lifetime bookkeeping is already wrong and the registry counters can no
//! longer be trusted.

use crate::capabilities::CapabilityMismatch;
use crate::context::LifecycleState;
use crate::drawable::DrawableId;
use crate::registry::ContextId;
use crate::target::TargetId;
use thiserror::Error;

/// Failures of [`SharingGroupRegistry`](crate::registry::SharingGroupRegistry) membership changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    /// The named master is not registered (not yet created).
    #[error("master context {0} is not registered")]
    MasterNotFound(ContextId),

    /// The named master has already left the registry.
    #[error("master context {0} has already been destroyed")]
    MasterDestroyed(ContextId),

    /// The context is already a member of some group.
    #[error("context {0} is already registered")]
    AlreadyRegistered(ContextId),
}

/// Opaque refusal reported by the driver binding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("native layer: {message}")]
pub struct NativeError {
    pub message: String,
}

impl NativeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failures of the drawable provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrawableError {
    /// The drawable has been destroyed or was never realized.
    #[error("drawable {0} is not valid")]
    Invalid(DrawableId),

    /// Surfaces must be at least 1x1.
    #[error("drawable size must be non-zero, got {width}x{height}")]
    ZeroSize { width: u32, height: u32 },

    /// The provider cannot produce the requested surface.
    #[error("unsupported surface: {0}")]
    Unsupported(String),
}

/// Failures of the [`RenderingContext`](crate::context::RenderingContext) state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// Native allocation or capability negotiation failed.
    #[error("context {context} creation failed: {reason}")]
    CreationFailed {
        context: ContextId,
        reason: CreationFailure,
    },

    /// Joining the master's sharing group failed.
    #[error(transparent)]
    Share(#[from] ShareError),

    /// Another thread holds the context current.
    #[error("context {0} is current on another thread")]
    AlreadyCurrentElsewhere(ContextId),

    /// `release` was called from a thread that does not hold the context.
    #[error("context {0} is not current on the calling thread")]
    NotCurrentOnThisThread(ContextId),

    /// The operation requires the context to be released first.
    #[error("context {0} is still current")]
    StillCurrent(ContextId),

    /// The operation is not legal from the context's present state.
    #[error("context {context} cannot {operation} while {state:?}")]
    InvalidState {
        context: ContextId,
        operation: &'static str,
        state: LifecycleState,
    },

    /// The context has no bound drawable to render into.
    #[error("context {0} is not bound to a drawable")]
    NoDrawable(ContextId),

    #[error(transparent)]
    Drawable(#[from] DrawableError),

    #[error(transparent)]
    Native(#[from] NativeError),
}

/// Why a context could not be created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreationFailure {
    #[error("incompatible with master: {0}")]
    Incompatible(#[from] CapabilityMismatch),

    #[error(transparent)]
    Native(#[from] NativeError),
}

/// Failures of [`RenderTarget`](crate::target::RenderTarget) operations.
#[derive(Debug, Error)]
pub enum TargetError {
    /// The target has already been destroyed.
    #[error("render target {0} is destroyed")]
    Destroyed(TargetId),

    /// Listener index out of range.
    #[error("listener index {index} out of range (len {len})")]
    ListenerIndex { index: usize, len: usize },

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Drawable(#[from] DrawableError),
}

/// Misuse of the detach/attach transplant.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// `detach` was called on a target without a context.
    #[error("render target {0} holds no context to detach")]
    DetachFromContextless(TargetId),

    /// `attach` was called on a target that already holds a context.
    #[error("render target {0} already holds a context")]
    AttachToOccupied(TargetId),

    /// The snapshot's context was already handed to a target.
    #[error("snapshot is empty")]
    Empty,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Target(#[from] TargetError),
}
