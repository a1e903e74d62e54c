//! # sharegroup
//!
//! Lifecycle management for rendering contexts that share GPU objects.
//!
//! ## Architecture
//!
//! - `registry`: sharing-group membership and create/destroy accounting
//! - `context`: the rendering context state machine
//! - `target`: render targets that own a drawable, a context and listeners
//! - `snapshot`: moving a live context and its listeners between targets
//! - `gate`: waiting for a master created on another thread
//! - `backend`: the headless software provider
//! - `config`, `logging`, `soak`: the pieces the `sharegroup` binary uses
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sharegroup::backend::HeadlessBackend;
//! use sharegroup::{Capabilities, ContextFactory, RenderTarget, SharingGroupRegistry, SurfaceDescriptor};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let backend = HeadlessBackend::new();
//!     let registry = Arc::new(SharingGroupRegistry::default());
//!     let factory = ContextFactory::new(Arc::clone(&registry), backend.clone());
//!
//!     let master = factory.context(Capabilities::default());
//!     let mut target = RenderTarget::with_context(backend.clone(), &SurfaceDescriptor::default(), master)?;
//!     target.display()?;
//!     target.destroy()?;
//!     assert!(registry.audit().is_clean());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod capabilities;
pub mod config;
pub mod context;
pub mod drawable;
pub mod error;
pub mod gate;
pub mod logging;
pub mod native;
pub mod registry;
pub mod snapshot;
pub mod soak;
pub mod target;

// Re-export main types for easy access
pub use capabilities::{check_share_compatibility, Capabilities, Profile};
pub use config::SharegroupConfig;
pub use context::{ContextFactory, LifecycleState, RenderingContext};
pub use drawable::{Drawable, DrawableProvider, SurfaceDescriptor, SurfaceKind};
pub use error::{ContextError, ShareError, SnapshotError, TargetError};
pub use gate::MasterGate;
pub use native::{NativeContextProvider, NativeHandle};
pub use registry::{ContextId, LeakReport, SharingGroupRegistry};
pub use snapshot::LifecycleSnapshot;
pub use target::{swap_contexts, FrameOutcome, RenderCtx, RenderListener, RenderTarget};

/// Version information for sharegroup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
