//! Integration tests for moving contexts between render targets
//!
//! Covers snapshot detach/attach (GPU state outliving its first window)
//! and pairwise context swaps.

use parking_lot::Mutex;
use sharegroup::backend::HeadlessBackend;
use sharegroup::{
    swap_contexts, Capabilities, ContextFactory, DrawableProvider, LifecycleSnapshot,
    LifecycleState, RenderCtx, RenderListener, RenderTarget, SharingGroupRegistry,
    SurfaceDescriptor, SurfaceKind,
};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Observed {
    inits: usize,
    disposes: usize,
    /// (buffer id, drawable size) seen on every display
    frames: Vec<(u64, (u32, u32))>,
}

/// Allocates a buffer id at init from the context's native handle, the way
/// a real listener would call glGenBuffers.
struct BufferListener {
    buffer: Option<u64>,
    observed: Arc<Mutex<Observed>>,
}

impl BufferListener {
    fn boxed(observed: &Arc<Mutex<Observed>>) -> Box<dyn RenderListener> {
        Box::new(Self {
            buffer: None,
            observed: Arc::clone(observed),
        })
    }
}

impl RenderListener for BufferListener {
    fn init(&mut self, ctx: &RenderCtx<'_>) {
        let handle = ctx.context().native_handle().unwrap();
        self.buffer = Some(handle.0 * 1000 + 1);
        self.observed.lock().inits += 1;
    }

    fn display(&mut self, ctx: &RenderCtx<'_>) {
        let size = ctx.size();
        let buffer = self.buffer.unwrap();
        self.observed.lock().frames.push((buffer, (size.width, size.height)));
    }

    fn dispose(&mut self, _ctx: &RenderCtx<'_>) {
        self.buffer = None;
        self.observed.lock().disposes += 1;
    }
}

struct Harness {
    backend: Arc<HeadlessBackend>,
    registry: Arc<SharingGroupRegistry>,
    factory: ContextFactory,
}

impl Harness {
    fn new() -> Self {
        let backend = HeadlessBackend::new();
        let registry = Arc::new(SharingGroupRegistry::default());
        let factory = ContextFactory::new(Arc::clone(&registry), backend.clone());
        Self {
            backend,
            registry,
            factory,
        }
    }

    fn empty_target(&self, descriptor: &SurfaceDescriptor) -> RenderTarget {
        RenderTarget::new(self.backend.clone(), descriptor).unwrap()
    }

    fn rendering_target(&self, observed: &Arc<Mutex<Observed>>) -> RenderTarget {
        let mut target = RenderTarget::with_context(
            self.backend.clone(),
            &SurfaceDescriptor::default(),
            self.factory.context(Capabilities::default()),
        )
        .unwrap();
        target.add_listener(BufferListener::boxed(observed));
        target.display().unwrap();
        target
    }
}

#[test]
fn test_buffer_survives_window_destruction() {
    let h = Harness::new();
    let observed = Arc::new(Mutex::new(Observed::default()));
    let mut window = h.rendering_target(&observed);
    let context = window.context().unwrap().clone();

    let mut snapshot = LifecycleSnapshot::detach(&mut window).unwrap();
    window.destroy().unwrap();
    assert_eq!(context.state(), LifecycleState::NotCurrent);
    assert_eq!(observed.lock().disposes, 0);

    let mut offscreen = h.empty_target(&SurfaceDescriptor::new(SurfaceKind::Fbo, 320, 240));
    snapshot.attach(&mut offscreen).unwrap();
    offscreen.display().unwrap();

    {
        let observed = observed.lock();
        assert_eq!(observed.inits, 1);
        assert_eq!(observed.disposes, 0);
        assert_eq!(observed.frames.len(), 2);
        let (first_buffer, first_size) = observed.frames[0];
        let (second_buffer, second_size) = observed.frames[1];
        assert_eq!(first_buffer, second_buffer);
        assert_eq!(first_size, (640, 480));
        assert_eq!(second_size, (320, 240));
    }

    offscreen.destroy().unwrap();
    assert_eq!(observed.lock().disposes, 1);
    assert_eq!(context.state(), LifecycleState::Destroyed);
    assert!(h.registry.audit().is_clean());
    assert_eq!(h.backend.live_drawables(), 0);
}

#[test]
fn test_transplant_keeps_group_counts() {
    let h = Harness::new();
    let observed = Arc::new(Mutex::new(Observed::default()));
    let mut master = h.rendering_target(&observed);
    let master_context = master.context().unwrap().clone();

    let mut dependent = RenderTarget::with_context(
        h.backend.clone(),
        &SurfaceDescriptor::default(),
        h.factory
            .shared_context(Capabilities::default(), &master_context),
    )
    .unwrap();
    dependent.display().unwrap();
    let dependent_context = dependent.context().unwrap().clone();
    let before = h.registry.stats();

    // Move the dependent twice
    let mut hop = h.empty_target(&SurfaceDescriptor::default());
    let mut snapshot = LifecycleSnapshot::detach(&mut dependent).unwrap();
    snapshot.attach(&mut hop).unwrap();
    hop.display().unwrap();
    let mut last = h.empty_target(&SurfaceDescriptor::default());
    let mut snapshot = LifecycleSnapshot::detach(&mut hop).unwrap();
    snapshot.attach(&mut last).unwrap();
    last.display().unwrap();

    assert_eq!(h.registry.stats(), before);
    assert_eq!(master_context.created_share_count(), 1);
    assert_eq!(dependent_context.created_share_count(), 1);
    assert_eq!(dependent_context.shared_master(), Some(master_context.id()));

    dependent.destroy().unwrap();
    hop.destroy().unwrap();
    last.destroy().unwrap();
    master.destroy().unwrap();
    assert!(h.registry.audit().is_clean());
}

#[test]
fn test_attach_appends_after_existing_listeners() {
    let h = Harness::new();
    let moved = Arc::new(Mutex::new(Observed::default()));
    let resident = Arc::new(Mutex::new(Observed::default()));
    let mut source = h.rendering_target(&moved);

    let mut destination = h.empty_target(&SurfaceDescriptor::default());
    destination.add_listener(BufferListener::boxed(&resident));

    let mut snapshot = LifecycleSnapshot::detach(&mut source).unwrap();
    snapshot.attach(&mut destination).unwrap();
    assert_eq!(destination.listener_count(), 2);

    destination.display().unwrap();
    // The resident listener is new to this context, the moved one is not
    assert_eq!(resident.lock().inits, 1);
    assert_eq!(moved.lock().inits, 1);
    assert_eq!(moved.lock().frames.len(), 2);

    destination.destroy().unwrap();
    assert_eq!(resident.lock().disposes, 1);
    assert_eq!(moved.lock().disposes, 1);
    source.destroy().unwrap();
}

#[test]
fn test_unattached_snapshot_disposes_on_request() {
    let h = Harness::new();
    let observed = Arc::new(Mutex::new(Observed::default()));
    let mut window = h.rendering_target(&observed);
    let snapshot = LifecycleSnapshot::detach(&mut window).unwrap();
    window.destroy().unwrap();

    let provider: Arc<dyn DrawableProvider> = h.backend.clone();
    snapshot.dispose(&provider).unwrap();
    assert_eq!(observed.lock().disposes, 1);
    assert!(h.registry.audit().is_clean());
    assert_eq!(h.backend.live_contexts(), 0);
    assert_eq!(h.backend.live_drawables(), 0);
}

#[test]
fn test_swap_exchanges_contexts_and_keeps_listeners() {
    let h = Harness::new();
    let left_seen = Arc::new(Mutex::new(Observed::default()));
    let right_seen = Arc::new(Mutex::new(Observed::default()));
    let mut left = h.rendering_target(&left_seen);
    let mut right = h.rendering_target(&right_seen);
    let left_context = left.context().unwrap().clone();
    let right_context = right.context().unwrap().clone();

    swap_contexts(&mut left, &mut right).unwrap();
    assert!(left.context().unwrap().ptr_eq(&right_context));
    assert!(right.context().unwrap().ptr_eq(&left_context));
    assert_eq!(
        left_context.draw_drawable().map(|d| d.id()),
        Some(right.drawable().id())
    );

    left.display().unwrap();
    right.display().unwrap();
    // Listeners stay put and keep their original buffers
    assert_eq!(left_seen.lock().inits, 1);
    assert_eq!(right_seen.lock().inits, 1);
    assert_eq!(left_seen.lock().frames.len(), 2);

    left.destroy().unwrap();
    right.destroy().unwrap();
    assert_eq!(left_context.state(), LifecycleState::Destroyed);
    assert_eq!(right_context.state(), LifecycleState::Destroyed);
    assert!(h.registry.audit().is_clean());
}
