//! Integration tests for sharing-group lifecycles
//!
//! These drive real contexts through the headless backend and check the
//! registry's share counters the way external leak tooling reads them.

use sharegroup::backend::HeadlessBackend;
use sharegroup::capabilities::Profile;
use sharegroup::{
    Capabilities, ContextError, ContextFactory, LifecycleState, RenderTarget, RenderingContext,
    ShareError, SharingGroupRegistry, SurfaceDescriptor, TargetError,
};
use std::sync::Arc;

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

    fn target(&self, context: RenderingContext) -> RenderTarget {
        let mut target =
            RenderTarget::with_context(self.backend.clone(), &SurfaceDescriptor::default(), context)
                .unwrap();
        target.display().unwrap();
        target
    }

    fn master(&self) -> RenderTarget {
        self.target(self.factory.context(Capabilities::default()))
    }

    fn dependent(&self, master: &RenderTarget) -> RenderTarget {
        let master = master.context().unwrap();
        self.target(self.factory.shared_context(Capabilities::default(), master))
    }
}

fn counts(target: &RenderTarget) -> (usize, usize) {
    let context = target.context().unwrap();
    (context.created_share_count(), context.destroyed_share_count())
}

/// Master M with dependents A and B, torn down B, A, M
#[test]
fn test_master_with_two_dependents() {
    let h = Harness::new();
    let mut m = h.master();
    let mut a = h.dependent(&m);
    let mut b = h.dependent(&m);

    assert_eq!(counts(&m), (2, 0));
    assert_eq!(counts(&a), (2, 0));
    assert_eq!(counts(&b), (2, 0));
    let master_id = m.context().unwrap().id();

    b.destroy().unwrap();
    assert_eq!(counts(&m), (1, 1));
    assert_eq!(counts(&a), (1, 1));

    a.destroy().unwrap();
    assert_eq!(counts(&m), (0, 0));
    assert!(h.registry.contains(master_id));

    m.destroy().unwrap();
    assert!(!h.registry.contains(master_id));
    assert!(h.registry.audit().is_clean());
    assert_eq!(h.backend.live_contexts(), 0);
}

#[test]
fn test_counts_agree_for_every_member() {
    let h = Harness::new();
    let mut master = h.master();
    let mut members: Vec<RenderTarget> = (0..5).map(|_| h.dependent(&master)).collect();

    for member in &members {
        assert_eq!(counts(member), (5, 0));
    }

    // Destroy the middle one; everyone sees the same view
    members.remove(2).destroy().unwrap();
    assert_eq!(counts(&master), (4, 1));
    for member in &members {
        assert_eq!(counts(member), (4, 1));
    }

    for mut member in members {
        member.destroy().unwrap();
    }
    assert_eq!(counts(&master), (0, 0));
    master.destroy().unwrap();
    assert!(h.registry.audit().is_clean());
}

#[test]
fn test_master_destroyed_first_still_converges() {
    let h = Harness::new();
    let mut m = h.master();
    let mut a = h.dependent(&m);
    let mut b = h.dependent(&m);
    let master = m.context().unwrap().clone();
    let a_id = a.context().unwrap().id();

    m.destroy().unwrap();
    assert_eq!(counts(&a), (1, 1));
    // Earliest surviving member is promoted to root
    assert_eq!(a.context().unwrap().shared_master(), None);
    assert_eq!(b.context().unwrap().shared_master(), Some(a_id));

    a.destroy().unwrap();
    b.destroy().unwrap();
    assert!(!h.registry.contains(master.id()));
    assert!(h.registry.audit().is_clean());
}

#[test]
fn test_chained_master_reports_root() {
    let h = Harness::new();
    let m = h.master();
    let a = h.dependent(&m);
    let c = h.dependent(&a);

    let m_id = m.context().unwrap().id();
    assert_eq!(counts(&c), (2, 0));
    assert_eq!(c.context().unwrap().shared_master(), Some(m_id));
    assert_eq!(a.context().unwrap().shared_master(), Some(m_id));
    assert_eq!(m.context().unwrap().shared_master(), None);
    assert!(h.backend.shares_namespace(
        m.context().unwrap().native_handle().unwrap(),
        c.context().unwrap().native_handle().unwrap()
    ));
}

#[test]
fn test_dependent_of_destroyed_master_fails() {
    let h = Harness::new();
    let master = h.factory.context(Capabilities::default());
    let mut master_target = h.target(master.clone());
    master_target.destroy().unwrap();
    assert_eq!(master.state(), LifecycleState::Destroyed);

    let mut late = RenderTarget::with_context(
        h.backend.clone(),
        &SurfaceDescriptor::default(),
        h.factory.shared_context(Capabilities::default(), &master),
    )
    .unwrap();
    assert!(matches!(
        late.display(),
        Err(TargetError::Context(ContextError::Share(ShareError::MasterDestroyed(id)))) if id == master.id()
    ));
    late.destroy().unwrap();
}

#[test]
fn test_incompatible_dependent_never_joins() {
    let h = Harness::new();
    let mut master = h.master();

    let mut desktop = RenderTarget::with_context(
        h.backend.clone(),
        &SurfaceDescriptor::default(),
        h.factory
            .shared_context(Capabilities::with_profile(Profile::Gl3Core), master.context().unwrap()),
    )
    .unwrap();
    assert!(desktop.display().is_err());
    assert_eq!(counts(&master), (0, 0));
    assert_eq!(
        desktop.context().unwrap().state(),
        LifecycleState::Uninitialized
    );

    desktop.destroy().unwrap();
    master.destroy().unwrap();
    assert!(h.registry.audit().is_clean());
}

#[test]
fn test_dropped_dependent_counts_as_release() {
    let h = Harness::new();
    let mut master = h.master();

    let dependent = h
        .factory
        .shared_context(Capabilities::default(), master.context().unwrap());
    let mut host = h.target(h.factory.context(Capabilities::default()));
    dependent.create(host.drawable()).unwrap();
    let id = dependent.id();
    assert_eq!(counts(&master), (1, 0));

    // Dropped without destroy: the registry still converges
    drop(dependent);
    assert_eq!(counts(&master), (0, 0));
    assert_eq!(h.registry.stats().released_without_destroy, 1);

    // A late explicit leave is a no-op
    assert!(!h.registry.leave(id));
    assert_eq!(h.registry.stats().redundant_leaves, 1);
    assert_eq!(counts(&master), (0, 0));

    host.destroy().unwrap();
    master.destroy().unwrap();
    let audit = h.registry.audit();
    assert!(audit.is_empty());
    assert!(!audit.is_clean());
}
