//! Cross-thread integration tests
//!
//! Thread affinity of current contexts, master gates and groups built and
//! torn down from many threads at once.

use sharegroup::backend::HeadlessBackend;
use sharegroup::gate::GateError;
use sharegroup::{
    Capabilities, ContextError, ContextFactory, MasterGate, RenderTarget, RenderingContext,
    SharingGroupRegistry, SurfaceDescriptor,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn setup() -> (Arc<HeadlessBackend>, Arc<SharingGroupRegistry>, ContextFactory) {
    let backend = HeadlessBackend::new();
    let registry = Arc::new(SharingGroupRegistry::default());
    let factory = ContextFactory::new(Arc::clone(&registry), backend.clone());
    (backend, registry, factory)
}

fn created(backend: &Arc<HeadlessBackend>, factory: &ContextFactory) -> (RenderingContext, RenderTarget) {
    let context = factory.context(Capabilities::default());
    let mut target =
        RenderTarget::with_context(backend.clone(), &SurfaceDescriptor::default(), context.clone())
            .unwrap();
    target.display().unwrap();
    (context, target)
}

#[test]
fn test_try_make_current_race_has_one_winner() {
    let (backend, _registry, factory) = setup();
    let (context, mut target) = created(&backend, &factory);

    for _ in 0..20 {
        let start = Arc::new(Barrier::new(2));
        let hold = Arc::new(Barrier::new(3));
        let winners = Arc::new(AtomicUsize::new(0));

        let racers: Vec<_> = (0..2)
            .map(|_| {
                let context = context.clone();
                let start = Arc::clone(&start);
                let hold = Arc::clone(&hold);
                let winners = Arc::clone(&winners);
                thread::spawn(move || {
                    start.wait();
                    let result = context.try_make_current();
                    if result.is_ok() {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                    // Both have tried before the winner lets go
                    hold.wait();
                    match result {
                        Ok(()) => context.release().unwrap(),
                        Err(err) => assert_eq!(err, ContextError::AlreadyCurrentElsewhere(context.id())),
                    }
                })
            })
            .collect();

        hold.wait();
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        for racer in racers {
            racer.join().unwrap();
        }
    }

    target.destroy().unwrap();
}

#[test]
fn test_blocking_make_current_never_overlaps() {
    let (backend, _registry, factory) = setup();
    let (context, mut target) = created(&backend, &factory);
    let inside = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let context = context.clone();
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                for _ in 0..25 {
                    context.make_current().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    assert!(context.is_current_on_this_thread());
                    thread::yield_now();
                    inside.fetch_sub(1, Ordering::SeqCst);
                    context.release().unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert!(!context.is_current_on_this_thread());
    target.destroy().unwrap();
}

#[test]
fn test_dependents_created_before_master_wait_on_gate() {
    let (backend, registry, factory) = setup();
    let gate = Arc::new(MasterGate::new());

    let dependents: Vec<_> = (0..6)
        .map(|_| {
            let gate = Arc::clone(&gate);
            let factory = factory.clone();
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                let master = gate.wait_timeout(Duration::from_secs(10)).unwrap();
                let mut target = RenderTarget::with_context(
                    backend,
                    &SurfaceDescriptor::default(),
                    factory.shared_context(Capabilities::default(), &master),
                )
                .unwrap();
                target.display().unwrap();
                target
            })
        })
        .collect();

    // Give the dependents time to block
    thread::sleep(Duration::from_millis(20));
    let (master, mut master_target) = created(&backend, &factory);
    assert!(gate.open(master.clone()));

    let mut targets: Vec<RenderTarget> = dependents.into_iter().map(|d| d.join().unwrap()).collect();
    assert_eq!(master.created_share_count(), 6);
    for target in &targets {
        assert_eq!(target.context().unwrap().created_share_count(), 6);
    }

    // Tear down from different threads at once
    let teardown: Vec<_> = targets
        .drain(..)
        .map(|mut target| thread::spawn(move || target.destroy().unwrap()))
        .collect();
    for handle in teardown {
        handle.join().unwrap();
    }
    assert_eq!(master.created_share_count(), 0);
    assert_eq!(master.destroyed_share_count(), 0);

    master_target.destroy().unwrap();
    assert!(registry.audit().is_clean());
}

#[test]
fn test_abandoned_gate_fails_dependents() {
    let (_backend, registry, _factory) = setup();
    let gate = Arc::new(MasterGate::new());
    let waiter = {
        let gate = Arc::clone(&gate);
        thread::spawn(move || gate.wait().map(|master| master.id()))
    };

    gate.abandon();
    assert_eq!(waiter.join().unwrap(), Err(GateError::Abandoned));
    assert_eq!(registry.live_contexts(), 0);
}

#[test]
fn test_many_groups_in_parallel() {
    let (backend, registry, factory) = setup();

    let groups: Vec<_> = (0..8)
        .map(|_| {
            let backend = Arc::clone(&backend);
            let factory = factory.clone();
            thread::spawn(move || {
                let (master, mut master_target) = created(&backend, &factory);
                let mut members: Vec<RenderTarget> = (0..4)
                    .map(|_| {
                        let mut target = RenderTarget::with_context(
                            backend.clone(),
                            &SurfaceDescriptor::default(),
                            factory.shared_context(Capabilities::default(), &master),
                        )
                        .unwrap();
                        target.display().unwrap();
                        target
                    })
                    .collect();
                assert_eq!(master.created_share_count(), 4);

                // Master first, dependents after
                master_target.destroy().unwrap();
                for member in members.iter_mut() {
                    member.destroy().unwrap();
                }
            })
        })
        .collect();

    for group in groups {
        group.join().unwrap();
    }
    let audit = registry.audit();
    assert!(audit.is_clean(), "{}", audit);
    assert_eq!(audit.stats.founded, 8);
    assert_eq!(audit.stats.joins, 32);
    assert_eq!(backend.live_contexts(), 0);
}
