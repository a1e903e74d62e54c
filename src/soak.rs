//! Soak scenario for leak auditing
//!
//! Each iteration builds `groups` sharing groups on the headless backend.
//! A group's master renders on the calling thread; every dependent runs
//! on its own thread, blocks on a [`MasterGate`] until the master exists,
//! then joins the group and renders its frames. Optionally one dependent's
//! context and listeners are transplanted to a fresh target. Targets are
//! then destroyed in the configured order.
//!
//! After the last iteration the registry is audited. A run is clean when
//! nothing is left in the registry or the backend.

use crate::backend::{HeadlessBackend, HeadlessStats};
use crate::config::{SharegroupConfig, TeardownOrder};
use crate::context::ContextFactory;
use crate::drawable::DrawableProvider;
use crate::gate::MasterGate;
use crate::registry::{LeakReport, SharingGroupRegistry};
use crate::snapshot::LifecycleSnapshot;
use crate::target::{RenderCtx, RenderListener, RenderTarget};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// How long a dependent waits for its master before giving up.
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Counts display callbacks.
struct FrameCounter {
    frames: Arc<AtomicU64>,
}

impl RenderListener for FrameCounter {
    fn init(&mut self, ctx: &RenderCtx<'_>) {
        debug!("listener init on {} ({})", ctx.target(), ctx.context().id());
    }

    fn display(&mut self, _ctx: &RenderCtx<'_>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

/// Outcome of a soak run.
#[derive(Debug, Clone, Serialize)]
pub struct SoakReport {
    pub iterations_run: u32,
    pub groups_built: u64,
    pub frames_rendered: u64,
    pub transplants: u64,
    /// Stopped early by the stop flag
    pub interrupted: bool,
    pub elapsed_ms: u128,
    pub audit: LeakReport,
    pub backend: HeadlessStats,
    pub live_native_contexts: usize,
    pub live_drawables: usize,
}

impl SoakReport {
    pub fn is_clean(&self) -> bool {
        self.audit.is_clean() && self.live_native_contexts == 0 && self.live_drawables == 0
    }
}

/// Drives soak iterations against one registry and one backend.
pub struct SoakRunner {
    config: SharegroupConfig,
    backend: Arc<HeadlessBackend>,
    registry: Arc<SharingGroupRegistry>,
    factory: ContextFactory,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
}

impl SoakRunner {
    pub fn new(config: SharegroupConfig) -> Result<Self> {
        config.validate().context("Refusing to soak with an invalid configuration")?;
        let backend = HeadlessBackend::new();
        let registry = Arc::new(SharingGroupRegistry::new(&config.registry));
        let factory = ContextFactory::new(Arc::clone(&registry), backend.clone());
        Ok(Self {
            config,
            backend,
            registry,
            factory,
            stop: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Setting the flag stops the run before the next iteration.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn registry(&self) -> &Arc<SharingGroupRegistry> {
        &self.registry
    }

    pub fn run(&self) -> Result<SoakReport> {
        let soak = &self.config.soak;
        let started = Instant::now();
        let mut rng = match soak.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "🔁 soak: {} iterations x {} groups x {} members ({} teardown{})",
            soak.iterations,
            soak.groups,
            soak.members_per_group,
            soak.teardown_order.as_str(),
            if soak.transplant { ", transplant" } else { "" }
        );

        let mut iterations_run = 0;
        let mut groups_built = 0;
        let mut transplants = 0;
        let mut interrupted = false;

        for iteration in 0..soak.iterations {
            if self.stop.load(Ordering::Relaxed) {
                warn!("soak interrupted before iteration {}", iteration);
                interrupted = true;
                break;
            }
            for group in 0..soak.groups {
                let transplanted = self
                    .run_group(&mut rng)
                    .with_context(|| format!("iteration {} group {}", iteration, group))?;
                groups_built += 1;
                if transplanted {
                    transplants += 1;
                }
            }
            iterations_run += 1;
            debug!(
                "iteration {} done, {} contexts live",
                iteration,
                self.registry.live_contexts()
            );
        }

        let audit = self.registry.audit();
        let report = SoakReport {
            iterations_run,
            groups_built,
            frames_rendered: self.frames.load(Ordering::Relaxed),
            transplants,
            interrupted,
            elapsed_ms: started.elapsed().as_millis(),
            audit,
            backend: self.backend.stats(),
            live_native_contexts: self.backend.live_contexts(),
            live_drawables: self.backend.live_drawables(),
        };

        if report.is_clean() {
            info!(
                "✅ soak clean: {} groups, {} frames, {} transplants in {} ms",
                report.groups_built, report.frames_rendered, report.transplants, report.elapsed_ms
            );
        } else {
            error!("❌ soak left resources behind:\n{}", report.audit);
        }
        Ok(report)
    }

    /// Builds, renders and tears down one group. Returns whether a
    /// transplant happened.
    fn run_group(&self, rng: &mut StdRng) -> Result<bool> {
        let soak = &self.config.soak;
        let provider: Arc<dyn DrawableProvider> = self.backend.clone();
        let gate = Arc::new(MasterGate::new());

        let dependents: Vec<_> = (1..soak.members_per_group)
            .map(|index| {
                let gate = Arc::clone(&gate);
                let factory = self.factory.clone();
                let provider = Arc::clone(&provider);
                let config = self.config.clone();
                let frames = Arc::clone(&self.frames);
                thread::Builder::new()
                    .name(format!("soak-dependent-{}", index))
                    .spawn(move || -> Result<RenderTarget> {
                        let master = gate.wait_timeout(GATE_TIMEOUT)?;
                        let context = factory.shared_context(config.capabilities.clone(), &master);
                        let mut target = RenderTarget::with_context(provider, &config.surface, context)?;
                        target.add_listener(Box::new(FrameCounter { frames }));
                        for _ in 0..config.soak.frames_per_member.max(1) {
                            target.display()?;
                        }
                        Ok(target)
                    })
                    .context("Failed to spawn dependent thread")
            })
            .collect::<Result<Vec<_>>>()?;

        let master_target = self.build_master(&provider);
        let master_target = match master_target {
            Ok(target) => {
                let opened = target
                    .context()
                    .map(|context| gate.open(context.clone()))
                    .unwrap_or(false);
                if !opened {
                    gate.abandon();
                }
                target
            }
            Err(err) => {
                gate.abandon();
                for handle in dependents {
                    let _ = handle.join();
                }
                return Err(err.context("master target"));
            }
        };

        let mut targets = vec![master_target];
        for handle in dependents {
            let target = handle
                .join()
                .map_err(|_| anyhow!("dependent thread panicked"))??;
            targets.push(target);
        }

        let expected = soak.members_per_group - 1;
        let master = targets[0]
            .context()
            .cloned()
            .ok_or_else(|| anyhow!("master target lost its context"))?;
        if master.created_share_count() != expected {
            bail!(
                "master {} reports {} shares, expected {}",
                master.id(),
                master.created_share_count(),
                expected
            );
        }

        let transplanted = soak.transplant && targets.len() > 1;
        if transplanted {
            self.transplant(&provider, &mut targets[1])?;
        }

        self.teardown(targets, rng)?;
        Ok(transplanted)
    }

    fn build_master(&self, provider: &Arc<dyn DrawableProvider>) -> Result<RenderTarget> {
        let context = self.factory.context(self.config.capabilities.clone());
        let mut target =
            RenderTarget::with_context(Arc::clone(provider), &self.config.surface, context)?;
        target.add_listener(Box::new(FrameCounter {
            frames: Arc::clone(&self.frames),
        }));
        for _ in 0..self.config.soak.frames_per_member.max(1) {
            target.display()?;
        }
        Ok(target)
    }

    /// Moves `target`'s context and listeners to a fresh target, destroys
    /// the emptied original and renders one frame on the new one.
    fn transplant(
        &self,
        provider: &Arc<dyn DrawableProvider>,
        target: &mut RenderTarget,
    ) -> Result<()> {
        let mut fresh = RenderTarget::new(Arc::clone(provider), &self.config.surface)?;
        let mut snapshot = LifecycleSnapshot::detach(target)?;
        if let Err(err) = snapshot.attach(&mut fresh) {
            snapshot.dispose(provider)?;
            return Err(err.into());
        }
        fresh.display()?;

        let mut old = std::mem::replace(target, fresh);
        old.destroy()?;
        debug!("transplanted {} -> {}", old.id(), target.id());
        Ok(())
    }

    fn teardown(&self, targets: Vec<RenderTarget>, rng: &mut StdRng) -> Result<()> {
        let mut order: Vec<usize> = (0..targets.len()).collect();
        match self.config.soak.teardown_order {
            TeardownOrder::Creation => {}
            TeardownOrder::Reverse => order.reverse(),
            TeardownOrder::Shuffled => order.shuffle(rng),
        }

        let mut slots: Vec<Option<RenderTarget>> = targets.into_iter().map(Some).collect();
        for index in order {
            if let Some(mut target) = slots[index].take() {
                target.destroy()?;
            }
        }
        Ok(())
    }
}

/// Runs a full soak with `config`.
pub fn run_soak(config: SharegroupConfig) -> Result<SoakReport> {
    SoakRunner::new(config)?.run()
}
