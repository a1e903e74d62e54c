//! Sharing group registry
//!
//! Tracks which rendering contexts share an object namespace and keeps the
//! per-group counters used for leak auditing. Every membership change runs
//! under one lock, so no caller can observe two members disagreeing about
//! the size of their group.
//!
//! Counter semantics for a context `c` in a group of `n` live members:
//! - `created_share_count(c) == n - 1`
//! - `destroyed_share_count(c)` counts members that left since the group
//!   last shrank to a single member
//!
//! The group root (reported by [`SharingGroupRegistry::shared_master`]) is the
//! earliest-joined live member. While the founder lives that is the founder;
//! if it leaves first, the next member in join order takes over.

use crate::config::RegistryConfig;
use crate::error::ShareError;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

mod diagnostics;

pub use diagnostics::{GroupReport, LeakReport};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique rendering context identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(u64);

impl ContextId {
    /// Allocates a fresh id. Ids are never reused.
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Identity of one sharing group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// Lifetime totals, never reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Groups founded by a context created without a master
    pub founded: u64,
    /// Successful joins against an existing master
    pub joins: u64,
    /// Explicit leaves (context destroy)
    pub leaves: u64,
    /// Members removed because their last handle was dropped without destroy
    pub released_without_destroy: u64,
    /// Leave/release calls that found nothing to remove
    pub redundant_leaves: u64,
}

#[derive(Debug)]
struct Group {
    id: GroupId,
    /// Live members in join order
    members: Vec<ContextId>,
    destroyed: usize,
}

#[derive(Debug, Default)]
struct RegistryState {
    groups: HashMap<GroupId, Group>,
    membership: HashMap<ContextId, GroupId>,
    departed: HashSet<ContextId>,
    departed_order: VecDeque<ContextId>,
    next_group: u64,
    stats: RegistryStats,
}

impl RegistryState {
    fn group_for(&self, context: ContextId) -> Option<&Group> {
        self.membership
            .get(&context)
            .and_then(|group| self.groups.get(group))
    }

    fn remember_departed(&mut self, context: ContextId, capacity: usize) {
        if self.departed.insert(context) {
            self.departed_order.push_back(context);
        }
        while self.departed_order.len() > capacity {
            if let Some(old) = self.departed_order.pop_front() {
                self.departed.remove(&old);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    Destroyed,
    Released,
}

/// Process-wide table of sharing groups.
///
/// One instance is created by the application and handed to every
/// [`ContextFactory`](crate::context::ContextFactory); there is no ambient
/// global.
#[derive(Debug)]
pub struct SharingGroupRegistry {
    state: Mutex<RegistryState>,
    departed_history: usize,
}

impl Default for SharingGroupRegistry {
    fn default() -> Self {
        Self::new(&RegistryConfig::default())
    }
}

impl SharingGroupRegistry {
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            departed_history: config.departed_history.max(1),
        }
    }

    /// Registers `context` as the founder of a new, single-member group.
    pub fn found(&self, context: ContextId) -> Result<GroupId, ShareError> {
        let mut state = self.state.lock();
        if state.membership.contains_key(&context) {
            return Err(ShareError::AlreadyRegistered(context));
        }

        let id = GroupId(state.next_group);
        state.next_group += 1;
        state.groups.insert(
            id,
            Group {
                id,
                members: vec![context],
                destroyed: 0,
            },
        );
        state.membership.insert(context, id);
        state.stats.founded += 1;

        debug!("{} founded sharing group {}", context, id);
        Ok(id)
    }

    /// Adds `context` to the group `master` belongs to.
    ///
    /// Fails fast when the master is absent; waiting for it is the caller's
    /// job (see [`MasterGate`](crate::gate::MasterGate)).
    pub fn join(&self, context: ContextId, master: ContextId) -> Result<GroupId, ShareError> {
        let mut state = self.state.lock();
        if state.membership.contains_key(&context) {
            return Err(ShareError::AlreadyRegistered(context));
        }

        let Some(&group_id) = state.membership.get(&master) else {
            return Err(if state.departed.contains(&master) {
                ShareError::MasterDestroyed(master)
            } else {
                ShareError::MasterNotFound(master)
            });
        };

        let size = match state.groups.get_mut(&group_id) {
            Some(group) => {
                group.members.push(context);
                group.members.len()
            }
            None => return Err(ShareError::MasterNotFound(master)),
        };
        state.membership.insert(context, group_id);
        state.stats.joins += 1;

        info!(
            "🔗 {} joined group {} via {} (size {})",
            context, group_id, master, size
        );
        Ok(group_id)
    }

    /// Removes `context` from its group after an explicit destroy.
    ///
    /// Idempotent: returns false and changes nothing when the context is not
    /// registered.
    pub fn leave(&self, context: ContextId) -> bool {
        self.remove(context, Departure::Destroyed)
    }

    /// Removes `context` whose last handle went away without a destroy.
    ///
    /// Converges to the same counters as [`leave`](Self::leave) and may be
    /// called after it.
    pub fn release(&self, context: ContextId) -> bool {
        self.remove(context, Departure::Released)
    }

    fn remove(&self, context: ContextId, departure: Departure) -> bool {
        let mut state = self.state.lock();
        let Some(group_id) = state.membership.remove(&context) else {
            state.stats.redundant_leaves += 1;
            return false;
        };

        let mut emptied = false;
        if let Some(group) = state.groups.get_mut(&group_id) {
            group.members.retain(|member| *member != context);
            match group.members.len() {
                0 => emptied = true,
                // No shares left to account for
                1 => group.destroyed = 0,
                _ => group.destroyed += 1,
            }
        }
        if emptied {
            state.groups.remove(&group_id);
            info!("🧹 sharing group {} fully torn down", group_id);
        }

        let capacity = self.departed_history;
        state.remember_departed(context, capacity);

        match departure {
            Departure::Destroyed => {
                state.stats.leaves += 1;
                debug!("{} left group {}", context, group_id);
            }
            Departure::Released => {
                state.stats.released_without_destroy += 1;
                warn!(
                    "⚠️ {} released without destroy, removed from group {}",
                    context, group_id
                );
            }
        }
        true
    }

    /// Number of other live members sharing with `context`.
    pub fn created_share_count(&self, context: ContextId) -> usize {
        let state = self.state.lock();
        state
            .group_for(context)
            .map(|group| group.members.len().saturating_sub(1))
            .unwrap_or(0)
    }

    /// Members that left `context`'s group since it last had a single member.
    pub fn destroyed_share_count(&self, context: ContextId) -> usize {
        let state = self.state.lock();
        state
            .group_for(context)
            .map(|group| group.destroyed)
            .unwrap_or(0)
    }

    /// Live members of `context`'s group, itself included. 0 when absent.
    pub fn group_size(&self, context: ContextId) -> usize {
        let state = self.state.lock();
        state
            .group_for(context)
            .map(|group| group.members.len())
            .unwrap_or(0)
    }

    /// The other live members of `context`'s group in join order.
    pub fn created_shares(&self, context: ContextId) -> Vec<ContextId> {
        let state = self.state.lock();
        state
            .group_for(context)
            .map(|group| {
                group
                    .members
                    .iter()
                    .copied()
                    .filter(|member| *member != context)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Root of `context`'s group, or `None` if `context` is the root or is
    /// not registered.
    pub fn shared_master(&self, context: ContextId) -> Option<ContextId> {
        let state = self.state.lock();
        state
            .group_for(context)
            .and_then(|group| group.members.first().copied())
            .filter(|root| *root != context)
    }

    /// True when at least one other live member shares with `context`.
    pub fn is_shared(&self, context: ContextId) -> bool {
        self.created_share_count(context) > 0
    }

    pub fn contains(&self, context: ContextId) -> bool {
        self.state.lock().membership.contains_key(&context)
    }

    pub fn group_of(&self, context: ContextId) -> Option<GroupId> {
        self.state.lock().membership.get(&context).copied()
    }

    pub fn group_count(&self) -> usize {
        self.state.lock().groups.len()
    }

    pub fn live_contexts(&self) -> usize {
        self.state.lock().membership.len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.state.lock().stats.clone()
    }

    /// Consistent snapshot of every group for leak auditing.
    pub fn audit(&self) -> LeakReport {
        let state = self.state.lock();
        let mut groups: Vec<GroupReport> = state
            .groups
            .values()
            .map(|group| GroupReport {
                group: group.id,
                root: group.members.first().copied(),
                members: group.members.clone(),
                destroyed: group.destroyed,
            })
            .collect();
        groups.sort_by_key(|report| report.group);

        LeakReport {
            live_contexts: state.membership.len(),
            groups,
            stats: state.stats.clone(),
        }
    }
}
