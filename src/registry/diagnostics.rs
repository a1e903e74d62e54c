//! Leak reports for external auditing tools

use super::{ContextId, GroupId, RegistryStats};
use serde::Serialize;
use std::fmt;

/// One sharing group at audit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: GroupId,
    pub root: Option<ContextId>,
    /// Live members in join order
    pub members: Vec<ContextId>,
    pub destroyed: usize,
}

/// Registry-wide audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    pub live_contexts: usize,
    pub groups: Vec<GroupReport>,
    pub stats: RegistryStats,
}

impl LeakReport {
    /// True once every group has been fully torn down.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.live_contexts == 0
    }

    /// Groups still carrying departures, i.e. members that left while
    /// others were dropped without a matching leave.
    pub fn suspicious_groups(&self) -> impl Iterator<Item = &GroupReport> {
        self.groups.iter().filter(|group| group.destroyed > 0)
    }

    /// Clean means nothing is live and no member was ever dropped without
    /// destroy.
    pub fn is_clean(&self) -> bool {
        self.is_empty() && self.stats.released_without_destroy == 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "live contexts: {}, groups: {}, founded: {}, joins: {}, leaves: {}, released without destroy: {}",
            self.live_contexts,
            self.groups.len(),
            self.stats.founded,
            self.stats.joins,
            self.stats.leaves,
            self.stats.released_without_destroy,
        )?;
        for group in &self.groups {
            let members: Vec<String> = group.members.iter().map(|m| m.to_string()).collect();
            writeln!(
                f,
                "  {}: root {} members [{}] destroyed {}",
                group.group,
                group
                    .root
                    .map(|root| root.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                members.join(", "),
                group.destroyed
            )?;
        }
        Ok(())
    }
}
