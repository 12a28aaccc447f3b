//! Store key layout for one application group.

/// Root under which every group lives.
pub const ROOT: &str = "/steward";

/// Key builder for a single group (application identifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    group: String,
    base: String,
}

impl Layout {
    pub fn new(group: &str) -> Self {
        Self::with_root(ROOT, group)
    }

    pub fn with_root(root: &str, group: &str) -> Self {
        Self {
            group: group.to_string(),
            base: format!("{}/{}", root.trim_end_matches('/'), group),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Directory holding the leadership bids
    pub fn locks_dir(&self) -> String {
        format!("{}/locks", self.base)
    }

    /// Prefix of every lock key below [`Layout::locks_dir`]
    pub fn lock_prefix(&self) -> &'static str {
        "leader-"
    }

    /// Monotonic sequence counter
    pub fn sequence_key(&self) -> String {
        format!("{}/seq", self.base)
    }

    /// Directory holding one TTL-leased record per reporting entity
    pub fn pods_dir(&self) -> String {
        format!("{}/pods", self.base)
    }

    pub fn pod_key(&self, entity: &str) -> String {
        format!("{}/pods/{}", self.base, entity)
    }

    /// Last published snapshot digest
    pub fn stamp_key(&self) -> String {
        format!("{}/stamp", self.base)
    }

    /// Opaque state persisted by the callback script
    pub fn state_key(&self) -> String {
        format!("{}/state", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_keys() {
        let layout = Layout::new("redis");
        assert_eq!(layout.locks_dir(), "/steward/redis/locks");
        assert_eq!(layout.sequence_key(), "/steward/redis/seq");
        assert_eq!(layout.pod_key("4a1z"), "/steward/redis/pods/4a1z");
        assert_eq!(layout.stamp_key(), "/steward/redis/stamp");
        assert_eq!(layout.state_key(), "/steward/redis/state");
        assert_eq!(layout.group(), "redis");
    }

    #[test]
    fn test_custom_root_trailing_slash() {
        let layout = Layout::with_root("/ops/", "web");
        assert_eq!(layout.pods_dir(), "/ops/web/pods");
    }
}
