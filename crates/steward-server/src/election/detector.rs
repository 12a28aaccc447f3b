//! Change Detector
//!
//! Tracks the digest of successive snapshots. A new digest arms a trigger
//! `damper` in the future; when the trigger fires the latest snapshot is
//! dispatched once, so a burst of changes yields a single callback.

use super::snapshot::{digest_of, Snapshot};
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot to hand to the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub digest: String,
    pub pods: String,
    pub members: usize,
}

#[derive(Debug)]
pub struct ChangeDetector {
    damper: Duration,
    last: Option<String>,
    dirty: bool,
    trigger: Instant,
}

impl ChangeDetector {
    pub fn new(damper: Duration) -> Self {
        Self {
            damper,
            last: None,
            dirty: false,
            trigger: Instant::now(),
        }
    }

    /// Disarm a pending trigger. A change that was not dispatched yet is
    /// forgotten so the next observation detects it again.
    pub fn disarm(&mut self) {
        if self.dirty {
            self.last = None;
        }
        self.dirty = false;
        self.trigger = Instant::now();
    }

    pub fn last_digest(&self) -> Option<&str> {
        self.last.as_deref()
    }

    /// Feed the snapshot of this cycle. Returns the dispatch once the damper elapsed.
    pub fn observe(
        &mut self,
        snapshot: &Snapshot,
        now: Instant,
    ) -> Result<Option<Dispatch>, serde_json::Error> {
        let pods = snapshot.to_json()?;
        let digest = digest_of(&pods);

        if self.last.as_deref() != Some(digest.as_str()) {
            self.dirty = true;
            self.trigger = now + self.damper;
            self.last = Some(digest.clone());
        }

        if self.dirty && now >= self.trigger {
            self.dirty = false;
            return Ok(Some(Dispatch {
                digest,
                pods,
                members: snapshot.len(),
            }));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipRecord;
    use serde_json::json;

    fn snapshot(versions: &[i64]) -> Snapshot {
        Snapshot {
            members: versions
                .iter()
                .enumerate()
                .map(|(seq, v)| MembershipRecord {
                    app: None,
                    id: None,
                    ip: None,
                    key: format!("k{seq}"),
                    payload: json!({ "v": v }),
                    role: "db".into(),
                    seq: seq as i64,
                })
                .collect(),
        }
    }

    #[test]
    fn test_burst_yields_single_dispatch_with_latest_snapshot() {
        let damper = Duration::from_secs(5);
        let mut detector = ChangeDetector::new(damper);
        let start = Instant::now();

        // three changes inside the damper window
        for (offset, version) in [(0u64, 1i64), (1, 2), (2, 3)] {
            let now = start + Duration::from_secs(offset);
            assert_eq!(detector.observe(&snapshot(&[version]), now).unwrap(), None);
        }

        // deadline is armed by the last change, 2s + 5s
        let quiet = snapshot(&[3]);
        assert_eq!(detector.observe(&quiet, start + Duration::from_secs(6)).unwrap(), None);
        let dispatch = detector
            .observe(&quiet, start + Duration::from_secs(7))
            .unwrap()
            .unwrap();
        assert_eq!(dispatch.digest, quiet.digest().unwrap());
        assert_eq!(dispatch.pods, quiet.to_json().unwrap());
        assert_eq!(dispatch.members, 1);

        // nothing further without a change
        for secs in 8..20 {
            assert_eq!(detector.observe(&quiet, start + Duration::from_secs(secs)).unwrap(), None);
        }
    }

    #[test]
    fn test_zero_damper_dispatches_immediately() {
        let mut detector = ChangeDetector::new(Duration::ZERO);
        let now = Instant::now();
        assert!(detector.observe(&snapshot(&[1, 1]), now).unwrap().is_some());
        assert!(detector.observe(&snapshot(&[1, 1]), now).unwrap().is_none());
        assert!(detector.observe(&snapshot(&[1, 2]), now).unwrap().is_some());
    }

    #[test]
    fn test_disarm_after_dispatch_keeps_last_digest() {
        let mut detector = ChangeDetector::new(Duration::ZERO);
        let now = Instant::now();
        let current = snapshot(&[1]);
        assert!(detector.observe(&current, now).unwrap().is_some());
        detector.disarm();
        assert_eq!(detector.last_digest(), Some(current.digest().unwrap().as_str()));
        assert!(detector.observe(&current, now).unwrap().is_none());
    }

    #[test]
    fn test_disarm_forgets_pending_change() {
        let mut detector = ChangeDetector::new(Duration::from_secs(5));
        let now = Instant::now();
        let current = snapshot(&[1]);
        assert!(detector.observe(&current, now).unwrap().is_none());
        detector.disarm();
        assert_eq!(detector.last_digest(), None);

        let later = now + Duration::from_secs(1);
        assert!(detector.observe(&current, later).unwrap().is_none());
        assert!(detector
            .observe(&current, later + Duration::from_secs(5))
            .unwrap()
            .is_some());
    }
}
