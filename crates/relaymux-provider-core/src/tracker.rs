//! The Health & Failover Tracker: per-credential 429
//! penalties, per-pipeline health state, and round-robin candidate selection.
//!
//! The background recovery task is a direct adaptation of
//! `credential/unavailable_queue.rs`'s `UnavailableQueue`/
//! `spawn_recover_task`: a `BinaryHeap<Reverse<(Instant, _)>>` paired with a
//! `Notify` so the task sleeps until the next expiry instead of polling.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use relaymux_common::{Fingerprint, PipelineHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock};
use tokio::time::{Instant, sleep_until};

use crate::events::{Event, EventHub, OperationalEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Blacklisted,
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: HealthState,
    pub consecutive_error_count: u32,
    pub last_success_at: Option<Instant>,
    pub last_failure_at: Option<Instant>,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            state: HealthState::Healthy,
            consecutive_error_count: 0,
            last_success_at: None,
            last_failure_at: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct KeyPenaltyRecord {
    consecutive_429_count: u32,
    pipeline_ids_touched: Vec<PipelineHandle>,
    blacklisted_since: Option<Instant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Consecutive 429s on one Fingerprint before it is blacklisted.
    pub blacklist_threshold: u32,
    /// Consecutive non-429 errors on one pipeline before it is degraded.
    pub error_threshold: u32,
    /// Cooldown before a blacklisted Fingerprint / degraded pipeline recovers.
    pub cooldown: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            blacklist_threshold: 3,
            error_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

struct Inner {
    config: TrackerConfig,
    penalties: RwLock<HashMap<Fingerprint, KeyPenaltyRecord>>,
    health: RwLock<HashMap<PipelineHandle, HealthRecord>>,
    deadlines: tokio::sync::Mutex<BinaryHeap<Reverse<(Instant, Fingerprint)>>>,
    notify: Notify,
    events: EventHub,
}

/// Shared, cloneable handle to the tracker. Mutation is serialised per key
/// (one `RwLock` per map) rather than behind a single coarse lock — fine
/// enough grained that penalty bookkeeping for one pipeline never blocks a
/// health check on another.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<Inner>,
}

impl Tracker {
    pub fn new(config: TrackerConfig, events: EventHub) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                penalties: RwLock::new(HashMap::new()),
                health: RwLock::new(HashMap::new()),
                deadlines: tokio::sync::Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                events,
            }),
        }
    }

    /// Spawns the deadline-queue recovery task. Must be called once after
    /// construction for blacklist / degraded states to ever clear.
    pub fn spawn_recovery_task(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let heap = inner.deadlines.lock().await;
                    heap.peek().map(|Reverse((t, fp))| (*t, fp.clone()))
                };

                match next {
                    None => {
                        inner.notify.notified().await;
                        continue;
                    }
                    Some((deadline, _)) => sleep_until(deadline).await,
                }

                let now = Instant::now();
                let mut due = Vec::new();
                {
                    let mut heap = inner.deadlines.lock().await;
                    while let Some(Reverse((t, fp))) = heap.peek().cloned() {
                        if t > now {
                            break;
                        }
                        heap.pop();
                        due.push(fp);
                    }
                }
                if due.is_empty() {
                    continue;
                }

                let mut penalties = inner.penalties.write().await;
                let mut health = inner.health.write().await;
                for fingerprint in due {
                    let Some(record) = penalties.get_mut(&fingerprint) else {
                        continue;
                    };
                    let still_due = record
                        .blacklisted_since
                        .map(|since| since + inner.config.cooldown <= now)
                        .unwrap_or(false);
                    if !still_due {
                        continue;
                    }
                    record.consecutive_429_count = 0;
                    record.blacklisted_since = None;
                    for handle in record.pipeline_ids_touched.drain(..) {
                        if let Some(h) = health.get_mut(&handle) {
                            h.state = HealthState::Healthy;
                            h.consecutive_error_count = 0;
                        }
                    }
                    inner
                        .events
                        .emit(Event::Operational(OperationalEvent::FingerprintRecovered {
                            fingerprint,
                        }))
                        .await;
                }
            }
        });
    }

    pub async fn record_success(&self, handle: &PipelineHandle, fingerprint: Option<&Fingerprint>) {
        if let Some(fingerprint) = fingerprint {
            let mut penalties = self.inner.penalties.write().await;
            if let Some(record) = penalties.get_mut(fingerprint) {
                record.consecutive_429_count = 0;
            }
        }
        let mut health = self.inner.health.write().await;
        let record = health.entry(handle.clone()).or_default();
        record.state = HealthState::Healthy;
        record.consecutive_error_count = 0;
        record.last_success_at = Some(Instant::now());
    }

    /// Records a 429 against `fingerprint` (when extractable) and against the
    /// pipeline itself. Returns whether the Fingerprint just crossed the
    /// blacklist threshold on this call.
    pub async fn record_rate_limited(
        &self,
        handle: &PipelineHandle,
        fingerprint: Option<&Fingerprint>,
    ) -> bool {
        {
            let mut health = self.inner.health.write().await;
            let record = health.entry(handle.clone()).or_default();
            record.last_failure_at = Some(Instant::now());
        }

        let Some(fingerprint) = fingerprint else {
            return false;
        };

        let just_blacklisted = {
            let mut penalties = self.inner.penalties.write().await;
            let record = penalties.entry(fingerprint.clone()).or_default();
            if !record.pipeline_ids_touched.contains(handle) {
                record.pipeline_ids_touched.push(handle.clone());
            }
            record.consecutive_429_count += 1;
            if record.consecutive_429_count >= self.inner.config.blacklist_threshold
                && record.blacklisted_since.is_none()
            {
                record.blacklisted_since = Some(Instant::now());
                true
            } else {
                false
            }
        };

        if just_blacklisted {
            let touched = {
                let penalties = self.inner.penalties.read().await;
                penalties
                    .get(fingerprint)
                    .map(|r| r.pipeline_ids_touched.clone())
                    .unwrap_or_default()
            };
            let mut health = self.inner.health.write().await;
            for touched_handle in &touched {
                let record = health.entry(touched_handle.clone()).or_default();
                record.state = HealthState::Degraded;
            }
            let deadline = Instant::now() + self.inner.config.cooldown;
            self.inner
                .deadlines
                .lock()
                .await
                .push(Reverse((deadline, fingerprint.clone())));
            self.inner.notify.notify_one();
            self.inner
                .events
                .emit(Event::Operational(OperationalEvent::FingerprintBlacklisted {
                    fingerprint: fingerprint.clone(),
                    touched,
                }))
                .await;
        }

        just_blacklisted
    }

    pub async fn record_error(&self, handle: &PipelineHandle) {
        let mut health = self.inner.health.write().await;
        let record = health.entry(handle.clone()).or_default();
        record.last_failure_at = Some(Instant::now());
        record.consecutive_error_count += 1;
        if record.consecutive_error_count >= self.inner.config.error_threshold {
            record.state = HealthState::Degraded;
        }
    }

    pub async fn is_eligible(&self, handle: &PipelineHandle) -> bool {
        let health = self.inner.health.read().await;
        match health.get(handle) {
            None => true,
            Some(record) => record.state == HealthState::Healthy,
        }
    }

    /// Returns the next not-excluded, eligible handle in `candidates`,
    /// anchored by round-robin on `attempt`.
    pub async fn next_candidate(
        &self,
        candidates: &[PipelineHandle],
        exclude: &[PipelineHandle],
        attempt: usize,
    ) -> Option<PipelineHandle> {
        if candidates.is_empty() {
            return None;
        }
        for offset in 0..candidates.len() {
            let idx = (attempt + offset) % candidates.len();
            let candidate = &candidates[idx];
            if exclude.contains(candidate) {
                continue;
            }
            if self.is_eligible(candidate).await {
                return Some(candidate.clone());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(n: u8) -> PipelineHandle {
        PipelineHandle::new("openai", "gpt", format!("k{n}"))
    }

    fn tracker(config: TrackerConfig) -> Tracker {
        Tracker::new(config, EventHub::new(16))
    }

    #[tokio::test]
    async fn a_429_below_threshold_does_not_degrade_the_pipeline() {
        let tracker = tracker(TrackerConfig {
            blacklist_threshold: 3,
            ..Default::default()
        });
        let fp = Fingerprint::compute("openai", "k1", "sk-1");
        let h = handle(1);
        let blacklisted = tracker.record_rate_limited(&h, Some(&fp)).await;
        assert!(!blacklisted);
        assert!(tracker.is_eligible(&h).await);
    }

    #[tokio::test]
    async fn reaching_the_threshold_degrades_every_touched_pipeline() {
        let tracker = tracker(TrackerConfig {
            blacklist_threshold: 2,
            ..Default::default()
        });
        let fp = Fingerprint::compute("openai", "k1", "sk-1");
        let h = handle(1);
        assert!(!tracker.record_rate_limited(&h, Some(&fp)).await);
        assert!(tracker.record_rate_limited(&h, Some(&fp)).await);
        assert!(!tracker.is_eligible(&h).await);
    }

    #[tokio::test]
    async fn next_candidate_skips_excluded_and_rotates_by_attempt() {
        let tracker = tracker(TrackerConfig::default());
        let candidates = vec![handle(1), handle(2), handle(3)];
        let picked = tracker.next_candidate(&candidates, &[handle(1)], 0).await;
        assert_eq!(picked, Some(handle(2)));
        let picked = tracker.next_candidate(&candidates, &[], 2).await;
        assert_eq!(picked, Some(handle(3)));
    }

    #[tokio::test]
    async fn an_unknown_fingerprint_never_blacklists_anything() {
        let tracker = tracker(TrackerConfig {
            blacklist_threshold: 1,
            ..Default::default()
        });
        let h = handle(1);
        let blacklisted = tracker.record_rate_limited(&h, None).await;
        assert!(!blacklisted);
        assert!(tracker.is_eligible(&h).await);
    }
}
