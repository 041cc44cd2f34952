//! Reset Scheduler
//!
//! Rolling-window reset of per-party violation state. Conflicts whose last
//! reset is older than the window get their counters and one-time flags
//! cleared. Mutations and voice locks are left alone; they expire on their
//! own schedule.

use super::engine::ConflictEngine;
use crate::conflict::{now_ms, PairKey};
use crate::platform::{CommunityId, PlatformClient};
use std::collections::BTreeMap;
use tracing::info;

impl<P: PlatformClient> ConflictEngine<P> {
    /// Run the reset sweep at the current time.
    pub async fn reset_sweep(&self) -> Vec<PairKey> {
        self.reset_sweep_at(now_ms()).await
    }

    /// Reset every conflict whose window elapsed by `now`.
    ///
    /// Emits one batched audit notice per community. Returns the reset pairs.
    pub async fn reset_sweep_at(&self, now: u64) -> Vec<PairKey> {
        let window = self.settings.enforcement.reset_window_ms;
        let mut state = self.state.lock().await;
        let mut by_community: BTreeMap<CommunityId, Vec<PairKey>> = BTreeMap::new();

        for key in state.store.keys() {
            let Some(mut conflict) = state.store.get(&key).cloned() else {
                continue;
            };
            if now.saturating_sub(conflict.last_reset_at) < window {
                continue;
            }
            conflict.violation_counts.clear();
            conflict.responded_once.clear();
            conflict.voice_warned.clear();
            conflict.oversight_notified.clear();
            conflict.last_reset_at = now;
            by_community
                .entry(conflict.community)
                .or_default()
                .push(key.clone());
            state.store.put(conflict);
        }
        drop(state);

        let mut reset = Vec::new();
        for (community, pairs) in by_community {
            let listed = pairs
                .iter()
                .map(PairKey::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            self.audit(
                community,
                &format!(
                    "Violation counters reset for {} conflict(s): {}",
                    pairs.len(),
                    listed
                ),
            )
            .await;
            info!(community = %community, count = pairs.len(), "violation window reset");
            reset.extend(pairs);
        }
        reset
    }
}
