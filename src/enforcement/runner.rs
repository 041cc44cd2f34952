//! Enforcement event loop.
//!
//! Polls the platform for events and drives the two periodic sweeps:
//! - enforcement sweep (lock expiry + due restorations), every `sweep_interval_secs`
//! - violation window reset, every `reset_interval_secs`
//!
//! The store is flushed once more when the loop stops.

use super::engine::ConflictEngine;
use crate::conflict::StoreResult;
use crate::platform::PlatformClient;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Runs a shared [`ConflictEngine`] until told to stop.
pub struct EnforcementRunner<P: PlatformClient> {
    engine: Arc<ConflictEngine<P>>,
}

impl<P: PlatformClient> EnforcementRunner<P> {
    pub fn new(engine: Arc<ConflictEngine<P>>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<ConflictEngine<P>> {
        &self.engine
    }

    /// Run until `shutdown` resolves, then flush the store.
    pub async fn run_until<F>(&self, shutdown: F) -> StoreResult<()>
    where
        F: Future<Output = ()>,
    {
        let enforcement = &self.engine.settings().enforcement;
        let start = Instant::now();
        let mut poll = tokio::time::interval(enforcement.poll_interval());
        // Sweeps wait one full period before their first run
        let mut sweep = interval_at(start + enforcement.sweep_interval(), enforcement.sweep_interval());
        let mut reset = interval_at(start + enforcement.reset_interval(), enforcement.reset_interval());
        for timer in [&mut poll, &mut sweep, &mut reset] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }
        tokio::pin!(shutdown);

        info!("enforcement loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => {
                    let events = match self.engine.platform().receive_events().await {
                        Ok(events) => events,
                        Err(e) => {
                            warn!("Error receiving events, will retry: {}", e);
                            continue;
                        }
                    };
                    for event in events {
                        self.engine.handle_event(event).await;
                    }
                }
                _ = sweep.tick() => {
                    let report = self.engine.sweep().await;
                    if report.locks_expired > 0 || report.restorations > 0 {
                        info!(?report, "enforcement sweep");
                    } else {
                        debug!("enforcement sweep: nothing due");
                    }
                }
                _ = reset.tick() => {
                    self.engine.reset_sweep().await;
                }
            }
        }

        info!("enforcement loop stopping, flushing store");
        self.engine.flush().await
    }
}
