//! Presence heartbeats and deferred disconnect writes
//!
//! Each joined client refreshes its own `last_seen` on a fixed period;
//! observers derive offline status from staleness. A deferred write
//! registered with the store marks the participant disconnected if the
//! connection is severed without a clean teardown. Deferred writes are
//! scoped to the participant's own presence path and never touch the
//! room document itself.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use deckroom_core::{ParticipantId, RoomCode};
use deckroom_store::{DeferredWrite, SyncStore};

use crate::error::Result;
use crate::paths;

/// Keeps one participant's liveness fresh while the session runs.
pub struct PresenceTracker<S: SyncStore> {
    store: Arc<S>,
    code: RoomCode,
    me: ParticipantId,
    period: std::time::Duration,
    heartbeat: Option<JoinHandle<()>>,
    deferred: Arc<Mutex<Option<DeferredWrite>>>,
}

impl<S: SyncStore> PresenceTracker<S> {
    pub fn new(
        store: Arc<S>,
        code: RoomCode,
        me: ParticipantId,
        period: std::time::Duration,
    ) -> Self {
        Self {
            store,
            code,
            me,
            period,
            heartbeat: None,
            deferred: Arc::new(Mutex::new(None)),
        }
    }

    /// Register the severance marker and start the heartbeat task.
    /// Idempotent per (re)join: an existing registration is replaced and
    /// an existing heartbeat is left running.
    pub async fn start(&mut self) -> Result<()> {
        self.refresh_registration().await?;

        if self.heartbeat.is_none() {
            let store = self.store.clone();
            let record_path = paths::participant(&self.code, self.me);
            let path = paths::last_seen(&self.code, self.me);
            let period = self.period;
            self.heartbeat = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    // Re-read before writing: a heartbeat into a removed
                    // record would resurrect a fragment of it
                    match store.read(&record_path).await {
                        Ok(Some(_)) => {
                            let stamp = json!(Utc::now().to_rfc3339());
                            if let Err(e) = store.write(&path, stamp).await {
                                // A failed heartbeat shows up as staleness;
                                // the next tick tries again
                                warn!(error = %e, "heartbeat write failed");
                            }
                        }
                        Ok(None) => {
                            debug!("own record absent, heartbeat skipped");
                        }
                        Err(e) => {
                            warn!(error = %e, "heartbeat read failed");
                        }
                    }
                }
            }));
        }
        Ok(())
    }

    /// Cancel any previous registration and install a fresh one.
    ///
    /// Called at every (re)join and after every liveness-proving action,
    /// so a stale registration can never mark a healthy session offline.
    pub async fn refresh_registration(&self) -> Result<()> {
        let mut slot = self.deferred.lock().await;
        if let Some(token) = slot.take() {
            self.store.cancel_deferred(token).await?;
        }
        let path = paths::disconnected_at(&self.code, self.me);
        let token = self
            .store
            .on_disconnect_write(&path, json!(Utc::now().to_rfc3339()))
            .await?;
        *slot = Some(token);
        debug!(participant = %self.me, "disconnect marker registered");
        Ok(())
    }

    /// Cancel the registration without re-issuing, for clean teardown.
    pub async fn cancel_registration(&self) -> Result<()> {
        let mut slot = self.deferred.lock().await;
        if let Some(token) = slot.take() {
            self.store.cancel_deferred(token).await?;
        }
        Ok(())
    }

    /// Stop the heartbeat and drop the severance marker.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if let Err(e) = self.cancel_registration().await {
            warn!(error = %e, "failed to cancel disconnect marker during stop");
        }
    }
}

impl<S: SyncStore> Drop for PresenceTracker<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
    }
}
