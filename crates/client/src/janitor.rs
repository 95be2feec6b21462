//! Cleanup trigger
//!
//! The one mutation not initiated by a client: a server-side task that
//! watches the room tree and finishes what leaving clients could not.
//! On a truthy explicit-leave timestamp it removes the participant's
//! record; when removal fails, it writes a tombstone under a separate
//! path for manual reconciliation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use deckroom_core::{ParticipantId, RoomCode};
use deckroom_store::SyncStore;

use crate::paths;
use crate::retry::RetryPolicy;

pub struct Janitor<S: SyncStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: SyncStore> Janitor<S> {
    pub fn new(store: Arc<S>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Watch the room tree and sweep on every change.
    pub async fn run(self) {
        let mut rx = match self.store.watch(&paths::rooms()).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "janitor could not subscribe");
                return;
            }
        };

        // Tombstoned records are not retried until the process restarts;
        // the tombstone exists precisely for manual reconciliation
        let mut tombstoned: HashSet<(String, String)> = HashSet::new();

        while let Some(snapshot) = rx.recv().await {
            let Some(rooms) = snapshot.value else { continue };
            self.sweep(&rooms, &mut tombstoned).await;
        }
    }

    async fn sweep(&self, rooms: &Value, tombstoned: &mut HashSet<(String, String)>) {
        let Some(rooms) = rooms.as_object() else { return };
        for (code_str, room) in rooms {
            let Ok(code) = code_str.parse::<RoomCode>() else {
                continue;
            };
            let Some(participants) = room.get("participants").and_then(Value::as_object) else {
                continue;
            };
            for (id_str, record) in participants {
                let left_at = record
                    .get("presence")
                    .and_then(|p| p.get("left_at"))
                    .and_then(Value::as_str);
                let Some(left_at) = left_at else { continue };
                let Ok(id) = id_str.parse::<uuid::Uuid>().map(ParticipantId) else {
                    continue;
                };
                if tombstoned.contains(&(code_str.clone(), id_str.clone())) {
                    continue;
                }
                if !self.reap(&code, id, left_at).await {
                    tombstoned.insert((code_str.clone(), id_str.clone()));
                }
            }
        }
    }

    /// Remove one departed participant; on failure leave a tombstone.
    /// Returns false when the tombstone path was taken.
    async fn reap(&self, code: &RoomCode, id: ParticipantId, left_at: &str) -> bool {
        let path = paths::participant(code, id);
        let mut delay = self.retry.base_delay;
        for attempt in 1..=self.retry.max_attempts {
            match self.store.remove(&path).await {
                Ok(()) => {
                    info!(code = %code, participant = %id, "reaped departed participant");
                    return true;
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!(attempt, error = %e, "reap failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    warn!(code = %code, participant = %id, error = %e, "reap exhausted, writing tombstone");
                }
            }
        }

        let tombstone = json!({
            "left_at": left_at,
            "failed_at": Utc::now().to_rfc3339(),
        });
        if let Err(e) = self
            .store
            .write(&paths::removed(code, id), tombstone)
            .await
        {
            warn!(error = %e, "tombstone write failed");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckroom_core::{ClientId, Participant};
    use deckroom_store::MemoryStore;
    use std::time::Duration;

    fn retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        }
    }

    fn departed_record() -> Participant {
        let mut p = Participant::new(
            "sam".to_string(),
            ClientId::new(),
            "sess".to_string(),
            Utc::now(),
        );
        p.presence.left_at = Some(Utc::now());
        p
    }

    async fn seed(store: &MemoryStore, code: &RoomCode, id: ParticipantId) {
        let record = serde_json::to_value(departed_record()).unwrap();
        store
            .write(&paths::participant(code, id), record)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_janitor_reaps_departed() {
        let store = Arc::new(MemoryStore::new());
        let code: RoomCode = "AB3F9K".parse().unwrap();
        let id = ParticipantId::new();
        seed(&store, &code, id).await;

        let handle = Janitor::new(store.clone(), retry()).spawn();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let record = store.read(&paths::participant(&code, id)).await.unwrap();
        assert!(record.is_none());
        handle.abort();
    }

    #[tokio::test]
    async fn test_janitor_tombstones_on_failure() {
        let store = Arc::new(MemoryStore::new());
        let code: RoomCode = "AB3F9K".parse().unwrap();
        let id = ParticipantId::new();
        seed(&store, &code, id).await;

        let janitor = Janitor::new(store.clone(), retry());
        let rooms = store.read(&paths::rooms()).await.unwrap().unwrap();
        // The single removal attempt fails; the tombstone write follows
        store.inject_failures(1);
        let mut tombstoned = HashSet::new();
        janitor.sweep(&rooms, &mut tombstoned).await;

        let tombstone = store.read(&paths::removed(&code, id)).await.unwrap();
        let tombstone = tombstone.expect("tombstone written");
        assert!(tombstone.get("left_at").is_some());
        assert!(tombstone.get("failed_at").is_some());
        assert_eq!(tombstoned.len(), 1);
    }
}
