//! Room session runtime
//!
//! `RoomClient` attaches to a room, keeps presence fresh, feeds every
//! store snapshot through the pure view reducer, and surfaces the
//! results as events on a channel. Store callbacks never touch view
//! state directly; they go through the reducer and the event channel.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use deckroom_core::{reduce, Room, RoomCode, RoomView, ViewContext, ViewEvent};
use deckroom_store::{Snapshot, SyncStore};

use crate::config::ClientConfig;
use crate::device::DeviceStore;
use crate::error::{Error, Result};
use crate::identity::{self, DeviceIdentity, Identity, IdentityProvider};
use crate::paths;
use crate::presence::PresenceTracker;
use crate::reconcile::{reconcile_join, JoinRequest};
use crate::retry::RetryPolicy;
use crate::room::{LeaveOutcome, RoomOps};

/// Event surfaced to the embedding UI.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A fresh rendering of the room.
    ViewChanged(RoomView),
    /// The reset token changed; play the one-shot replay animation.
    ResetReplay,
    /// This client was kicked and has removed itself.
    Kicked,
    /// The room is gone or ownerless; return to the entry screen.
    RoomTerminated,
    /// Local connectivity flipped.
    ConnectivityChanged(bool),
    /// A background operation failed after retries; dismissible notice.
    StoreTrouble(String),
}

struct SharedState {
    view: Option<RoomView>,
    local_online: bool,
    /// Set once this session left, was kicked, or saw the room die;
    /// suppresses further writes and in-session auto-rejoin.
    departed: bool,
}

/// A live session within one room.
pub struct RoomClient<S: SyncStore> {
    ops: Arc<RoomOps<S>>,
    identity: Identity,
    device: Arc<std::sync::Mutex<DeviceStore>>,
    shared: Arc<RwLock<SharedState>>,
    tracker: Arc<AsyncMutex<PresenceTracker<S>>>,
    events: mpsc::Receiver<SessionEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    watch_task: Option<JoinHandle<()>>,
}

impl<S: SyncStore> RoomClient<S> {
    /// Create a fresh room under a random code and join it as moderator.
    pub async fn create(
        store: Arc<S>,
        config: ClientConfig,
        device: Arc<std::sync::Mutex<DeviceStore>>,
        name: &str,
    ) -> Result<Self> {
        Self::start(store, config, device, RoomCode::random(), name, true).await
    }

    /// Join an existing room. A missing room surfaces as `RoomNotFound`;
    /// the caller offers retry/create actions instead of silently
    /// creating one.
    pub async fn join(
        store: Arc<S>,
        config: ClientConfig,
        device: Arc<std::sync::Mutex<DeviceStore>>,
        code: RoomCode,
        name: &str,
    ) -> Result<Self> {
        Self::start(store, config, device, code, name, false).await
    }

    async fn start(
        store: Arc<S>,
        config: ClientConfig,
        device: Arc<std::sync::Mutex<DeviceStore>>,
        code: RoomCode,
        name: &str,
        create: bool,
    ) -> Result<Self> {
        let identity = DeviceIdentity::new(device.clone()).ensure_identity()?;
        let session_token = identity::session_token();
        let retry = RetryPolicy::from_config(&config);
        let ops = Arc::new(RoomOps::new(store.clone(), code.clone(), retry));

        if create {
            ops.create(identity.participant_id).await?;
            info!(code = %code, "room created");
        } else {
            ops.attach(identity.participant_id).await?;
            debug!(code = %code, "attached to room");
        }

        let req = JoinRequest {
            me: identity.participant_id,
            client_id: identity.client_id,
            name: name.to_string(),
            session: session_token.clone(),
            now: Utc::now(),
            stale_window: config.stale_window(),
        };
        reconcile_join(&store, &code, retry, &req).await?;

        // An explicit join lifts the explicit-leave suppression
        device.lock().unwrap().clear_left(&code)?;

        let mut tracker = PresenceTracker::new(
            store.clone(),
            code.clone(),
            identity.participant_id,
            config.heartbeat_period(),
        );
        tracker.start().await?;
        let tracker = Arc::new(AsyncMutex::new(tracker));

        let shared = Arc::new(RwLock::new(SharedState {
            view: None,
            local_online: true,
            departed: false,
        }));
        let (event_tx, events) = mpsc::channel(64);

        let rx = store.watch(&paths::room(&code)).await?;
        let watch_task = tokio::spawn(watch_loop(WatchLoop {
            store: store.clone(),
            ops: ops.clone(),
            code: code.clone(),
            identity,
            session_token: session_token.clone(),
            name: name.to_string(),
            device: device.clone(),
            shared: shared.clone(),
            tracker: tracker.clone(),
            tx: event_tx.clone(),
            config: config.clone(),
            retry,
        }, rx));

        Ok(Self {
            ops,
            identity,
            device,
            shared,
            tracker,
            events,
            event_tx,
            watch_task: Some(watch_task),
        })
    }

    pub fn code(&self) -> &RoomCode {
        self.ops.code()
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Receive the next session event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// The latest rendered view.
    pub async fn view(&self) -> Option<RoomView> {
        self.shared.read().await.view.clone()
    }

    /// Feed the local connectivity signal (e.g. browser online/offline
    /// events). The client knows it is offline immediately, before any
    /// heartbeat gap would show it to others.
    pub async fn set_connectivity(&self, online: bool) {
        let changed = {
            let mut shared = self.shared.write().await;
            let changed = shared.local_online != online;
            shared.local_online = online;
            changed
        };
        if changed {
            let _ = self
                .event_tx
                .send(SessionEvent::ConnectivityChanged(online))
                .await;
        }
    }

    async fn ensure_active(&self) -> Result<()> {
        let shared = self.shared.read().await;
        if shared.departed {
            return Err(Error::NotJoined);
        }
        if !shared.local_online {
            return Err(Error::Offline);
        }
        Ok(())
    }

    /// Cast or retract a vote. Also a liveness proof: the deferred
    /// disconnect registration is cancelled and re-issued fresh.
    pub async fn cast_vote(&self, card: Option<&str>) -> Result<()> {
        self.ensure_active().await?;
        self.ops
            .cast_vote(self.identity.participant_id, card)
            .await?;
        self.tracker.lock().await.refresh_registration().await?;
        Ok(())
    }

    /// Reveal the votes (moderator only).
    pub async fn reveal(&self) -> Result<()> {
        self.ensure_active().await?;
        self.ops.reveal(self.identity.participant_id).await
    }

    /// Start a new round (moderator only).
    pub async fn reset(&self) -> Result<()> {
        self.ensure_active().await?;
        self.ops.reset(self.identity.participant_id).await
    }

    /// Update the story label.
    pub async fn set_story(&self, text: &str) -> Result<()> {
        self.ops.set_story(text).await
    }

    /// Edit this client's display name.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.ensure_active().await?;
        self.ops.set_name(self.identity.participant_id, name).await
    }

    /// Flag another participant for removal (moderator only).
    pub async fn kick(&self, target: deckroom_core::ParticipantId) -> Result<()> {
        self.ensure_active().await?;
        self.ops.kick(self.identity.participant_id, target).await
    }

    /// Explicit leave.
    ///
    /// The moderator removes the whole room; everyone else removes their
    /// own record with verification and records the local suppression
    /// flag so auto-rejoin stays quiet until a manual rejoin.
    pub async fn leave(&mut self) -> Result<LeaveOutcome> {
        let me = self.identity.participant_id;
        // Re-read rather than trusting the cached view
        let is_owner = self
            .ops
            .read_room()
            .await
            .ok()
            .flatten()
            .map(|room| room.owner == Some(me))
            .unwrap_or(false);

        self.shared.write().await.departed = true;
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
        self.tracker.lock().await.stop().await;

        let outcome = if is_owner {
            self.ops.remove_room().await?;
            LeaveOutcome { removed: true }
        } else {
            let outcome = self.ops.explicit_leave(me).await?;
            self.device
                .lock()
                .unwrap()
                .mark_left(self.ops.code(), Utc::now())?;
            outcome
        };
        info!(code = %self.ops.code(), removed = outcome.removed, "left room");
        Ok(outcome)
    }
}

impl<S: SyncStore> Drop for RoomClient<S> {
    fn drop(&mut self) {
        if let Some(task) = self.watch_task.take() {
            task.abort();
        }
    }
}

struct WatchLoop<S: SyncStore> {
    store: Arc<S>,
    ops: Arc<RoomOps<S>>,
    code: RoomCode,
    identity: Identity,
    session_token: String,
    name: String,
    device: Arc<std::sync::Mutex<DeviceStore>>,
    shared: Arc<RwLock<SharedState>>,
    tracker: Arc<AsyncMutex<PresenceTracker<S>>>,
    tx: mpsc::Sender<SessionEvent>,
    config: ClientConfig,
    retry: RetryPolicy,
}

async fn watch_loop<S: SyncStore>(
    ctx: WatchLoop<S>,
    mut rx: mpsc::UnboundedReceiver<Snapshot>,
) {
    while let Some(snapshot) = rx.recv().await {
        let doc: Option<Room> = snapshot
            .value
            .and_then(|value| serde_json::from_value(value).ok());

        let (prior, local_online, departed) = {
            let shared = ctx.shared.read().await;
            (shared.view.clone(), shared.local_online, shared.departed)
        };
        if departed {
            break;
        }

        let view_ctx = ViewContext {
            me: ctx.identity.participant_id,
            now: Utc::now(),
            local_online,
            offline_after: ctx.config.offline_after(),
        };
        let reduction = reduce(prior.as_ref(), doc.as_ref(), &view_ctx);

        ctx.shared.write().await.view = reduction.view.clone();

        let mut ended = false;
        for event in &reduction.events {
            match event {
                ViewEvent::ResetReplay => {
                    let _ = ctx.tx.send(SessionEvent::ResetReplay).await;
                }
                ViewEvent::KickRequested => {
                    handle_kick(&ctx).await;
                    ended = true;
                }
                ViewEvent::RoomTerminated => {
                    debug!(code = %ctx.code, "room terminated");
                    ctx.tracker.lock().await.stop().await;
                    ctx.shared.write().await.departed = true;
                    let _ = ctx.tx.send(SessionEvent::RoomTerminated).await;
                    ended = true;
                }
                ViewEvent::RecordMissing => {
                    handle_record_missing(&ctx).await;
                }
            }
            if ended {
                break;
            }
        }
        if ended {
            break;
        }

        if let Some(view) = reduction.view {
            let _ = ctx.tx.send(SessionEvent::ViewChanged(view)).await;
        }
    }
}

/// Self-moderation: remove own record and flag upon seeing the kick.
async fn handle_kick<S: SyncStore>(ctx: &WatchLoop<S>) {
    let me = ctx.identity.participant_id;
    info!(code = %ctx.code, "kicked; removing own record");
    ctx.tracker.lock().await.stop().await;
    if let Err(e) = ctx.ops.remove_participant(me).await {
        warn!(error = %e, "failed to remove own record after kick");
        let _ = ctx
            .tx
            .send(SessionEvent::StoreTrouble(format!(
                "removal after kick failed: {e}"
            )))
            .await;
    }
    if let Err(e) = ctx.ops.clear_kick(me).await {
        warn!(error = %e, "failed to clear kick flag");
    }
    ctx.shared.write().await.departed = true;
    let _ = ctx.tx.send(SessionEvent::Kicked).await;
}

/// Auto-rejoin: recreate our record unless this device explicitly left.
async fn handle_record_missing<S: SyncStore>(ctx: &WatchLoop<S>) {
    let suppressed = match ctx.device.lock().unwrap().has_left(&ctx.code) {
        Ok(flag) => flag,
        Err(e) => {
            warn!(error = %e, "device store unreadable, skipping auto-rejoin");
            true
        }
    };
    if suppressed {
        debug!(code = %ctx.code, "record missing but leave flag set; staying out");
        return;
    }

    info!(code = %ctx.code, "own record missing, auto-rejoining");
    let req = JoinRequest {
        me: ctx.identity.participant_id,
        client_id: ctx.identity.client_id,
        name: ctx.name.clone(),
        session: ctx.session_token.clone(),
        now: Utc::now(),
        stale_window: ctx.config.stale_window(),
    };
    match reconcile_join(&ctx.store, &ctx.code, ctx.retry, &req).await {
        Ok(_) => {
            if let Err(e) = ctx.tracker.lock().await.refresh_registration().await {
                warn!(error = %e, "failed to refresh disconnect marker after rejoin");
            }
        }
        Err(e) => {
            warn!(error = %e, "auto-rejoin failed");
            let _ = ctx
                .tx
                .send(SessionEvent::StoreTrouble(format!("rejoin failed: {e}")))
                .await;
        }
    }
}
