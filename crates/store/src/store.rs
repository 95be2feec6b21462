//! The synchronized document store interface
//!
//! Clients coordinate exclusively through these primitives; there is no
//! server process arbitrating order. Plain writes are last-writer-wins;
//! `transact` is an optimistic check-and-set scoped to one subtree. No
//! cross-path atomicity exists, which is why independent fields are
//! written through narrow child paths.

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::path::StorePath;

/// One observed state of a watched path.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Distinguishes "path absent" from "present but null".
    pub exists: bool,
    pub value: Option<Value>,
}

/// Decision returned by a transaction updater.
pub enum TxnOp {
    /// Commit this value at the path.
    Update(Value),
    /// Commit removal of the path.
    Remove,
    /// Leave the path untouched; the caller's intent is already satisfied.
    Abort,
}

/// Result of a transaction attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TxnOutcome {
    pub committed: bool,
    /// The value at the path after the attempt.
    pub value: Option<Value>,
}

/// Token for a registered deferred write. Cancellation is explicit;
/// cancelling an already-fired registration is a tolerated no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferredWrite(pub u64);

/// The store operations every backend provides.
///
/// Every operation is asynchronous and may fail or be delayed by network
/// conditions; callers re-read before deciding to skip an action.
pub trait SyncStore: Send + Sync + 'static {
    /// Read the value at a path, `None` when absent.
    fn read(&self, path: &StorePath) -> impl Future<Output = Result<Option<Value>>> + Send;

    /// Last-writer-wins write of a value at a path.
    fn write(&self, path: &StorePath, value: Value) -> impl Future<Output = Result<()>> + Send;

    /// Remove the subtree at a path.
    fn remove(&self, path: &StorePath) -> impl Future<Output = Result<()>> + Send;

    /// Subscribe to a path. The receiver fires once with the current
    /// snapshot, then on every overlapping change. Dropping the receiver
    /// unsubscribes.
    fn watch(
        &self,
        path: &StorePath,
    ) -> impl Future<Output = Result<mpsc::UnboundedReceiver<Snapshot>>> + Send;

    /// Optimistic check-and-set on one subtree. The updater sees the
    /// current value and decides; a commit only lands if the value did
    /// not change underneath, otherwise the updater runs again on the
    /// fresh value.
    fn transact<F>(
        &self,
        path: &StorePath,
        updater: F,
    ) -> impl Future<Output = Result<TxnOutcome>> + Send
    where
        F: FnMut(Option<&Value>) -> TxnOp + Send;

    /// Register a write the store itself performs if this client's
    /// connection is severed without a clean teardown.
    fn on_disconnect_write(
        &self,
        path: &StorePath,
        value: Value,
    ) -> impl Future<Output = Result<DeferredWrite>> + Send;

    /// Cancel a deferred write. Unknown or already-fired tokens are
    /// accepted silently.
    fn cancel_deferred(&self, token: DeferredWrite) -> impl Future<Output = Result<()>> + Send;
}
