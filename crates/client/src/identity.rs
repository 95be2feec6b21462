//! Anonymous identity issuance
//!
//! The provider hands every device a stable anonymous identity on
//! demand. The identity token may be reissued across reloads; the
//! client id never changes, which is what lets the reconciler recognize
//! the same human across identity churn.

use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use tracing::debug;

use deckroom_core::{ClientId, ParticipantId};

use crate::device::DeviceStore;
use crate::error::Result;

/// The identity pair a session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub participant_id: ParticipantId,
    pub client_id: ClientId,
}

/// Issues a stable anonymous identity per device.
///
/// Repeated calls return the same pair until the provider itself resets
/// the identity token.
pub trait IdentityProvider {
    fn ensure_identity(&self) -> Result<Identity>;
}

/// Device-store-backed provider: issue once, persist, return forever.
pub struct DeviceIdentity {
    device: Arc<Mutex<DeviceStore>>,
}

impl DeviceIdentity {
    pub fn new(device: Arc<Mutex<DeviceStore>>) -> Self {
        Self { device }
    }
}

impl IdentityProvider for DeviceIdentity {
    fn ensure_identity(&self) -> Result<Identity> {
        let device = self.device.lock().unwrap();
        if let Some((participant_id, client_id)) = device.identity()? {
            return Ok(Identity {
                participant_id,
                client_id,
            });
        }
        let identity = Identity {
            participant_id: ParticipantId::new(),
            client_id: ClientId::new(),
        };
        device.save_identity(identity.participant_id, identity.client_id)?;
        debug!(participant = %identity.participant_id, "issued fresh device identity");
        Ok(identity)
    }
}

/// A fresh random session token, base64-encoded.
///
/// Tags this session's presence record so disconnect markers from older
/// sessions can be told apart from this one's.
pub fn session_token() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_identity_is_stable() {
        let device = Arc::new(Mutex::new(DeviceStore::open_in_memory().unwrap()));
        let provider = DeviceIdentity::new(device);
        let first = provider.ensure_identity().unwrap();
        let second = provider.ensure_identity().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_reissue_changes_identity_not_client() {
        let device = Arc::new(Mutex::new(DeviceStore::open_in_memory().unwrap()));
        let provider = DeviceIdentity::new(device.clone());
        let first = provider.ensure_identity().unwrap();

        device.lock().unwrap().reissue_identity().unwrap();

        let second = provider.ensure_identity().unwrap();
        assert_ne!(first.participant_id, second.participant_id);
        assert_eq!(first.client_id, second.client_id);
    }

    #[test]
    fn test_session_tokens_unique() {
        let a = session_token();
        let b = session_token();
        assert_ne!(a, b);
        assert!(!a.is_empty());
    }
}
