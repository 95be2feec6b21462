//! Local per-device storage
//!
//! Holds what must survive reloads on this device: the anonymous
//! identity pair (participant id + stable client id) and the per-room
//! explicit-leave flags that suppress auto-rejoin.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::instrument;
use uuid::Uuid;

use deckroom_core::{ClientId, ParticipantId, RoomCode};

use crate::error::{Error, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS device_identity (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    participant_id TEXT NOT NULL,
    client_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS left_rooms (
    room_code TEXT PRIMARY KEY,
    left_at TEXT NOT NULL
);
";

/// SQLite-backed device state.
pub struct DeviceStore {
    conn: Connection,
}

impl DeviceStore {
    /// Open or create the device database at the given path.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Open in-memory (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Default on-disk location for the device database.
    pub fn default_path() -> Result<std::path::PathBuf> {
        let dirs = directories::ProjectDirs::from("dev", "deckroom", "deckroom")
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "Could not determine data directory",
                ))
            })?;
        Ok(dirs.data_dir().join("device.db"))
    }

    /// The stored identity pair, if one was ever issued.
    pub fn identity(&self) -> Result<Option<(ParticipantId, ClientId)>> {
        let result = self.conn.query_row(
            "SELECT participant_id, client_id FROM device_identity WHERE slot = 1",
            [],
            |row| {
                let participant: String = row.get(0)?;
                let client: String = row.get(1)?;
                Ok((participant, client))
            },
        );
        match result {
            Ok((participant, client)) => {
                let participant = Uuid::parse_str(&participant)
                    .map(ParticipantId)
                    .unwrap_or_default();
                let client = Uuid::parse_str(&client).map(ClientId).unwrap_or_default();
                Ok(Some((participant, client)))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Store (or replace) the identity pair.
    pub fn save_identity(&self, participant: ParticipantId, client: ClientId) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO device_identity (slot, participant_id, client_id, created_at)
             VALUES (1, ?1, ?2, ?3)",
            params![
                participant.to_string(),
                client.to_string(),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Reissue the anonymous identity, keeping the stable client id.
    /// Mirrors what the identity provider may do across reloads.
    pub fn reissue_identity(&self) -> Result<Option<ParticipantId>> {
        let Some((_, client)) = self.identity()? else {
            return Ok(None);
        };
        let fresh = ParticipantId::new();
        self.save_identity(fresh, client)?;
        Ok(Some(fresh))
    }

    /// Record an explicit leave for a room on this device.
    pub fn mark_left(&self, code: &RoomCode, left_at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO left_rooms (room_code, left_at) VALUES (?1, ?2)",
            params![code.as_str(), left_at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Clear the flag after an explicit (manual) rejoin.
    pub fn clear_left(&self, code: &RoomCode) -> Result<()> {
        self.conn.execute(
            "DELETE FROM left_rooms WHERE room_code = ?1",
            params![code.as_str()],
        )?;
        Ok(())
    }

    /// True when auto-rejoin is suppressed for this room on this device.
    pub fn has_left(&self, code: &RoomCode) -> Result<bool> {
        let mut stmt = self
            .conn
            .prepare("SELECT 1 FROM left_rooms WHERE room_code = ?1")?;
        Ok(stmt.exists(params![code.as_str()])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> RoomCode {
        "AB3F9K".parse().unwrap()
    }

    #[test]
    fn test_identity_roundtrip() {
        let store = DeviceStore::open_in_memory().unwrap();
        assert!(store.identity().unwrap().is_none());

        let participant = ParticipantId::new();
        let client = ClientId::new();
        store.save_identity(participant, client).unwrap();

        let (p, c) = store.identity().unwrap().unwrap();
        assert_eq!(p, participant);
        assert_eq!(c, client);
    }

    #[test]
    fn test_reissue_keeps_client_id() {
        let store = DeviceStore::open_in_memory().unwrap();
        let participant = ParticipantId::new();
        let client = ClientId::new();
        store.save_identity(participant, client).unwrap();

        let fresh = store.reissue_identity().unwrap().unwrap();
        assert_ne!(fresh, participant);
        let (p, c) = store.identity().unwrap().unwrap();
        assert_eq!(p, fresh);
        assert_eq!(c, client);
    }

    #[test]
    fn test_left_flag_lifecycle() {
        let store = DeviceStore::open_in_memory().unwrap();
        assert!(!store.has_left(&code()).unwrap());

        store.mark_left(&code(), Utc::now()).unwrap();
        assert!(store.has_left(&code()).unwrap());

        store.clear_left(&code()).unwrap();
        assert!(!store.has_left(&code()).unwrap());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.db");
        {
            let store = DeviceStore::open(&path).unwrap();
            store
                .save_identity(ParticipantId::new(), ClientId::new())
                .unwrap();
        }
        let store = DeviceStore::open(&path).unwrap();
        assert!(store.identity().unwrap().is_some());
    }
}
