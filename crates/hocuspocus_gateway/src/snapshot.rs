//! Per-(collaborator, document) binary snapshot store.

use std::sync::Arc;
use tracing::{debug, error};

use crate::db::{CollabRepo, SnapshotInfo};
use crate::models::DocumentRef;

/// Get-or-create and update semantics on top of [`CollabRepo`].
///
/// Payloads are opaque CRDT state; nothing here looks inside them.
#[derive(Clone)]
pub struct SnapshotStore {
    repo: Arc<CollabRepo>,
}

impl SnapshotStore {
    pub fn new(repo: Arc<CollabRepo>) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &Arc<CollabRepo> {
        &self.repo
    }

    /// Return the snapshot, creating it (seeded from any other collaborator's
    /// payload for the same document) when it does not exist.
    pub fn get_or_create(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
    ) -> Result<SnapshotInfo, rusqlite::Error> {
        self.repo.get_or_create_snapshot(collaborator_id, document)
    }

    /// Overwrite the payload of an existing snapshot.
    ///
    /// Returns `false` when no snapshot exists for the pair.
    pub fn update_data(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
        payload: &[u8],
    ) -> Result<bool, rusqlite::Error> {
        let updated = self
            .repo
            .update_snapshot_data(collaborator_id, document, payload)?;
        if updated == 0 {
            debug!(
                "No snapshot for collaborator {} on {}, payload dropped",
                collaborator_id, document
            );
        }
        Ok(updated > 0)
    }

    /// Record a connect or disconnect. The payload is never touched.
    pub fn mark_connected(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
        connected: bool,
    ) -> Result<(), rusqlite::Error> {
        self.get_or_create(collaborator_id, document)?;
        self.repo
            .set_snapshot_connected(collaborator_id, document, connected)?;
        Ok(())
    }

    /// Current payload for the pair, creating the snapshot if needed.
    pub fn fetch_payload(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
    ) -> Result<Vec<u8>, rusqlite::Error> {
        let snapshot = self.get_or_create(collaborator_id, document)?;
        Ok(self.read_payload(&snapshot))
    }

    /// Read the stored payload. A failed read is logged and reported as empty.
    pub fn read_payload(&self, snapshot: &SnapshotInfo) -> Vec<u8> {
        match self.repo.read_snapshot_data(snapshot.id) {
            Ok(data) => data.unwrap_or_default(),
            Err(e) => {
                error!(
                    "Failed to read snapshot {} for collaborator {} on {}: {}",
                    snapshot.id,
                    snapshot.collaborator_id,
                    snapshot.document(),
                    e
                );
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use rusqlite::Connection;

    fn setup() -> (SnapshotStore, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        let repo = Arc::new(CollabRepo::new(conn));
        let alice = repo.create_collaborator("User", 1).unwrap().id;
        let bob = repo.create_collaborator("User", 2).unwrap().id;
        (SnapshotStore::new(repo), alice, bob)
    }

    fn doc() -> DocumentRef {
        DocumentRef::new("App\\Models\\TextDocument", 1)
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let (store, alice, _) = setup();
        let first = store.get_or_create(alice, &doc()).unwrap();
        let second = store.get_or_create(alice, &doc()).unwrap();
        assert_eq!(first.id, second.id);
        assert!(first.connected);
        assert!(first.connected_at.is_some());
        assert_eq!(store.repo().list_document_snapshots(&doc()).unwrap().len(), 1);
    }

    #[test]
    fn test_new_snapshot_is_seeded_from_other_collaborator() {
        let (store, alice, bob) = setup();
        store.get_or_create(alice, &doc()).unwrap();
        assert!(store.update_data(alice, &doc(), &[9, 8, 7]).unwrap());

        assert_eq!(store.fetch_payload(bob, &doc()).unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn test_update_without_snapshot_is_noop() {
        let (store, alice, _) = setup();
        assert!(!store.update_data(alice, &doc(), &[1]).unwrap());
        assert!(store.repo().get_snapshot(alice, &doc()).unwrap().is_none());
    }

    #[test]
    fn test_payload_round_trips_exactly() {
        let (store, alice, _) = setup();
        store.get_or_create(alice, &doc()).unwrap();
        store.update_data(alice, &doc(), &[0, 1, 255, 128]).unwrap();
        assert_eq!(store.fetch_payload(alice, &doc()).unwrap(), vec![0, 1, 255, 128]);
    }

    #[test]
    fn test_fetch_without_payload_is_empty() {
        let (store, alice, _) = setup();
        assert!(store.fetch_payload(alice, &doc()).unwrap().is_empty());
    }

    #[test]
    fn test_unreadable_payload_degrades_to_empty() {
        let (store, alice, _) = setup();
        let snapshot = store.get_or_create(alice, &doc()).unwrap();
        store.update_data(alice, &doc(), &[1, 2, 3]).unwrap();
        assert_eq!(store.read_payload(&snapshot), vec![1, 2, 3]);

        // An INTEGER in the data column cannot be opened as a blob.
        store
            .repo()
            .conn()
            .execute("UPDATE documents SET data = 42 WHERE id = ?", [snapshot.id])
            .unwrap();
        assert!(store.read_payload(&snapshot).is_empty());
    }

    #[test]
    fn test_disconnect_keeps_payload() {
        let (store, alice, _) = setup();
        store.mark_connected(alice, &doc(), true).unwrap();
        store.update_data(alice, &doc(), &[4, 2]).unwrap();
        store.mark_connected(alice, &doc(), false).unwrap();

        let snapshot = store.repo().get_snapshot(alice, &doc()).unwrap().unwrap();
        assert!(!snapshot.connected);
        assert_eq!(snapshot.data, Some(vec![4, 2]));
    }
}
