use chrono::{DateTime, Utc};
use rand::RngCore;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, DatabaseName, OptionalExtension, Row, params};
use serde_json::{Map, Number, Value};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::DocumentRef;

/// Collaborator record (token owner)
#[derive(Debug, Clone, PartialEq)]
pub struct CollaboratorInfo {
    pub id: i64,
    pub token: String,
    pub model_type: String,
    pub model_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One collaborator's stored state for one document
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInfo {
    pub id: i64,
    pub collaborator_id: i64,
    pub model_type: String,
    pub model_id: i64,
    pub data: Option<Vec<u8>>,
    pub connected: bool,
    pub connected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SnapshotInfo {
    pub fn document(&self) -> DocumentRef {
        DocumentRef::new(self.model_type.clone(), self.model_id)
    }
}

const SNAPSHOT_COLUMNS: &str =
    "id, collaborator_id, model_type, model_id, data, connected, connected_at, created_at, updated_at";

const COLLABORATOR_COLUMNS: &str = "id, token, model_type, model_id, created_at, updated_at";

/// Generate a 256-bit access token, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Repository for collaborators and their document snapshots
#[derive(Clone)]
pub struct CollabRepo {
    conn: Arc<Mutex<Connection>>,
}

impl CollabRepo {
    /// Create a new CollabRepo with the given connection
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ===== Collaborator operations =====

    /// Issue a new token for the given identity entity
    pub fn create_collaborator(
        &self,
        model_type: &str,
        model_id: i64,
    ) -> Result<CollaboratorInfo, rusqlite::Error> {
        let conn = self.conn();
        let token = generate_token();
        let now = Utc::now().timestamp();

        conn.execute(
            "INSERT INTO collaborators (token, model_type, model_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![token, model_type, model_id, now, now],
        )?;
        let id = conn.last_insert_rowid();

        conn.query_row(
            &format!("SELECT {COLLABORATOR_COLUMNS} FROM collaborators WHERE id = ?"),
            [id],
            collaborator_from_row,
        )
    }

    /// Get the collaborator owning a token
    pub fn get_collaborator_by_token(
        &self,
        token: &str,
    ) -> Result<Option<CollaboratorInfo>, rusqlite::Error> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {COLLABORATOR_COLUMNS} FROM collaborators WHERE token = ?"),
            [token],
            collaborator_from_row,
        )
        .optional()
    }

    /// Delete a collaborator (snapshots cascade)
    pub fn delete_collaborator(&self, id: i64) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM collaborators WHERE id = ?", [id])?;
        Ok(deleted > 0)
    }

    /// Delete the collaborator owning a token (snapshots cascade)
    pub fn delete_collaborator_by_token(&self, token: &str) -> Result<bool, rusqlite::Error> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM collaborators WHERE token = ?", [token])?;
        Ok(deleted > 0)
    }

    // ===== Snapshot operations =====

    pub fn get_snapshot(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
    ) -> Result<Option<SnapshotInfo>, rusqlite::Error> {
        let conn = self.conn();
        select_snapshot(&conn, collaborator_id, document)
    }

    /// Get or create the snapshot for a (collaborator, document) pair.
    ///
    /// A new snapshot starts connected and takes its payload from any other
    /// collaborator's non-null payload for the same document. The insert is
    /// a single `ON CONFLICT DO NOTHING` statement, so concurrent callers
    /// converge on one row and an existing row is never re-seeded.
    pub fn get_or_create_snapshot(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
    ) -> Result<SnapshotInfo, rusqlite::Error> {
        let conn = self.conn();

        if let Some(snapshot) = select_snapshot(&conn, collaborator_id, document)? {
            return Ok(snapshot);
        }

        let now = Utc::now().timestamp();
        conn.execute(
            "INSERT INTO documents
             (collaborator_id, model_type, model_id, data, connected, connected_at, created_at, updated_at)
             VALUES (?1, ?2, ?3,
                     (SELECT data FROM documents
                      WHERE model_type = ?2 AND model_id = ?3 AND data IS NOT NULL
                      LIMIT 1),
                     1, ?4, ?4, ?4)
             ON CONFLICT(collaborator_id, model_type, model_id) DO NOTHING",
            params![collaborator_id, document.model_type, document.model_id, now],
        )?;

        select_snapshot(&conn, collaborator_id, document)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    /// Overwrite the snapshot payload. Returns the number of rows touched;
    /// zero when the snapshot does not exist yet.
    pub fn update_snapshot_data(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
        data: &[u8],
    ) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let now = Utc::now().timestamp();
        conn.execute(
            "UPDATE documents SET data = ?, updated_at = ?
             WHERE collaborator_id = ? AND model_type = ? AND model_id = ?",
            params![
                data,
                now,
                collaborator_id,
                document.model_type,
                document.model_id
            ],
        )
    }

    /// Set the connected flag; connecting also stamps `connected_at`.
    pub fn set_snapshot_connected(
        &self,
        collaborator_id: i64,
        document: &DocumentRef,
        connected: bool,
    ) -> Result<usize, rusqlite::Error> {
        let conn = self.conn();
        let now = Utc::now().timestamp();
        conn.execute(
            "UPDATE documents
             SET connected = ?1,
                 connected_at = CASE WHEN ?1 THEN ?2 ELSE connected_at END,
                 updated_at = ?2
             WHERE collaborator_id = ?3 AND model_type = ?4 AND model_id = ?5",
            params![
                connected,
                now,
                collaborator_id,
                document.model_type,
                document.model_id
            ],
        )
    }

    /// Read a snapshot payload through incremental BLOB I/O.
    pub fn read_snapshot_data(&self, snapshot_id: i64) -> Result<Option<Vec<u8>>, rusqlite::Error> {
        let conn = self.conn();
        let len: Option<i64> = conn
            .query_row(
                "SELECT length(data) FROM documents WHERE id = ?",
                [snapshot_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        let len = match len {
            None => return Ok(None),
            Some(0) => return Ok(Some(Vec::new())),
            Some(len) => len as usize,
        };

        let blob = conn.blob_open(DatabaseName::Main, "documents", "data", snapshot_id, true)?;
        let mut buf = vec![0u8; len];
        blob.read_at_exact(&mut buf, 0)?;
        Ok(Some(buf))
    }

    /// All snapshots of one logical document
    pub fn list_document_snapshots(
        &self,
        document: &DocumentRef,
    ) -> Result<Vec<SnapshotInfo>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM documents WHERE model_type = ? AND model_id = ? ORDER BY id"
        ))?;
        let rows = stmt
            .query_map(params![document.model_type, document.model_id], snapshot_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ===== Model rows =====

    /// Load a row by `id` from a model table as a JSON attribute map.
    ///
    /// `table` must already be validated as a plain identifier.
    pub fn load_row(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Option<Map<String, Value>>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT * FROM \"{table}\" WHERE id = ?"))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        stmt.query_row([id], |row| {
            let mut attributes = Map::new();
            for (idx, name) in columns.iter().enumerate() {
                attributes.insert(name.clone(), value_to_json(row.get_ref(idx)?));
            }
            Ok(attributes)
        })
        .optional()
    }
}

fn select_snapshot(
    conn: &Connection,
    collaborator_id: i64,
    document: &DocumentRef,
) -> Result<Option<SnapshotInfo>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM documents
             WHERE collaborator_id = ? AND model_type = ? AND model_id = ?"
        ),
        params![collaborator_id, document.model_type, document.model_id],
        snapshot_from_row,
    )
    .optional()
}

fn collaborator_from_row(row: &Row<'_>) -> Result<CollaboratorInfo, rusqlite::Error> {
    Ok(CollaboratorInfo {
        id: row.get(0)?,
        token: row.get(1)?,
        model_type: row.get(2)?,
        model_id: row.get(3)?,
        created_at: timestamp_to_datetime(row.get(4)?),
        updated_at: timestamp_to_datetime(row.get(5)?),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> Result<SnapshotInfo, rusqlite::Error> {
    Ok(SnapshotInfo {
        id: row.get(0)?,
        collaborator_id: row.get(1)?,
        model_type: row.get(2)?,
        model_id: row.get(3)?,
        data: row.get(4)?,
        connected: row.get(5)?,
        connected_at: row.get::<_, Option<i64>>(6)?.map(timestamp_to_datetime),
        created_at: timestamp_to_datetime(row.get(7)?),
        updated_at: timestamp_to_datetime(row.get(8)?),
    })
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::from(b.to_vec()),
    }
}

fn timestamp_to_datetime(timestamp: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(timestamp, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;

    fn setup_test_db() -> CollabRepo {
        let conn = Connection::open_in_memory().unwrap();
        init_database(&conn).unwrap();
        CollabRepo::new(conn)
    }

    fn doc(id: i64) -> DocumentRef {
        DocumentRef::new("App\\Models\\TextDocument", id)
    }

    #[test]
    fn test_generate_token_shape() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_collaborator_lookup_by_token() {
        let repo = setup_test_db();
        let created = repo.create_collaborator("App\\Models\\User", 1).unwrap();

        let found = repo
            .get_collaborator_by_token(&created.token)
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
        assert!(repo.get_collaborator_by_token("nope").unwrap().is_none());
    }

    #[test]
    fn test_get_or_create_is_idempotent() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();

        let first = repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        assert!(first.connected);
        assert!(first.connected_at.is_some());
        assert!(first.data.is_none());

        let second = repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.data, second.data);
        assert_eq!(repo.list_document_snapshots(&doc(7)).unwrap().len(), 1);
    }

    #[test]
    fn test_new_snapshot_is_seeded_from_other_collaborator() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        let bob = repo.create_collaborator("App\\Models\\User", 2).unwrap();

        repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        repo.update_snapshot_data(alice.id, &doc(7), &[1, 2, 3])
            .unwrap();

        let bobs = repo.get_or_create_snapshot(bob.id, &doc(7)).unwrap();
        assert_eq!(bobs.data, Some(vec![1, 2, 3]));

        // Other documents are not used as donors
        let other = repo.get_or_create_snapshot(bob.id, &doc(8)).unwrap();
        assert!(other.data.is_none());
    }

    #[test]
    fn test_existing_snapshot_is_not_reseeded() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        let bob = repo.create_collaborator("App\\Models\\User", 2).unwrap();

        repo.get_or_create_snapshot(bob.id, &doc(7)).unwrap();
        repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        repo.update_snapshot_data(alice.id, &doc(7), &[9]).unwrap();

        let bobs = repo.get_or_create_snapshot(bob.id, &doc(7)).unwrap();
        assert!(bobs.data.is_none());
    }

    #[test]
    fn test_update_without_snapshot_is_noop() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        let touched = repo.update_snapshot_data(alice.id, &doc(7), &[1]).unwrap();
        assert_eq!(touched, 0);
        assert!(repo.get_snapshot(alice.id, &doc(7)).unwrap().is_none());
    }

    #[test]
    fn test_binary_payload_with_nul_bytes() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        let snapshot = repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();

        let payload = vec![0, 1, 255, 128, 0, 0, 42];
        repo.update_snapshot_data(alice.id, &doc(7), &payload)
            .unwrap();

        assert_eq!(repo.read_snapshot_data(snapshot.id).unwrap(), Some(payload));
    }

    #[test]
    fn test_read_snapshot_data_null_and_empty() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        let snapshot = repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        assert_eq!(repo.read_snapshot_data(snapshot.id).unwrap(), None);

        repo.update_snapshot_data(alice.id, &doc(7), &[]).unwrap();
        assert_eq!(
            repo.read_snapshot_data(snapshot.id).unwrap(),
            Some(Vec::new())
        );
    }

    #[test]
    fn test_disconnect_keeps_payload() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        repo.update_snapshot_data(alice.id, &doc(7), &[5, 6]).unwrap();

        repo.set_snapshot_connected(alice.id, &doc(7), false)
            .unwrap();
        let snapshot = repo.get_snapshot(alice.id, &doc(7)).unwrap().unwrap();
        assert!(!snapshot.connected);
        assert!(snapshot.connected_at.is_some());
        assert_eq!(snapshot.data, Some(vec![5, 6]));
    }

    #[test]
    fn test_deleting_collaborator_cascades_snapshots() {
        let repo = setup_test_db();
        let alice = repo.create_collaborator("App\\Models\\User", 1).unwrap();
        repo.get_or_create_snapshot(alice.id, &doc(7)).unwrap();
        repo.get_or_create_snapshot(alice.id, &doc(8)).unwrap();

        assert!(repo.delete_collaborator(alice.id).unwrap());
        assert!(repo.list_document_snapshots(&doc(7)).unwrap().is_empty());
        assert!(repo.list_document_snapshots(&doc(8)).unwrap().is_empty());
        assert!(!repo.delete_collaborator(alice.id).unwrap());
    }

    #[test]
    fn test_load_row_maps_columns() {
        let repo = setup_test_db();
        {
            let conn = repo.conn();
            conn.execute_batch(
                "CREATE TABLE text_documents (id INTEGER PRIMARY KEY, title TEXT, score REAL, body TEXT);
                 INSERT INTO text_documents (id, title, score, body) VALUES (7, 'Notes', 1.5, NULL);",
            )
            .unwrap();
        }

        let row = repo.load_row("text_documents", 7).unwrap().unwrap();
        assert_eq!(
            Value::Object(row),
            serde_json::json!({"id": 7, "title": "Notes", "score": 1.5, "body": null})
        );
        assert!(repo.load_row("text_documents", 8).unwrap().is_none());
    }
}
