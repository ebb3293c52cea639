use rusqlite::Connection;

/// SQL schema for collaborator and snapshot tables
const SCHEMA: &str = r#"
-- Collaborators (one access token per identity entity)
CREATE TABLE IF NOT EXISTS collaborators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT UNIQUE NOT NULL,
    model_type TEXT NOT NULL,
    model_id INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_collaborators_model ON collaborators(model_type, model_id);

-- Per-collaborator document snapshots (opaque CRDT state)
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collaborator_id INTEGER NOT NULL REFERENCES collaborators(id) ON DELETE CASCADE,
    model_type TEXT NOT NULL,
    model_id INTEGER NOT NULL,
    data BLOB,
    connected INTEGER NOT NULL DEFAULT 0,
    connected_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (collaborator_id, model_type, model_id)
);

CREATE INDEX IF NOT EXISTS idx_documents_model ON documents(model_type, model_id);
"#;

/// Initialize the database with the gateway schema
pub fn init_database(conn: &Connection) -> Result<(), rusqlite::Error> {
    // Snapshots cascade with their collaborator.
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
