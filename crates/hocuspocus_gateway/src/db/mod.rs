mod repo;
mod schema;

pub use repo::{CollabRepo, CollaboratorInfo, SnapshotInfo, generate_token};
pub use schema::init_database;
