//! SeaORM entity model for the `sessions` table.
//!
//! Timestamps are stored as RFC3339 text and the request/stats payloads as
//! JSON blobs, keeping the schema portable across SQLite deployments.

use sea_orm::entity::prelude::*;

/// Sessions table entity model.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sessions")]
pub struct Model {
    /// Session UUID as string primary key
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Content fingerprint (lowercase hex), indexed for dedup lookups
    pub content_hash: String,
    /// Selected provider id
    pub provider_id: String,
    /// Session status as lowercase string
    pub status: String,
    /// Progress percentage in [0, 100]
    pub progress_percent: f64,
    /// RFC3339 creation timestamp
    pub created_at: String,
    /// Optional RFC3339 start timestamp
    pub started_at: Option<String>,
    /// Optional RFC3339 end timestamp
    pub ended_at: Option<String>,
    /// Workspace directory path
    pub directory_path: String,
    /// Optional terminal diagnostic
    pub error_message: Option<String>,
    /// JSON-serialized TranscodeRequest
    pub request: String,
    /// JSON-serialized SessionStats
    pub stats: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
