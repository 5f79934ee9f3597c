//! User-defined metadata stored alongside an object.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One key-value pair attached to an object (`uploadedBy`, `uploadedAt`, ...).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MetadataEntry {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Reference to the associated object.
    pub object_id: Uuid,

    /// Metadata key.
    pub key: String,

    /// Metadata value as plain text.
    pub value: String,
}
