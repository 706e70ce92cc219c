use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::documents;

/// A document attached to a trip (boarding pass, hotel voucher, insurance),
/// kept with a full audit trail of who uploaded it.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = documents)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Document {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub document_type: String,
    pub file_url: String,
    pub file_name: Option<String>,
    pub uploaded_by: String,
    pub uploaded_by_type: String,
    pub agency_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable, Deserialize)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub trip_id: Uuid,
    pub document_type: String,
    pub file_url: String,
    pub file_name: Option<String>,
    pub uploaded_by: String,
    pub uploaded_by_type: String,
    pub agency_id: Option<Uuid>,
    pub metadata: Option<serde_json::Value>,
}
