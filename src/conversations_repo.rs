use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::schema::conversations;
use crate::web::PgPool;

/// One WhatsApp message in a passenger conversation. The conversational
/// assistant that answers these lives outside this service; we only keep
/// the transcript.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable, Serialize)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConversationMessage {
    pub id: Uuid,
    pub trip_id: Option<Uuid>,
    pub whatsapp: String,
    pub direction: String,
    pub body: String,
    pub message_sid: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = conversations)]
struct NewConversationMessage {
    trip_id: Option<Uuid>,
    whatsapp: String,
    direction: String,
    body: String,
    message_sid: Option<String>,
}

#[derive(Clone)]
pub struct ConversationsRepository {
    pool: PgPool,
}

impl ConversationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record an inbound passenger message, linking it to the sender's most
    /// recent trip when one exists.
    pub async fn record_inbound(
        &self,
        from_whatsapp: &str,
        message_body: &str,
        sid: Option<&str>,
    ) -> Result<ConversationMessage> {
        use crate::schema::{conversations, trips};

        let pool = self.pool.clone();
        let from_whatsapp = from_whatsapp.to_string();
        let message_body = message_body.to_string();
        let sid = sid.map(str::to_string);

        let row = tokio::task::spawn_blocking(move || -> Result<ConversationMessage> {
            let mut conn = pool.get()?;

            let matching_trip: Option<Uuid> = trips::table
                .filter(trips::whatsapp.eq(&from_whatsapp))
                .order(trips::departure_date.desc())
                .select(trips::id)
                .first(&mut conn)
                .optional()?;

            let row = diesel::insert_into(conversations::table)
                .values(&NewConversationMessage {
                    trip_id: matching_trip,
                    whatsapp: from_whatsapp,
                    direction: "inbound".to_string(),
                    body: message_body,
                    message_sid: sid,
                })
                .returning(ConversationMessage::as_returning())
                .get_result(&mut conn)?;
            Ok(row)
        })
        .await??;

        debug!("Recorded inbound message {} from {}", row.id, row.whatsapp);
        Ok(row)
    }
}
