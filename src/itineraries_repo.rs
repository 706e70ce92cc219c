use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::itineraries::{ItineraryRow, NewItinerary};
use crate::web::PgPool;

#[derive(Clone)]
pub struct ItinerariesRepository {
    pool: PgPool,
}

impl ItinerariesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn latest(&self, for_trip_id: Uuid) -> Result<Option<ItineraryRow>> {
        use crate::schema::itineraries::dsl::*;

        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<ItineraryRow>> {
            let mut conn = pool.get()?;
            let row = itineraries
                .filter(trip_id.eq(for_trip_id))
                .order(version.desc())
                .select(ItineraryRow::as_select())
                .first(&mut conn)
                .optional()?;
            Ok(row)
        })
        .await??;
        Ok(row)
    }

    /// Insert the next draft version for a trip.
    pub async fn create_draft(
        &self,
        for_trip_id: Uuid,
        parsed: serde_json::Value,
        raw_prompt: Option<String>,
        raw_response: Option<String>,
    ) -> Result<ItineraryRow> {
        use crate::schema::itineraries::dsl::{itineraries, trip_id, version};

        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<ItineraryRow> {
            let mut conn = pool.get()?;

            let current_max: Option<i32> = itineraries
                .filter(trip_id.eq(for_trip_id))
                .select(diesel::dsl::max(version))
                .first(&mut conn)?;

            let new_row = NewItinerary {
                trip_id: for_trip_id,
                version: current_max.unwrap_or(0) + 1,
                status: "draft".to_string(),
                parsed_itinerary: parsed,
                raw_prompt,
                raw_response,
                generated_at: Some(Utc::now()),
            };

            let row = diesel::insert_into(itineraries)
                .values(&new_row)
                .returning(ItineraryRow::as_returning())
                .get_result(&mut conn)?;
            Ok(row)
        })
        .await??;

        info!(
            "Created itinerary draft v{} for trip {}",
            row.version, row.trip_id
        );
        metrics::counter!("itineraries.drafts_created").increment(1);
        Ok(row)
    }
}
