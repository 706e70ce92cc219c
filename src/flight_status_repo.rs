use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tracing::debug;
use uuid::Uuid;

use crate::flight_status::{FlightSnapshot, FlightStatusHistoryRow, NewFlightStatusHistoryRow};
use crate::web::PgPool;

#[derive(Clone)]
pub struct FlightStatusRepository {
    pool: PgPool,
}

impl FlightStatusRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one observed snapshot to the trip's history.
    ///
    /// `recorded_at` is clamped to the latest existing row so the per-trip
    /// ordering invariant holds even if the wall clock steps backwards.
    pub async fn append(
        &self,
        for_trip_id: Uuid,
        snapshot: &FlightSnapshot,
        observed_at: DateTime<Utc>,
    ) -> Result<Uuid> {
        use crate::schema::flight_status_history::dsl::*;

        let pool = self.pool.clone();
        let to_store = snapshot.clone();
        let inserted_id = tokio::task::spawn_blocking(move || -> Result<Uuid> {
            let mut conn = pool.get()?;

            let latest_recorded: Option<DateTime<Utc>> = flight_status_history
                .filter(trip_id.eq(for_trip_id))
                .select(diesel::dsl::max(recorded_at))
                .first(&mut conn)?;

            let effective_at = match latest_recorded {
                Some(latest) if latest > observed_at => latest,
                _ => observed_at,
            };

            let row = NewFlightStatusHistoryRow::from_snapshot(for_trip_id, effective_at, &to_store);
            let new_id: Uuid = diesel::insert_into(flight_status_history)
                .values(&row)
                .returning(id)
                .get_result(&mut conn)?;
            Ok(new_id)
        })
        .await??;

        debug!(
            "Appended flight status for trip {}: {} ({})",
            for_trip_id, snapshot.status, inserted_id
        );
        metrics::counter!("flight_status.history.appended").increment(1);
        Ok(inserted_id)
    }

    /// Latest observed snapshot for a trip, if any history exists.
    pub async fn latest(&self, for_trip_id: Uuid) -> Result<Option<FlightSnapshot>> {
        use crate::schema::flight_status_history::dsl::*;

        let pool = self.pool.clone();
        let row: Option<FlightStatusHistoryRow> =
            tokio::task::spawn_blocking(move || -> Result<Option<FlightStatusHistoryRow>> {
                let mut conn = pool.get()?;
                let row = flight_status_history
                    .filter(trip_id.eq(for_trip_id))
                    .order((recorded_at.desc(), id.desc()))
                    .select(FlightStatusHistoryRow::as_select())
                    .first(&mut conn)
                    .optional()?;
                Ok(row)
            })
            .await??;

        Ok(row.map(|r| r.to_snapshot()))
    }

    /// Full history for a trip, oldest first. Used by diagnostics endpoints.
    pub async fn history(&self, for_trip_id: Uuid) -> Result<Vec<FlightStatusHistoryRow>> {
        use crate::schema::flight_status_history::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<FlightStatusHistoryRow>> {
            let mut conn = pool.get()?;
            let rows = flight_status_history
                .filter(trip_id.eq(for_trip_id))
                .order(recorded_at.asc())
                .select(FlightStatusHistoryRow::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;

        Ok(rows)
    }
}
