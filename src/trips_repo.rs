use anyhow::Result;
use chrono::{DateTime, Days, Duration, Utc};
use diesel::prelude::*;
use serde_json::json;
use std::fmt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::flight_status::FlightSnapshot;
use crate::trips::{NewTrip, Trip};
use crate::web::PgPool;

/// How a trip insert can be rejected.
#[derive(Debug)]
pub enum CreateTripError {
    /// Same passenger handle, flight number and UTC departure day
    Duplicate,
    Database(anyhow::Error),
}

impl fmt::Display for CreateTripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreateTripError::Duplicate => {
                write!(f, "trip already exists for this flight and passenger")
            }
            CreateTripError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for CreateTripError {}

impl From<anyhow::Error> for CreateTripError {
    fn from(e: anyhow::Error) -> Self {
        CreateTripError::Database(e)
    }
}

#[derive(Clone)]
pub struct TripsRepository {
    pool: PgPool,
}

impl TripsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a trip, rejecting duplicates (same whatsapp + flight number +
    /// UTC departure day).
    pub async fn create(&self, new_trip: NewTrip) -> Result<Trip, CreateTripError> {
        use crate::schema::trips::dsl::{departure_date, flight_number, trips, whatsapp};

        let pool = self.pool.clone();
        let created = tokio::task::spawn_blocking(move || -> Result<Result<Trip, CreateTripError>> {
            let mut conn = pool.get()?;

            let day_start = new_trip
                .departure_date
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .unwrap_or_default()
                .and_utc();
            let day_end = day_start + Duration::days(1);

            let existing: i64 = trips
                .filter(whatsapp.eq(&new_trip.whatsapp))
                .filter(flight_number.eq(&new_trip.flight_number))
                .filter(departure_date.ge(day_start))
                .filter(departure_date.lt(day_end))
                .count()
                .get_result(&mut conn)?;

            if existing > 0 {
                return Ok(Err(CreateTripError::Duplicate));
            }

            let trip: Trip = diesel::insert_into(trips)
                .values(&new_trip)
                .returning(Trip::as_returning())
                .get_result(&mut conn)?;
            Ok(Ok(trip))
        })
        .await
        .map_err(|e| CreateTripError::Database(e.into()))?
        .map_err(CreateTripError::Database)??;

        info!(
            "Created trip {} for flight {} ({} -> {})",
            created.id, created.flight_number, created.origin_iata, created.destination_iata
        );
        metrics::counter!("trips.created").increment(1);
        Ok(created)
    }

    pub async fn get_by_id(&self, trip_id: Uuid) -> Result<Option<Trip>> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        let trip = tokio::task::spawn_blocking(move || -> Result<Option<Trip>> {
            let mut conn = pool.get()?;
            let trip = trips
                .filter(id.eq(trip_id))
                .select(Trip::as_select())
                .first(&mut conn)
                .optional()?;
            Ok(trip)
        })
        .await??;
        Ok(trip)
    }

    /// Trips whose `next_check_at` has come due, limited to departures inside
    /// the tracking window (2 days back to 60 days ahead).
    pub async fn due_for_poll(&self, now: DateTime<Utc>) -> Result<Vec<Trip>> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        let due = tokio::task::spawn_blocking(move || -> Result<Vec<Trip>> {
            let mut conn = pool.get()?;
            let window_start = now - Days::new(2);
            let window_end = now + Days::new(60);
            let due = trips
                .filter(next_check_at.is_not_null())
                .filter(next_check_at.le(now))
                .filter(departure_date.ge(window_start))
                .filter(departure_date.le(window_end))
                .order(next_check_at.asc())
                .select(Trip::as_select())
                .load(&mut conn)?;
            Ok(due)
        })
        .await??;

        debug!("{} trips due for poll", due.len());
        Ok(due)
    }

    /// All trips inside the tracking window, due or not. Used by the resync
    /// maintenance command and the reminder/boarding sweeps.
    pub async fn in_tracking_window(&self, now: DateTime<Utc>) -> Result<Vec<Trip>> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Trip>> {
            let mut conn = pool.get()?;
            let window_start = now - Days::new(2);
            let window_end = now + Days::new(60);
            let rows = trips
                .filter(departure_date.ge(window_start))
                .filter(departure_date.le(window_end))
                .order(departure_date.asc())
                .select(Trip::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;
        Ok(rows)
    }

    /// Trips departing inside `[from, to]`. Powers the 24h reminder and
    /// boarding window sweeps.
    pub async fn departing_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Trip>> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Trip>> {
            let mut conn = pool.get()?;
            let rows = trips
                .filter(departure_date.ge(from))
                .filter(departure_date.le(to))
                .order(departure_date.asc())
                .select(Trip::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;
        Ok(rows)
    }

    pub async fn update_next_check_at(
        &self,
        trip_id: Uuid,
        next_check: Option<DateTime<Utc>>,
    ) -> Result<()> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            diesel::update(trips.filter(id.eq(trip_id)))
                .set(next_check_at.eq(next_check))
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;

        debug!("Trip {} next check: {:?}", trip_id, next_check);
        Ok(())
    }

    /// Write the snapshot-derived columns back to the trip row: status label,
    /// origin gate, estimated arrival, and a `flight_data` metadata entry.
    pub async fn update_from_snapshot(&self, trip_id: Uuid, snapshot: &FlightSnapshot) -> Result<()> {
        use crate::schema::trips::dsl::*;

        let pool = self.pool.clone();
        let snapshot = snapshot.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;

            conn.transaction::<_, anyhow::Error, _>(|conn| {
                let current_metadata: Option<serde_json::Value> = trips
                    .filter(id.eq(trip_id))
                    .select(metadata)
                    .first(&mut *conn)?;

                let mut merged = match current_metadata {
                    Some(serde_json::Value::Object(map)) => map,
                    _ => serde_json::Map::new(),
                };
                merged.insert(
                    "flight_data".to_string(),
                    json!({
                        "status": snapshot.status,
                        "gate_origin": snapshot.gate_origin,
                        "gate_destination": snapshot.gate_destination,
                        "estimated_out": snapshot.estimated_out,
                        "estimated_in": snapshot.estimated_in,
                        "progress_percent": snapshot.progress_percent,
                        "cancelled": snapshot.cancelled,
                        "diverted": snapshot.diverted,
                    }),
                );

                diesel::update(trips.filter(id.eq(trip_id)))
                    .set((
                        status.eq(&snapshot.status),
                        gate.eq(&snapshot.gate_origin),
                        estimated_arrival.eq(snapshot.estimated_in.or(snapshot.actual_in)),
                        metadata.eq(serde_json::Value::Object(merged)),
                    ))
                    .execute(&mut *conn)?;
                Ok(())
            })?;
            Ok(())
        })
        .await??;

        Ok(())
    }
}
