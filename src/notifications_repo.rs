use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;
use uuid::Uuid;

use crate::notifications::{DeliveryStatus, NewNotificationLogRow, NotificationLogRow, NotificationType};
use crate::web::PgPool;

/// Result of inserting a pending ledger row.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(NotificationLogRow),
    /// A row with this `(trip_id, idempotency_key)` already existed —
    /// either a previous attempt or a concurrent one that won the race.
    AlreadyLogged(NotificationLogRow),
}

#[derive(Clone)]
pub struct NotificationsRepository {
    pool: PgPool,
}

impl NotificationsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_idempotency_key(
        &self,
        for_trip_id: Uuid,
        key: &str,
    ) -> Result<Option<NotificationLogRow>> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let key = key.to_string();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<NotificationLogRow>> {
            let mut conn = pool.get()?;
            let row = notifications_log
                .filter(trip_id.eq(for_trip_id))
                .filter(idempotency_key.eq(&key))
                .select(NotificationLogRow::as_select())
                .first(&mut conn)
                .optional()?;
            Ok(row)
        })
        .await??;
        Ok(row)
    }

    /// Insert a PENDING row before any provider call. The unique constraint
    /// on `(trip_id, idempotency_key)` makes this the exactly-once gate: a
    /// conflict means another path already claimed this logical notification.
    pub async fn insert_pending(&self, new_row: NewNotificationLogRow) -> Result<InsertOutcome> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<InsertOutcome> {
            let mut conn = pool.get()?;

            let inserted: Result<NotificationLogRow, DieselError> =
                diesel::insert_into(notifications_log)
                    .values(&new_row)
                    .returning(NotificationLogRow::as_returning())
                    .get_result(&mut conn);

            match inserted {
                Ok(row) => Ok(InsertOutcome::Inserted(row)),
                Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                    let existing = notifications_log
                        .filter(trip_id.eq(new_row.trip_id))
                        .filter(idempotency_key.eq(&new_row.idempotency_key))
                        .select(NotificationLogRow::as_select())
                        .first(&mut conn)?;
                    Ok(InsertOutcome::AlreadyLogged(existing))
                }
                Err(e) => Err(e.into()),
            }
        })
        .await??;
        Ok(outcome)
    }

    pub async fn mark_sent(&self, row_id: Uuid, message_sid: &str) -> Result<()> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let message_sid = message_sid.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            let now = Utc::now();
            diesel::update(notifications_log.filter(id.eq(row_id)))
                .set((
                    delivery_status.eq(DeliveryStatus::Sent),
                    twilio_message_sid.eq(Some(message_sid)),
                    error_message.eq(None::<String>),
                    sent_at.eq(Some(now)),
                    updated_at.eq(now),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;

        metrics::counter!("notifications.sent").increment(1);
        Ok(())
    }

    pub async fn mark_failed(&self, row_id: Uuid, error: &str) -> Result<()> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let error = error.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            diesel::update(notifications_log.filter(id.eq(row_id)))
                .set((
                    delivery_status.eq(DeliveryStatus::Failed),
                    error_message.eq(Some(error)),
                    updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;

        metrics::counter!("notifications.failed").increment(1);
        Ok(())
    }

    /// Flip a FAILED row back to PENDING and bump its retry counter; the
    /// retry service calls this right before re-attempting the send.
    pub async fn begin_retry(&self, row_id: Uuid) -> Result<()> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            diesel::update(notifications_log.filter(id.eq(row_id)))
                .set((
                    delivery_status.eq(DeliveryStatus::Pending),
                    retry_count.eq(retry_count + 1),
                    updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;
            Ok(())
        })
        .await??;
        Ok(())
    }

    pub async fn history(
        &self,
        for_trip_id: Uuid,
        kind: Option<NotificationType>,
    ) -> Result<Vec<NotificationLogRow>> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<NotificationLogRow>> {
            let mut conn = pool.get()?;
            let mut query = notifications_log
                .filter(trip_id.eq(for_trip_id))
                .into_boxed();
            if let Some(kind) = kind {
                query = query.filter(notification_type.eq(kind.as_str()));
            }
            let rows = query
                .order(created_at.desc())
                .select(NotificationLogRow::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;
        Ok(rows)
    }

    /// Whether a SENT row of this kind exists for the trip. Sweeps use this
    /// as their cheap "already handled" check.
    pub async fn has_sent(&self, for_trip_id: Uuid, kind: NotificationType) -> Result<bool> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let count = tokio::task::spawn_blocking(move || -> Result<i64> {
            let mut conn = pool.get()?;
            let count = notifications_log
                .filter(trip_id.eq(for_trip_id))
                .filter(notification_type.eq(kind.as_str()))
                .filter(delivery_status.eq(DeliveryStatus::Sent))
                .count()
                .get_result(&mut conn)?;
            Ok(count)
        })
        .await??;
        Ok(count > 0)
    }

    /// Most recent SENT row of a kind, used for cooldown decisions.
    pub async fn last_sent(
        &self,
        for_trip_id: Uuid,
        kind: NotificationType,
    ) -> Result<Option<NotificationLogRow>> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<Option<NotificationLogRow>> {
            let mut conn = pool.get()?;
            let row = notifications_log
                .filter(trip_id.eq(for_trip_id))
                .filter(notification_type.eq(kind.as_str()))
                .filter(delivery_status.eq(DeliveryStatus::Sent))
                .order(sent_at.desc())
                .select(NotificationLogRow::as_select())
                .first(&mut conn)
                .optional()?;
            Ok(row)
        })
        .await??;
        Ok(row)
    }

    /// FAILED rows still under the retry budget, oldest first.
    pub async fn failed_for_retry(&self, max_attempts: i32) -> Result<Vec<NotificationLogRow>> {
        use crate::schema::notifications_log::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<NotificationLogRow>> {
            let mut conn = pool.get()?;
            let rows = notifications_log
                .filter(delivery_status.eq(DeliveryStatus::Failed))
                .filter(retry_count.lt(max_attempts))
                .order(updated_at.asc())
                .select(NotificationLogRow::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;

        if !rows.is_empty() {
            debug!("{} failed notifications eligible for retry", rows.len());
        }
        Ok(rows)
    }
}

/// Retry due time for a failed row: exponential backoff from the last
/// failure, base 2 s doubling per attempt, capped at 5 minutes.
pub fn retry_due_at(last_update: DateTime<Utc>, attempts_so_far: i32) -> DateTime<Utc> {
    let exp = attempts_so_far.clamp(0, 16) as u32;
    let backoff_secs = 2u64.saturating_mul(2u64.saturating_pow(exp)).min(300);
    last_update + chrono::Duration::seconds(backoff_secs as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn retry_backoff_doubles_and_caps() {
        let t0 = Utc.with_ymd_and_hms(2025, 7, 8, 12, 0, 0).unwrap();
        assert_eq!(retry_due_at(t0, 0), t0 + chrono::Duration::seconds(2));
        assert_eq!(retry_due_at(t0, 1), t0 + chrono::Duration::seconds(4));
        assert_eq!(retry_due_at(t0, 2), t0 + chrono::Duration::seconds(8));
        // Far past the cap
        assert_eq!(retry_due_at(t0, 10), t0 + chrono::Duration::seconds(300));
    }
}
