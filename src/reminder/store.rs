use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use crate::models::AppointmentStatus;

use super::policy::ReminderKind;

#[derive(Debug, Error)]
#[error("store error: {0}")]
pub struct StoreError(pub String);

/// One appointment joined with the pet and owner details the SMS template
/// needs.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub appointment_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub sms_1d_sent: bool,
    pub sms_sameday_sent: bool,
    pub pet_name: String,
    pub owner_name: String,
    pub owner_contact: String,
}

/// Persistence handle injected into the dispatcher so tests can substitute
/// an in-memory double.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Open (non-terminal) appointments falling on any of the given dates.
    async fn open_appointments_on(
        &self,
        dates: &[NaiveDate],
    ) -> Result<Vec<ReminderCandidate>, StoreError>;

    async fn appointments_by_ids(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ReminderCandidate>, StoreError>;

    /// Compare-and-set flag write; returns false when the flag was already
    /// set by a concurrent dispatch.
    async fn mark_reminder_sent(
        &self,
        appointment_id: Uuid,
        kind: ReminderKind,
    ) -> Result<bool, StoreError>;
}

pub struct PgReminderStore {
    pool: sqlx::PgPool,
}

impl PgReminderStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CandidateRow {
    appointment_id: Uuid,
    date: NaiveDate,
    time: NaiveTime,
    status: String,
    reason: Option<String>,
    sms_1d_sent: bool,
    sms_sameday_sent: bool,
    pet_name: String,
    owner_name: String,
    owner_contact: String,
}

impl From<CandidateRow> for ReminderCandidate {
    fn from(r: CandidateRow) -> Self {
        ReminderCandidate {
            appointment_id: r.appointment_id,
            date: r.date,
            time: r.time,
            status: AppointmentStatus::from_db(&r.status),
            reason: r.reason,
            sms_1d_sent: r.sms_1d_sent,
            sms_sameday_sent: r.sms_sameday_sent,
            pet_name: r.pet_name,
            owner_name: r.owner_name,
            owner_contact: r.owner_contact,
        }
    }
}

#[async_trait]
impl ReminderStore for PgReminderStore {
    async fn open_appointments_on(
        &self,
        dates: &[NaiveDate],
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        let rows: Vec<CandidateRow> = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT
              a.appointment_id,
              a.date,
              a."time" AS time,
              a.status,
              a.reason,
              a.sms_1d_sent,
              a.sms_sameday_sent,
              p.name AS pet_name,
              o.name AS owner_name,
              o.contact AS owner_contact
            FROM appointments a
            JOIN pets p ON p.pet_id = a.pet_id
            JOIN owners o ON o.owner_id = p.owner_id
            WHERE a.date = ANY($1)
              AND a.status NOT IN ('completed', 'cancelled')
            "#,
        )
        .bind(dates)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError(format!("db error: {e}")))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn appointments_by_ids(
        &self,
        ids: &[Uuid],
    ) -> Result<Vec<ReminderCandidate>, StoreError> {
        let rows: Vec<CandidateRow> = sqlx::query_as::<_, CandidateRow>(
            r#"
            SELECT
              a.appointment_id,
              a.date,
              a."time" AS time,
              a.status,
              a.reason,
              a.sms_1d_sent,
              a.sms_sameday_sent,
              p.name AS pet_name,
              o.name AS owner_name,
              o.contact AS owner_contact
            FROM appointments a
            JOIN pets p ON p.pet_id = a.pet_id
            JOIN owners o ON o.owner_id = p.owner_id
            WHERE a.appointment_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError(format!("db error: {e}")))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_reminder_sent(
        &self,
        appointment_id: Uuid,
        kind: ReminderKind,
    ) -> Result<bool, StoreError> {
        let sql = match kind {
            ReminderKind::SameDay => {
                r#"
                UPDATE appointments
                SET sms_sameday_sent = TRUE, updated_at = now()
                WHERE appointment_id = $1 AND sms_sameday_sent = FALSE
                "#
            }
            ReminderKind::DayBefore => {
                r#"
                UPDATE appointments
                SET sms_1d_sent = TRUE, updated_at = now()
                WHERE appointment_id = $1 AND sms_1d_sent = FALSE
                "#
            }
        };

        let res = sqlx::query(sql)
            .bind(appointment_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError(format!("db error: {e}")))?;

        Ok(res.rows_affected() > 0)
    }
}
