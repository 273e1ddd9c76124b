use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::config::ClinicConfig;
use crate::reminder::ReminderDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
    pub clinic: ClinicConfig,
    pub dispatcher: Arc<ReminderDispatcher>,
    pub legacy_unknown_items: bool,
}

/* -------------------------
   API DTOs
--------------------------*/

/// Generic `{"data": ...}` envelope used by most endpoints.
#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
    pub remember_me: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub data: LoginResponseData,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub vet_user: UserProfile,
    pub clinic: ClinicProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub data: MeResponseData,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub vet_user: UserProfile,
    pub clinic: ClinicProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    /// Single smallint role in DB, returned as an array for client
    /// compatibility.
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ClinicProfile {
    pub clinic_name: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub roles: i16,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OwnerRow {
    pub owner_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub contact: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PetRow {
    pub pet_id: Uuid,
    pub owner_id: Uuid,
    pub pet_uid: String,
    pub name: String,
    pub species: String,
    pub birthday: Option<NaiveDate>,
    pub color: Option<String>,
    pub sex: Option<String>,
    pub weight_kg: Option<Decimal>,
    pub temperature_c: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItemRow {
    pub inventory_id: Uuid,
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/* -------------------------
   Domain state machines
--------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    /// Lenient read: legacy rows may carry `pending` or `confirmed`, which
    /// display as Scheduled.
    pub fn from_db(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            _ => Self::Scheduled,
        }
    }

    /// Strict parse for request input. Legacy synonyms are accepted,
    /// anything else is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Scheduled" | "pending" | "confirmed" => Some(Self::Scheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Scheduled => true,
            // completed / cancelled are terminal; only the no-op is allowed
            current => *current == next,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillStatus {
    Unpaid,
    Paid,
}

impl BillStatus {
    pub fn from_db(s: &str) -> Self {
        if s == "paid" { Self::Paid } else { Self::Unpaid }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(Self::Unpaid),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
        }
    }

    /// Forward-only transition table. `unpaid -> paid` and both no-ops are
    /// allowed; `paid -> unpaid` is not.
    pub fn apply(self, next: Self) -> Option<Self> {
        match (self, next) {
            (Self::Unpaid, Self::Paid) => Some(Self::Paid),
            (current, requested) if current == requested => Some(current),
            _ => None,
        }
    }
}

/// Advisory recurrence tag on appointments; the server stores it but never
/// auto-expands occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Once,
    Weekly,
    Monthly,
    ThreeMonths,
    SixMonths,
}

impl Frequency {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            "3months" => Some(Self::ThreeMonths),
            "6months" => Some(Self::SixMonths),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::ThreeMonths => "3months",
            Self::SixMonths => "6months",
        }
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// Role mapping: 0 client, 1 doctor, 2 secretary.
pub fn role_to_string(role: i16) -> String {
    match role {
        0 => "client",
        1 => "doctor",
        2 => "secretary",
        _ => "unknown",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_statuses_read_as_scheduled() {
        assert_eq!(AppointmentStatus::from_db("pending"), AppointmentStatus::Scheduled);
        assert_eq!(AppointmentStatus::from_db("confirmed"), AppointmentStatus::Scheduled);
        assert_eq!(AppointmentStatus::from_db("Scheduled"), AppointmentStatus::Scheduled);
        assert_eq!(AppointmentStatus::from_db("completed"), AppointmentStatus::Completed);
        assert_eq!(AppointmentStatus::from_db("cancelled"), AppointmentStatus::Cancelled);
    }

    #[test]
    fn strict_parse_rejects_junk() {
        assert_eq!(AppointmentStatus::parse("pending"), Some(AppointmentStatus::Scheduled));
        assert_eq!(AppointmentStatus::parse("done"), None);
        assert_eq!(AppointmentStatus::parse(""), None);
    }

    #[test]
    fn terminal_appointments_only_allow_noop() {
        let completed = AppointmentStatus::Completed;
        assert!(!completed.can_transition_to(AppointmentStatus::Scheduled));
        assert!(!completed.can_transition_to(AppointmentStatus::Cancelled));
        assert!(completed.can_transition_to(AppointmentStatus::Completed));

        let scheduled = AppointmentStatus::Scheduled;
        assert!(scheduled.can_transition_to(AppointmentStatus::Completed));
        assert!(scheduled.can_transition_to(AppointmentStatus::Cancelled));
    }

    #[test]
    fn mark_paid_is_idempotent() {
        let first = BillStatus::Unpaid.apply(BillStatus::Paid);
        assert_eq!(first, Some(BillStatus::Paid));

        // second call on an already-paid bill is a no-op success
        let second = first.unwrap().apply(BillStatus::Paid);
        assert_eq!(second, Some(BillStatus::Paid));
    }

    #[test]
    fn paid_bills_cannot_reopen() {
        assert_eq!(BillStatus::Paid.apply(BillStatus::Unpaid), None);
    }

    #[test]
    fn frequency_round_trips() {
        for s in ["once", "weekly", "monthly", "3months", "6months"] {
            assert_eq!(Frequency::parse(s).unwrap().as_str(), s);
        }
        assert_eq!(Frequency::parse("yearly"), None);
    }
}
