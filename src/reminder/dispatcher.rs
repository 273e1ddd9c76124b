use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use uuid::Uuid;

use crate::sms::{GatewayError, SmsGateway};

use super::policy::{self, ReminderKind};
use super::store::{ReminderCandidate, ReminderStore, StoreError};

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("appointment not found")]
    NotFound,
    #[error("this reminder was already sent")]
    AlreadySent,
    #[error("appointment is {0}; reminders are closed")]
    Closed(&'static str),
    #[error("owner has no contact number")]
    NoContact,
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOutcome {
    pub sent_count: usize,
    pub failed_count: usize,
}

/// Runs the reminder policy over a batch of appointments and talks to the
/// SMS gateway. Three triggers share this code: the cron sweep, the scoped
/// dispatch after an appointment write, and the staff "send now" action.
pub struct ReminderDispatcher {
    store: Arc<dyn ReminderStore>,
    gateway: Arc<dyn SmsGateway>,
    clinic_name: String,
    utc_offset_hours: i32,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn ReminderStore>,
        gateway: Arc<dyn SmsGateway>,
        clinic_name: String,
        utc_offset_hours: i32,
    ) -> Self {
        Self {
            store,
            gateway,
            clinic_name,
            utc_offset_hours,
        }
    }

    /// Cron-style sweep over every open appointment falling today or
    /// tomorrow (clinic-local).
    pub async fn sweep(&self) -> Result<DispatchOutcome, ReminderError> {
        let today = policy::clinic_today(self.utc_offset_hours);
        let tomorrow = today.succ_opt().unwrap_or(today);

        let candidates = self.store.open_appointments_on(&[today, tomorrow]).await?;
        Ok(self.run_for_date(candidates, today).await)
    }

    /// Scoped dispatch for explicit appointment ids, used right after a
    /// create/update so a reschedule into the window still fires.
    pub async fn dispatch_for(&self, ids: &[Uuid]) -> Result<DispatchOutcome, ReminderError> {
        let today = policy::clinic_today(self.utc_offset_hours);
        let candidates = self.store.appointments_by_ids(ids).await?;
        Ok(self.run_for_date(candidates, today).await)
    }

    /// Staff-triggered send of one explicit reminder type. Skips the date
    /// check but still refuses terminal appointments and already-sent
    /// flags, and still only flags after the gateway accepted the message.
    pub async fn send_manual(
        &self,
        appointment_id: Uuid,
        kind: ReminderKind,
    ) -> Result<(), ReminderError> {
        let mut found = self.store.appointments_by_ids(&[appointment_id]).await?;
        let Some(candidate) = found.pop() else {
            return Err(ReminderError::NotFound);
        };

        if candidate.status.is_terminal() {
            return Err(ReminderError::Closed(candidate.status.as_str()));
        }
        let already_sent = match kind {
            ReminderKind::SameDay => candidate.sms_sameday_sent,
            ReminderKind::DayBefore => candidate.sms_1d_sent,
        };
        if already_sent {
            return Err(ReminderError::AlreadySent);
        }
        if candidate.owner_contact.trim().is_empty() {
            return Err(ReminderError::NoContact);
        }

        let message = render_message(&self.clinic_name, &candidate, kind);
        self.gateway.send(&candidate.owner_contact, &message).await?;

        // The message went out; a failed flag write is a reconciliation
        // concern, not a reason to report failure or re-send.
        if let Err(e) = self.store.mark_reminder_sent(appointment_id, kind).await {
            tracing::error!(
                %appointment_id,
                kind = kind.as_str(),
                error = %e,
                "reminder flag write failed after a successful send"
            );
        }

        Ok(())
    }

    /// Policy + send + flag for each candidate. One appointment's failure
    /// never aborts the rest; the flag is written only after the gateway
    /// reported success.
    async fn run_for_date(
        &self,
        candidates: Vec<ReminderCandidate>,
        today: NaiveDate,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();

        for candidate in candidates {
            let Some(kind) = policy::decide(&candidate, today) else {
                continue;
            };

            if candidate.owner_contact.trim().is_empty() {
                tracing::debug!(
                    appointment_id = %candidate.appointment_id,
                    "skipping reminder, owner has no contact number"
                );
                continue;
            }

            let message = render_message(&self.clinic_name, &candidate, kind);

            match self.gateway.send(&candidate.owner_contact, &message).await {
                Ok(()) => {
                    outcome.sent_count += 1;
                    match self
                        .store
                        .mark_reminder_sent(candidate.appointment_id, kind)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => tracing::debug!(
                            appointment_id = %candidate.appointment_id,
                            "reminder flag was already set by a concurrent dispatch"
                        ),
                        Err(e) => tracing::error!(
                            appointment_id = %candidate.appointment_id,
                            kind = kind.as_str(),
                            error = %e,
                            "reminder flag write failed after a successful send"
                        ),
                    }
                }
                Err(e) => {
                    outcome.failed_count += 1;
                    tracing::warn!(
                        appointment_id = %candidate.appointment_id,
                        kind = kind.as_str(),
                        error = %e,
                        "sms send failed"
                    );
                }
            }
        }

        outcome
    }
}

fn render_message(clinic_name: &str, candidate: &ReminderCandidate, kind: ReminderKind) -> String {
    let time = format_time_12h(candidate.time);
    let reason = candidate
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| format!(" for {r}"))
        .unwrap_or_default();

    match kind {
        ReminderKind::SameDay => format!(
            "Hi {owner}, this is {clinic_name} reminding you of {pet}'s scheduled appointment TODAY at {time}{reason}. See you!",
            owner = candidate.owner_name,
            pet = candidate.pet_name,
        ),
        ReminderKind::DayBefore => format!(
            "Hi {owner}, this is {clinic_name}. Just a friendly reminder that {pet} has an appointment TOMORROW at {time}{reason}.",
            owner = candidate.owner_name,
            pet = candidate.pet_name,
        ),
    }
}

fn format_time_12h(t: NaiveTime) -> String {
    t.format("%-I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveTime;

    use crate::models::AppointmentStatus;

    use super::*;

    struct MemoryStore {
        appointments: Mutex<Vec<ReminderCandidate>>,
    }

    impl MemoryStore {
        fn new(appointments: Vec<ReminderCandidate>) -> Arc<Self> {
            Arc::new(Self {
                appointments: Mutex::new(appointments),
            })
        }

        fn flags(&self, id: Uuid) -> (bool, bool) {
            let appts = self.appointments.lock().unwrap();
            let a = appts.iter().find(|a| a.appointment_id == id).unwrap();
            (a.sms_1d_sent, a.sms_sameday_sent)
        }
    }

    #[async_trait]
    impl ReminderStore for MemoryStore {
        async fn open_appointments_on(
            &self,
            dates: &[NaiveDate],
        ) -> Result<Vec<ReminderCandidate>, StoreError> {
            let appts = self.appointments.lock().unwrap();
            Ok(appts
                .iter()
                .filter(|a| dates.contains(&a.date) && !a.status.is_terminal())
                .cloned()
                .collect())
        }

        async fn appointments_by_ids(
            &self,
            ids: &[Uuid],
        ) -> Result<Vec<ReminderCandidate>, StoreError> {
            let appts = self.appointments.lock().unwrap();
            Ok(appts
                .iter()
                .filter(|a| ids.contains(&a.appointment_id))
                .cloned()
                .collect())
        }

        async fn mark_reminder_sent(
            &self,
            appointment_id: Uuid,
            kind: ReminderKind,
        ) -> Result<bool, StoreError> {
            let mut appts = self.appointments.lock().unwrap();
            let a = appts
                .iter_mut()
                .find(|a| a.appointment_id == appointment_id)
                .ok_or_else(|| StoreError("missing appointment".into()))?;
            let flag = match kind {
                ReminderKind::SameDay => &mut a.sms_sameday_sent,
                ReminderKind::DayBefore => &mut a.sms_1d_sent,
            };
            if *flag {
                return Ok(false);
            }
            *flag = true;
            Ok(true)
        }
    }

    /// Records accepted sends; numbers in `fail_for` are rejected.
    struct ScriptedGateway {
        sent: Mutex<Vec<(String, String)>>,
        fail_for: HashSet<String>,
    }

    impl ScriptedGateway {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_for: HashSet::new(),
            })
        }

        fn failing_for(numbers: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail_for: numbers.iter().map(|s| s.to_string()).collect(),
            })
        }

        fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SmsGateway for ScriptedGateway {
        async fn send(&self, number: &str, message: &str) -> Result<(), GatewayError> {
            if self.fail_for.contains(number) {
                return Err(GatewayError::Rejected("503: provider down".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((number.to_string(), message.to_string()));
            Ok(())
        }
    }

    fn candidate(date: NaiveDate, contact: &str) -> ReminderCandidate {
        ReminderCandidate {
            appointment_id: Uuid::new_v4(),
            date,
            time: NaiveTime::from_hms_opt(13, 9, 0).unwrap(),
            status: AppointmentStatus::Scheduled,
            reason: None,
            sms_1d_sent: false,
            sms_sameday_sent: false,
            pet_name: "Muning".to_string(),
            owner_name: "Ana".to_string(),
            owner_contact: contact.to_string(),
        }
    }

    fn dispatcher(
        store: Arc<MemoryStore>,
        gateway: Arc<ScriptedGateway>,
    ) -> ReminderDispatcher {
        ReminderDispatcher::new(store, gateway, "PURRFECTCARE".to_string(), 8)
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn gateway_failure_leaves_flag_unset() {
        let today = date("2025-06-15");
        let appt = candidate(today, "+639170000001");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let gateway = ScriptedGateway::failing_for(&["+639170000001"]);
        let d = dispatcher(store.clone(), gateway);

        let candidates = store.appointments_by_ids(&[id]).await.unwrap();
        let outcome = d.run_for_date(candidates, today).await;

        assert_eq!(outcome.sent_count, 0);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(store.flags(id), (false, false));
    }

    #[tokio::test]
    async fn batch_survives_one_failure() {
        let today = date("2025-06-15");
        let a = candidate(today, "+639170000001");
        let b = candidate(today, "+639170000002");
        let c = candidate(today, "+639170000003");
        let (id_a, id_b, id_c) = (a.appointment_id, b.appointment_id, c.appointment_id);

        let store = MemoryStore::new(vec![a, b, c]);
        let gateway = ScriptedGateway::failing_for(&["+639170000002"]);
        let d = dispatcher(store.clone(), gateway.clone());

        let candidates = store.open_appointments_on(&[today]).await.unwrap();
        let outcome = d.run_for_date(candidates, today).await;

        assert_eq!(outcome.sent_count, 2);
        assert_eq!(outcome.failed_count, 1);
        assert_eq!(gateway.sent_count(), 2);
        assert_eq!(store.flags(id_a), (false, true));
        assert_eq!(store.flags(id_b), (false, false));
        assert_eq!(store.flags(id_c), (false, true));
    }

    #[tokio::test]
    async fn repeat_dispatch_sends_nothing_new() {
        let today = date("2025-06-15");
        let appt = candidate(today, "+639170000001");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let gateway = ScriptedGateway::ok();
        let d = dispatcher(store.clone(), gateway.clone());

        let first = d
            .run_for_date(store.open_appointments_on(&[today]).await.unwrap(), today)
            .await;
        assert_eq!(first.sent_count, 1);
        assert_eq!(store.flags(id), (false, true));

        let second = d
            .run_for_date(store.open_appointments_on(&[today]).await.unwrap(), today)
            .await;
        assert_eq!(second.sent_count, 0);
        assert_eq!(gateway.sent_count(), 1);
        // flag stays set, never reset
        assert_eq!(store.flags(id), (false, true));
    }

    #[tokio::test]
    async fn both_windows_can_eventually_fire_for_one_appointment() {
        let appt_date = date("2025-06-16");
        let appt = candidate(appt_date, "+639170000001");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let gateway = ScriptedGateway::ok();
        let d = dispatcher(store.clone(), gateway.clone());

        // day before: the 1d reminder
        let outcome = d
            .run_for_date(store.appointments_by_ids(&[id]).await.unwrap(), date("2025-06-15"))
            .await;
        assert_eq!(outcome.sent_count, 1);
        assert_eq!(store.flags(id), (true, false));

        // day of: the sameday reminder, independent of the first flag
        let outcome = d
            .run_for_date(store.appointments_by_ids(&[id]).await.unwrap(), appt_date)
            .await;
        assert_eq!(outcome.sent_count, 1);
        assert_eq!(store.flags(id), (true, true));
        assert_eq!(gateway.sent_count(), 2);
    }

    #[tokio::test]
    async fn blank_contact_is_skipped_not_failed() {
        let today = date("2025-06-15");
        let appt = candidate(today, "  ");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let d = dispatcher(store.clone(), ScriptedGateway::ok());

        let outcome = d
            .run_for_date(store.appointments_by_ids(&[id]).await.unwrap(), today)
            .await;
        assert_eq!(outcome.sent_count, 0);
        assert_eq!(outcome.failed_count, 0);
        assert_eq!(store.flags(id), (false, false));
    }

    #[tokio::test]
    async fn manual_send_sets_flag_after_success() {
        let appt = candidate(date("2025-07-01"), "+639170000001");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let gateway = ScriptedGateway::ok();
        let d = dispatcher(store.clone(), gateway.clone());

        // date is far outside the policy window; manual send ignores that
        d.send_manual(id, ReminderKind::DayBefore).await.unwrap();
        assert_eq!(store.flags(id), (true, false));
        assert_eq!(gateway.sent_count(), 1);

        // already-sent convention still applies
        let err = d.send_manual(id, ReminderKind::DayBefore).await.unwrap_err();
        assert!(matches!(err, ReminderError::AlreadySent));
        assert_eq!(gateway.sent_count(), 1);
    }

    #[tokio::test]
    async fn manual_send_propagates_gateway_failure_without_flagging() {
        let appt = candidate(date("2025-07-01"), "+639170000001");
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let gateway = ScriptedGateway::failing_for(&["+639170000001"]);
        let d = dispatcher(store.clone(), gateway);

        let err = d.send_manual(id, ReminderKind::SameDay).await.unwrap_err();
        assert!(matches!(err, ReminderError::Gateway(_)));
        assert_eq!(store.flags(id), (false, false));
    }

    #[tokio::test]
    async fn manual_send_refuses_terminal_appointments() {
        let mut appt = candidate(date("2025-07-01"), "+639170000001");
        appt.status = AppointmentStatus::Cancelled;
        let id = appt.appointment_id;

        let store = MemoryStore::new(vec![appt]);
        let d = dispatcher(store, ScriptedGateway::ok());

        let err = d.send_manual(id, ReminderKind::SameDay).await.unwrap_err();
        assert!(matches!(err, ReminderError::Closed("cancelled")));
    }

    #[tokio::test]
    async fn manual_send_unknown_id_is_not_found() {
        let store = MemoryStore::new(vec![]);
        let d = dispatcher(store, ScriptedGateway::ok());

        let err = d
            .send_manual(Uuid::new_v4(), ReminderKind::SameDay)
            .await
            .unwrap_err();
        assert!(matches!(err, ReminderError::NotFound));
    }

    #[test]
    fn message_templates_match_the_clinic_wording() {
        let mut c = candidate(date("2025-06-15"), "+639170000001");
        c.reason = Some("vaccination".to_string());

        let sameday = render_message("PURRFECTCARE", &c, ReminderKind::SameDay);
        assert_eq!(
            sameday,
            "Hi Ana, this is PURRFECTCARE reminding you of Muning's scheduled appointment TODAY at 1:09 PM for vaccination. See you!"
        );

        c.reason = None;
        let day_before = render_message("PURRFECTCARE", &c, ReminderKind::DayBefore);
        assert_eq!(
            day_before,
            "Hi Ana, this is PURRFECTCARE. Just a friendly reminder that Muning has an appointment TOMORROW at 1:09 PM."
        );
    }

    #[test]
    fn twelve_hour_clock_formatting() {
        let cases = [
            ((0, 5), "12:05 AM"),
            ((9, 0), "9:00 AM"),
            ((12, 0), "12:00 PM"),
            ((13, 9), "1:09 PM"),
            ((23, 59), "11:59 PM"),
        ];
        for ((h, m), expected) in cases {
            let t = NaiveTime::from_hms_opt(h, m, 0).unwrap();
            assert_eq!(format_time_12h(t), expected);
        }
    }
}
