use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

use super::store::ReminderCandidate;

/// Which of the two independent reminders is due. Wire names follow the
/// flag columns: "1d" for the day-before text, "sameday" for the
/// day-of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    SameDay,
    DayBefore,
}

impl ReminderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sameday" => Some(Self::SameDay),
            "1d" => Some(Self::DayBefore),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SameDay => "sameday",
            Self::DayBefore => "1d",
        }
    }
}

/// Pure reminder decision for one appointment against a clinic-local date.
///
/// Terminal appointments never get a reminder, set flags are never re-sent,
/// and same-day is checked first so it wins if clock skew ever makes both
/// windows match.
pub fn decide(candidate: &ReminderCandidate, today: NaiveDate) -> Option<ReminderKind> {
    if candidate.status.is_terminal() {
        return None;
    }

    if candidate.date == today && !candidate.sms_sameday_sent {
        return Some(ReminderKind::SameDay);
    }

    let tomorrow = today.succ_opt()?;
    if candidate.date == tomorrow && !candidate.sms_1d_sent {
        return Some(ReminderKind::DayBefore);
    }

    None
}

/// Calendar date at the clinic's fixed UTC offset, independent of the host
/// timezone. Date-string comparisons are only correct in clinic-local time.
pub fn clinic_date_at(now: DateTime<Utc>, utc_offset_hours: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(8 * 3600).unwrap());
    now.with_timezone(&offset).date_naive()
}

pub fn clinic_today(utc_offset_hours: i32) -> NaiveDate {
    clinic_date_at(Utc::now(), utc_offset_hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AppointmentStatus;
    use chrono::NaiveTime;
    use uuid::Uuid;

    fn candidate(date: NaiveDate, status: AppointmentStatus) -> ReminderCandidate {
        ReminderCandidate {
            appointment_id: Uuid::new_v4(),
            date,
            time: NaiveTime::from_hms_opt(13, 9, 0).unwrap(),
            status,
            reason: None,
            sms_1d_sent: false,
            sms_sameday_sent: false,
            pet_name: "Muning".to_string(),
            owner_name: "Ana".to_string(),
            owner_contact: "+639170000001".to_string(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn same_day_reminder_when_due() {
        let today = date("2025-06-15");
        let c = candidate(today, AppointmentStatus::Scheduled);
        assert_eq!(decide(&c, today), Some(ReminderKind::SameDay));
    }

    #[test]
    fn day_before_reminder_when_due_tomorrow() {
        let today = date("2025-06-15");
        let c = candidate(date("2025-06-16"), AppointmentStatus::Scheduled);
        assert_eq!(decide(&c, today), Some(ReminderKind::DayBefore));
    }

    #[test]
    fn nothing_outside_the_window() {
        let today = date("2025-06-15");
        for d in ["2025-06-14", "2025-06-17", "2025-07-15"] {
            let c = candidate(date(d), AppointmentStatus::Scheduled);
            assert_eq!(decide(&c, today), None);
        }
    }

    #[test]
    fn sent_flags_suppress_resends() {
        let today = date("2025-06-15");

        let mut sameday = candidate(today, AppointmentStatus::Scheduled);
        sameday.sms_sameday_sent = true;
        assert_eq!(decide(&sameday, today), None);

        let mut day_before = candidate(date("2025-06-16"), AppointmentStatus::Scheduled);
        day_before.sms_1d_sent = true;
        assert_eq!(decide(&day_before, today), None);
    }

    #[test]
    fn terminal_statuses_never_remind() {
        let today = date("2025-06-15");
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            // even with the date matching both windows' candidates
            assert_eq!(decide(&candidate(today, status), today), None);
            assert_eq!(decide(&candidate(date("2025-06-16"), status), today), None);
        }
    }

    #[test]
    fn clinic_date_uses_fixed_offset_not_host_tz() {
        // 2025-06-15T23:30Z is already June 16 in a UTC+8 clinic.
        let now = "2025-06-15T23:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(clinic_date_at(now, 8), date("2025-06-16"));
        assert_eq!(clinic_date_at(now, 0), date("2025-06-15"));
    }
}
