use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub clinic: ClinicConfig,
    pub sms: SmsConfig,
    /// When set, a background sweep runs every N minutes in addition to the
    /// externally-triggered /cron/send-reminders endpoint.
    pub reminder_sweep_minutes: Option<u64>,
    /// Reference-compatibility quirk: price unknown inventory ids at 0 with
    /// name "Unknown" instead of rejecting the bill.
    pub legacy_unknown_items: bool,
}

/// Clinic identity used in SMS templates and clinic-local date math.
#[derive(Clone, Debug)]
pub struct ClinicConfig {
    pub name: String,
    pub utc_offset_hours: i32,
}

#[derive(Clone, Debug)]
pub struct SmsConfig {
    pub api_url: String,
    pub api_key: String,
    pub sender_name: String,
    pub timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(24);

        let clinic_name =
            env::var("CLINIC_NAME").unwrap_or_else(|_| "PURRFECTCARE".to_string());
        let utc_offset_hours = env::var("CLINIC_UTC_OFFSET_HOURS")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(8);
        if !(-12..=14).contains(&utc_offset_hours) {
            anyhow::bail!("CLINIC_UTC_OFFSET_HOURS must be between -12 and 14");
        }

        let sms = SmsConfig {
            api_url: env::var("SMS_API_URL")
                .unwrap_or_else(|_| "https://api.semaphore.co/api/v4/messages".to_string()),
            api_key: env::var("SMS_API_KEY")?,
            sender_name: env::var("SMS_SENDER_NAME").unwrap_or_else(|_| clinic_name.clone()),
            timeout_secs: env::var("SMS_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(10),
        };

        let reminder_sweep_minutes = env::var("REMINDER_SWEEP_MINUTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|m| *m > 0);

        let legacy_unknown_items = env::var("LEGACY_UNKNOWN_ITEMS")
            .map(|s| s == "1" || s.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            clinic: ClinicConfig {
                name: clinic_name,
                utc_offset_hours,
            },
            sms,
            reminder_sweep_minutes,
            legacy_unknown_items,
        })
    }
}
