use std::env;

use chrono::FixedOffset;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    /// How long a claimed wish stays reserved before another run may pick
    /// it up again.
    pub claim_ttl_minutes: i64,
    /// Fixed practice-local offset from UTC, in hours (e.g. -8 for the
    /// US west coast). Used for report timestamps.
    pub practice_tz_offset_hours: i32,
    pub from_name: String,
    pub from_email: String,
    /// Comma-separated recipients of the post-batch summary report.
    pub summary_recipients: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let claim_ttl_minutes = env::var("CLAIM_TTL_MINUTES")
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(10);
        let practice_tz_offset_hours = env::var("PRACTICE_TZ_OFFSET_HOURS")
            .ok()
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(-8);
        let from_name =
            env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| "Practice Front Desk".to_string());
        let from_email =
            env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| "noreply@example.com".to_string());
        let summary_recipients = env::var("SUMMARY_RECIPIENTS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url,
            bind_addr,
            claim_ttl_minutes,
            practice_tz_offset_hours,
            from_name,
            from_email,
            summary_recipients,
        })
    }

    pub fn practice_tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.practice_tz_offset_hours * 3600)
            .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
    }
}
