// One-shot dispatch run for crontab use. Prints the JSON summary and exits;
// the same loop is reachable over HTTP via POST /api/v1/wishes/dispatch.

use chrono::Duration;
use tracing_subscriber::EnvFilter;

use pcms_server::config::Config;
use pcms_server::db;
use pcms_server::dispatch::{Dispatcher, SystemClock};
use pcms_server::gateway::{LogEmailGateway, LogSmsGateway};
use pcms_server::store::{PgAuditStore, PgPatientStore, PgWishStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_pg(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    let patients = PgPatientStore::new(pool.clone());
    let wishes = PgWishStore::new(pool.clone());
    let audit = PgAuditStore::new(pool);
    let sms = LogSmsGateway;
    let email = LogEmailGateway {
        from_name: cfg.from_name.clone(),
        from_email: cfg.from_email.clone(),
    };

    let dispatcher = Dispatcher {
        patients: &patients,
        wishes: &wishes,
        audit: &audit,
        sms: &sms,
        email: &email,
        clock: &SystemClock,
        claim_ttl: Duration::minutes(cfg.claim_ttl_minutes),
        practice_tz: cfg.practice_tz(),
        summary_recipients: cfg.summary_recipients.clone(),
    };

    let summary = dispatcher.run().await?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}
