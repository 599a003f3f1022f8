use std::sync::Arc;

use opendiary_attendance::clock::SystemClock;
use opendiary_attendance::config::Config;
use opendiary_attendance::ledger::{Ledger, MemoryLedger, PgLedger};
use opendiary_attendance::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::load()?;

    let ledger: Arc<dyn Ledger> = match &config.database_url {
        Some(url) => Arc::new(PgLedger::connect(&config, url).await?),
        None => {
            log::warn!("DATABASE_URL not set, attendance is kept in memory and lost on restart");
            Arc::new(MemoryLedger::new())
        }
    };

    let app = router(AppState::new(ledger, Arc::new(SystemClock)));

    log::info!("Starting OpenDiary attendance server on http://{}", config.addr);
    axum::Server::bind(&config.addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
