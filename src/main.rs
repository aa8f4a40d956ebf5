use std::sync::Arc;

use registration_server::config::{AppConfig, StoreBackend};
use registration_server::seed::ensure_seeded;
use registration_server::store::{MemoryStore, PgStore, Store};
use registration_server::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = AppConfig::load()?;

    let store: Arc<dyn Store> = match &config.backend {
        StoreBackend::Memory => {
            log::warn!("using the in-memory store, data is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres { url } => {
            let store = PgStore::connect(url).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };

    ensure_seeded(store.as_ref(), &config.admin_password)
        .await
        .map_err(|err| anyhow::anyhow!("seeding failed: {:?}", err))?;

    let rules = config.rules;
    if rules.completion.review_subjects > rules.review_subject_limit {
        log::warn!(
            "REVIEW_COMPLETION_COUNT ({}) exceeds REVIEW_SUBJECT_LIMIT ({}), \
             no student can complete registration",
            rules.completion.review_subjects,
            rules.review_subject_limit
        );
    }

    let app = app(AppState::new(store, rules, config.session_ttl));

    let addr = config.socket_addr()?;
    log::info!("Starting registration HTTP server on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;
    Ok(())
}
