use moderation_queue::{
    config::AppConfig,
    db::{self, JobStore, PgJobStore},
    services::{
        classifier::Classifier,
        gemini::GeminiClient,
        queue::{RedisWorkQueue, WorkQueue},
        reconcile::Reconciler,
        worker::Worker,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const RECONCILE_BATCH_LIMIT: i64 = 100;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting moderation worker");

    // Load configuration; a missing GEMINI_API_KEY stops the worker here
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));
    let queue: Arc<dyn WorkQueue> = Arc::new(
        RedisWorkQueue::new(&config.redis_url, &config.queue_name)
            .expect("Failed to initialize work queue"),
    );

    let gemini = GeminiClient::new(
        &config.gemini_base_url,
        &config.gemini_model,
        &config.gemini_api_key,
        config.gemini_timeout(),
    )
    .expect("Failed to initialize Gemini client");
    let classifier = Arc::new(Classifier::new(
        Arc::new(gemini),
        config.retry_policy(),
        config.word_limit,
    ));

    let worker = Worker::new(
        store.clone(),
        queue.clone(),
        classifier,
        config.worker_settings(),
    );

    let reconciler = Reconciler::new(
        store,
        queue.clone(),
        Duration::from_secs(config.reconcile_staleness_secs),
        RECONCILE_BATCH_LIMIT,
    );
    let reconcile_interval = Duration::from_secs(config.reconcile_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = reconciler.sweep().await {
                tracing::error!(error = %e, "Reconciliation sweep failed");
            }
        }
    });

    tracing::info!("Worker ready, starting job processing loop");

    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    loop {
        match queue
            .receive(config.worker_batch_size, config.visibility_timeout())
            .await
        {
            Ok(batch) if batch.is_empty() => {
                tracing::trace!("No jobs available, sleeping");
                sleep(poll_interval).await;
            }
            Ok(batch) => {
                let size = batch.len();
                let report = worker.handle_batch(batch).await;
                tracing::info!(
                    size,
                    completed = report.completed,
                    deferred = report.deferred,
                    dead_lettered = report.dead_lettered,
                    discarded = report.discarded,
                    faulted = report.faulted,
                    "Batch processed"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Error receiving from queue, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}
