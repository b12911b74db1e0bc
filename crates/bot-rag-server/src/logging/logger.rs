use anyhow::Result;
use flume::{bounded, Receiver, Sender};
use sqlx::types::Json;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::types::ActivityLog;
use crate::config::LoggingConfig;

/// Logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Queue capacity (max logs in memory before dropping)
    pub queue_capacity: usize,

    /// Batch size for database inserts
    pub batch_size: usize,

    /// Max wait time before flushing batch (milliseconds)
    pub batch_timeout_ms: u64,

    pub worker_count: usize,
}

impl From<&LoggingConfig> for LoggerConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            queue_capacity: config.activity_queue_capacity.max(1),
            batch_size: config.activity_batch_size.max(1),
            batch_timeout_ms: 1000,
            worker_count: config.activity_workers.max(1),
        }
    }
}

/// Fire-and-forget activity log backed by a bounded queue and batch-inserting workers.
#[derive(Clone)]
pub struct ActivityLogger {
    sender: Option<Sender<ActivityLog>>,
}

impl ActivityLogger {
    /// Initialize logger with background workers
    pub fn new(pool: PgPool, config: LoggerConfig) -> Self {
        let (sender, receiver) = bounded(config.queue_capacity);

        info!(
            "Initializing ActivityLogger: queue={}, batch={}, timeout={}ms, workers={}",
            config.queue_capacity, config.batch_size, config.batch_timeout_ms, config.worker_count
        );

        for worker_id in 0..config.worker_count {
            let pool = pool.clone();
            let receiver = receiver.clone();
            let config = config.clone();

            tokio::spawn(async move {
                Self::worker_loop(worker_id, pool, receiver, config).await;
            });
        }

        Self { sender: Some(sender) }
    }

    /// A logger that drops everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Log activity (non-blocking). Entries are dropped when the queue is full.
    pub fn log(&self, activity: ActivityLog) {
        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.try_send(activity) {
            warn!("Failed to enqueue activity log (queue full?): {}", e);
        }
    }

    pub fn queue_len(&self) -> usize {
        self.sender.as_ref().map(|s| s.len()).unwrap_or(0)
    }

    async fn worker_loop(
        worker_id: usize,
        pool: PgPool,
        receiver: Receiver<ActivityLog>,
        config: LoggerConfig,
    ) {
        info!("Activity logger worker {} started", worker_id);

        let mut batch: Vec<ActivityLog> = Vec::with_capacity(config.batch_size);
        let batch_timeout = Duration::from_millis(config.batch_timeout_ms);

        loop {
            let deadline = tokio::time::Instant::now() + batch_timeout;

            while batch.len() < config.batch_size {
                match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
                    Ok(Ok(log)) => batch.push(log),
                    Ok(Err(_)) => {
                        // Channel closed, flush and exit
                        if !batch.is_empty() {
                            Self::flush_batch(&pool, &batch, worker_id).await;
                        }
                        info!("Activity logger worker {} shutting down", worker_id);
                        return;
                    }
                    Err(_) => break,
                }
            }

            if !batch.is_empty() {
                Self::flush_batch(&pool, &batch, worker_id).await;
                batch.clear();
            } else {
                sleep(Duration::from_millis(100)).await;
            }
        }
    }

    async fn flush_batch(pool: &PgPool, batch: &[ActivityLog], worker_id: usize) {
        let start = std::time::Instant::now();

        match Self::insert_batch(pool, batch).await {
            Ok(inserted) => {
                debug!(
                    "Worker {} inserted {} activity logs in {:?}",
                    worker_id,
                    inserted,
                    start.elapsed()
                );
            }
            Err(e) => {
                error!("Worker {} failed to insert activity batch: {}", worker_id, e);
            }
        }
    }

    async fn insert_batch(pool: &PgPool, logs: &[ActivityLog]) -> Result<usize> {
        let mut query_builder = sqlx::QueryBuilder::new(
            r#"
            INSERT INTO bot_activity_logs (
                conversation_id, bot_id, user_id, activity_type, activity_status,
                message_content, response_content, token_count,
                processing_time_ms, llm_call_duration_ms, retrieval_duration_ms,
                error_message, error_type, details, created_at
            )
            "#,
        );

        query_builder.push_values(logs, |mut b, log| {
            b.push_bind(log.conversation_id)
                .push_bind(log.bot_id)
                .push_bind(log.user_id)
                .push_bind(log.activity_type.as_str())
                .push_bind(log.activity_status.as_str())
                .push_bind(&log.message_content)
                .push_bind(&log.response_content)
                .push_bind(log.token_count)
                .push_bind(log.processing_time_ms)
                .push_bind(log.llm_call_duration_ms)
                .push_bind(log.retrieval_duration_ms)
                .push_bind(&log.error_message)
                .push_bind(&log.error_type)
                .push_bind(log.details.as_ref().map(Json))
                .push_bind(log.created_at);
        });

        let result = query_builder.build().execute(pool).await?;
        Ok(result.rows_affected() as usize)
    }
}
