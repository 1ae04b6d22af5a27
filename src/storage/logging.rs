//! Fire-and-forget request logging.

use sqlx::SqlitePool;

/// One gateway request outcome, success or failure.
#[derive(Debug, Clone)]
pub struct RequestLog {
    pub correlation_id: String,
    pub timestamp: String,
    /// The caller's raw model field (possibly a fallback list).
    pub model: String,
    /// Provider that served the request, when one did.
    pub provider: Option<String>,
    /// "byok" or "ptb", when a provider served the request.
    pub auth_mode: Option<String>,
    pub streaming: bool,
    /// Attempts consumed, including the successful one (or all, on failure).
    pub attempts: i64,
    pub latency_ms: i64,
    pub success: bool,
    pub error_status: Option<u16>,
    pub error_message: Option<String>,
}

/// Insert a request log row.
pub async fn write_log(pool: &SqlitePool, log: &RequestLog) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO gateway_requests (
            correlation_id, timestamp, model, provider, auth_mode,
            streaming, attempts, latency_ms, success, error_status, error_message
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&log.correlation_id)
    .bind(&log.timestamp)
    .bind(&log.model)
    .bind(&log.provider)
    .bind(&log.auth_mode)
    .bind(log.streaming)
    .bind(log.attempts)
    .bind(log.latency_ms)
    .bind(log.success)
    .bind(log.error_status.map(i64::from))
    .bind(&log.error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Write a log entry off the request's critical path.
pub fn spawn_log_write(pool: &SqlitePool, log: RequestLog) {
    let pool = pool.clone();
    tokio::spawn(async move {
        if let Err(error) = write_log(&pool, &log).await {
            tracing::error!(
                correlation_id = %log.correlation_id,
                error = %error,
                "Failed to write request log"
            );
        }
    });
}
