//! Problems stored in Redis
//!
//! One key holds the whole problem set as JSON: `{"problems": [...]}`.
//! Lookups fetch the key and pick the record whose `id` matches.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{ProblemRecord, ProblemRepository, ProblemSummary, RepositoryError};

const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

pub struct RedisRepository {
    client: redis::Client,
    conn: Mutex<MultiplexedConnection>,
    key: String,
}

impl RedisRepository {
    pub async fn connect(url: &str, key: &str) -> Result<Self, RepositoryError> {
        let client = redis::Client::open(url)
            .map_err(|e| RepositoryError::Unavailable(format!("invalid Redis URL: {}", e)))?;
        let conn = get_connection_with_retry(&client).await?;
        info!("Connected to Redis at {} (key {})", url, key);

        Ok(Self {
            client,
            conn: Mutex::new(conn),
            key: key.to_string(),
        })
    }

    /// Read the problem set, reconnecting once on failure
    async fn load_raw(&self) -> Result<Option<String>, RepositoryError> {
        let mut conn = self.conn.lock().await;

        match conn.get::<_, Option<String>>(&self.key).await {
            Ok(raw) => Ok(raw),
            Err(e) => {
                warn!("Redis GET failed: {}. Reconnecting...", e);
                *conn = get_connection_with_retry(&self.client).await?;
                conn.get::<_, Option<String>>(&self.key)
                    .await
                    .map_err(|e| RepositoryError::Unavailable(e.to_string()))
            }
        }
    }

    async fn load_problems(&self) -> Result<Vec<ProblemRecord>, RepositoryError> {
        let raw = self.load_raw().await?;
        parse_problem_set(&self.key, raw.as_deref())
    }
}

/// Connect, giving up after a bounded number of attempts
async fn get_connection_with_retry(
    client: &redis::Client,
) -> Result<MultiplexedConnection, RepositoryError> {
    let mut last_error = String::new();
    for attempt in 1..=CONNECT_ATTEMPTS {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis (attempt {}/{}): {}",
                    attempt, CONNECT_ATTEMPTS, e
                );
                last_error = e.to_string();
                if attempt < CONNECT_ATTEMPTS {
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }
    Err(RepositoryError::Unavailable(last_error))
}

fn parse_problem_set(key: &str, raw: Option<&str>) -> Result<Vec<ProblemRecord>, RepositoryError> {
    let raw = raw.ok_or_else(|| RepositoryError::NotFound(format!("no problem set at {}", key)))?;

    let mut value: Value =
        serde_json::from_str(raw).map_err(|e| RepositoryError::Malformed(e.to_string()))?;
    let problems = value
        .get_mut("problems")
        .map(Value::take)
        .ok_or_else(|| RepositoryError::Malformed(format!("{} has no `problems` list", key)))?;

    serde_json::from_value(problems).map_err(|e| RepositoryError::Malformed(e.to_string()))
}

fn find_problem(problems: Vec<ProblemRecord>, id: &str) -> Result<ProblemRecord, RepositoryError> {
    problems
        .into_iter()
        .find(|p| p.id.as_ref().is_some_and(|pid| pid.as_str() == id))
        .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
}

#[async_trait]
impl ProblemRepository for RedisRepository {
    async fn fetch_problem(&self, id: &str) -> Result<ProblemRecord, RepositoryError> {
        find_problem(self.load_problems().await?, id)
    }

    async fn list_problems(&self) -> Result<Vec<ProblemSummary>, RepositoryError> {
        Ok(self
            .load_problems()
            .await?
            .iter()
            .map(ProblemRecord::summary)
            .collect())
    }
}
