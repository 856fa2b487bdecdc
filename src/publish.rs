//! Redis stream publishing of built slates.

use std::time::Duration;

use anyhow::{anyhow, Result};
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::model::Slate;

pub const SLATE_STREAM: &str = "props.slate";

pub struct SlatePublisher {
    redis: redis::aio::ConnectionManager,
    stream: String,
}

impl SlatePublisher {
    pub async fn connect(url: &str, max_retries: u32) -> Result<Self> {
        let redis = connect_redis_with_retry(url, max_retries).await?;
        Ok(Self {
            redis,
            stream: SLATE_STREAM.to_string(),
        })
    }

    /// Publish one slate as a single stream entry.
    pub async fn publish(&self, slate: &Slate) -> Result<()> {
        let mut conn = self.redis.clone();
        let payload = serde_json::to_string(slate)?;

        let _: String = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    ("slate_id", slate.id.to_string()),
                    ("date", slate.date.clone()),
                    ("props", slate.props.len().to_string()),
                    ("stale", slate.provenance.stale.to_string()),
                    ("data", payload),
                ],
            )
            .await?;

        info!("Published slate {} ({} props) to Redis", slate.id, slate.props.len());
        Ok(())
    }
}

async fn connect_redis_with_retry(url: &str, max_retries: u32) -> Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url).map_err(|e| anyhow!("Invalid Redis URL: {}", e))?;
    let mut attempt = 0;
    loop {
        match redis::aio::ConnectionManager::new(client.clone()).await {
            Ok(conn) => {
                info!("Connected to Redis");
                return Ok(conn);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!("Failed to connect to Redis after {} attempts: {}", max_retries, e));
                }
                warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}
