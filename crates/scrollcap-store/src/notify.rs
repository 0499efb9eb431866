//! New-job notification channel over Redis pub/sub.
//!
//! The gateway publishes each submitted id on the `new_task` channel; the
//! dispatcher drains a dedicated pub/sub connection as a message stream.
//! Delivery is best-effort — handlers tolerate duplicates and reordering
//! by verifying document state themselves.

use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

use scrollcap_core::{defaults, JobId, Notifier, Result, Subscription};

/// Publisher half: one `PUBLISH` per submitted job id.
pub struct RedisNotifier {
    conn: ConnectionManager,
    channel: String,
}

impl RedisNotifier {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            channel: defaults::NOTIFY_CHANNEL.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RedisNotifier {
    async fn publish(&self, id: &JobId) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&self.channel, id.as_str()).await?;
        debug!(job_id = %id, channel = %self.channel, "job published");
        Ok(())
    }
}

/// Subscriber half: owns its pub/sub connection and yields ids as they
/// arrive, skipping payloads that do not parse as job ids.
pub struct RedisSubscription {
    messages: BoxStream<'static, redis::Msg>,
}

impl RedisSubscription {
    /// Connect a dedicated pub/sub connection and subscribe to the
    /// new-task channel.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(defaults::NOTIFY_CHANNEL).await?;
        Ok(Self {
            messages: pubsub.into_on_message().boxed(),
        })
    }
}

#[async_trait::async_trait]
impl Subscription for RedisSubscription {
    async fn next_id(&mut self) -> Result<Option<JobId>> {
        while let Some(msg) = self.messages.next().await {
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "undecodable pub/sub payload, skipping");
                    continue;
                }
            };
            match JobId::parse(&payload) {
                Ok(id) => return Ok(Some(id)),
                Err(_) => {
                    warn!(payload = %payload, "malformed job id on channel, skipping");
                }
            }
        }
        Ok(None)
    }
}
