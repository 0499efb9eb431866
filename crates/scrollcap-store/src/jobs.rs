//! Redis job store implementation.
//!
//! Documents live as JSON strings under `videos:{id}`. Creation is a plain
//! `SET NX` so it can never overwrite; `merge` and `try_transition` are Lua
//! scripts so the read-overlay-write happens in one atomic round trip
//! instead of a racy get-then-set.

use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, instrument};

use scrollcap_core::{Error, JobId, JobPatch, JobRecord, JobStatus, JobStore, Result};

/// Overlay ARGV[1] (a JSON object) onto the stored document and bump
/// `updated_at` to ARGV[2]. Returns 0 when the document is missing.
const MERGE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local doc = cjson.decode(raw)
for k, v in pairs(cjson.decode(ARGV[1])) do
  doc[k] = v
end
doc['updated_at'] = ARGV[2]
redis.call('SET', KEYS[1], cjson.encode(doc))
return 1
"#;

/// Compare-and-swap over the status field: only when the stored status
/// equals ARGV[1] does the document take ARGV[2] (plus the ARGV[3] overlay,
/// `updated_at` = ARGV[4]). Returns 1 iff the transition won.
const TRANSITION_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local doc = cjson.decode(raw)
if doc['status'] ~= ARGV[1] then
  return 0
end
for k, v in pairs(cjson.decode(ARGV[3])) do
  doc[k] = v
end
doc['status'] = ARGV[2]
doc['updated_at'] = ARGV[4]
redis.call('SET', KEYS[1], cjson.encode(doc))
return 1
"#;

/// Redis implementation of [`JobStore`].
pub struct RedisJobStore {
    conn: ConnectionManager,
    prefix: String,
    merge_script: Script,
    transition_script: Script,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self::with_prefix(conn, scrollcap_core::defaults::JOB_KEY_PREFIX)
    }

    pub fn with_prefix(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            merge_script: Script::new(MERGE_SCRIPT),
            transition_script: Script::new(TRANSITION_SCRIPT),
        }
    }

    fn key(&self, id: &JobId) -> String {
        format!("{}{}", self.prefix, id)
    }
}

#[async_trait::async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip(self), fields(subsystem = "store"))]
    async fn create(&self, id: &JobId, url: &str) -> Result<bool> {
        let doc = serde_json::to_string(&JobRecord::started(url))?;
        let mut conn = self.conn.clone();
        let created: bool = conn.set_nx(self.key(id), doc).await?;
        debug!(job_id = %id, created, "job create");
        Ok(created)
    }

    async fn get(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.key(id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn merge(&self, id: &JobId, patch: JobPatch) -> Result<()> {
        let patch_json = serde_json::to_string(&patch)?;
        let mut conn = self.conn.clone();
        let applied: i32 = self
            .merge_script
            .key(self.key(id))
            .arg(patch_json)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        if applied == 0 {
            return Err(Error::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn try_transition(
        &self,
        id: &JobId,
        from: JobStatus,
        to: JobStatus,
        patch: JobPatch,
    ) -> Result<bool> {
        let patch_json = serde_json::to_string(&patch)?;
        let mut conn = self.conn.clone();
        let won: i32 = self
            .transition_script
            .key(self.key(id))
            .arg(from.as_str())
            .arg(to.as_str())
            .arg(patch_json)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        debug!(job_id = %id, %from, %to, won = won == 1, "job transition");
        Ok(won == 1)
    }

    async fn delete(&self, id: &JobId) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.key(id)).await?;
        Ok(removed > 0)
    }

    async fn clear(&self) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", self.prefix);
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(&pattern)
            .query_async(&mut conn)
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        conn.del::<_, ()>(&keys[..]).await?;
        Ok(keys.len() as u64)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
