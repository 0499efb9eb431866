//! Redis connection handling.

use redis::aio::ConnectionManager;
use tracing::info;

use scrollcap_core::Result;

/// Open a managed Redis connection.
///
/// The connection manager multiplexes one underlying connection and
/// reconnects on failure; clones are cheap handles onto the same manager.
pub async fn connect(redis_url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(redis_url)?;
    let conn = ConnectionManager::new(client).await?;
    info!(
        url = %redis_url.replace(|c: char| c.is_ascii_alphanumeric(), "*"),
        "Redis connected"
    );
    Ok(conn)
}
