// =============================================================================
// Distributed per-epoch lock
// =============================================================================
//
// `SET processing:epoch:E NX PX 300000`; held across one LOCK_ACQUIRE..COMMIT
// span and released via a compare-and-delete Lua script so a guard never
// deletes a lock some other process re-acquired after this one's TTL expired.
// =============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{instrument, warn};
use uuid::Uuid;

const LOCK_TTL_MS: usize = 300_000;

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

pub struct EpochLock {
    conn: ConnectionManager,
}

impl EpochLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Attempt to acquire the lock for `epoch`. `Ok(None)` means another
    /// worker currently holds it (LOCK_ACQUIRE should short-circuit to SKIP).
    #[instrument(skip(self))]
    pub async fn acquire(&self, epoch: i64) -> Result<Option<EpochLockGuard>> {
        let key = lock_key(epoch);
        let token = Uuid::new_v4().to_string();
        let mut conn = self.conn.clone();

        let acquired: bool = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(LOCK_TTL_MS)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .context("SET NX PX for epoch lock")?
            .is_some();

        if !acquired {
            return Ok(None);
        }

        Ok(Some(EpochLockGuard { conn, key, token, released: false }))
    }
}

/// Released in the sync state machine's FAIL/COMMIT_DONE path via
/// `release()`, which observes the outcome directly. `Drop` is a safety net
/// for any path that returns early without calling it (a true "finally") —
/// it fires the same compare-and-delete on a detached task, best-effort.
pub struct EpochLockGuard {
    conn: ConnectionManager,
    key: String,
    token: String,
    released: bool,
}

impl EpochLockGuard {
    #[instrument(skip(self))]
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(&self.key)
            .arg(&self.token)
            .invoke_async(&mut self.conn)
            .await
            .context("releasing epoch lock")?;

        if released == 0 {
            warn!(key = %self.key, "epoch lock already expired or re-acquired by another worker");
        }
        Ok(())
    }
}

impl Drop for EpochLockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut conn = self.conn.clone();
        let key = self.key.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let result: Result<i64, redis::RedisError> = redis::Script::new(RELEASE_SCRIPT)
                .key(&key)
                .arg(&token)
                .invoke_async(&mut conn)
                .await;
            if let Err(err) = result {
                warn!(%key, error = %err, "best-effort epoch lock release on drop failed");
            }
        });
    }
}

fn lock_key(epoch: i64) -> String {
    format!("processing:epoch:{epoch}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_key_matches_expected_format() {
        assert_eq!(lock_key(419_131), "processing:epoch:419131");
    }
}
