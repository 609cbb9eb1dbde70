// =============================================================================
// Durable event buffer — Redis Streams
// =============================================================================
//
// Append-only log with one named consumer group and per-entry acknowledgement.
// Only live bets are written here; round updates and predictions are pub/sub
// only (§4.C) and are never buffered.
// =============================================================================

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{instrument, warn};

use crate::types::Bet;

/// One stream entry pending processing: its Redis entry id and the decoded bet.
#[derive(Debug, Clone)]
pub struct BufferedBet {
    pub entry_id: String,
    pub bet: Bet,
}

pub struct DurableBuffer {
    conn: ConnectionManager,
    stream: String,
    group: String,
    consumer: String,
}

impl DurableBuffer {
    /// Connects and ensures the consumer group exists (`XGROUP CREATE ... $
    /// MKSTREAM`); a pre-existing group is not an error.
    #[instrument(skip(redis_url))]
    pub async fn connect(redis_url: &str, stream: &str, group: &str, consumer: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("opening redis client")?;
        let mut conn = ConnectionManager::new(client)
            .await
            .context("establishing redis connection manager")?;

        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        if let Err(err) = created {
            if !err.to_string().contains("BUSYGROUP") {
                return Err(err).context("creating consumer group");
            }
        }

        Ok(Self {
            conn,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
        })
    }

    /// `XADD` one live bet, JSON-encoded under the `data` field. Returns the
    /// assigned entry id.
    #[instrument(skip(self, bet))]
    pub async fn append(&mut self, bet: &Bet) -> Result<String> {
        let payload = serde_json::to_string(bet).context("encoding bet for XADD")?;
        let id: String = self
            .conn
            .xadd(&self.stream, "*", &[("data", payload)])
            .await
            .context("XADD failed")?;
        Ok(id)
    }

    /// `XREADGROUP ... COUNT count BLOCK block_ms STREAMS stream >` — new,
    /// never-delivered entries only.
    #[instrument(skip(self))]
    pub async fn read_batch(&mut self, count: usize, block_ms: usize) -> Result<Vec<BufferedBet>> {
        let reply: redis::streams::StreamReadReply = self
            .conn
            .xread_options(
                &[&self.stream],
                &[">"],
                &redis::streams::StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .count(count)
                    .block(block_ms),
            )
            .await
            .context("XREADGROUP failed")?;

        decode_stream_reply(reply)
    }

    /// `XACK` a batch of entry ids.
    #[instrument(skip(self, ids))]
    pub async fn ack(&mut self, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: i64 = self
            .conn
            .xack(&self.stream, &self.group, ids)
            .await
            .context("XACK failed")?;
        Ok(())
    }

    /// `XPENDING` summary followed by `XCLAIM` for entries idle longer than
    /// `min_idle_ms`, reclaimed by this same consumer (single-consumer group,
    /// so this recovers a crashed-and-restarted process's own backlog).
    #[instrument(skip(self))]
    pub async fn claim_stale(&mut self, min_idle_ms: i64) -> Result<Vec<BufferedBet>> {
        let pending: redis::streams::StreamPendingCountReply = self
            .conn
            .xpending_count(&self.stream, &self.group, "-", "+", 1000)
            .await
            .context("XPENDING failed")?;

        let stale_ids: Vec<String> = pending
            .ids
            .into_iter()
            .filter(|p| p.time_since_delivered as i64 >= min_idle_ms)
            .map(|p| p.id)
            .collect();

        if stale_ids.is_empty() {
            return Ok(Vec::new());
        }

        warn!(count = stale_ids.len(), "reclaiming stale stream entries");

        let reply: redis::streams::StreamClaimReply = self
            .conn
            .xclaim(
                &self.stream,
                &self.group,
                &self.consumer,
                min_idle_ms as usize,
                &stale_ids,
            )
            .await
            .context("XCLAIM failed")?;

        reply
            .ids
            .into_iter()
            .map(decode_stream_id)
            .collect::<Result<Vec<_>>>()
    }

    /// `XLEN` — total stream length, exposed for monitoring.
    #[instrument(skip(self))]
    pub async fn xlen(&mut self) -> Result<u64> {
        self.conn.xlen(&self.stream).await.context("XLEN failed")
    }
}

fn decode_stream_id(id: redis::streams::StreamId) -> Result<BufferedBet> {
    let raw: &redis::Value = id.map.get("data").context("stream entry missing data field")?;
    let bytes: Vec<u8> = redis::from_redis_value(raw).context("decoding stream data field")?;
    let bet: Bet = serde_json::from_slice(&bytes).context("decoding bet JSON from stream entry")?;
    Ok(BufferedBet { entry_id: id.id.clone(), bet })
}

fn decode_stream_reply(reply: redis::streams::StreamReadReply) -> Result<Vec<BufferedBet>> {
    let mut out = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            out.push(decode_stream_id(id)?);
        }
    }
    Ok(out)
}
