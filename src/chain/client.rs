// =============================================================================
// Chain client — typed access to the prediction-round contract
// =============================================================================
//
// Wraps one HTTP provider (request/response calls) and one WS provider
// (event subscriptions, §4.H's push-socket listener) behind a single type so
// nothing downstream constructs a provider by hand. Every call carries a
// `#[instrument]` span and an `anyhow` context string naming the call.
// =============================================================================

use std::str::FromStr;
use std::sync::Arc;

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::Filter;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolEvent;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::instrument;

use crate::config::RuntimeConfig;
use crate::types::{Side, TxHash, WalletAddress};

use super::contract::{IPredictionRound, AMOUNT_SCALE, PRICE_SCALE};
use super::convert::{decimal_to_u256, i256_to_decimal, u256_to_decimal};

/// One `rounds(epoch)` read, already converted to fixed-point `Decimal`.
#[derive(Debug, Clone)]
pub struct RoundData {
    pub epoch: i64,
    pub start_timestamp: i64,
    pub lock_timestamp: i64,
    pub close_timestamp: i64,
    pub lock_price: Decimal,
    pub close_price: Decimal,
    pub total_amount: Decimal,
    pub bull_amount: Decimal,
    pub bear_amount: Decimal,
    pub oracle_called: bool,
}

impl RoundData {
    /// Unfinalized rounds report zero prices; only a fully-resolved round is
    /// safe to cache per FETCH_ROUND's rule.
    pub fn is_finalized(&self) -> bool {
        self.lock_price > Decimal::ZERO && self.close_price > Decimal::ZERO
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry {
    pub amount: Decimal,
    pub claimed: bool,
}

/// A decoded `BetBull`/`BetBear` log, block metadata attached by the caller.
#[derive(Debug, Clone)]
pub struct BetEvent {
    pub sender: WalletAddress,
    pub epoch: i64,
    pub amount: Decimal,
    pub block_number: u64,
    pub tx_hash: TxHash,
}

/// A decoded `Claim` log. `epoch` here is the *bet* epoch named in the event
/// (`bet_epoch` in the store); the *submission* epoch is derived from the
/// block the log was mined in.
#[derive(Debug, Clone)]
pub struct ClaimEvent {
    pub sender: WalletAddress,
    pub bet_epoch: i64,
    pub amount: Decimal,
    pub block_number: u64,
}

/// A bet log tagged with which call emitted it, for the listener's single
/// merged subscription.
#[derive(Debug, Clone)]
pub struct TaggedBetEvent {
    pub side: Side,
    pub event: BetEvent,
}

pub struct ChainClient {
    contract_addr: Address,
    http: Arc<dyn Provider + Send + Sync>,
    ws: Arc<dyn Provider + Send + Sync>,
    our_address: Address,
}

impl ChainClient {
    pub async fn connect(cfg: &RuntimeConfig) -> Result<Self> {
        let contract_addr = cfg
            .contract_addr
            .parse::<Address>()
            .context("parsing CONTRACT_ADDR")?;

        let signer = PrivateKeySigner::from_str(&cfg.private_key)
            .context("parsing PRIVATE_KEY as a local signer")?;
        let our_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let http = ProviderBuilder::new()
            .wallet(wallet)
            .on_http(cfg.rpc_url.parse().context("parsing RPC_URL")?);

        let ws = ProviderBuilder::new()
            .on_ws(WsConnect::new(cfg.wss_url.clone()))
            .await
            .context("connecting WSS_URL provider")?;

        Ok(Self {
            contract_addr,
            http: Arc::new(http),
            ws: Arc::new(ws),
            our_address,
        })
    }

    pub fn our_address(&self) -> WalletAddress {
        WalletAddress::parse(&self.our_address.to_string()).expect("signer address is always valid hex")
    }

    fn contract(&self) -> IPredictionRound::IPredictionRoundInstance<(), Arc<dyn Provider + Send + Sync>> {
        IPredictionRound::new(self.contract_addr, self.http.clone())
    }

    #[instrument(skip(self))]
    pub async fn current_epoch(&self) -> Result<i64> {
        let epoch = self
            .contract()
            .currentEpoch()
            .call()
            .await
            .context("currentEpoch() call failed")?
            ._0;
        Ok(epoch.to::<u64>() as i64)
    }

    #[instrument(skip(self))]
    pub async fn buffer_seconds(&self) -> Result<i64> {
        let secs = self
            .contract()
            .bufferSeconds()
            .call()
            .await
            .context("bufferSeconds() call failed")?
            ._0;
        Ok(secs.to::<u64>() as i64)
    }

    #[instrument(skip(self), fields(epoch))]
    pub async fn round(&self, epoch: i64) -> Result<RoundData> {
        let r = self
            .contract()
            .rounds(alloy::primitives::U256::from(epoch as u64))
            .call()
            .await
            .context("rounds(epoch) call failed")?;

        Ok(RoundData {
            epoch,
            start_timestamp: r.startTimestamp.to::<u64>() as i64,
            lock_timestamp: r.lockTimestamp.to::<u64>() as i64,
            close_timestamp: r.closeTimestamp.to::<u64>() as i64,
            lock_price: i256_to_decimal(r.lockPrice, PRICE_SCALE)?,
            close_price: i256_to_decimal(r.closePrice, PRICE_SCALE)?,
            total_amount: u256_to_decimal(r.totalAmount, AMOUNT_SCALE)?,
            bull_amount: u256_to_decimal(r.bullAmount, AMOUNT_SCALE)?,
            bear_amount: u256_to_decimal(r.bearAmount, AMOUNT_SCALE)?,
            oracle_called: r.oracleCalled,
        })
    }

    #[instrument(skip(self), fields(epoch))]
    pub async fn ledger(&self, epoch: i64, addr: &WalletAddress) -> Result<LedgerEntry> {
        let who = addr.as_str().parse::<Address>().context("parsing wallet address")?;
        let entry = self
            .contract()
            .ledger(alloy::primitives::U256::from(epoch as u64), who)
            .call()
            .await
            .context("ledger(epoch, addr) call failed")?;

        Ok(LedgerEntry {
            amount: u256_to_decimal(entry.amount, AMOUNT_SCALE)?,
            claimed: entry.claimed,
        })
    }

    #[instrument(skip(self), fields(epoch))]
    pub async fn gas_price(&self) -> Result<u128> {
        self.http.get_gas_price().await.context("get_gas_price failed")
    }

    /// Submit `betBull`/`betBear` for `epoch` with value `amount` (native
    /// token, 18-decimal). `nonce` pins the trader's pre-reserved nonce;
    /// `gas_price` overrides the node's suggestion (already gas-bumped by
    /// the caller).
    #[instrument(skip(self), fields(epoch, side = ?side))]
    pub async fn submit_bet(
        &self,
        side: Side,
        epoch: i64,
        amount: Decimal,
        nonce: Option<u64>,
        gas_price: Option<u128>,
    ) -> Result<TxHash> {
        let value = decimal_to_u256(amount, AMOUNT_SCALE)?;
        let epoch_u256 = alloy::primitives::U256::from(epoch as u64);

        let contract = self.contract();
        let mut call = match side {
            Side::Up => contract.betBull(epoch_u256),
            Side::Down => contract.betBear(epoch_u256),
        }
        .value(value);

        if let Some(n) = nonce {
            call = call.nonce(n);
        }
        if let Some(gp) = gas_price {
            call = call.gas_price(gp);
        }

        let pending = call.send().await.context("sending bet transaction")?;
        let tx_hash = *pending.tx_hash();
        pending.get_receipt().await.context("awaiting bet confirmation")?;

        TxHash::parse(&tx_hash.to_string())
    }

    /// Reserve the next pending nonce for our address, without sending a
    /// transaction (used when arming).
    #[instrument(skip(self))]
    pub async fn pending_nonce(&self) -> Result<u64> {
        self.http
            .get_transaction_count(self.our_address)
            .pending()
            .await
            .context("fetching pending nonce")
    }

    #[instrument(skip(self))]
    pub async fn block_timestamp(&self, block_number: u64) -> Result<DateTime<Utc>> {
        let block = self
            .http
            .get_block_by_number(block_number.into())
            .await
            .context("get_block_by_number failed")?
            .context("block not found")?;
        Utc.timestamp_opt(block.header.timestamp as i64, 0)
            .single()
            .context("block timestamp out of range")
    }

    /// Three concurrent `queryFilter`-equivalent calls over an inclusive
    /// block range: `BetBull(_, epoch)`, `BetBear(_, epoch)`, `Claim()`.
    #[instrument(skip(self), fields(epoch, from_block, to_block))]
    pub async fn fetch_round_events(
        &self,
        epoch: i64,
        from_block: u64,
        to_block: u64,
    ) -> Result<(Vec<BetEvent>, Vec<BetEvent>, Vec<ClaimEvent>)> {
        let epoch_u256 = alloy::primitives::U256::from(epoch as u64);

        let bull_filter = Filter::new()
            .address(self.contract_addr)
            .event_signature(IPredictionRound::BetBull::SIGNATURE_HASH)
            .topic2(epoch_u256)
            .from_block(from_block)
            .to_block(to_block);
        let bear_filter = Filter::new()
            .address(self.contract_addr)
            .event_signature(IPredictionRound::BetBear::SIGNATURE_HASH)
            .topic2(epoch_u256)
            .from_block(from_block)
            .to_block(to_block);
        let claim_filter = Filter::new()
            .address(self.contract_addr)
            .event_signature(IPredictionRound::Claim::SIGNATURE_HASH)
            .from_block(from_block)
            .to_block(to_block);

        let (bull_logs, bear_logs, claim_logs) = tokio::try_join!(
            self.http.get_logs(&bull_filter),
            self.http.get_logs(&bear_filter),
            self.http.get_logs(&claim_filter),
        )
        .context("querying BetBull/BetBear/Claim logs")?;

        let bull = bull_logs
            .into_iter()
            .map(decode_bull_log)
            .collect::<Result<Vec<_>>>()?;
        let bear = bear_logs
            .into_iter()
            .map(decode_bear_log)
            .collect::<Result<Vec<_>>>()?;
        let claims = claim_logs
            .into_iter()
            .map(decode_claim_log)
            .collect::<Result<Vec<_>>>()?;

        Ok((bull, bear, claims))
    }

    /// Live `BetBull`/`BetBear` push subscription over the WS provider, for
    /// the listener of §4.H. One call per connection; the caller owns
    /// reconnect-with-backoff around drops.
    #[instrument(skip(self))]
    pub async fn subscribe_bet_logs(
        &self,
    ) -> Result<impl futures_util::Stream<Item = Result<TaggedBetEvent>>> {
        use futures_util::StreamExt;

        let filter = Filter::new().address(self.contract_addr).topic0(vec![
            IPredictionRound::BetBull::SIGNATURE_HASH,
            IPredictionRound::BetBear::SIGNATURE_HASH,
        ]);

        let sub = self
            .ws
            .subscribe_logs(&filter)
            .await
            .context("subscribing to BetBull/BetBear logs")?;

        Ok(sub.into_stream().map(|log| {
            let topic0 = log.topic0().copied();
            if topic0 == Some(IPredictionRound::BetBull::SIGNATURE_HASH) {
                decode_bull_log(log).map(|event| TaggedBetEvent { side: Side::Up, event })
            } else {
                decode_bear_log(log).map(|event| TaggedBetEvent { side: Side::Down, event })
            }
        }))
    }
}

fn decode_bull_log(log: alloy::rpc::types::Log) -> Result<BetEvent> {
    let block_number = log.block_number.context("log missing block number")?;
    let tx_hash = log.transaction_hash.context("log missing tx hash")?;
    let decoded: alloy::primitives::Log<IPredictionRound::BetBull> =
        log.log_decode().context("decoding BetBull log")?;
    let inner = decoded.inner.data;
    Ok(BetEvent {
        sender: WalletAddress::parse(&inner.sender.to_string())?,
        epoch: inner.epoch.to::<u64>() as i64,
        amount: u256_to_decimal(inner.amount, AMOUNT_SCALE)?,
        block_number,
        tx_hash: TxHash::parse(&tx_hash.to_string())?,
    })
}

fn decode_bear_log(log: alloy::rpc::types::Log) -> Result<BetEvent> {
    let block_number = log.block_number.context("log missing block number")?;
    let tx_hash = log.transaction_hash.context("log missing tx hash")?;
    let decoded: alloy::primitives::Log<IPredictionRound::BetBear> =
        log.log_decode().context("decoding BetBear log")?;
    let inner = decoded.inner.data;
    Ok(BetEvent {
        sender: WalletAddress::parse(&inner.sender.to_string())?,
        epoch: inner.epoch.to::<u64>() as i64,
        amount: u256_to_decimal(inner.amount, AMOUNT_SCALE)?,
        block_number,
        tx_hash: TxHash::parse(&tx_hash.to_string())?,
    })
}

fn decode_claim_log(log: alloy::rpc::types::Log) -> Result<ClaimEvent> {
    let block_number = log.block_number.context("log missing block number")?;
    let decoded: alloy::primitives::Log<IPredictionRound::Claim> =
        log.log_decode().context("decoding claim log")?;
    let inner = decoded.inner.data;
    Ok(ClaimEvent {
        sender: WalletAddress::parse(&inner.sender.to_string())?,
        bet_epoch: inner.epoch.to::<u64>() as i64,
        amount: u256_to_decimal(inner.amount, AMOUNT_SCALE)?,
        block_number,
    })
}
