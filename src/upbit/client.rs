// =============================================================================
// Upbit REST API Client — public market-data endpoints
// =============================================================================
//
// Only unauthenticated quotation endpoints are used here (candles, ticker).
// Account access and order placement go through the `Broker` boundary and are
// not part of this client.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::timeframe::{kst, Timeframe};
use crate::types::Candle;

/// Maximum candles per request accepted by the venue.
pub const CANDLE_PAGE_LIMIT: usize = 200;

/// Pause between paginated candle requests, to stay under the venue's
/// per-second quota.
const PAGE_DELAY_MS: u64 = 500;

const DEFAULT_BASE_URL: &str = "https://api.upbit.com";

/// Timestamp layout used by the venue's candle payloads (local KST, no zone).
const KST_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// One historical candle row as returned by `/v1/candles/...`.
#[derive(Debug, Deserialize)]
struct QuotationCandle {
    market: String,
    candle_date_time_kst: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

#[derive(Debug, Deserialize)]
struct TickerRow {
    trade_price: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// REST client for the venue's public quotation API.
#[derive(Clone)]
pub struct UpbitClient {
    base_url: String,
    http: reqwest::Client,
}

impl Default for UpbitClient {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl UpbitClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.into(),
            http,
        }
    }

    // -------------------------------------------------------------------------
    // Candles
    // -------------------------------------------------------------------------

    /// Fetch up to `limit` most recent candles for `(pair, timeframe)`,
    /// sorted ascending by time.
    pub async fn candles_by_limit(
        &self,
        pair: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        anyhow::ensure!(
            limit <= CANDLE_PAGE_LIMIT,
            "candles limit exceeds {CANDLE_PAGE_LIMIT}"
        );

        let mut candles = self.fetch_candle_page(pair, timeframe, limit, None).await?;
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }

    /// Fetch every candle for `(pair, timeframe)` in the inclusive range
    /// `[start, end]`, sorted ascending.
    ///
    /// The venue paginates newest-first, so pages are walked backward from
    /// `end` until the oldest row returned is no longer after `start`, with a
    /// fixed delay between requests.
    pub async fn candles_by_period(
        &self,
        pair: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let mut all = Vec::new();
        let mut to = end;

        loop {
            let page = self
                .fetch_candle_page(pair, timeframe, CANDLE_PAGE_LIMIT, Some(to))
                .await?;
            let Some(oldest) = page.iter().map(|c| c.time).min() else {
                break;
            };
            all.extend(page);

            if oldest <= start {
                break;
            }
            to = oldest;
            tokio::time::sleep(std::time::Duration::from_millis(PAGE_DELAY_MS)).await;
        }

        all.sort_by_key(|c| c.time);
        all.retain(|c| c.time >= start && c.time <= end);
        debug!(pair, %timeframe, count = all.len(), "historical candles fetched");
        Ok(all)
    }

    async fn fetch_candle_page(
        &self,
        pair: &str,
        timeframe: Timeframe,
        count: usize,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>> {
        let mut url = format!(
            "{}/v1/candles/{}?market={}&count={}",
            self.base_url,
            timeframe.rest_path(),
            pair,
            count
        );
        if let Some(to) = to {
            // The venue expects a zoned timestamp; send venue-local time.
            let local = to.with_timezone(&kst()).format(KST_TIME_LAYOUT);
            url.push_str(&format!("&to={local}%2B09:00"));
        }

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("GET /v1/candles request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Upbit GET /v1/candles returned {status}: {body}");
        }

        let rows: Vec<QuotationCandle> = resp
            .json()
            .await
            .context("failed to parse candles response")?;

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_quotation_candle(row) {
                Ok(c) => candles.push(c),
                Err(e) => warn!(error = %e, "skipping malformed candle row"),
            }
        }
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Ticker
    // -------------------------------------------------------------------------

    /// Latest trade price for `pair` via `/v1/ticker`.
    pub async fn last_quote(&self, pair: &str) -> Result<f64> {
        let url = format!("{}/v1/ticker?markets={}", self.base_url, pair);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("GET /v1/ticker request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Upbit GET /v1/ticker returned {status}: {body}");
        }

        let rows: Vec<TickerRow> = resp
            .json()
            .await
            .context("failed to parse ticker response")?;

        let row = rows
            .first()
            .with_context(|| format!("no ticker data for {pair}"))?;
        Ok(row.trade_price)
    }
}

/// Parse a venue-local (KST) candle timestamp into UTC.
pub(crate) fn parse_kst_time(s: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(s, KST_TIME_LAYOUT)
        .with_context(|| format!("failed to parse KST timestamp '{s}'"))?;
    let local = naive
        .and_local_timezone(kst())
        .single()
        .context("fixed offset times are unambiguous")?;
    Ok(local.with_timezone(&Utc))
}

fn parse_quotation_candle(row: QuotationCandle) -> Result<Candle> {
    let time = parse_kst_time(&row.candle_date_time_kst)?;
    Ok(Candle {
        pair: row.market,
        time,
        updated_at: time,
        open: row.opening_price,
        high: row.high_price,
        low: row.low_price,
        close: row.trade_price,
        volume: row.candle_acc_trade_volume,
        complete: true, // historical rows are closed by definition
        metadata: Default::default(),
    })
}

impl std::fmt::Debug for UpbitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpbitClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
