use crate::errors::RunFailure;
use crate::models::Candle;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::Client;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PRICE_API_URL: &str = "PRICE_API_URL";
pub const ENV_PRICE_API_TIMEOUT_SECS: &str = "PRICE_API_TIMEOUT_SECS";
pub const ENV_PRICE_CACHE_PATH: &str = "PRICE_CACHE_PATH";
const DEFAULT_CACHE_PATH: &str = "data/prices_cache.json";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 20;

/// Abstract daily price source.
///
/// `get_daily_history` returns date-ascending bars and may be empty; the
/// simulator treats an empty history as "symbol unavailable" and moves on.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>>;

    /// Latest close per symbol; missing symbols are omitted. Live-path
    /// convenience, not used by the simulator.
    async fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>>;
}

/// JSON bars endpoint client.
///
/// Expected response shape: `{"data": [{"tradingDate": "...", "open": ...,
/// "high": ..., "low": ..., "close": ..., "volume": ...}]}`.
pub struct HttpProvider {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct BarsResponse {
    #[serde(default)]
    data: Vec<BarRow>,
}

#[derive(Deserialize)]
struct BarRow {
    #[serde(rename = "tradingDate")]
    trading_date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl HttpProvider {
    pub fn new(base_url: String, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build HTTP price client")?;
        Ok(Self { http, base_url })
    }
}

#[async_trait]
impl PriceProvider for HttpProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let from_param = from.to_string();
        let to_param = to.to_string();
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("ticker", symbol),
                ("type", "stock"),
                ("resolution", "D"),
                ("from", from_param.as_str()),
                ("to", to_param.as_str()),
            ])
            .send()
            .await
            .with_context(|| format!("history request failed for {}", symbol))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("history request for {} returned {}", symbol, status));
        }

        let payload: BarsResponse = response
            .json()
            .await
            .with_context(|| format!("invalid history payload for {}", symbol))?;

        let mut candles = Vec::with_capacity(payload.data.len());
        for row in payload.data {
            let date_part = row.trading_date.get(..10).unwrap_or(&row.trading_date);
            let Ok(date) = NaiveDate::parse_from_str(date_part, "%Y-%m-%d") else {
                debug!("{}: skipping bar with bad date '{}'", symbol, row.trading_date);
                continue;
            };
            if date < from || date > to {
                continue;
            }
            let candle = Candle {
                symbol: symbol.to_string(),
                date,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            };
            if candle.is_valid() {
                candles.push(candle);
            } else {
                debug!("{}: dropping malformed bar on {}", symbol, date);
            }
        }
        candles.sort_by_key(|c| c.date);
        candles.dedup_by_key(|c| c.date);
        Ok(candles)
    }

    async fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let today = chrono::Utc::now().date_naive();
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self
                .get_daily_history(symbol, today - chrono::Duration::days(14), today)
                .await
            {
                Ok(bars) => {
                    if let Some(last) = bars.last() {
                        prices.insert(symbol.clone(), last.close);
                    }
                }
                Err(err) => warn!("last price lookup failed for {}: {}", symbol, err),
            }
        }
        Ok(prices)
    }
}

/// Local JSON price cache, the offline last resort.
///
/// File layout: `{"SYM": {"last_price": ..., "history": {"YYYY-MM-DD":
/// {"open": ..., "high": ..., "low": ..., "close": ..., "volume": ...}}}}`.
pub struct CacheProvider {
    data: HashMap<String, CacheEntry>,
}

#[derive(Deserialize, Default)]
struct CacheEntry {
    #[serde(default)]
    last_price: Option<f64>,
    #[serde(default)]
    history: BTreeMap<String, CacheBar>,
}

#[derive(Deserialize)]
struct CacheBar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: f64,
}

impl CacheProvider {
    pub fn new(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(parsed) => parsed,
                Err(err) => {
                    warn!("cache: failed to parse {}: {}", path.display(), err);
                    HashMap::new()
                }
            },
            Err(err) => {
                debug!("cache: {} not readable ({})", path.display(), err);
                HashMap::new()
            }
        };
        Self { data }
    }
}

#[async_trait]
impl PriceProvider for CacheProvider {
    fn name(&self) -> &'static str {
        "cache"
    }

    async fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        let Some(entry) = self.data.get(symbol) else {
            return Ok(Vec::new());
        };

        let mut candles = Vec::new();
        for (date_str, bar) in &entry.history {
            let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") else {
                debug!("cache: skipping {}/{} with bad date", symbol, date_str);
                continue;
            };
            if date < from || date > to {
                continue;
            }
            let candle = Candle {
                symbol: symbol.to_string(),
                date,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
                volume: bar.volume,
            };
            if candle.is_valid() {
                candles.push(candle);
            }
        }
        // BTreeMap iteration over ISO dates is already ascending.
        Ok(candles)
    }

    async fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            if let Some(price) = self.data.get(symbol).and_then(|e| e.last_price) {
                prices.insert(symbol.clone(), price);
            }
        }
        Ok(prices)
    }
}

/// Fallback chain: providers are tried in order, the first non-empty
/// answer wins, and per-provider failures only degrade to the next link.
pub struct CompositeProvider {
    providers: Vec<Box<dyn PriceProvider>>,
}

impl CompositeProvider {
    pub fn new(providers: Vec<Box<dyn PriceProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl PriceProvider for CompositeProvider {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn get_daily_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Candle>> {
        for provider in &self.providers {
            match provider.get_daily_history(symbol, from, to).await {
                Ok(candles) if !candles.is_empty() => return Ok(candles),
                Ok(_) => debug!("{}: {} has no history, trying next", symbol, provider.name()),
                Err(err) => {
                    warn!(
                        "{}: provider {} failed ({}), trying next",
                        symbol,
                        provider.name(),
                        err
                    );
                }
            }
        }
        Ok(Vec::new())
    }

    async fn get_last_prices(&self, symbols: &[String]) -> Result<HashMap<String, f64>> {
        let mut prices: HashMap<String, f64> = HashMap::new();
        for provider in &self.providers {
            let missing: Vec<String> = symbols
                .iter()
                .filter(|s| !prices.contains_key(*s))
                .cloned()
                .collect();
            if missing.is_empty() {
                break;
            }
            match provider.get_last_prices(&missing).await {
                Ok(found) => prices.extend(found),
                Err(err) => warn!("provider {} failed last prices: {}", provider.name(), err),
            }
        }
        Ok(prices)
    }
}

/// Build the default provider chain from the environment:
/// HTTP endpoint (when `PRICE_API_URL` is set) falling back to the local
/// JSON cache.
pub fn default_provider() -> Result<Box<dyn PriceProvider>> {
    let mut providers: Vec<Box<dyn PriceProvider>> = Vec::new();

    if let Ok(base_url) = std::env::var(ENV_PRICE_API_URL) {
        let base_url = base_url.trim().to_string();
        if !base_url.is_empty() {
            let timeout = std::env::var(ENV_PRICE_API_TIMEOUT_SECS)
                .ok()
                .and_then(|raw| raw.parse::<u64>().ok())
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
            let http = HttpProvider::new(base_url, timeout)
                .map_err(|err| RunFailure::Provider(err.to_string()))?;
            providers.push(Box::new(http));
        }
    }

    let cache_path = std::env::var(ENV_PRICE_CACHE_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_PATH));
    providers.push(Box::new(CacheProvider::new(&cache_path)));

    Ok(Box::new(CompositeProvider::new(providers)))
}
