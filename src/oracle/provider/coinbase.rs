//! Coinbase Exchange WebSocket provider
//!
//! Keeps one websocket open to the Coinbase feed, caching the latest ticker
//! and the last ten minutes of matches for every subscribed pair. A
//! background task reads the socket and reconnects when the feed goes quiet.
//!
//! REF: https://docs.cloud.coinbase.com/exchange/docs/websocket-overview

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::{Provider, ProviderName, PROVIDER_CANDLE_PERIOD};
use crate::error::ProviderError;
use crate::metrics;
use crate::types::{past_unix_time, CandlePrice, CurrencyPair, TickerPrice};

pub const COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";
/// The server pushes at least every 30s; reconnect if nothing arrives within this.
const COINBASE_PING_CHECK: Duration = Duration::from_secs(28);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const TRADE_TIME_LAYOUT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const PING_PAYLOAD: &[u8] = b"ping";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Subscribe request for the matches and ticker channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinbaseSubscriptionMsg {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub product_ids: Vec<String>,
    pub channels: Vec<String>,
}

impl CoinbaseSubscriptionMsg {
    pub fn new(product_ids: Vec<String>) -> Self {
        Self {
            msg_type: "subscribe".to_string(),
            product_ids,
            channels: vec!["matches".to_string(), "ticker".to_string()],
        }
    }
}

/// Generic frame, only used to read the discriminant
#[derive(Debug, Deserialize)]
struct CoinbaseEnvelope {
    #[serde(rename = "type")]
    msg_type: String,
}

#[derive(Debug, Deserialize)]
struct CoinbaseErrResponse {
    #[serde(default)]
    message: String,
    #[serde(default)]
    reason: String,
}

/// `match` / `last_match` frame
#[derive(Debug, Clone, Deserialize)]
struct CoinbaseTradeResponse {
    product_id: String,
    time: String,
    size: String,
    price: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CoinbaseTicker {
    product_id: String,
    price: String,
    #[serde(rename = "volume_24h")]
    volume: String,
}

/// A cached match
#[derive(Debug, Clone, PartialEq)]
struct CoinbaseTrade {
    /// Epoch milliseconds
    time: i64,
    size: String,
    price: String,
}

impl CoinbaseTradeResponse {
    /// Exchange seconds -> epoch milliseconds.
    fn time_to_unix_millis(&self) -> Option<i64> {
        chrono::NaiveDateTime::parse_from_str(&self.time, TRADE_TIME_LAYOUT)
            .ok()
            .map(|t| t.and_utc().timestamp() * 1000)
    }

    fn to_trade(&self) -> Option<CoinbaseTrade> {
        Some(CoinbaseTrade {
            time: self.time_to_unix_millis()?,
            size: self.size.clone(),
            price: self.price.clone(),
        })
    }
}

#[derive(Debug, Default)]
struct CoinbaseCache {
    /// pair string => latest ticker
    tickers: HashMap<String, CoinbaseTicker>,
    /// pair string => trades, newest first
    trades: HashMap<String, VecDeque<CoinbaseTrade>>,
    /// pair string => pair
    subscribed_pairs: HashMap<String, CurrencyPair>,
}

/// Prepend `trade` and drop everything at or before `stale_before`.
fn insert_trade(history: &mut VecDeque<CoinbaseTrade>, trade: CoinbaseTrade, stale_before: i64) {
    history.push_front(trade);
    history.retain(|t| t.time > stale_before);
}

/// State shared between the provider handle and its receive task
struct Shared {
    url: String,
    cache: RwLock<CoinbaseCache>,
    sink: Mutex<Option<WsSink>>,
    reconnect_requested: Notify,
}

impl Shared {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            cache: RwLock::new(CoinbaseCache::default()),
            sink: Mutex::new(None),
            reconnect_requested: Notify::new(),
        }
    }

    async fn dial(&self) -> Result<WsSource, ProviderError> {
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, stream) = ws_stream.split();
        *self.sink.lock().await = Some(sink);
        Ok(stream)
    }

    async fn send(&self, msg: Message) -> Result<(), ProviderError> {
        let mut sink = self.sink.lock().await;
        let sink = sink
            .as_mut()
            .ok_or(ProviderError::NotConnected(ProviderName::Coinbase))?;
        sink.send(msg).await?;
        Ok(())
    }

    async fn subscribe(&self, pairs: &[CurrencyPair]) -> Result<(), ProviderError> {
        let product_ids = pairs.iter().map(currency_pair_to_coinbase_pair).collect();
        let msg = CoinbaseSubscriptionMsg::new(product_ids);
        self.send(Message::Text(serde_json::to_string(&msg)?)).await
    }

    async fn set_subscribed_pairs(&self, pairs: &[CurrencyPair]) {
        let mut cache = self.cache.write().await;
        for pair in pairs {
            cache.subscribed_pairs.insert(pair.to_string(), pair.clone());
        }
    }

    async fn subscribed_pairs(&self) -> Vec<CurrencyPair> {
        let cache = self.cache.read().await;
        cache.subscribed_pairs.values().cloned().collect()
    }

    async fn ping(&self) -> Result<(), ProviderError> {
        self.send(Message::Ping(PING_PAYLOAD.to_vec())).await
    }

    /// Best-effort close of the current connection.
    async fn close(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
    }

    /// Replace the connection and re-subscribe every known pair.
    /// Caches are kept.
    async fn reconnect(&self) -> Result<WsSource, ProviderError> {
        self.close().await;

        tracing::debug!(provider = %ProviderName::Coinbase, url = %self.url, "Reconnecting websocket");
        let stream = self.dial().await?;

        let pairs = self.subscribed_pairs().await;
        if !pairs.is_empty() {
            self.subscribe(&pairs).await?;
        }
        Ok(stream)
    }

    async fn message_received(&self, text: &str) {
        let envelope: CoinbaseEnvelope = match serde_json::from_str(text) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(provider = %ProviderName::Coinbase, error = %e, "Unable to unmarshal message");
                return;
            }
        };

        match envelope.msg_type.as_str() {
            "error" => match serde_json::from_str::<CoinbaseErrResponse>(text) {
                Ok(err) => tracing::warn!(
                    provider = %ProviderName::Coinbase,
                    error_message = %err.message,
                    reason = %err.reason,
                    "Error frame received"
                ),
                Err(e) => {
                    tracing::debug!(provider = %ProviderName::Coinbase, error = %e, "Unable to unmarshal error frame")
                }
            },
            "subscriptions" => {}
            "ticker" => match serde_json::from_str::<CoinbaseTicker>(text) {
                Ok(ticker) => self.set_ticker_pair(ticker).await,
                Err(e) => {
                    tracing::debug!(provider = %ProviderName::Coinbase, error = %e, "Unable to unmarshal ticker")
                }
            },
            _ => match serde_json::from_str::<CoinbaseTradeResponse>(text) {
                Ok(trade) => self.set_trade_pair(trade).await,
                Err(e) => tracing::debug!(
                    provider = %ProviderName::Coinbase,
                    msg_type = %envelope.msg_type,
                    error = %e,
                    "Dropping unrecognised frame"
                ),
            },
        }
    }

    async fn set_ticker_pair(&self, ticker: CoinbaseTicker) {
        let key = coinbase_pair_to_key(&ticker.product_id);
        self.cache.write().await.tickers.insert(key, ticker);
    }

    async fn set_trade_pair(&self, response: CoinbaseTradeResponse) {
        let Some(trade) = response.to_trade() else {
            tracing::debug!(
                provider = %ProviderName::Coinbase,
                time = %response.time,
                "Unable to parse trade time"
            );
            return;
        };

        let key = coinbase_pair_to_key(&response.product_id);
        let stale_before = past_unix_time(PROVIDER_CANDLE_PERIOD);

        let mut cache = self.cache.write().await;
        insert_trade(cache.trades.entry(key).or_default(), trade, stale_before);
    }
}

/// Streaming provider backed by the Coinbase websocket feed
pub struct CoinbaseProvider {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CoinbaseProvider {
    /// Connect to the public Coinbase feed.
    pub async fn new(pairs: &[CurrencyPair]) -> Result<Self, ProviderError> {
        Self::with_url(COINBASE_WS_URL, pairs).await
    }

    /// Connect to `url`, subscribe to `pairs` and start the receive task.
    pub async fn with_url(url: &str, pairs: &[CurrencyPair]) -> Result<Self, ProviderError> {
        Self::with_ping_check(url, pairs, COINBASE_PING_CHECK).await
    }

    /// Like [`with_url`](Self::with_url), reconnecting after `ping_check`
    /// without traffic.
    pub(crate) async fn with_ping_check(
        url: &str,
        pairs: &[CurrencyPair],
        ping_check: Duration,
    ) -> Result<Self, ProviderError> {
        tracing::info!(provider = %ProviderName::Coinbase, url = %url, "Connecting to Coinbase WebSocket...");

        let shared = Arc::new(Shared::new(url));
        let stream = shared.dial().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let provider = Self {
            shared: Arc::clone(&shared),
            shutdown_tx,
            task: Mutex::new(None),
        };

        if !pairs.is_empty() {
            provider.subscribe_currency_pairs(pairs).await?;
        }

        let task = tokio::spawn(receive_loop(shared, Some(stream), shutdown_rx, ping_check));
        *provider.task.lock().await = Some(task);

        tracing::info!(provider = %ProviderName::Coinbase, pairs = pairs.len(), "Connected to Coinbase WebSocket");
        Ok(provider)
    }

    /// Ask the receive task to drop the current connection and dial again.
    pub fn request_reconnect(&self) {
        self.shared.reconnect_requested.notify_one();
    }
}

#[async_trait]
impl Provider for CoinbaseProvider {
    fn name(&self) -> ProviderName {
        ProviderName::Coinbase
    }

    async fn get_ticker_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, TickerPrice>, ProviderError> {
        let cache = self.shared.cache.read().await;
        ticker_prices_from_cache(&cache, pairs)
    }

    async fn get_candle_prices(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<HashMap<String, Vec<CandlePrice>>, ProviderError> {
        let cache = self.shared.cache.read().await;
        candle_prices_from_cache(&cache, pairs)
    }

    async fn subscribe_currency_pairs(&self, pairs: &[CurrencyPair]) -> Result<(), ProviderError> {
        self.shared.subscribe(pairs).await?;
        self.shared.set_subscribed_pairs(pairs).await;
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!(provider = %ProviderName::Coinbase, error = %e, "Receive task ended abnormally");
            }
        }
    }
}

fn ticker_prices_from_cache(
    cache: &CoinbaseCache,
    pairs: &[CurrencyPair],
) -> Result<HashMap<String, TickerPrice>, ProviderError> {
    let mut ticker_prices = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let key = pair.to_string();
        let ticker = cache
            .tickers
            .get(&key)
            .ok_or_else(|| ProviderError::MissingExchangeRate(key.clone()))?;
        let price = TickerPrice::new(
            ProviderName::Coinbase,
            &ticker.product_id,
            &ticker.price,
            &ticker.volume,
        )?;
        ticker_prices.insert(key, price);
    }
    Ok(ticker_prices)
}

/// Each cached match becomes one candle, oldest first; pairs without trades
/// get an empty list.
fn candle_prices_from_cache(
    cache: &CoinbaseCache,
    pairs: &[CurrencyPair],
) -> Result<HashMap<String, Vec<CandlePrice>>, ProviderError> {
    let mut candles = HashMap::with_capacity(pairs.len());
    for pair in pairs {
        let key = pair.to_string();
        let mut list = match cache.trades.get(&key) {
            Some(trades) => trades
                .iter()
                .rev()
                .map(|t| CandlePrice::new(ProviderName::Coinbase, &key, &t.price, &t.size, t.time))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        // Trades can arrive out of order.
        list.sort_by_key(|c| c.time_stamp);
        candles.insert(key, list);
    }
    Ok(candles)
}

async fn next_frame(
    stream: &mut Option<WsSource>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}

/// Receive task: shutdown, then inbound frames, then the reconnect timer.
/// Any non-empty frame, ping or pong counts as traffic.
async fn receive_loop(
    shared: Arc<Shared>,
    mut stream: Option<WsSource>,
    mut shutdown_rx: watch::Receiver<bool>,
    ping_check: Duration,
) {
    let reconnect_timer = tokio::time::sleep(ping_check);
    tokio::pin!(reconnect_timer);
    let mut attempts: u32 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                tracing::info!(provider = %ProviderName::Coinbase, "Shutting down receive loop");
                shared.close().await;
                return;
            }

            frame = next_frame(&mut stream) => {
                match frame {
                    Some(Ok(Message::Text(text))) if !text.is_empty() => {
                        reconnect_timer.as_mut().reset(Instant::now() + ping_check);
                        shared.message_received(&text).await;
                    }
                    Some(Ok(Message::Binary(data))) if !data.is_empty() => {
                        reconnect_timer.as_mut().reset(Instant::now() + ping_check);
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        reconnect_timer.as_mut().reset(Instant::now() + ping_check);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!(provider = %ProviderName::Coinbase, "Connection closed by server");
                        stream = None;
                        probe(&shared).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(provider = %ProviderName::Coinbase, error = %e, "Could not read message");
                        stream = None;
                        probe(&shared).await;
                    }
                    Some(Ok(_)) => {}
                }
            }

            _ = &mut reconnect_timer => {
                reconnect_timer.as_mut().reset(Instant::now() + ping_check);
                stream = try_reconnect(&shared, &mut attempts, ping_check).await;
            }

            _ = shared.reconnect_requested.notified() => {
                reconnect_timer.as_mut().reset(Instant::now() + ping_check);
                stream = try_reconnect(&shared, &mut attempts, ping_check).await;
            }
        }
    }
}

/// Liveness probe after a read failure. Whether the ping fails or simply
/// goes unanswered, the reconnect timer handles it.
async fn probe(shared: &Shared) {
    if let Err(e) = shared.ping().await {
        tracing::debug!(provider = %ProviderName::Coinbase, error = %e, "Could not send ping");
    }
}

async fn try_reconnect(shared: &Shared, attempts: &mut u32, retry_in: Duration) -> Option<WsSource> {
    *attempts += 1;
    metrics::WS_RECONNECTS_TOTAL
        .with_label_values(&[ProviderName::Coinbase.as_str()])
        .inc();

    match shared.reconnect().await {
        Ok(stream) => {
            tracing::info!(provider = %ProviderName::Coinbase, attempt = *attempts, "Reconnected to Coinbase WebSocket");
            *attempts = 0;
            Some(stream)
        }
        Err(e) => {
            tracing::error!(
                provider = %ProviderName::Coinbase,
                attempt = *attempts,
                retry_in_ms = retry_in.as_millis() as u64,
                error = %e,
                "Error reconnecting"
            );
            None
        }
    }
}

/// Coinbase product id for a pair, e.g. `ATOM-USDT`.
fn currency_pair_to_coinbase_pair(pair: &CurrencyPair) -> String {
    format!("{}-{}", pair.base, pair.quote)
}

/// Cache key for a Coinbase product id, e.g. `ATOM-USDT` -> `ATOMUSDT`.
fn coinbase_pair_to_key(product_id: &str) -> String {
    product_id.replace('-', "").to_uppercase()
}
