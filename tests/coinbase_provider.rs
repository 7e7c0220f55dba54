//! Coinbase provider against a local websocket feed

use futures_util::{SinkExt, StreamExt};
use price_feeder::oracle::provider::{CoinbaseProvider, Provider};
use price_feeder::types::CurrencyPair;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

fn pair(base: &str, quote: &str) -> CurrencyPair {
    CurrencyPair::new(base, quote).unwrap()
}

/// Accepts connections forever. For each one, forwards the first frame
/// (the subscribe request) to the test and answers with one ticker frame
/// per product id, priced from `prices` by connection index.
async fn spawn_feed(prices: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<Value>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut connection = 0usize;
        while let Ok((socket, _)) = listener.accept().await {
            let price = prices[connection.min(prices.len() - 1)];
            connection += 1;
            let tx = tx.clone();

            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(socket).await else {
                    return;
                };

                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else {
                        continue;
                    };
                    let request: Value = serde_json::from_str(&text).unwrap();
                    let _ = tx.send(request.clone());

                    for product_id in request["product_ids"].as_array().cloned().unwrap_or_default() {
                        let ticker = serde_json::json!({
                            "type": "ticker",
                            "product_id": product_id,
                            "price": price,
                            "volume_24h": "2396974.02",
                        });
                        if ws.send(Message::Text(ticker.to_string())).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });

    (format!("ws://{}", addr), rx)
}

async fn next_request(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("feed did not receive a subscribe request")
        .expect("feed task stopped")
}

fn sorted_product_ids(request: &Value) -> Vec<String> {
    let mut ids: Vec<String> = request["product_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    ids.sort();
    ids
}

async fn wait_for_price(provider: &CoinbaseProvider, pairs: &[CurrencyPair], key: &str, price: rust_decimal::Decimal) {
    for _ in 0..100 {
        if let Ok(prices) = provider.get_ticker_prices(pairs).await {
            if prices[key].price == price {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{key} never reached {price}");
}

#[tokio::test]
async fn subscribes_and_caches_tickers() {
    let (url, mut requests) = spawn_feed(vec!["34.69"]).await;
    let pairs = vec![pair("ATOM", "USDT")];

    let provider = CoinbaseProvider::with_url(&url, &pairs).await.unwrap();

    let request = next_request(&mut requests).await;
    assert_eq!(
        request,
        serde_json::json!({
            "type": "subscribe",
            "product_ids": ["ATOM-USDT"],
            "channels": ["matches", "ticker"],
        })
    );

    wait_for_price(&provider, &pairs, "ATOMUSDT", dec!(34.69)).await;
    let prices = provider.get_ticker_prices(&pairs).await.unwrap();
    assert_eq!(prices["ATOMUSDT"].volume, dec!(2396974.02));

    let err = provider.get_ticker_prices(&[pair("OSMO", "USDT")]).await.unwrap_err();
    assert_eq!(err.to_string(), "missing exchange rate for OSMOUSDT");

    provider.shutdown().await;
}

#[tokio::test]
async fn reconnect_resubscribes_every_known_pair() {
    let (url, mut requests) = spawn_feed(vec!["34.69", "35.10"]).await;
    let pairs = vec![pair("ATOM", "USDT"), pair("OSMO", "USDT")];

    let provider = CoinbaseProvider::with_url(&url, &pairs).await.unwrap();
    let first = next_request(&mut requests).await;
    assert_eq!(sorted_product_ids(&first), vec!["ATOM-USDT", "OSMO-USDT"]);
    wait_for_price(&provider, &pairs, "ATOMUSDT", dec!(34.69)).await;

    provider.request_reconnect();

    let second = next_request(&mut requests).await;
    assert_eq!(sorted_product_ids(&second), vec!["ATOM-USDT", "OSMO-USDT"]);
    assert_eq!(second["channels"], serde_json::json!(["matches", "ticker"]));
    wait_for_price(&provider, &pairs, "OSMOUSDT", dec!(35.10)).await;

    provider.shutdown().await;
}

#[tokio::test]
async fn later_subscriptions_are_added_to_the_set() {
    let (url, mut requests) = spawn_feed(vec!["1.00"]).await;

    let provider = CoinbaseProvider::with_url(&url, &[pair("ATOM", "USDT")]).await.unwrap();
    next_request(&mut requests).await;

    provider.subscribe_currency_pairs(&[pair("OSMO", "USDT")]).await.unwrap();
    let added = next_request(&mut requests).await;
    assert_eq!(sorted_product_ids(&added), vec!["OSMO-USDT"]);

    provider.request_reconnect();
    let resubscribed = next_request(&mut requests).await;
    assert_eq!(sorted_product_ids(&resubscribed), vec!["ATOM-USDT", "OSMO-USDT"]);

    provider.shutdown().await;
}

#[tokio::test]
async fn unreachable_feed_fails_construction() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = CoinbaseProvider::with_url(&format!("ws://{}", addr), &[pair("ATOM", "USDT")]).await;

    assert!(result.is_err());
}
