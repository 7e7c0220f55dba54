//! Osmosis provider and registry against a local HTTP endpoint

mod common;

use common::{serve_http, HttpResponse};
use price_feeder::error::ProviderError;
use price_feeder::oracle::provider::{OsmosisProvider, Provider, ProviderEndpoints, ProviderName};
use price_feeder::oracle::ProviderRegistry;
use price_feeder::types::CurrencyPair;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

const TOKENS: &str = r#"[
    {"price": 34.69, "denom": "ibc/27394FB0", "symbol": "ATOM", "liquidity": 45316072.13, "volume_24h": 2396974.02, "name": "Cosmos"},
    {"price": 8.08, "denom": "uosmo", "symbol": "OSMO", "liquidity": 1007810562.9, "volume_24h": 11604540.61, "name": "Osmosis"},
    {"price": 0.0000001, "denom": "ibc/0EF15DF2", "symbol": "DUST", "liquidity": 1.0, "volume_24h": 0, "name": "Dust"}
]"#;

const ATOM_CHART: &str = r#"[
    {"time": 1647866096, "close": 14.02, "high": 14.1, "low": 13.9, "open": 14.0, "volume": 10.41},
    {"time": 1647866396, "close": 14.05, "high": 14.1, "low": 14.0, "open": 14.02, "volume": 3}
]"#;

fn pair(base: &str, quote: &str) -> CurrencyPair {
    CurrencyPair::new(base, quote).unwrap()
}

async fn osmosis_stub() -> String {
    serve_http(|req| match req.path.as_str() {
        "/tokens/v1/all" => HttpResponse::json(TOKENS),
        "/tokens/v2/historical/ATOM/chart?tf=5" => HttpResponse::json(ATOM_CHART),
        "/moved/tokens/v1/all" => HttpResponse::redirect("/tokens/v1/all"),
        _ => HttpResponse::status(404),
    })
    .await
}

#[tokio::test]
async fn ticker_prices_come_from_the_token_snapshot() {
    let base_url = osmosis_stub().await;
    let provider = OsmosisProvider::with_base_url(&base_url, Duration::from_secs(5)).unwrap();

    let prices = provider
        .get_ticker_prices(&[pair("ATOM", "USDT"), pair("DUST", "USDT")])
        .await
        .unwrap();

    assert_eq!(prices.len(), 2);
    assert_eq!(prices["ATOMUSDT"].price, dec!(34.69));
    assert_eq!(prices["ATOMUSDT"].volume, dec!(2396974.02));
    assert_eq!(prices["DUSTUSDT"].price, dec!(0.0000001));
}

#[tokio::test]
async fn pair_missing_from_snapshot_fails_the_call() {
    let base_url = osmosis_stub().await;
    let provider = OsmosisProvider::with_base_url(&base_url, Duration::from_secs(5)).unwrap();

    let err = provider
        .get_ticker_prices(&[pair("ATOM", "USDT"), pair("FOO", "BAR")])
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "missing exchange rate for FOOBAR");
}

#[tokio::test]
async fn candles_are_stamped_in_milliseconds() {
    let base_url = osmosis_stub().await;
    let provider = OsmosisProvider::with_base_url(&base_url, Duration::from_secs(5)).unwrap();

    let candles = provider.get_candle_prices(&[pair("ATOM", "USDT")]).await.unwrap();

    let atom = &candles["ATOMUSDT"];
    assert_eq!(atom.len(), 2);
    assert_eq!(atom[0].price, dec!(14.02));
    assert_eq!(atom[0].volume, dec!(10.41));
    assert_eq!(atom[0].time_stamp, 1_647_866_096_000);
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let base_url = osmosis_stub().await;
    let provider =
        OsmosisProvider::with_base_url(&format!("{}/moved", base_url), Duration::from_secs(5)).unwrap();

    let err = provider.get_ticker_prices(&[pair("ATOM", "USDT")]).await.unwrap_err();

    match err {
        ProviderError::UnexpectedStatus { provider, status, .. } => {
            assert_eq!(provider, ProviderName::Osmosis);
            assert_eq!(status, 302);
        }
        other => panic!("expected UnexpectedStatus, got {other:?}"),
    }
}

#[tokio::test]
async fn server_errors_surface_the_status() {
    let base_url = serve_http(|_| HttpResponse::status(500)).await;
    let provider = OsmosisProvider::with_base_url(&base_url, Duration::from_secs(5)).unwrap();

    let err = provider.get_ticker_prices(&[pair("ATOM", "USDT")]).await.unwrap_err();

    assert!(matches!(err, ProviderError::UnexpectedStatus { status: 500, .. }));
}

#[tokio::test]
async fn registry_aggregates_configured_providers() {
    let base_url = osmosis_stub().await;
    let endpoints = ProviderEndpoints {
        osmosis_base_url: base_url,
        ..ProviderEndpoints::default()
    };
    let mut provider_pairs = HashMap::new();
    provider_pairs.insert(
        ProviderName::Osmosis,
        vec![pair("ATOM", "USDT"), pair("OSMO", "USDT")],
    );

    let registry = ProviderRegistry::connect(&provider_pairs, &endpoints, Duration::from_secs(5))
        .await
        .unwrap();
    let prices = registry.get_ticker_prices().await;

    assert_eq!(registry.providers().collect::<Vec<_>>(), vec![ProviderName::Osmosis]);
    assert_eq!(prices[&ProviderName::Osmosis]["OSMOUSDT"].price, dec!(8.08));

    registry.shutdown().await;
}
