//! HTTP-level tests for the market-data client against a mock server.

use assert_matches::assert_matches;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fintail::error::IngestError;
use fintail::models::Config;
use fintail::sources::{MarketDataClient, MarketDataProvider};

fn config_for(server: &MockServer) -> Config {
    Config {
        database_path: ":memory:".to_string(),
        market_data_base_url: server.uri(),
        market_data_api_key: None,
        extractor_base_url: server.uri(),
        extractor_api_key: None,
        ingest_delay: Duration::ZERO,
        write_retry_attempts: 1,
    }
}

#[tokio::test]
async fn overview_and_quarterlies_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/META"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "Meta Platforms Inc.",
            "sector": "Technology"
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/META/quarterlies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "quarterlyReports": [
                {"reportDate": "2025-09-30", "totalRevenue": 40589000000.0}
            ]
        })))
        .mount(&server)
        .await;

    let client = MarketDataClient::new(&config_for(&server)).unwrap();

    let overview = client.company_overview("META").await.unwrap();
    assert_eq!(overview["sector"], "Technology");

    let quarters = client.quarterly_statements("META").await.unwrap();
    assert_eq!(quarters.len(), 1);
    assert_eq!(quarters[0]["reportDate"], "2025-09-30");
}

#[tokio::test]
async fn missing_company_is_no_data_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/ZZZZ"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = MarketDataClient::new(&config_for(&server)).unwrap();
    let err = client.company_overview("ZZZZ").await.unwrap_err();
    assert_matches!(err, IngestError::NoDataFound(_));
}

#[tokio::test]
async fn empty_payloads_are_no_data_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/EMPT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/EMPT/quarterlies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"quarterlyReports": []})))
        .mount(&server)
        .await;

    let client = MarketDataClient::new(&config_for(&server)).unwrap();
    assert_matches!(
        client.company_overview("EMPT").await,
        Err(IngestError::NoDataFound(_))
    );
    assert_matches!(
        client.quarterly_statements("EMPT").await,
        Err(IngestError::NoDataFound(_))
    );
}

#[tokio::test]
async fn server_errors_are_retryable_source_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/companies/META"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = MarketDataClient::new(&config_for(&server)).unwrap();
    let err = client.company_overview("META").await.unwrap_err();
    assert_matches!(err, IngestError::SourceUnavailable(_));
}
