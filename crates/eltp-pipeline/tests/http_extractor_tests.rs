//! HTTP API source tests against a wiremock server

mod helpers;

use eltp_pipeline::capability::{ExtractCapability, ExtractError};
use eltp_pipeline::stage::{run_stage, ExtractStage};
use eltp_pipeline::storage::FetchedDataset;
use eltp_pipeline::HttpExtractor;
use helpers::*;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn server_with(route: &str, response: ResponseTemplate) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_fetch_returns_single_payload() {
    let server = server_with(
        "/client-7/exports/site-42.csv",
        ResponseTemplate::new(200).set_body_string("visits\n3\n"),
    )
    .await;
    let extractor = HttpExtractor::new(server.uri()).unwrap();

    let files = extractor
        .fetch("client-7/exports/site-42.csv", None)
        .await
        .unwrap();

    assert_eq!(files.len(), 1);
    let file = &files[0];
    assert!(matches!(file, FetchedDataset::Payload(_)));
    assert_eq!(file.name(), "site-42.csv");
    assert_eq!(file.size(), 9);
    assert_eq!(file.source_uri(), format!("{}/client-7/exports/site-42.csv", server.uri()));
}

#[tokio::test]
async fn test_not_found_means_nothing_published() {
    let server = server_with("/client-7/exports/site-42.csv", ResponseTemplate::new(404)).await;
    let extractor = HttpExtractor::new(server.uri()).unwrap();

    let files = extractor
        .fetch("client-7/exports/site-42.csv", None)
        .await
        .unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn test_server_error_is_source_unavailable() {
    let server = server_with("/client-7/exports/site-42.csv", ResponseTemplate::new(503)).await;
    let extractor = HttpExtractor::new(server.uri()).unwrap();

    let err = extractor
        .fetch("client-7/exports/site-42.csv", None)
        .await
        .unwrap_err();

    match err {
        ExtractError::SourceUnavailable { reason, .. } => assert!(reason.contains("503")),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_mask_mismatch_skips_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x"))
        .expect(0)
        .mount(&server)
        .await;
    let extractor = HttpExtractor::new(server.uri()).unwrap();

    let files = extractor
        .fetch("client-7/exports/site-42.json", Some("*.csv"))
        .await
        .unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn test_extract_stage_persists_api_payload() {
    let server = server_with(
        "/client-7/exports/site-42.csv",
        ResponseTemplate::new(200).set_body_string("visits\n3\n"),
    )
    .await;
    let harness = Harness::new(datasource(vec![protocol(11, "exports/site-42.csv", Some("*.csv"))]));

    let stage = ExtractStage::new(
        Arc::new(TestRules::default()),
        harness.datalake.clone(),
        harness.provenance_store(),
        paths(),
    )
    .with_source(Arc::new(HttpExtractor::new(server.uri()).unwrap()));

    let report = run_stage(&stage, harness.provenance.as_ref(), TASK_ID)
        .await
        .into_result()
        .unwrap();

    assert_eq!(report.datasets.len(), 1);
    let dataset = harness.provenance.datasets().remove(0);
    assert_eq!(
        dataset.data_path_archive,
        Some(format!("{}/client-7/exports/site-42.csv", server.uri()))
    );

    let key = format!("datalake/{}/{}/extract/site-42.csv", D1, dataset.id);
    assert_eq!(harness.objects.object(LAKE_BUCKET, &key).unwrap().data, b"visits\n3\n".to_vec());
}
