//! HTTP API tests driving the router in-process

use anyhow::Result;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use csv_classifier_api::config::AppConfig;
use csv_classifier_api::contract::FeatureContract;
use csv_classifier_api::metrics::ServiceMetrics;
use csv_classifier_api::models::{Classifier, InferenceAdapter, RawLabel};
use csv_classifier_api::pipeline::PredictionPipeline;
use csv_classifier_api::server::{create_router, AppContext, REQUEST_ID_HEADER};
use ndarray::Array2;
use serde_json::Value;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;

const BOUNDARY: &str = "----koi-upload-boundary";

/// Planet (0) when the period is under 100 days, else false positive (1)
struct PeriodRule;

impl Classifier for PeriodRule {
    fn name(&self) -> &str {
        "period-rule"
    }

    fn predict(&self, features: &Array2<f64>) -> Result<Vec<RawLabel>> {
        Ok(features
            .rows()
            .into_iter()
            .map(|r| RawLabel::Int(if r[0] < 100.0 { 0 } else { 1 }))
            .collect())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Option<Vec<Vec<f64>>>> {
        Ok(Some(
            features
                .rows()
                .into_iter()
                .map(|r| if r[0] < 100.0 { vec![0.9, 0.1] } else { vec![0.2, 0.8] })
                .collect(),
        ))
    }
}

fn app() -> (Router, Arc<ServiceMetrics>) {
    let config = AppConfig::default();
    let contract =
        FeatureContract::new(vec!["koi_period".to_string(), "koi_prad".to_string()]).unwrap();
    let metrics = Arc::new(ServiceMetrics::new());
    let adapter = InferenceAdapter::new(Arc::new(PeriodRule)).with_metrics(metrics.clone());
    let pipeline = PredictionPipeline::from_config(&config, contract, adapter).unwrap();
    let ctx = Arc::new(AppContext::new(pipeline, metrics.clone(), &config));
    (create_router(ctx), metrics)
}

fn multipart_body(field: &str, file_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, file_name
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: text/csv\r\n\r\n");
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload(uri: &str, field: &str, contents: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, "koi.csv", contents)))
        .unwrap()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get(REQUEST_ID_HEADER)
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, request_id, serde_json::from_slice(&bytes).unwrap())
}

const KOI_CSV: &[u8] = b"# Kepler cumulative KOI table\n\
kepid,kepoi_name,koi_disposition,koi_prad,koi_period,koi_score,comment\n\
10797460,K00752.01,CONFIRMED,2.26,9.48,1.0,hot\n\
10811496,K00753.01,FALSE POSITIVE,Infinity,19.89,0.0,warm\n\
10848459,K00754.01,FALSE POSITIVE,33.46,,0.0,cold\n\
10854555,K00755.01,CONFIRMED,2.75,412.3,1.0,far\n";

#[tokio::test]
async fn test_root_status() {
    let (router, _) = app();
    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["n_features_expected"], 2);
    assert_eq!(body["model"], "period-rule");
}

#[tokio::test]
async fn test_schema_features() {
    let (router, _) = app();
    let request = Request::builder()
        .uri("/schema/features")
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["features"], serde_json::json!(["koi_period", "koi_prad"]));
}

#[tokio::test]
async fn test_predict_csv() {
    let (router, metrics) = app();
    let (status, request_id, body) = send(router, upload("/predict_csv", "file", KOI_CSV)).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(request_id.is_some());
    assert_eq!(body["row_count"], 4);
    assert_eq!(body["used_columns"], serde_json::json!(["koi_period", "koi_prad"]));
    assert_eq!(
        body["dropped_columns"],
        serde_json::json!(["kepid", "kepoi_name", "koi_score", "koi_disposition"])
    );
    assert_eq!(
        body["numeric_columns_detected"],
        serde_json::json!(["koi_prad", "koi_period"])
    );
    // the blank period is filled with the median of 9.48, 19.89 and 412.3
    assert_eq!(body["predictions"], serde_json::json!([0, 0, 0, 1]));
    assert_eq!(body["probabilities"].as_array().unwrap().len(), 4);

    let matrix = body["model_input_matrix"].as_array().unwrap();
    assert_eq!(matrix[2], serde_json::json!([19.89, 33.46]));
    // Infinity in koi_prad becomes the median of 2.26, 33.46 and 2.75
    assert_eq!(matrix[1], serde_json::json!([19.89, 2.75]));

    assert_eq!(metrics.requests_processed.load(Ordering::Relaxed), 1);
    assert_eq!(metrics.rows_scored.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn test_return_features_false() {
    let (router, _) = app();
    let (status, _, body) = send(
        router,
        upload("/predict_csv?return_features=false", "file", KOI_CSV),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.get("model_input_matrix").is_none());
    assert!(body.get("predictions").is_some());
}

#[tokio::test]
async fn test_column_mismatch() {
    let (router, metrics) = app();
    let csv = b"koi_period,koi_depth\n9.48,615.8\n";
    let (status, request_id, body) = send(router, upload("/predict_csv", "file", csv)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(request_id.is_some());
    assert_eq!(body["kind"], "column_mismatch");
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains("koi_prad"));
    assert!(detail.contains("koi_depth"));
    assert_eq!(metrics.requests_failed.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_header_only_upload() {
    let (router, _) = app();
    let csv = b"koi_period,koi_prad\n";
    let (status, _, body) = send(router, upload("/predict_csv", "file", csv)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "empty_input");
}

#[tokio::test]
async fn test_undecodable_upload() {
    let (router, _) = app();
    let bytes = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00];
    let (status, _, body) = send(router, upload("/predict_csv", "file", &bytes)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "decode_error");
}

#[tokio::test]
async fn test_other_field_name_accepted() {
    let (router, _) = app();
    let (status, _, body) = send(router, upload("/predict_csv", "upload", KOI_CSV)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["row_count"], 4);
}

#[tokio::test]
async fn test_missing_file() {
    let (router, _) = app();
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{b}--\r\n",
        b = BOUNDARY
    );
    let request = Request::builder()
        .method("POST")
        .uri("/predict_csv")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, body) = send(router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
}
