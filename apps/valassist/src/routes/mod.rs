pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::catalog::handlers as catalog;
use crate::equations::handlers as equations;
use crate::state::AppState;
use crate::summary::handlers as summary;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Catalog API
        .route("/api/v1/records/batch", post(catalog::handle_fetch_batch))
        .route("/api/v1/records/summarize", post(summary::handle_summarize))
        .route("/api/v1/records/:id", get(catalog::handle_get_record))
        .route(
            "/api/v1/queries/:query_id/ids",
            get(catalog::handle_query_ids),
        )
        // Equation API
        .route("/api/v1/equations/evaluate", post(equations::handle_evaluate))
        .route("/api/v1/equations/extract", post(equations::handle_extract))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::catalog::models::Batch;
    use crate::catalog::{CatalogTransport, FetchError, RecordFetcher, RetryPolicy};
    use crate::config::Config;
    use crate::equations::models::{EquationRow, EvaluationResult};
    use crate::equations::review::EquationReviewer;
    use crate::llm_client::LlmError;
    use crate::summary::Summarizer;

    /// Records `1`..`9` exist; `secret` is forbidden; saved query `Q1`
    /// matches records 1 and 2.
    struct StubTransport;

    #[async_trait]
    impl CatalogTransport for StubTransport {
        async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, FetchError> {
            match path {
                "query/execution/Q1" if query.is_empty() => Ok(json!({"total": 2})),
                "query/execution/Q1" => Ok(json!({"total": 2, "data": [{"id": 1}, {"id": "2"}]})),
                "query/execution/EMPTY" => Ok(json!({"total": 0})),
                "article/secret" => Err(FetchError::AuthFailure { status: 403 }),
                p => {
                    let id = p.trim_start_matches("article/");
                    if id.len() == 1 && id.chars().all(|c| c.is_ascii_digit()) && id != "0" {
                        Ok(json!({"data": [{"id": id, "title": format!("record {id}")}]}))
                    } else {
                        Ok(json!({"data": []}))
                    }
                }
            }
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(&self, batch: &Batch) -> Result<String, LlmError> {
            Ok(format!("{} records", batch.records.len()))
        }
    }

    /// Always answers `0x3`.
    struct FixedReviewer;

    #[async_trait]
    impl EquationReviewer for FixedReviewer {
        async fn review(
            &self,
            _row: &EquationRow,
            _result: &EvaluationResult,
        ) -> Result<String, LlmError> {
            Ok("0x3".to_string())
        }
    }

    fn app() -> Router {
        let config = Config::from_source(|k| match k {
            "CATALOG_BASE_URL" => Some("http://catalog.invalid".to_string()),
            "FETCH_BATCH_SIZE" => Some("2".to_string()),
            _ => None,
        })
        .unwrap();
        build_router(AppState {
            fetcher: Arc::new(RecordFetcher::new(
                Arc::new(StubTransport),
                RetryPolicy::default(),
            )),
            summarizer: Arc::new(EchoSummarizer),
            reviewer: Arc::new(FixedReviewer),
            config,
        })
    }

    async fn send(request: Request<Body>) -> (StatusCode, Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_uri(uri: &str) -> (StatusCode, Value) {
        send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(uri: &str, body: Value) -> (StatusCode, Value) {
        send(
            Request::builder()
                .uri(uri)
                .method("POST")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_uri("/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "valassist");
    }

    #[tokio::test]
    async fn test_get_record() {
        let (status, body) = get_uri("/api/v1/records/7?fields=title").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], "7");
        assert_eq!(body["title"], "record 7");
    }

    #[tokio::test]
    async fn test_missing_record_is_404() {
        let (status, body) = get_uri("/api/v1/records/404").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_auth_failure_is_bad_gateway() {
        let (status, body) = get_uri("/api/v1/records/secret").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "UPSTREAM_AUTH");
    }

    #[tokio::test]
    async fn test_record_id_cannot_reach_other_endpoints() {
        let (status, body) = get_uri("/api/v1/records/..%2Fquery%2Fexecution%2F5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_batch_is_best_effort() {
        let (status, body) = post_json(
            "/api/v1/records/batch",
            json!({"ids": ["1", "2", "missing", "4", "5"]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["batches"], 3);
        assert_eq!(body["summary"]["fetched"], 4);
        assert_eq!(body["summary"]["failed"], 1);
        assert_eq!(body["batches"][1]["failures"][0]["id"], "missing");
        assert_eq!(body["exported"], json!([]));
    }

    #[tokio::test]
    async fn test_batch_rejects_empty_ids() {
        let (status, body) = post_json("/api/v1/records/batch", json!({"ids": []})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_export_without_directory_is_rejected() {
        let (status, _) = post_json(
            "/api/v1/records/batch",
            json!({"ids": ["1"], "export": true}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_query_ids() {
        let (status, body) = get_uri("/api/v1/queries/Q1/ids").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ids"], json!(["1", "2"]));
        assert_eq!(body["count"], 2);

        let (_, body) = get_uri("/api/v1/queries/EMPTY/ids").await;
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_summarize() {
        let (status, body) = post_json(
            "/api/v1/records/summarize",
            json!({"ids": ["1", "2", "3"], "batch_size": 2}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fetch"]["fetched"], 3);
        assert_eq!(body["summaries"][0]["outcome"]["status"], "summarized");
        assert_eq!(body["summaries"][0]["outcome"]["text"], "2 records");
        assert_eq!(body["summaries"][1]["outcome"]["text"], "1 records");
    }

    #[tokio::test]
    async fn test_evaluate_equations() {
        let (status, body) = post_json(
            "/api/v1/equations/evaluate",
            json!({
                "rows": [
                    {
                        "target_name": "dmfc",
                        "equation": "dec2hex(Max(lineItem.MCR_FREQ.Value,lineItem.SSTPP4_DDR_FREQ.Value)/200)",
                        "reported_value": "0x2"
                    },
                    {"target_name": "broken", "equation": "(1 +", "reported_value": "1"}
                ],
                "attributes": {"MCR_FREQ": 200, "SSTPP4_DDR_FREQ": "400"}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["calculated_value"], "2");
        assert_eq!(body["results"][0]["matches_reported"], true);
        assert_eq!(body["results"][1]["status"], "Error");
        assert_eq!(body["summary"]["total_rows"], 2);
        assert_eq!(body["summary"]["errors"], 1);
        assert!(body.get("reviews").is_none());
    }

    #[tokio::test]
    async fn test_evaluate_with_review() {
        let (status, body) = post_json(
            "/api/v1/equations/evaluate",
            json!({
                "rows": [
                    {"target_name": "fine", "equation": "1 + 2", "reported_value": "3"},
                    {"target_name": "broken", "equation": "(1 +", "reported_value": "2'h3"}
                ],
                "review": true
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][1]["status"], "Error");
        let reviews = body["reviews"].as_array().unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0]["row"], 1);
        assert_eq!(reviews[0]["target_name"], "broken");
        assert_eq!(reviews[0]["outcome"]["status"], "reviewed");
        assert_eq!(reviews[0]["outcome"]["value"], "0x3");
        assert_eq!(reviews[0]["outcome"]["matches_reported"], true);
    }

    #[tokio::test]
    async fn test_evaluate_isolates_overly_nested_row() {
        let deep = format!("{}1{}", "(".repeat(3000), ")".repeat(3000));
        let (status, body) = post_json(
            "/api/v1/equations/evaluate",
            json!({
                "rows": [
                    {"target_name": "deep", "equation": deep, "reported_value": "1"},
                    {"target_name": "after", "equation": "2 * 2", "reported_value": "4"}
                ]
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["status"], "Error");
        assert_eq!(body["results"][1]["matches_reported"], true);
    }

    #[tokio::test]
    async fn test_extract_and_evaluate() {
        let rule_text = r#"
            Fuses.Direct.Pcu.CORE_COUNT.FuseSetValue = lineItem.CORES.Value > 16 ? 0x3 : 0x1;
            LIRAMappingWrapper(lineItem.SKU.Value, Fuses.Direct.Pcu.SKU_MODE, new Dictionary<string, string> { { "HEDT", "1'h1" }, { "STANDARD", "1'h0" } });
        "#;
        let (status, body) = post_json(
            "/api/v1/equations/extract",
            json!({
                "rule_text": rule_text,
                "reported": {"core_count": "0x3", "SKU_MODE": "0x0"},
                "attributes": {"collections": [{"attributes": [
                    {"attributeName": "CORES", "attributeValue": 24},
                    {"attributeName": "SKU", "attributeValue": "standard"}
                ]}]}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["equations"].as_array().unwrap().len(), 2);
        let results = &body["evaluation"]["results"];
        assert_eq!(results[0]["target_name"], "core_count");
        assert_eq!(results[0]["matches_reported"], true);
        assert_eq!(results[1]["target_name"], "sku_mode");
        assert_eq!(results[1]["calculated_value"], "0");
        assert_eq!(results[1]["matches_reported"], true);
        assert_eq!(body["evaluation"]["summary"]["matches"], 2);
    }

    #[tokio::test]
    async fn test_extract_rejects_blank_rules() {
        let (status, _) = post_json("/api/v1/equations/extract", json!({"rule_text": " "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
