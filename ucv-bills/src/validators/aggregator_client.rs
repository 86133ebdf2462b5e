//! Remote billing aggregator client
//!
//! `POST {aggregator_url}/api/verify-bill` with the plain field values.
//! The aggregator's decision is taken as-is; no local randomness.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::models::VerificationSource;
use crate::types::{CheckReport, ExtractedFields, TamperVerifier, VerificationError, VerificationOutcome};

pub struct AggregatorClient {
    http_client: Client,
    aggregator_url: String,
}

impl AggregatorClient {
    pub fn new(aggregator_url: impl Into<String>, timeout: Duration) -> Result<Self, VerificationError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerificationError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            aggregator_url: aggregator_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct VerifyBillRequest<'a> {
    amount: Option<f64>,
    billing_date: Option<String>,
    due_date: Option<String>,
    units_consumed: Option<f64>,
    bill_number: Option<&'a str>,
    consumer_number: Option<&'a str>,
    biller_name: Option<&'a str>,
    biller_category: Option<&'a str>,
}

impl<'a> From<&'a ExtractedFields> for VerifyBillRequest<'a> {
    fn from(fields: &'a ExtractedFields) -> Self {
        Self {
            amount: fields.amount(),
            billing_date: fields.date().map(|d| d.format("%Y-%m-%d").to_string()),
            due_date: fields
                .due_date
                .as_ref()
                .map(|d| d.value.format("%Y-%m-%d").to_string()),
            units_consumed: fields.units_consumed.as_ref().map(|f| f.value),
            bill_number: fields.bill_number_str(),
            consumer_number: fields.consumer_number.as_ref().map(|f| f.value.as_str()),
            biller_name: fields.biller_name.as_ref().map(|f| f.value.as_str()),
            biller_category: fields.biller_category_str(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyBillResponse {
    verified: bool,
    tampered: bool,
    #[serde(default)]
    tamper_reasons: Vec<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    amount_valid: Option<bool>,
    #[serde(default)]
    date_valid: Option<bool>,
    #[serde(default)]
    bill_number_valid: Option<bool>,
    #[serde(default)]
    biller_valid: Option<bool>,
}

#[async_trait]
impl TamperVerifier for AggregatorClient {
    fn name(&self) -> &'static str {
        "aggregator"
    }

    async fn verify(&self, fields: &ExtractedFields) -> Result<VerificationOutcome, VerificationError> {
        let endpoint = format!("{}/api/verify-bill", self.aggregator_url);
        debug!(endpoint = %endpoint, "Calling billing aggregator");

        let response = self
            .http_client
            .post(&endpoint)
            .json(&VerifyBillRequest::from(fields))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerificationError::Timeout(format!("Aggregator did not respond: {}", e))
                } else {
                    VerificationError::Network(format!("Aggregator request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VerificationError::Api(format!(
                "Aggregator returned {}: {}",
                status, body
            )));
        }

        let body: VerifyBillResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::Parse(format!("Failed to parse aggregator response: {}", e)))?;

        // A tampered verdict without reasons cannot be shown to a reviewer
        let mut reasons = body.tamper_reasons;
        if body.tampered && reasons.is_empty() {
            reasons.push(if body.message.is_empty() {
                "Aggregator reported tampering".to_string()
            } else {
                body.message.clone()
            });
        }

        Ok(VerificationOutcome {
            verified: body.verified && !body.tampered,
            tampered: body.tampered,
            reasons,
            confidence: body.confidence,
            source: VerificationSource::Aggregator,
            message: body.message,
            checks: CheckReport {
                amount_valid: body.amount_valid,
                date_valid: body.date_valid,
                bill_number_valid: body.bill_number_valid,
                biller_valid: body.biller_valid,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldValue;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    async fn spawn_service(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn sample_fields() -> ExtractedFields {
        ExtractedFields {
            billing_amount: Some(FieldValue::new(640.0, 0.9)),
            bill_number: Some(FieldValue::new("WB-88231".to_string(), 0.9)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_forwards_fields_and_maps_verdict() {
        let router = Router::new().route(
            "/api/verify-bill",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["amount"], 640.0);
                assert_eq!(body["bill_number"], "WB-88231");
                Json(json!({
                    "verified": false,
                    "tampered": true,
                    "tamper_reasons": ["Bill number not issued by biller"],
                    "confidence": 12.5,
                    "message": "mismatch",
                    "bill_number_valid": false
                }))
            }),
        );
        let url = spawn_service(router).await;

        let outcome = AggregatorClient::new(url, Duration::from_secs(2))
            .unwrap()
            .verify(&sample_fields())
            .await
            .unwrap();

        assert!(outcome.tampered);
        assert!(!outcome.verified);
        assert_eq!(outcome.reasons, vec!["Bill number not issued by biller".to_string()]);
        assert_eq!(outcome.confidence, 12.5);
        assert_eq!(outcome.source, VerificationSource::Aggregator);
        assert_eq!(outcome.checks.bill_number_valid, Some(false));
    }

    #[tokio::test]
    async fn test_tampered_without_reasons_gets_one() {
        let router = Router::new().route(
            "/api/verify-bill",
            post(|| async { Json(json!({"verified": false, "tampered": true})) }),
        );
        let url = spawn_service(router).await;

        let outcome = AggregatorClient::new(url, Duration::from_secs(2))
            .unwrap()
            .verify(&sample_fields())
            .await
            .unwrap();

        assert_eq!(outcome.reasons, vec!["Aggregator reported tampering".to_string()]);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let router = Router::new()
            .route(
                "/api/verify-bill",
                post(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
            );
        let url = spawn_service(router).await;
        let err = AggregatorClient::new(url, Duration::from_secs(2))
            .unwrap()
            .verify(&sample_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Api(_)));
        assert!(err.is_dependency_failure());

        let router = Router::new().route("/api/verify-bill", post(|| async { "not json" }));
        let url = spawn_service(router).await;
        let err = AggregatorClient::new(url, Duration::from_secs(2))
            .unwrap()
            .verify(&sample_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Parse(_)));
        assert!(!err.is_dependency_failure());
    }

    #[tokio::test]
    async fn test_slow_aggregator_times_out() {
        let router = Router::new().route(
            "/api/verify-bill",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"verified": true, "tampered": false}))
            }),
        );
        let url = spawn_service(router).await;

        let err = AggregatorClient::new(url, Duration::from_millis(50))
            .unwrap()
            .verify(&sample_fields())
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::Timeout(_)));
    }
}
