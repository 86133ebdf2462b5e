//! Remote field extraction service client
//!
//! `POST {service_url}/api/parse-bill` with `{"file_url", "use_easyocr"}`.
//! The service answers with an envelope `{success, data, error}`; `data`
//! carries per-field `{value, confidence}` pairs and ISO dates.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{ExtractedFields, ExtractionError, FieldExtractor, FieldValue};

/// HTTP client for the remote extraction service
pub struct RemoteFieldExtractor {
    http_client: Client,
    service_url: String,
    use_easyocr: bool,
    enabled: bool,
}

impl RemoteFieldExtractor {
    pub fn new(
        service_url: impl Into<String>,
        timeout: Duration,
        use_easyocr: bool,
        enabled: bool,
    ) -> Result<Self, ExtractionError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            service_url: service_url.into().trim_end_matches('/').to_string(),
            use_easyocr,
            enabled,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/parse-bill", self.service_url)
    }
}

#[async_trait]
impl FieldExtractor for RemoteFieldExtractor {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn extract(&self, document_url: &str) -> Result<ExtractedFields, ExtractionError> {
        if !self.enabled {
            warn!("Extraction service disabled, returning empty fields");
            return Ok(ExtractedFields::default());
        }

        debug!(document_url, endpoint = %self.endpoint(), "Calling extraction service");

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&json!({
                "file_url": document_url,
                "use_easyocr": self.use_easyocr,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout(format!("Extraction service did not respond: {}", e))
                } else {
                    ExtractionError::Network(format!("Extraction request failed: {}", e))
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Api(format!(
                "Extraction service returned {}: {}",
                status, body
            )));
        }

        let envelope: ParseBillResponse = response.json().await.map_err(|e| {
            ExtractionError::Parse(format!("Failed to parse extraction response: {}", e))
        })?;

        if !envelope.success {
            return Err(ExtractionError::Rejected(
                envelope.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        let Some(data) = envelope.data else {
            return Err(ExtractionError::Parse(
                "Extraction response has success=true but no data".to_string(),
            ));
        };

        let typed: ParsedBill = serde_json::from_value(data.clone()).map_err(|e| {
            ExtractionError::Parse(format!("Unexpected extraction data shape: {}", e))
        })?;

        let fields = typed.into_fields(data);
        debug!(
            amount = ?fields.amount(),
            bill_number = ?fields.bill_number_str(),
            overall_confidence = ?fields.overall_confidence,
            "Extraction service returned fields"
        );
        Ok(fields)
    }
}

// ============================================================================
// Extraction service response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ParseBillResponse {
    success: bool,
    data: Option<serde_json::Value>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteField<T> {
    value: Option<T>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BillerInfo {
    biller_name: Option<String>,
    category: Option<String>,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ParsedBill {
    amount: Option<RemoteField<f64>>,
    bill_number: Option<RemoteField<String>>,
    consumer_number: Option<RemoteField<String>>,
    biller_info: Option<BillerInfo>,
    billing_date: Option<RemoteField<String>>,
    due_date: Option<RemoteField<String>>,
    units_consumed: Option<RemoteField<serde_json::Value>>,
    overall_confidence: Option<f64>,
}

fn present<T>(field: Option<RemoteField<T>>) -> Option<FieldValue<T>> {
    let field = field?;
    let value = field.value?;
    Some(FieldValue::new(value, field.confidence.unwrap_or(0.0)))
}

fn present_date(field: Option<RemoteField<String>>, name: &str) -> Option<FieldValue<NaiveDate>> {
    let field = present(field)?;
    match NaiveDate::parse_from_str(field.value.trim(), "%Y-%m-%d") {
        Ok(date) => Some(FieldValue::new(date, field.confidence)),
        Err(_) => {
            warn!(field = name, value = %field.value, "Dropping unparseable date");
            None
        }
    }
}

impl ParsedBill {
    fn into_fields(self, raw: serde_json::Value) -> ExtractedFields {
        let (biller_name, biller_category) = match self.biller_info {
            Some(info) => {
                let confidence = info.confidence.unwrap_or(0.0);
                (
                    info.biller_name.map(|v| FieldValue::new(v, confidence)),
                    info.category.map(|v| FieldValue::new(v, confidence)),
                )
            }
            None => (None, None),
        };

        // Units may come back as text when the service could not read a number
        let units_consumed = present(self.units_consumed)
            .and_then(|f| f.value.as_f64().map(|v| FieldValue::new(v, f.confidence)));

        ExtractedFields {
            billing_amount: present(self.amount),
            billing_date: present_date(self.billing_date, "billing_date"),
            due_date: present_date(self.due_date, "due_date"),
            units_consumed,
            bill_number: present(self.bill_number),
            consumer_number: present(self.consumer_number),
            biller_name,
            biller_category,
            overall_confidence: self.overall_confidence.map(|c| c.clamp(0.0, 1.0)),
            raw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};

    /// Serve a single route on an ephemeral port, returning the base URL
    async fn spawn_service(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn extractor(url: &str, timeout_ms: u64) -> RemoteFieldExtractor {
        RemoteFieldExtractor::new(url, Duration::from_millis(timeout_ms), false, true).unwrap()
    }

    #[tokio::test]
    async fn test_parses_successful_response() {
        let router = Router::new().route(
            "/api/parse-bill",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["use_easyocr"], false);
                assert!(body["file_url"].as_str().unwrap().ends_with("bill.pdf"));
                Json(json!({
                    "success": true,
                    "data": {
                        "amount": {"value": 1543.5, "confidence": 0.91},
                        "bill_number": {"value": "EB/2026/0042", "confidence": 0.88},
                        "consumer_number": {"value": "C-778812", "confidence": 0.7},
                        "biller_info": {"biller_name": "State Power Co", "category": "ELECTRICITY", "confidence": 0.8},
                        "billing_date": {"value": "2026-09-03", "confidence": 0.9},
                        "due_date": {"value": "03/10/2026", "confidence": 0.6},
                        "units_consumed": {"value": 212, "confidence": 0.75},
                        "overall_confidence": 0.83,
                        "raw_text": "STATE POWER CO ..."
                    },
                    "error": null
                }))
            }),
        );
        let url = spawn_service(router).await;

        let fields = extractor(&url, 2000)
            .extract("https://files.example.org/bills/bill.pdf")
            .await
            .unwrap();

        assert_eq!(fields.amount(), Some(1543.5));
        assert_eq!(fields.bill_number_str(), Some("EB/2026/0042"));
        assert_eq!(fields.biller_category_str(), Some("ELECTRICITY"));
        assert_eq!(fields.date(), NaiveDate::from_ymd_opt(2026, 9, 3));
        // Non-ISO dates are dropped rather than failing the extraction
        assert!(fields.due_date.is_none());
        assert_eq!(fields.units_consumed.as_ref().map(|f| f.value), Some(212.0));
        assert_eq!(fields.overall_confidence, Some(0.83));
        assert_eq!(fields.raw["raw_text"], "STATE POWER CO ...");
    }

    #[tokio::test]
    async fn test_unsuccessful_envelope_is_rejected() {
        let router = Router::new().route(
            "/api/parse-bill",
            post(|| async {
                Json(json!({"success": false, "data": null, "error": "Image too blurry"}))
            }),
        );
        let url = spawn_service(router).await;

        let err = extractor(&url, 2000).extract("file:///x.png").await.unwrap_err();
        match err {
            ExtractionError::Rejected(message) => assert_eq!(message, "Image too blurry"),
            other => panic!("Expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let router = Router::new().route(
            "/api/parse-bill",
            post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "warming up") }),
        );
        let url = spawn_service(router).await;

        let err = extractor(&url, 2000).extract("file:///x.png").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Api(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_slow_service_times_out() {
        let router = Router::new().route(
            "/api/parse-bill",
            post(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Json(json!({"success": true, "data": {}}))
            }),
        );
        let url = spawn_service(router).await;

        let err = extractor(&url, 50).extract("file:///x.png").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Timeout(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_network_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = extractor(&url, 2000).extract("file:///x.png").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Network(_)), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_disabled_extractor_returns_empty_fields() {
        let extractor =
            RemoteFieldExtractor::new("http://127.0.0.1:9", Duration::from_millis(50), false, false)
                .unwrap();
        let fields = extractor.extract("file:///x.png").await.unwrap();
        assert!(fields.is_empty());
    }
}
