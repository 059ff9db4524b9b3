use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{http_client, DocumentExtractor};
use crate::error::{IngestError, Result};
use crate::models::Config;

/// Client for the document-extraction service. The service reads a PDF
/// filing and returns free text expected to contain one JSON object
/// matching the target schema; models like to wrap that object in
/// markdown fences or prose, so the output is defensively unwrapped
/// before parsing.
pub struct ExtractionClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExtractionClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        Ok(Self {
            client: http_client()?,
            base_url: config.extractor_base_url.trim_end_matches('/').to_string(),
            api_key: config.extractor_api_key.clone(),
        })
    }
}

#[async_trait]
impl DocumentExtractor for ExtractionClient {
    async fn extract_quarter(
        &self,
        ticker: &str,
        document_ref: &str,
        quarter: &str,
    ) -> Result<Value> {
        let url = format!("{}/v1/extract", self.base_url);
        debug!(%ticker, %document_ref, %quarter, "requesting extraction");

        let mut request = self.client.post(&url).json(&json!({
            "document": document_ref,
            "instruction": extraction_instruction(ticker, quarter),
        }));
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| IngestError::SourceUnavailable(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(IngestError::NoDataFound(document_ref.to_string()));
        }
        if !response.status().is_success() {
            return Err(IngestError::SourceUnavailable(format!(
                "extraction service returned {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| IngestError::SourceUnavailable(e.to_string()))?;

        // The service wraps the model output in {"output": "..."}; accept
        // a bare string body as well.
        let text = body
            .get("output")
            .and_then(Value::as_str)
            .or_else(|| body.as_str())
            .ok_or_else(|| IngestError::MalformedExtraction {
                reason: "response carried no output text".to_string(),
                raw: body.to_string(),
            })?;

        parse_extraction_output(text)
    }
}

/// The strict instruction seeded into every extraction call: target
/// schema, units rule, and the exact quarter being requested.
pub fn extraction_instruction(ticker: &str, quarter: &str) -> String {
    format!(
        "Extract the quarterly financial results for {ticker}, fiscal quarter {quarter}, \
         from the attached filing. Respond with exactly one JSON object and nothing else, \
         using this schema: {{\"ticker\", \"quarter\", \"reportDate\" (YYYY-MM-DD), \
         \"totalRevenue\", \"netIncome\", \"eps\", \"operatingIncome\", \"freeCashFlow\", \
         \"totalAssets\", \"totalDebt\", \"shareholderEquity\", \"sharesOutstanding\", \
         \"segments\" (object of segment name to {{\"revenue\", \"operatingIncome\", \
         \"operatingMargin\"}})}}. Convert all magnitudes to raw numeric units (report \
         $40.59 billion as 40590000000). Omit any field the filing does not report; \
         never substitute zero for a missing value."
    )
}

/// Strip non-JSON wrapping from model output and parse the single JSON
/// object inside. A parse failure is `MalformedExtraction`, distinct
/// from the provider having no data.
pub fn parse_extraction_output(text: &str) -> Result<Value> {
    let stripped = strip_code_fences(text);

    // Fall back to the outermost brace span when the model added prose
    // around the object.
    let candidate = match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => &stripped[start..=end],
        _ => {
            return Err(IngestError::MalformedExtraction {
                reason: "no JSON object in output".to_string(),
                raw: text.to_string(),
            })
        }
    };

    let value: Value =
        serde_json::from_str(candidate).map_err(|e| IngestError::MalformedExtraction {
            reason: e.to_string(),
            raw: text.to_string(),
        })?;

    if !value.is_object() {
        return Err(IngestError::MalformedExtraction {
            reason: "output parsed but is not an object".to_string(),
            raw: text.to_string(),
        });
    }
    Ok(value)
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line, then the closing fence.
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim().trim_end_matches("```").trim()
}
