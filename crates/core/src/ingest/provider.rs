use crate::domain::quote::QuoteRecord;
use crate::ingest::error::FetchError;
use reqwest::StatusCode;
use serde_json::Value;

#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// `Ok(vec![])` means the provider knows nothing about `symbol`.
    async fn fetch_quote(
        &self,
        symbol: &str,
        exchange: Option<&str>,
    ) -> Result<Vec<QuoteRecord>, FetchError>;
}

/// Decodes a quote/search response body into flat records.
pub fn parse_quote_body(status: StatusCode, body: &str) -> Result<Vec<QuoteRecord>, FetchError> {
    let parsed = serde_json::from_str::<Value>(body);

    // The provider reports bad keys and plan limits as {"Error Message": ...},
    // sometimes with a 200.
    if let Ok(Value::Object(obj)) = &parsed {
        if let Some(message) = obj.get("Error Message").and_then(Value::as_str) {
            return Err(FetchError::Api {
                message: message.to_string(),
            });
        }
    }

    if !status.is_success() {
        return Err(FetchError::Status {
            status,
            body: body.to_string(),
        });
    }

    let value = parsed.map_err(|err| FetchError::Decode {
        detail: format!("response is not valid JSON: {err}"),
        body: body.to_string(),
    })?;

    let Value::Array(items) = value else {
        return Err(FetchError::Decode {
            detail: "expected a JSON array of quotes".to_string(),
            body: body.to_string(),
        });
    };

    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(obj) => out.push(QuoteRecord::from_json_object(obj)),
            other => {
                return Err(FetchError::Decode {
                    detail: format!("quote #{idx} is not a JSON object: {other}"),
                    body: body.to_string(),
                })
            }
        }
    }
    Ok(out)
}
